//! Provides the metadata model: typed representations of the four TUF document kinds and
//! the key, role, and delegation value objects they contain.
//!
//! Documents parse into these types through validating deserializers; a value of one of
//! these types says nothing about trust. Trust is granted only by the verifiers in
//! [`crate::verify`], which wrap documents in [`crate::Verified`] after the protocol checks
//! pass.

mod de;
pub mod decoded;
mod error;
pub mod key;
mod verify;

use crate::schema::decoded::{Decoded, Hex};
pub use crate::schema::error::{Error, Result};
use crate::schema::key::Key;
use chrono::{DateTime, Utc};
use globset::Glob;
use olpc_cjson::CanonicalFormatter;
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other top-level roles
    /// used in the system.
    Root,
    /// The snapshot role signs a metadata file that provides information about the latest
    /// version of all targets metadata on the repository (the top-level targets role and all
    /// delegated roles).
    Snapshot,
    /// The targets role's signature indicates which target files are trusted by clients.
    Targets,
    /// The timestamp role is used to prevent an adversary from replaying an out-of-date
    /// signed metadata file whose signature has not yet expired.
    Timestamp,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// A role identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleId {
    /// Top level roles are identified by a `RoleType`.
    StandardRole(RoleType),
    /// A delegated targets role is identified by its name.
    DelegatedRole(String),
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleId::StandardRole(role_type) => role_type.fmt(f),
            RoleId::DelegatedRole(name) => name.fmt(f),
        }
    }
}

/// Common trait implemented by all role payloads.
pub trait Role: Serialize {
    /// The type of role this object represents.
    const TYPE: RoleType;

    /// Determines when metadata should be considered expired and no longer trusted by
    /// clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    fn version(&self) -> NonZeroU64;

    /// A deterministic JSON serialization used as the exact input to signing and hashing.
    /// Object keys are sorted lexicographically at every nesting level, with no
    /// insignificant whitespace, so every party computes identical bytes.
    /// [More info on canonical JSON](http://wiki.laptop.org/go/Canonical_JSON)
    fn canonical_form(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
        self.serialize(&mut ser).context(error::JsonSerializationSnafu {
            what: "role".to_owned(),
        })?;
        Ok(data)
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json or a delegating role) that made this signature.
    pub keyid: Decoded<Hex>,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: Decoded<Hex>,
}

/// A `KeyHolder` is the authority consulted when verifying the signatures of a role: the
/// trusted `Root` for top-level roles, or the delegating role's `Delegations` for delegated
/// targets.
#[derive(Debug, Clone)]
pub enum KeyHolder {
    /// Delegations verify delegated targets.
    Delegations(Delegations),
    /// Root verifies the top level targets, snapshot, timestamp, and root.
    Root(Root),
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root.json file is signed by the root role's keys. It indicates which keys are
/// authorized for all top-level roles, including the root role itself. Revocation and
/// replacement of top-level role keys, including for the root role, is done by changing the
/// keys listed for the roles in this file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// A string that contains the version number of the TUF specification. Its format
    /// follows the Semantic Versioning 2.0.0 (semver) specification.
    pub spec_version: String,

    /// A boolean indicating whether the repository supports consistent snapshots. When
    /// consistent snapshots is `true`, targets and certain metadata filenames are prefixed
    /// with either a version number or digest.
    pub consistent_snapshot: bool,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by
    /// clients.
    pub expires: DateTime<Utc>,

    /// The KEYID must be correct for the specified KEY. Clients MUST calculate each KEYID
    /// to verify this is correct for the associated key; the deserializer enforces this.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// A list of roles, the keys associated with each role, and the threshold of signatures
    /// used for each role.
    pub roles: HashMap<RoleType, RoleKeys>,

    /// Extra arguments found during deserialization.
    ///
    /// We must store these to correctly verify signatures for this object.
    ///
    /// If you're instantiating this struct, you should make this `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Represents the key IDs used for a role and the threshold of signatures required to
/// validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents a `timestamp.json` file. The timestamp file is signed by a timestamp key. It
/// indicates the latest version of the snapshot metadata and is frequently resigned to limit
/// the amount of time a client can be kept unaware of interference with obtaining updates.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by
    /// clients.
    pub expires: DateTime<Utc>,

    /// METAFILES for the timestamp role. This MUST only include a description of the
    /// snapshot.json file.
    pub meta: HashMap<String, MetaFile>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The snapshot.json file is signed by the snapshot role. It MUST list the version numbers
/// of the top-level targets metadata and all delegated targets metadata. It MAY also list
/// their lengths and file hashes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by
    /// clients.
    pub expires: DateTime<Utc>,

    /// METAFILES, one entry per targets-family metadata file on the repository, keyed by
    /// the file path relative to the metadata base URL.
    pub meta: HashMap<String, MetaFile>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Describes a metadata file referenced from timestamp.json or snapshot.json:
/// ```text
///  { METAPATH : {
///        "version" : VERSION,
///        ("length" : LENGTH, |
///         "hashes" : HASHES) }
///    , ...
///  }
/// ```
/// `length` and `hashes` are OPTIONAL and can be omitted to reduce metadata size, in which
/// case the client uses a default download limit for the listed file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MetaFile {
    /// The integer length in bytes of the metadata file at METAPATH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// One or more hashes of the metadata file at METAPATH, keyed by hash function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Represents the hash dictionary in a metadata file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest of a file, hex-encoded.
    pub sha256: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents a `targets.json` file, either the top-level targets role or a delegated
/// targets role. The "signed" portion of targets.json is as follows:
/// ```text
/// { "_type" : "targets",
///   "spec_version" : SPEC_VERSION,
///   "version" : VERSION,
///   "expires" : EXPIRES,
///   "targets" : TARGETS,
///   ("delegations" : DELEGATIONS)
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// A string that contains the version number of the TUF specification.
    pub spec_version: String,

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata file with a
    /// version number less than the one currently trusted.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer trusted by
    /// clients.
    pub expires: DateTime<Utc>,

    /// Each key of the TARGETS object is a TARGETPATH, a path to a file that is relative to
    /// a mirror's base URL of targets.
    pub targets: HashMap<String, Target>,

    /// Delegations describes subsets of the targets for which responsibility is delegated
    /// to another role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// TARGETS is an object whose format is the following:
/// ```text
/// { TARGETPATH : {
///       "length" : LENGTH,
///       "hashes" : HASHES,
///       ("custom" : { ... }) }
///   , ...
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The integer length in bytes of the target file at TARGETPATH. Downloads of this
    /// target must never read more than this many bytes.
    pub length: u64,

    /// The hashes of the target file, computed on its full contents.
    pub hashes: Hashes,

    /// If defined, the elements and values of "custom" will be made available to the client
    /// application. The information in "custom" is opaque to the framework.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Delegations are found in a `targets.json` file. DELEGATIONS is an object whose format is
/// the following:
/// ```text
/// { "keys" : {
///       KEYID : KEY,
///       ... },
///   "roles" : [{
///       "name": ROLENAME,
///       "keyids" : [ KEYID, ... ] ,
///       "threshold" : THRESHOLD,
///       ("path_hash_prefixes" : [ HEX_DIGEST, ... ] |
///        "paths" : [ PATHPATTERN, ... ]),
///       "terminating": TERMINATING,
///   }, ... ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Delegations {
    /// Lists the public keys to verify signatures of delegated targets roles. Revocation
    /// and replacement of delegated targets roles keys is done by changing the keys in this
    /// field in the delegating role's metadata.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The list of delegated roles, in priority order.
    pub roles: Vec<DelegatedRole>,
}

/// Each role delegated in a targets file is considered a delegated role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role. For example, "projects".
    pub name: String,

    /// The key IDs used by this role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// The paths governed by this role. Exactly one of `paths` and `path_hash_prefixes`
    /// must be present; a document carrying both, or neither, fails to parse.
    #[serde(flatten)]
    pub paths: PathSet,

    /// Indicates whether delegations after this one should be consulted for a path this
    /// role's scope matches.
    pub terminating: bool,
}

impl DelegatedRole {
    /// Returns the key IDs and threshold of this role in `RoleKeys` form, for signature
    /// verification.
    pub fn keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }
}

/// Specifies the target paths that a delegated role controls.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum PathSet {
    /// The "paths" list describes paths that the role is trusted to provide. Clients MUST
    /// check that a target is in one of the trusted paths of all roles in a delegation
    /// chain, not just in a trusted path of the role that describes the target file.
    /// PATHPATTERN supports the Unix shell-style wildcard convention, e.g. the pattern
    /// "targets/*.tgz" matches "targets/foo.tgz" but not "targets/foo.txt".
    #[serde(rename = "paths")]
    Paths(Vec<String>),

    /// The "path_hash_prefixes" list succinctly describes a set of target paths:
    /// each target path whose SHA-256 hex digest starts with one of the listed prefixes is
    /// in scope. This is useful to split a large number of targets into separate bins
    /// identified by consistent hashing.
    #[serde(rename = "path_hash_prefixes")]
    PathHashPrefixes(Vec<String>),
}

impl PathSet {
    /// Given a target path, determines if this path set's scope covers it.
    pub fn matched_target(&self, target: &str) -> bool {
        match self {
            Self::Paths(paths) => paths.iter().any(|path| Self::matched_path(path, target)),
            Self::PathHashPrefixes(prefixes) => prefixes
                .iter()
                .any(|prefix| Self::matched_prefix(prefix, target)),
        }
    }

    /// Given a shell style wildcard path, determines if `target` matches the pattern.
    fn matched_path(wildcard: &str, target: &str) -> bool {
        match Glob::new(wildcard) {
            Ok(glob) => glob.compile_matcher().is_match(target),
            Err(_) => false,
        }
    }

    /// Given a path hash prefix, determines if the hex digest of `target` starts with it.
    fn matched_prefix(prefix: &str, target: &str) -> bool {
        let hash = hex::encode(digest(&SHA256, target.as_bytes()));
        hash.starts_with(prefix)
    }
}

impl<'de> Deserialize<'de> for PathSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = PathSet;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map with exactly one of `paths` or `path_hash_prefixes`")
            }

            fn visit_map<M>(self, mut access: M) -> std::result::Result<PathSet, M::Error>
            where
                M: serde::de::MapAccess<'de>,
            {
                use serde::de::Error as _;

                let mut paths: Option<Vec<String>> = None;
                let mut prefixes: Option<Vec<String>> = None;
                while let Some(field) = access.next_key::<String>()? {
                    match field.as_str() {
                        "paths" => {
                            if paths.replace(access.next_value()?).is_some() {
                                return Err(M::Error::duplicate_field("paths"));
                            }
                        }
                        "path_hash_prefixes" => {
                            if prefixes.replace(access.next_value()?).is_some() {
                                return Err(M::Error::duplicate_field("path_hash_prefixes"));
                            }
                        }
                        _ => {
                            access.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }
                match (paths, prefixes) {
                    (Some(paths), None) => Ok(PathSet::Paths(paths)),
                    (None, Some(prefixes)) => Ok(PathSet::PathHashPrefixes(prefixes)),
                    (Some(_), Some(_)) => Err(M::Error::custom(
                        "a delegated role cannot specify both `paths` and `path_hash_prefixes`",
                    )),
                    (None, None) => Err(M::Error::custom(
                        "a delegated role must specify one of `paths` or `path_hash_prefixes`",
                    )),
                }
            }
        }

        deserializer.deserialize_map(Visitor)
    }
}
