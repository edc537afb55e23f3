// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! `tuft` is a client-side trust-verification engine for TUF (The Update Framework)
//! repositories.
//!
//! Given signed, versioned metadata documents fetched from a possibly-compromised
//! repository, it determines which documents may be trusted, detects rollback, freeze, and
//! mix-and-match attacks, resolves target-file ownership through the delegation graph, and
//! verifies that downloaded artifacts match the trust chain. Unverified data is never
//! promoted into the trusted state: documents enter as plain [`schema::Signed`] values and
//! only the role verifiers produce the [`Verified`] documents the rest of the pipeline
//! consumes.
//!
//! The entry point is [`Updater`], built through [`UpdaterBuilder`]. An updater is anchored
//! by a trusted root document in its durable datastore (supplied out of band on first use),
//! and exposes two operations:
//!
//! * [`Updater::refresh`] walks the protocol's fetch order: root rotation one version at a
//!   time, then timestamp, then the snapshot the timestamp names, then the targets the
//!   snapshot names, verifying and persisting each document before anything depends on it.
//! * [`Updater::download`] resolves which role is authoritative for a target path
//!   (fetching and verifying delegated targets metadata on demand), then fetches the
//!   artifact capped at its recorded length and checked against its recorded digest.
//!
//! How files are obtained is abstracted behind the [`Transport`] trait; a filesystem
//! implementation is provided. Every fetch this library performs is bounded, either by a
//! length recorded in trusted metadata or by a [`Limits`] default.

mod datastore;
pub mod error;
mod fetch;
mod io;
mod resolve;
pub mod schema;
mod target_name;
mod transport;
mod verify;

pub use crate::error::{Error, Result};
pub use crate::target_name::TargetName;
pub use crate::transport::{
    FilesystemTransport, IntoVec, Transport, TransportError, TransportErrorKind, TransportStream,
};
pub use crate::verify::Verified;

use crate::datastore::Datastore;
use crate::fetch::{fetch_max_size, fetch_optional_max_size, fetch_sha256};
use crate::schema::{RoleId, RoleType, Root, Signed, Snapshot, Target, Targets, Timestamp};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

/// The datastore slot holding the trusted root document.
const ROOT_SLOT: &str = "root.json";
/// The datastore slot holding the trusted timestamp document.
const TIMESTAMP_SLOT: &str = "timestamp.json";
/// The datastore slot holding the trusted snapshot document.
const SNAPSHOT_SLOT: &str = "snapshot.json";
/// The datastore slot holding the trusted top-level targets document.
const TARGETS_SLOT: &str = "targets.json";

/// Everything in a role name that isn't alphanumeric, `.`, `-`, or `_` is percent-encoded
/// before the name becomes part of a metadata filename.
const CHARACTERS_TO_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'_')
    .remove(b'-');

/// Percent-encodes a potentially dangerous role name for use as a filename.
pub(crate) fn encode_filename(name: &str) -> String {
    utf8_percent_encode(name, CHARACTERS_TO_ESCAPE).to_string()
}

/// Bounds on the sizes and amounts of work this library will accept from a repository.
///
/// The size limits apply only where trusted metadata does not record a length for the file
/// being fetched; a recorded length always wins. The limits exist so that a malicious or
/// broken repository cannot cause unbounded downloads or unbounded graph traversal.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum size in bytes of a root metadata document. Root documents are fetched before
    /// anything can vouch for their size.
    pub max_root_size: u64,

    /// Maximum size in bytes of the timestamp metadata document, which likewise has no
    /// referrer to record its size.
    pub max_timestamp_size: u64,

    /// Maximum size in bytes of the snapshot metadata document, when the timestamp does not
    /// record its length.
    pub max_snapshot_size: u64,

    /// Maximum size in bytes of a targets metadata document, when the snapshot does not
    /// record its length.
    pub max_targets_size: u64,

    /// Maximum number of root versions to walk forward in a single refresh.
    pub max_root_updates: u64,

    /// Maximum number of delegated roles a single target resolution may visit.
    pub max_delegated_roles: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 1024 * 1024,
            max_timestamp_size: 1024 * 1024,
            max_snapshot_size: 10 * 1024 * 1024,
            max_targets_size: 10 * 1024 * 1024,
            max_root_updates: 1024,
            max_delegated_roles: 32,
        }
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Builds an [`Updater`].
#[derive(Debug)]
pub struct UpdaterBuilder {
    transport: Box<dyn Transport>,
    metadata_base_url: Url,
    targets_base_url: Url,
    datastore_path: Option<PathBuf>,
    limits: Limits,
    root_bytes: Option<Vec<u8>>,
}

impl UpdaterBuilder {
    /// Creates a builder for a repository whose metadata and targets live under the given
    /// base URLs. The default transport reads local files; the default datastore is a
    /// temporary directory (suitable only for testing, since trust state then dies with the
    /// process).
    pub fn new(metadata_base_url: Url, targets_base_url: Url) -> Self {
        Self {
            transport: Box::new(FilesystemTransport),
            metadata_base_url: ensure_trailing_slash(metadata_base_url),
            targets_base_url: ensure_trailing_slash(targets_base_url),
            datastore_path: None,
            limits: Limits::default(),
            root_bytes: None,
        }
    }

    /// Sets the transport used to fetch repository files.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Sets the directory where trusted metadata is persisted across refreshes.
    pub fn datastore<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.datastore_path = Some(path.into());
        self
    }

    /// Overrides the default [`Limits`].
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Supplies a root document to bootstrap trust, used only if the datastore does not
    /// already hold one. The bytes must be obtained out of band; this document is the
    /// axiomatic trust anchor and is not verified against anything else.
    pub fn trust_root(mut self, root: Vec<u8>) -> Self {
        self.root_bytes = Some(root);
        self
    }

    /// Creates the [`Updater`], loading trusted state from the datastore. Fails with
    /// [`Error::NoTrustedRoot`] if the datastore holds no root and none was supplied with
    /// [`UpdaterBuilder::trust_root`].
    pub async fn build(self) -> Result<Updater> {
        let datastore = Datastore::new(self.datastore_path)?;

        if let Some(root_bytes) = self.root_bytes {
            if datastore.bytes(ROOT_SLOT).await?.is_none() {
                // Make sure the bytes parse as a root document before anchoring on them.
                let _: Signed<Root> = serde_json::from_slice(&root_bytes).context(
                    error::ParseTrustedMetadataSnafu {
                        role: RoleType::Root.to_string(),
                    },
                )?;
                datastore.create(ROOT_SLOT, &root_bytes).await?;
            }
        }

        let root = load_trusted::<Root>(&datastore, ROOT_SLOT)
            .await?
            .context(error::NoTrustedRootSnafu)?;
        let timestamp = load_trusted::<Timestamp>(&datastore, TIMESTAMP_SLOT).await?;
        let snapshot = load_trusted::<Snapshot>(&datastore, SNAPSHOT_SLOT).await?;
        let targets = load_trusted::<Targets>(&datastore, TARGETS_SLOT).await?;

        Ok(Updater {
            transport: self.transport,
            metadata_base_url: self.metadata_base_url,
            targets_base_url: self.targets_base_url,
            datastore,
            limits: self.limits,
            root,
            timestamp,
            snapshot,
            targets,
            delegated: HashMap::new(),
        })
    }
}

/// Reads a document back from the trusted datastore. The datastore only ever receives
/// documents that passed verification, so a successful parse here re-establishes trust.
async fn load_trusted<T: DeserializeOwned + schema::Role>(
    datastore: &Datastore,
    slot: &str,
) -> Result<Option<Verified<T>>> {
    match datastore.bytes(slot).await? {
        Some(bytes) => {
            let doc: Signed<T> =
                serde_json::from_slice(&bytes).context(error::ParseTrustedMetadataSnafu {
                    role: T::TYPE.to_string(),
                })?;
            Ok(Some(Verified::trust(doc)))
        }
        None => Ok(None),
    }
}

/// Base URLs must end in `/` so that `Url::join` appends instead of replacing the last
/// path segment.
fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A TUF repository client. See the [crate documentation](crate) for an overview.
#[derive(Debug)]
pub struct Updater {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) metadata_base_url: Url,
    pub(crate) targets_base_url: Url,
    pub(crate) datastore: Datastore,
    pub(crate) limits: Limits,
    pub(crate) root: Verified<Root>,
    pub(crate) timestamp: Option<Verified<Timestamp>>,
    pub(crate) snapshot: Option<Verified<Snapshot>>,
    pub(crate) targets: Option<Verified<Targets>>,
    /// Delegated targets documents verified during the current refresh, by role name.
    pub(crate) delegated: HashMap<String, Verified<Targets>>,
}

impl Updater {
    /// Refreshes trusted metadata from the repository: any newer root versions, then the
    /// timestamp → snapshot → targets cascade. Each document is verified against the
    /// already-trusted state and persisted before anything depends on it. If the fetched
    /// timestamp is byte-identical to the trusted one, the refresh ends successfully
    /// without fetching snapshot or targets.
    pub async fn refresh(&mut self) -> Result<()> {
        // Delegated targets are pinned by snapshot versions that this refresh may replace.
        self.delegated.clear();

        let now = self.datastore.system_time().await?;
        self.update_root().await?;

        // Intermediate roots during rotation may be expired; the root that ends the
        // rotation must not be.
        verify::check_expiration(&RoleId::StandardRole(RoleType::Root), &*self.root, now)?;

        let timestamp = match self.update_timestamp(now).await? {
            None => return Ok(()),
            Some(timestamp) => timestamp,
        };
        let snapshot = self.update_snapshot(&timestamp, now).await?;
        let targets = self.update_targets(&snapshot, now).await?;

        self.timestamp = Some(timestamp);
        self.snapshot = Some(snapshot);
        self.targets = Some(targets);
        Ok(())
    }

    /// Resolves the owner of `name` through the delegation graph and downloads the target,
    /// verifying its length and digest against the owning role's record of it. Fails with
    /// [`Error::TargetNotFound`] if no role claims the path.
    ///
    /// Runs [`Updater::refresh`] first if this updater has not yet loaded targets metadata.
    pub async fn download(&mut self, name: &str) -> Result<Vec<u8>> {
        if self.targets.is_none() {
            self.refresh().await?;
        }

        let name = TargetName::new(name)?;
        let owner = self
            .resolve_target(&name)
            .await?
            .context(error::TargetNotFoundSnafu { target: name.raw() })?;
        let target = self
            .targets_doc(&owner)
            .and_then(|doc| doc.targets.get(name.resolved()))
            .cloned()
            .context(error::TargetNotFoundSnafu { target: name.raw() })?;

        let (sha256, filename) = self.target_digest_and_filename(&target, &name);
        let url = join_url(&self.targets_base_url, &filename)?;
        let stream = fetch_sha256(
            self.transport.as_ref(),
            url,
            target.length,
            "target length in targets metadata",
            &sha256,
        )
        .await?;
        stream.into_vec().await
    }

    /// The trusted root document.
    pub fn root(&self) -> &Verified<Root> {
        &self.root
    }

    /// The trusted timestamp document, if a refresh has loaded one.
    pub fn timestamp(&self) -> Option<&Verified<Timestamp>> {
        self.timestamp.as_ref()
    }

    /// The trusted snapshot document, if a refresh has loaded one.
    pub fn snapshot(&self) -> Option<&Verified<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// The trusted top-level targets document, if a refresh has loaded one.
    pub fn targets(&self) -> Option<&Verified<Targets>> {
        self.targets.as_ref()
    }

    /// The trusted targets document for a role: the top-level document for `"targets"`,
    /// otherwise a delegated role loaded by a resolution in the current refresh.
    pub(crate) fn targets_doc(&self, role: &str) -> Option<&Verified<Targets>> {
        if role == "targets" {
            self.targets.as_ref()
        } else {
            self.delegated.get(role)
        }
    }

    /// Walks forward through newer root versions, one at a time, verifying and persisting
    /// each. Stops when the repository has no next version.
    async fn update_root(&mut self) -> Result<()> {
        for _ in 0..self.limits.max_root_updates {
            let next_version = self.root.version.get() + 1;
            let path = format!("{}.root.json", next_version);
            let url = join_url(&self.metadata_base_url, &path)?;
            let stream = match fetch_optional_max_size(
                self.transport.as_ref(),
                url,
                self.limits.max_root_size,
                "max_root_size argument",
            )
            .await?
            {
                Some(stream) => stream,
                None => return Ok(()),
            };
            let data = stream.into_vec().await?;
            let new_root: Signed<Root> =
                serde_json::from_slice(&data).context(error::ParseMetadataSnafu {
                    role: RoleType::Root.to_string(),
                })?;
            let new_root = verify::verify_root(&self.root, new_root)?;
            self.datastore.create(ROOT_SLOT, &data).await?;
            debug!("trusted root updated to version {}", new_root.version);

            let rotated = role_keys_changed(&self.root, &new_root, RoleType::Timestamp)
                || role_keys_changed(&self.root, &new_root, RoleType::Snapshot);
            self.root = new_root;

            if rotated {
                // Continuity checks against the stored timestamp/snapshot are meaningless
                // across a key rotation; the next refresh steps start from nothing.
                debug!("timestamp or snapshot keys rotated; purging stored metadata");
                self.datastore.remove(TIMESTAMP_SLOT).await?;
                self.datastore.remove(SNAPSHOT_SLOT).await?;
                self.datastore.remove(TARGETS_SLOT).await?;
                self.timestamp = None;
                self.snapshot = None;
                self.targets = None;
            }
        }
        warn!(
            "stopped after walking {} root versions in one refresh",
            self.limits.max_root_updates
        );
        Ok(())
    }

    /// Fetches and verifies the timestamp document. Returns `None` if the fetched bytes are
    /// identical to the trusted ones, in which case nothing downstream can have changed and
    /// the refresh is done.
    async fn update_timestamp(&self, now: DateTime<Utc>) -> Result<Option<Verified<Timestamp>>> {
        let url = join_url(&self.metadata_base_url, "timestamp.json")?;
        let stream = fetch_max_size(
            self.transport.as_ref(),
            url,
            self.limits.max_timestamp_size,
            "max_timestamp_size argument",
        )
        .await?;
        let data = stream.into_vec().await?;

        if let Some(stored) = self.datastore.bytes(TIMESTAMP_SLOT).await? {
            if stored == data && self.downstream_is_current() {
                debug!("timestamp metadata unchanged; ending refresh early");
                return Ok(None);
            }
        }

        let new: Signed<Timestamp> =
            serde_json::from_slice(&data).context(error::ParseMetadataSnafu {
                role: RoleType::Timestamp.to_string(),
            })?;
        let new = verify::verify_timestamp(&self.root, self.timestamp.as_ref(), new, now)?;
        self.datastore.create(TIMESTAMP_SLOT, &data).await?;
        Ok(Some(new))
    }

    /// Whether the in-memory snapshot and targets are the ones the trusted timestamp
    /// chain currently names. An interrupted earlier refresh can leave the timestamp ahead
    /// of its dependents; in that state an unchanged timestamp must not end the refresh.
    fn downstream_is_current(&self) -> bool {
        let (timestamp, snapshot, targets) = match (&self.timestamp, &self.snapshot, &self.targets)
        {
            (Some(timestamp), Some(snapshot), Some(targets)) => (timestamp, snapshot, targets),
            _ => return false,
        };
        timestamp.meta.get("snapshot.json").map(|meta| meta.version) == Some(snapshot.version)
            && snapshot.meta.get("targets.json").map(|meta| meta.version) == Some(targets.version)
    }

    /// Fetches and verifies the snapshot document named by the trusted timestamp.
    async fn update_snapshot(
        &self,
        timestamp: &Verified<Timestamp>,
        now: DateTime<Utc>,
    ) -> Result<Verified<Snapshot>> {
        let recorded = timestamp
            .meta
            .get("snapshot.json")
            .context(error::MetaMissingSnafu {
                file: "snapshot.json",
                role: RoleType::Timestamp.to_string(),
            })?;
        let path = if self.root.consistent_snapshot {
            format!("{}.snapshot.json", recorded.version)
        } else {
            "snapshot.json".to_owned()
        };
        let url = join_url(&self.metadata_base_url, &path)?;
        let max_size = recorded.length.unwrap_or(self.limits.max_snapshot_size);
        let stream = match &recorded.hashes {
            Some(hashes) => {
                fetch_sha256(
                    self.transport.as_ref(),
                    url,
                    max_size,
                    "snapshot length in timestamp metadata",
                    &hashes.sha256,
                )
                .await?
            }
            None => {
                fetch_max_size(
                    self.transport.as_ref(),
                    url,
                    max_size,
                    "max_snapshot_size argument",
                )
                .await?
            }
        };
        let data = stream.into_vec().await?;

        let new: Signed<Snapshot> =
            serde_json::from_slice(&data).context(error::ParseMetadataSnafu {
                role: RoleType::Snapshot.to_string(),
            })?;
        let new = verify::verify_snapshot(&self.root, timestamp, self.snapshot.as_ref(), new, now)?;
        self.datastore.create(SNAPSHOT_SLOT, &data).await?;
        Ok(new)
    }

    /// Fetches and verifies the top-level targets document named by the trusted snapshot.
    async fn update_targets(
        &self,
        snapshot: &Verified<Snapshot>,
        now: DateTime<Utc>,
    ) -> Result<Verified<Targets>> {
        let recorded = snapshot
            .meta
            .get("targets.json")
            .context(error::MetaMissingSnafu {
                file: "targets.json",
                role: RoleType::Snapshot.to_string(),
            })?;
        let path = if self.root.consistent_snapshot {
            format!("{}.targets.json", recorded.version)
        } else {
            "targets.json".to_owned()
        };
        let url = join_url(&self.metadata_base_url, &path)?;
        let max_size = recorded.length.unwrap_or(self.limits.max_targets_size);
        let stream = match &recorded.hashes {
            Some(hashes) => {
                fetch_sha256(
                    self.transport.as_ref(),
                    url,
                    max_size,
                    "targets length in snapshot metadata",
                    &hashes.sha256,
                )
                .await?
            }
            None => {
                fetch_max_size(
                    self.transport.as_ref(),
                    url,
                    max_size,
                    "max_targets_size argument",
                )
                .await?
            }
        };
        let data = stream.into_vec().await?;

        let new: Signed<Targets> =
            serde_json::from_slice(&data).context(error::ParseMetadataSnafu {
                role: RoleType::Targets.to_string(),
            })?;
        let holder = schema::KeyHolder::Root((*self.root).clone());
        let new = verify::verify_targets(
            &holder,
            &RoleId::StandardRole(RoleType::Targets),
            snapshot,
            self.targets.as_ref(),
            new,
            now,
        )?;
        self.datastore.create(TARGETS_SLOT, &data).await?;
        Ok(new)
    }

    /// Prepends the target digest to the name when consistent snapshots are in use.
    /// Returns both the digest and the filename to fetch.
    pub(crate) fn target_digest_and_filename(
        &self,
        target: &Target,
        name: &TargetName,
    ) -> (Vec<u8>, String) {
        let sha256 = target.hashes.sha256.clone().into_vec();
        if self.root.consistent_snapshot {
            let filename = format!("{}.{}", hex::encode(&sha256), name.resolved());
            (sha256, filename)
        } else {
            (sha256, name.resolved().to_owned())
        }
    }
}

/// Compares a role's authorized keys and threshold between two root documents.
fn role_keys_changed(old: &Verified<Root>, new: &Verified<Root>, role: RoleType) -> bool {
    old.roles.get(&role) != new.roles.get(&role)
}

/// Joins `path` onto a base URL.
pub(crate) fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path).with_context(|_| error::JoinUrlSnafu {
        path: path.to_owned(),
        url: base.clone(),
    })
}
