// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// The datastore could not create its backing directory.
    #[snafu(display("Failed to initialize datastore: {}", source))]
    DatastoreInit {
        source: std::io::Error,
    },

    /// A file in the datastore could not be read.
    #[snafu(display("Failed to read datastore file {}: {}", path.display(), source))]
    DatastoreOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file in the datastore could not be written.
    #[snafu(display("Failed to write datastore file {}: {}", path.display(), source))]
    DatastoreCreate {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file in the datastore could not be removed.
    #[snafu(display("Failed to remove datastore file {}: {}", path.display(), source))]
    DatastoreRemove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A value could not be serialized for the datastore.
    #[snafu(display("Failed to serialize {} for the datastore: {}", what, source))]
    DatastoreSerialize {
        what: String,
        source: serde_json::Error,
    },

    /// Metadata was expired at the time it was checked: a freeze attack, or badly stale
    /// repository content.
    #[snafu(display("Freeze attack: {} metadata expired at {}", role, expires))]
    ExpiredMetadata {
        role: String,
        expires: DateTime<Utc>,
    },

    /// A downloaded document or target did not match the hash recorded for it by the
    /// referencing trusted document.
    #[snafu(display(
        "Hash mismatch for {}: calculated {}, expected {}",
        context,
        calculated,
        expected
    ))]
    HashMismatch {
        context: String,
        calculated: String,
        expected: String,
    },

    /// A path could not be joined onto a base URL.
    #[snafu(display("Failed to join \"{}\" to URL \"{}\": {}", path, url, source))]
    JoinUrl {
        path: String,
        url: url::Url,
        source: url::ParseError,
    },

    /// The delegation graph search visited more roles than the configured bound allows.
    /// This bounds total work against pathological or malicious delegation graphs.
    #[snafu(display("Delegation search visited more than {} roles", max))]
    MaxRolesVisited {
        max: u64,
    },

    /// A download exceeded the size bound known for it. Every fetch this library performs
    /// is capped either by a length recorded in trusted metadata or by a `Limits` default.
    #[snafu(display("Download exceeded max size of {} bytes as specified by {}", max_size, specifier))]
    MaxSizeExceeded {
        max_size: u64,
        specifier: &'static str,
    },

    /// A referencing document has no entry for a file it is required to describe.
    #[snafu(display("Metadata for {} missing from {}", file, role))]
    MetaMissing {
        file: String,
        role: String,
    },

    /// A per-file version in a new document regressed below the version recorded in the
    /// trusted copy of the same document.
    #[snafu(display(
        "Rollback attack: {} metadata lists {} at version {}, but the trusted copy lists version {}",
        role,
        file,
        new_version,
        trusted_version
    ))]
    MetaVersionRollback {
        role: String,
        file: String,
        trusted_version: u64,
        new_version: u64,
    },

    /// There is no trusted root in the datastore to anchor verification. A trusted root
    /// must be supplied out of band before the first refresh.
    #[snafu(display("No trusted root metadata in the datastore"))]
    NoTrustedRoot,

    /// A fetched document could not be parsed into the expected metadata type.
    #[snafu(display("Failed to parse {} metadata: {}", role, source))]
    ParseMetadata {
        role: String,
        source: serde_json::Error,
    },

    /// A document read back from the trusted datastore could not be parsed. This indicates
    /// local corruption, not repository misbehavior.
    #[snafu(display("Failed to parse trusted {} metadata from the datastore: {}", role, source))]
    ParseTrustedMetadata {
        role: String,
        source: serde_json::Error,
    },

    /// A new document's version is not acceptable given the version already trusted for
    /// the same role.
    #[snafu(display(
        "Rollback attack: refusing {} metadata version {} given trusted version {}",
        role,
        new_version,
        trusted_version
    ))]
    RollbackAttack {
        role: String,
        trusted_version: u64,
        new_version: u64,
    },

    /// A file listed in the trusted snapshot disappeared from the new snapshot. Snapshots
    /// may only ever add files.
    #[snafu(display(
        "Rollback attack: file {} is listed in the trusted snapshot but missing from the new snapshot",
        file
    ))]
    SnapshotFileDropped {
        file: String,
    },

    /// The system clock reported a time earlier than one it reported previously.
    #[snafu(display(
        "System time stepped backward: system time {}, last recorded time {}",
        sys_time,
        latest_known_time
    ))]
    SystemTimeSteppedBackward {
        sys_time: DateTime<Utc>,
        latest_known_time: DateTime<Utc>,
    },

    /// No role in the delegation graph claims the requested target path.
    #[snafu(display("Target not found: {}", target))]
    TargetNotFound {
        target: String,
    },

    /// A transport operation failed.
    #[snafu(display("Failed to fetch {}: {}", url, source))]
    Transport {
        url: url::Url,
        source: TransportError,
    },

    /// A target name that resolves outside the repository root, or to nothing at all, is
    /// never looked up.
    #[snafu(display("Unsafe target name \"{}\": {}", name, reason))]
    UnsafeTargetName {
        name: String,
        reason: &'static str,
    },

    /// A document's own signatures did not satisfy the threshold its key holder requires.
    #[snafu(display("Failed to verify {} metadata: {}", role, source))]
    VerifyMetadata {
        role: String,
        source: crate::schema::Error,
    },

    /// A document failed verification against the previously trusted authority for its
    /// role.
    #[snafu(display("Failed to verify {} metadata against trusted keys: {}", role, source))]
    VerifyTrustedMetadata {
        role: String,
        source: crate::schema::Error,
    },

    /// A document's version does not equal the version the referencing trusted document
    /// recorded for it.
    #[snafu(display(
        "{} metadata version is {}, but the referencing document records version {}",
        role,
        found,
        expected
    ))]
    VersionMismatch {
        role: String,
        expected: u64,
        found: u64,
    },
}
