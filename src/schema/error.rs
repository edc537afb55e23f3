// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the metadata schema.

use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for metadata schema operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// A key ID in a `keys` map appeared more than once.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId {
        /// The duplicated key ID.
        keyid: String,
    },

    /// A key's claimed ID did not match the ID computed from the key itself.
    #[snafu(display(
        "Invalid key ID {}: calculated {} from the key contents",
        keyid,
        calculated
    ))]
    InvalidKeyId {
        /// The claimed key ID.
        keyid: String,
        /// The key ID computed from the canonical form of the key.
        calculated: String,
    },

    /// Failed to serialize a value as canonical JSON.
    #[snafu(display("Failed to serialize {} as canonical JSON: {}", what, source))]
    JsonSerialization {
        /// What we were serializing.
        what: String,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// A role name was not found in the key holder consulted to verify it.
    #[snafu(display("Role {} not found", name))]
    RoleNotFound {
        /// The missing role name.
        name: String,
    },

    /// Fewer distinct authorized keys produced valid signatures than the role requires.
    #[snafu(display(
        "Signature threshold of {} not met for role {} ({} valid signatures)",
        threshold,
        role,
        valid
    ))]
    SignatureThreshold {
        /// The role whose signatures were checked.
        role: String,
        /// The number of distinct authorized key IDs with valid signatures.
        valid: u64,
        /// The threshold the role requires.
        threshold: u64,
    },
}
