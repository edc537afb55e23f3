// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Role verifiers: the only path from a parsed-but-untrusted document to a trusted one.
//!
//! Each verifier runs its role's checks in the order the protocol prescribes: signature
//! checks against the authority already trusted for the role, version checks against the
//! referencing document, rollback checks against the previously trusted copy, and an
//! expiration check. The referrer-hash check happens earlier still, at fetch time, because
//! downloads of referenced metadata are digest-checked as they stream in.
//!
//! A document that passes comes back wrapped in [`Verified`], and every function in this
//! library that needs a trusted document takes `Verified<T>`, so handing unverified
//! metadata to a consumer that requires trust is a type error.

use crate::error::{self, Result};
use crate::schema::{
    KeyHolder, MetaFile, Role, RoleId, RoleType, Root, Signed, Snapshot, Targets, Timestamp,
};
use chrono::{DateTime, Utc};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Deref;

/// A metadata document that has passed its role's verification checks, or was read back
/// from the trusted datastore (which only ever holds documents that passed them).
///
/// Dereferences to the role payload; the signatures and the full document are available
/// through [`Verified::doc`].
#[derive(Debug, Clone)]
pub struct Verified<T> {
    doc: Signed<T>,
}

impl<T> Verified<T> {
    /// Marks a document as trusted. Callers are the role verifiers in this module and the
    /// datastore load path; nothing else mints trust.
    pub(crate) fn trust(doc: Signed<T>) -> Self {
        Self { doc }
    }

    /// The full signed document.
    pub fn doc(&self) -> &Signed<T> {
        &self.doc
    }
}

impl<T> Deref for Verified<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.doc.signed
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Verifies a new root against the trusted root.
///
/// The new root must satisfy the *trusted* root's signature threshold for the root role,
/// and then its own threshold with its own keys. Its version must be exactly the successor
/// of the trusted version.
///
/// Expiration is not checked here. When a client is many root versions behind, intermediate
/// roots may well be expired; only the root that ends the rotation loop gets the freeze
/// check, which the orchestrator performs.
pub(crate) fn verify_root(trusted: &Verified<Root>, new: Signed<Root>) -> Result<Verified<Root>> {
    let role = RoleId::StandardRole(RoleType::Root);

    KeyHolder::Root(trusted.deref().clone())
        .verify(&role, &new)
        .context(error::VerifyTrustedMetadataSnafu {
            role: role.to_string(),
        })?;
    KeyHolder::Root(new.signed.clone())
        .verify(&role, &new)
        .context(error::VerifyMetadataSnafu {
            role: role.to_string(),
        })?;

    ensure!(
        new.signed.version.get() == trusted.version.get() + 1,
        error::RollbackAttackSnafu {
            role: role.to_string(),
            trusted_version: trusted.version.get(),
            new_version: new.signed.version.get(),
        }
    );

    Ok(Verified::trust(new))
}

/// Verifies a new timestamp against the trusted root and, if present, the previously
/// trusted timestamp.
pub(crate) fn verify_timestamp(
    root: &Verified<Root>,
    prev: Option<&Verified<Timestamp>>,
    new: Signed<Timestamp>,
    now: DateTime<Utc>,
) -> Result<Verified<Timestamp>> {
    let role = RoleId::StandardRole(RoleType::Timestamp);

    KeyHolder::Root(root.deref().clone())
        .verify(&role, &new)
        .context(error::VerifyMetadataSnafu {
            role: role.to_string(),
        })?;

    if let Some(prev) = prev {
        check_version_floor(&role, prev.version, &new.signed)?;
        check_content_consistency(&role, prev.doc(), &new)?;
        check_meta_versions(&role, &prev.meta, &new.signed.meta, false)?;
    }

    check_expiration(&role, &new.signed, now)?;
    Ok(Verified::trust(new))
}

/// Verifies a new snapshot against the trusted root and timestamp and, if present, the
/// previously trusted snapshot.
pub(crate) fn verify_snapshot(
    root: &Verified<Root>,
    timestamp: &Verified<Timestamp>,
    prev: Option<&Verified<Snapshot>>,
    new: Signed<Snapshot>,
    now: DateTime<Utc>,
) -> Result<Verified<Snapshot>> {
    let role = RoleId::StandardRole(RoleType::Snapshot);

    KeyHolder::Root(root.deref().clone())
        .verify(&role, &new)
        .context(error::VerifyMetadataSnafu {
            role: role.to_string(),
        })?;

    let recorded = timestamp
        .meta
        .get("snapshot.json")
        .context(error::MetaMissingSnafu {
            file: "snapshot.json",
            role: RoleType::Timestamp.to_string(),
        })?;
    check_recorded_version(&role, recorded, &new.signed)?;

    if let Some(prev) = prev {
        check_version_floor(&role, prev.version, &new.signed)?;
        // Any file listed in the trusted snapshot must continue to be listed.
        check_meta_versions(&role, &prev.meta, &new.signed.meta, true)?;
    }

    check_expiration(&role, &new.signed, now)?;
    Ok(Verified::trust(new))
}

/// Verifies a new targets document, top-level or delegated.
///
/// `holder` is the authority for the role's keys: the trusted root for the top-level
/// targets role, or the delegating role's `Delegations` for a delegated role. The trusted
/// snapshot must record this role's metadata file, and the document's version must equal
/// the recorded one.
pub(crate) fn verify_targets(
    holder: &KeyHolder,
    role: &RoleId,
    snapshot: &Verified<Snapshot>,
    prev: Option<&Verified<Targets>>,
    new: Signed<Targets>,
    now: DateTime<Utc>,
) -> Result<Verified<Targets>> {
    holder
        .verify(role, &new)
        .context(error::VerifyMetadataSnafu {
            role: role.to_string(),
        })?;

    let file = format!("{}.json", role);
    let recorded = snapshot
        .meta
        .get(&file)
        .context(error::MetaMissingSnafu {
            file,
            role: RoleType::Snapshot.to_string(),
        })?;
    check_recorded_version(role, recorded, &new.signed)?;

    if let Some(prev) = prev {
        check_version_floor(role, prev.version, &new.signed)?;
    }

    check_expiration(role, &new.signed, now)?;
    Ok(Verified::trust(new))
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Fails with `ExpiredMetadata` if `signed` expired strictly before `now`. Metadata that
/// expires exactly at `now` is still acceptable.
pub(crate) fn check_expiration<T: Role>(
    role: &RoleId,
    signed: &T,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure!(
        signed.expires() >= now,
        error::ExpiredMetadataSnafu {
            role: role.to_string(),
            expires: signed.expires(),
        }
    );
    Ok(())
}

/// Fails with `RollbackAttack` if `new` has a lower version than the trusted copy.
fn check_version_floor<T: Role>(role: &RoleId, trusted: NonZeroU64, new: &T) -> Result<()> {
    ensure!(
        new.version() >= trusted,
        error::RollbackAttackSnafu {
            role: role.to_string(),
            trusted_version: trusted.get(),
            new_version: new.version().get(),
        }
    );
    Ok(())
}

/// Fails with `RollbackAttack` if `new` claims the same version as the trusted document
/// but differs from it. A repository cannot publish two different documents under one
/// version number; identical re-fetches are short-circuited before verification, so a
/// same-version document seen here is an equivocation.
fn check_content_consistency<T>(role: &RoleId, trusted: &Signed<T>, new: &Signed<T>) -> Result<()>
where
    T: Role + PartialEq,
{
    ensure!(
        new.signed.version() != trusted.signed.version() || new == trusted,
        error::RollbackAttackSnafu {
            role: role.to_string(),
            trusted_version: trusted.signed.version().get(),
            new_version: new.signed.version().get(),
        }
    );
    Ok(())
}

/// Fails with `VersionMismatch` if `new` does not carry exactly the version the referencing
/// document recorded for it.
fn check_recorded_version<T: Role>(role: &RoleId, recorded: &MetaFile, new: &T) -> Result<()> {
    ensure!(
        new.version() == recorded.version,
        error::VersionMismatchSnafu {
            role: role.to_string(),
            expected: recorded.version.get(),
            found: new.version().get(),
        }
    );
    Ok(())
}

/// Walks the `meta` map of a trusted document and checks the corresponding entries of the
/// new document's `meta` map against it: no entry may regress in version, and if
/// `files_must_persist` (snapshot semantics), no entry may disappear.
fn check_meta_versions(
    role: &RoleId,
    trusted: &HashMap<String, MetaFile>,
    new: &HashMap<String, MetaFile>,
    files_must_persist: bool,
) -> Result<()> {
    for (file, trusted_meta) in trusted {
        match new.get(file) {
            Some(new_meta) => {
                ensure!(
                    new_meta.version >= trusted_meta.version,
                    error::MetaVersionRollbackSnafu {
                        role: role.to_string(),
                        file: file.clone(),
                        trusted_version: trusted_meta.version.get(),
                        new_version: new_meta.version.get(),
                    }
                );
            }
            None => {
                ensure!(
                    !files_must_persist,
                    error::SnapshotFileDroppedSnafu { file: file.clone() }
                );
            }
        }
    }
    Ok(())
}
