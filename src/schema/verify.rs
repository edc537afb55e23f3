// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold signature verification.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{KeyHolder, Role, RoleId, RoleKeys, Signed};
use snafu::{ensure, OptionExt};
use std::collections::{HashMap, HashSet};

impl KeyHolder {
    /// The public keys this holder can vouch for, by key ID.
    fn keys(&self) -> &HashMap<Decoded<Hex>, Key> {
        match self {
            KeyHolder::Root(root) => &root.keys,
            KeyHolder::Delegations(delegations) => &delegations.keys,
        }
    }

    /// Looks up the authorized key IDs and signature threshold for a role, failing with
    /// `RoleNotFound` if this holder does not delegate to it.
    fn role_keys(&self, role: &RoleId) -> Result<RoleKeys> {
        match (self, role) {
            (KeyHolder::Root(root), RoleId::StandardRole(role_type)) => root
                .roles
                .get(role_type)
                .cloned()
                .context(error::RoleNotFoundSnafu {
                    name: role_type.to_string(),
                }),
            (KeyHolder::Delegations(delegations), RoleId::DelegatedRole(name)) => delegations
                .roles
                .iter()
                .find(|delegated| &delegated.name == name)
                .map(|delegated| delegated.keys())
                .context(error::RoleNotFoundSnafu { name: name.clone() }),
            (_, role) => error::RoleNotFoundSnafu {
                name: role.to_string(),
            }
            .fail(),
        }
    }

    /// Checks the detached signatures of `document` against the keys this holder authorizes
    /// for `role`.
    ///
    /// Signatures are scanned in listed order. A signature whose key ID is not authorized
    /// for the role is skipped, not an error. Each authorized key counts at most once no
    /// matter how many signatures it produced, and scanning stops as soon as the threshold
    /// is reached.
    pub(crate) fn verify<T: Role>(&self, role: &RoleId, document: &Signed<T>) -> Result<()> {
        let canonical = document.signed.canonical_form()?;
        let role_keys = self.role_keys(role)?;
        let threshold = role_keys.threshold.get();
        let keys = self.keys();

        let mut verified: HashSet<&Decoded<Hex>> = HashSet::new();
        for signature in &document.signatures {
            if !role_keys.keyids.contains(&signature.keyid) {
                continue;
            }
            if let Some(key) = keys.get(&signature.keyid) {
                if key.verify(&canonical, &signature.sig) {
                    verified.insert(&signature.keyid);
                }
            }
            if verified.len() as u64 >= threshold {
                break;
            }
        }

        ensure!(
            verified.len() as u64 >= threshold,
            error::SignatureThresholdSnafu {
                role: role.to_string(),
                valid: verified.len() as u64,
                threshold,
            }
        );
        Ok(())
    }
}
