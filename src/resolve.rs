// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of target ownership through the delegation graph.
//!
//! Starting at the top-level targets role, the search is depth-first in the order roles
//! list their delegations. A role that lists the target in its own `targets` map owns it
//! outright. Otherwise each delegation whose scope (glob paths or hash-prefix bins) covers
//! the target is searched recursively; a find anywhere propagates up immediately, while
//! "not found" moves on to the next sibling, unless the delegation was terminating, which
//! ends the search at that level whether or not the target was found.
//!
//! Delegated targets documents are fetched and verified on demand, so resolving a path
//! touches only the branch of the graph that could own it. Because a candidate must match
//! the scope patterns at *every* level of the chain, a role can never serve a path its
//! delegating parent did not grant it.

use crate::error::{self, Result};
use crate::fetch::{fetch_max_size, fetch_sha256};
use crate::schema::{DelegatedRole, Delegations, KeyHolder, RoleId, Signed, Targets};
use crate::transport::IntoVec;
use crate::{encode_filename, join_url, verify, TargetName, Updater};
use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};

impl Updater {
    /// Finds the name of the role that owns `target`, or `None` if no role anywhere in the
    /// delegation graph claims it. Fails with [`crate::Error::MaxRolesVisited`] if the
    /// search would visit more delegated roles than `Limits::max_delegated_roles`.
    pub(crate) async fn resolve_target(&mut self, target: &TargetName) -> Result<Option<String>> {
        let now = self.datastore.system_time().await?;
        let mut visited: u64 = 0;
        self.find_ownership("targets", target, now, &mut visited)
            .await
    }

    #[async_recursion]
    async fn find_ownership(
        &mut self,
        role: &str,
        target: &TargetName,
        now: DateTime<Utc>,
        visited: &mut u64,
    ) -> Result<Option<String>> {
        let doc = match self.targets_doc(role) {
            Some(doc) => doc,
            None => return Ok(None),
        };

        // A role that lists the target itself is the owner; its delegations are not
        // consulted for a path it claims directly.
        if doc.targets.contains_key(target.resolved()) {
            return Ok(Some(role.to_owned()));
        }

        let delegations = match &doc.delegations {
            Some(delegations) => delegations.clone(),
            None => return Ok(None),
        };

        for child in &delegations.roles {
            if !child.paths.matched_target(target.resolved()) {
                continue;
            }

            *visited += 1;
            ensure!(
                *visited <= self.limits.max_delegated_roles,
                error::MaxRolesVisitedSnafu {
                    max: self.limits.max_delegated_roles,
                }
            );

            self.load_delegated_targets(&delegations, child, now).await?;
            if let Some(owner) = self.find_ownership(&child.name, target, now, visited).await? {
                return Ok(Some(owner));
            }

            if child.terminating {
                // A terminating delegation in scope ends the search at this level; later
                // siblings are never consulted for this path.
                debug!(
                    "role '{}' is terminating; not considering roles delegated after it",
                    child.name
                );
                break;
            }
        }

        Ok(None)
    }

    /// Fetches and verifies the targets document of a delegated role, keyed by the trusted
    /// snapshot's record of it and signed by keys its delegating parent authorized. A role
    /// already verified during this refresh is not fetched again.
    async fn load_delegated_targets(
        &mut self,
        parent: &Delegations,
        child: &DelegatedRole,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.delegated.contains_key(&child.name) {
            return Ok(());
        }

        let file = format!("{}.json", child.name);
        let snapshot = self
            .snapshot
            .as_ref()
            .context(error::MetaMissingSnafu {
                file: file.clone(),
                role: "snapshot",
            })?;
        let recorded = snapshot
            .meta
            .get(&file)
            .cloned()
            .context(error::MetaMissingSnafu {
                file: file.clone(),
                role: "snapshot",
            })?;

        let path = if self.root.consistent_snapshot {
            format!("{}.{}.json", recorded.version, encode_filename(&child.name))
        } else {
            format!("{}.json", encode_filename(&child.name))
        };
        let url = join_url(&self.metadata_base_url, &path)?;
        let max_size = recorded.length.unwrap_or(self.limits.max_targets_size);
        let stream = match &recorded.hashes {
            Some(hashes) => {
                fetch_sha256(
                    self.transport.as_ref(),
                    url,
                    max_size,
                    "delegated targets length in snapshot metadata",
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
            serde_json::from_slice(&data).with_context(|_| error::ParseMetadataSnafu {
                role: child.name.clone(),
            })?;
        let holder = KeyHolder::Delegations(parent.clone());
        let role_id = RoleId::DelegatedRole(child.name.clone());
        let snapshot = self
            .snapshot
            .as_ref()
            .context(error::MetaMissingSnafu {
                file: file.clone(),
                role: "snapshot",
            })?;
        let trusted = verify::verify_targets(&holder, &role_id, snapshot, None, new, now)?;

        debug!("loaded delegated targets role '{}'", child.name);
        self.delegated.insert(child.name.clone(), trusted);
        Ok(())
    }
}
