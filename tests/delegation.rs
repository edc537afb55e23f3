// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests of delegation-graph resolution: priority order, terminating semantics, hashed-bin
//! delegations, scope narrowing, and the visited-role bound.


use ring::digest::{digest, SHA256};
use tempfile::TempDir;
use test_utils::{
    delegated_role, delegations, nz, sign, targets_payload, RoleKey, TestRepo,
};
use tuft::schema::{DelegatedRole, PathSet, Signed, Targets};
use tuft::{Error, Limits};

/// Builds a top-level targets document with no targets of its own that delegates to the
/// given roles.
fn delegating_targets(
    repo: &TestRepo,
    version: u64,
    keys: &[&RoleKey],
    roles: Vec<DelegatedRole>,
) -> Signed<Targets> {
    let mut targets = targets_payload(version, &[]);
    targets.delegations = Some(delegations(keys, roles));
    sign(&targets, &[&repo.targets_key])
}

#[tokio::test]
async fn delegated_target_found_and_downloaded() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key],
        vec![delegated_role("alpha", &alpha_key, &["alpha/*"], false)],
    );
    let alpha = sign(
        &targets_payload(1, &[("alpha/x.txt", b"delegated bytes")]),
        &[&alpha_key],
    );
    repo.put_target("alpha/x.txt", b"delegated bytes");
    repo.publish_chain(1, &top, &[("alpha", &alpha)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(
        updater.download("alpha/x.txt").await.unwrap(),
        b"delegated bytes"
    );
}

#[tokio::test]
async fn nested_delegation_found() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let beta_key = RoleKey::generate();

    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key],
        vec![delegated_role("alpha", &alpha_key, &["files/*"], false)],
    );
    // alpha delegates onward to beta for a narrower slice of its own scope.
    let mut alpha_payload = targets_payload(1, &[]);
    alpha_payload.delegations = Some(delegations(
        &[&beta_key],
        vec![delegated_role("beta", &beta_key, &["files/beta/*"], false)],
    ));
    let alpha = sign(&alpha_payload, &[&alpha_key]);
    let beta = sign(
        &targets_payload(1, &[("files/beta/x.txt", b"nested")]),
        &[&beta_key],
    );
    repo.put_target("files/beta/x.txt", b"nested");
    repo.publish_chain(1, &top, &[("alpha", &alpha), ("beta", &beta)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.download("files/beta/x.txt").await.unwrap(), b"nested");
}

#[tokio::test]
async fn later_sibling_consulted_when_earlier_lacks_target() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let beta_key = RoleKey::generate();

    // Both roles match a/*; alpha is listed first but does not have the file. Since alpha
    // is not terminating, beta must be consulted and wins.
    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key, &beta_key],
        vec![
            delegated_role("alpha", &alpha_key, &["a/*"], false),
            delegated_role("beta", &beta_key, &["a/*"], true),
        ],
    );
    let alpha = sign(&targets_payload(1, &[]), &[&alpha_key]);
    let beta = sign(&targets_payload(1, &[("a/x.txt", b"from beta")]), &[&beta_key]);
    repo.put_target("a/x.txt", b"from beta");
    repo.publish_chain(1, &top, &[("alpha", &alpha), ("beta", &beta)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.download("a/x.txt").await.unwrap(), b"from beta");
}

#[tokio::test]
async fn terminating_role_hides_later_siblings() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let gamma_key = RoleKey::generate();

    // alpha matches the path, is terminating, and does not have the file; gamma (which
    // does) is listed after it and must never be consulted.
    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key, &gamma_key],
        vec![
            delegated_role("alpha", &alpha_key, &["a/*"], true),
            delegated_role("gamma", &gamma_key, &["a/*"], false),
        ],
    );
    let alpha = sign(&targets_payload(1, &[]), &[&alpha_key]);
    let gamma = sign(&targets_payload(1, &[("a/x.txt", b"unreachable")]), &[&gamma_key]);
    repo.put_target("a/x.txt", b"unreachable");
    repo.publish_chain(1, &top, &[("alpha", &alpha), ("gamma", &gamma)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();

    let err = updater.download("a/x.txt").await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }), "{}", err);
    // gamma's metadata was never even fetched.
    assert!(!repo
        .transport
        .fetched()
        .contains(&"metadata/gamma.json".to_owned()));
}

#[tokio::test]
async fn hashed_bin_delegation() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let target_name = "file.txt";
    let target_digest = hex::encode(digest(&SHA256, target_name.as_bytes()));

    let bin_key = RoleKey::generate();
    let other_key = RoleKey::generate();

    // One bin whose prefix covers the target's path digest, and one that cannot match any
    // hex digest at all.
    let matching_bin = DelegatedRole {
        name: "bin-match".to_owned(),
        keyids: vec![bin_key.keyid.clone()],
        threshold: nz(1),
        paths: PathSet::PathHashPrefixes(vec![target_digest[..2].to_owned()]),
        terminating: false,
    };
    let unmatched_bin = DelegatedRole {
        name: "bin-other".to_owned(),
        keyids: vec![other_key.keyid.clone()],
        threshold: nz(1),
        paths: PathSet::PathHashPrefixes(vec!["zz".to_owned()]),
        terminating: false,
    };

    let top = delegating_targets(
        &repo,
        1,
        &[&bin_key, &other_key],
        vec![unmatched_bin, matching_bin],
    );
    let bin = sign(
        &targets_payload(1, &[(target_name, b"binned")]),
        &[&bin_key],
    );
    let other = sign(&targets_payload(1, &[]), &[&other_key]);
    repo.put_target(target_name, b"binned");
    repo.publish_chain(1, &top, &[("bin-match", &bin), ("bin-other", &other)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.download(target_name).await.unwrap(), b"binned");
    // The non-matching bin was out of scope for this path and was not fetched.
    assert!(!repo
        .transport
        .fetched()
        .contains(&"metadata/bin-other.json".to_owned()));
}

#[tokio::test]
async fn out_of_scope_path_is_unreachable() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key],
        vec![delegated_role("alpha", &alpha_key, &["a/*"], false)],
    );
    // alpha lists a file its delegation never granted it.
    let alpha = sign(
        &targets_payload(1, &[("b/secret.txt", b"out of scope")]),
        &[&alpha_key],
    );
    repo.put_target("b/secret.txt", b"out of scope");
    repo.publish_chain(1, &top, &[("alpha", &alpha)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();

    let err = updater.download("b/secret.txt").await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }), "{}", err);
}

#[tokio::test]
async fn visited_role_bound_enforced() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let keys: Vec<RoleKey> = (0..3).map(|_| RoleKey::generate()).collect();
    let roles = vec![
        delegated_role("role0", &keys[0], &["a/*"], false),
        delegated_role("role1", &keys[1], &["a/*"], false),
        delegated_role("role2", &keys[2], &["a/*"], false),
    ];
    let key_refs: Vec<&RoleKey> = keys.iter().collect();
    let top = delegating_targets(&repo, 1, &key_refs, roles);

    let docs: Vec<Signed<Targets>> = keys
        .iter()
        .map(|key| sign(&targets_payload(1, &[]), &[key]))
        .collect();
    repo.publish_chain(
        1,
        &top,
        &[("role0", &docs[0]), ("role1", &docs[1]), ("role2", &docs[2])],
    );

    let datastore = TempDir::new().unwrap();
    let limits = Limits {
        max_delegated_roles: 2,
        ..Limits::default()
    };
    let mut updater = repo
        .updater_with_limits(root_bytes, datastore.path(), limits)
        .await;
    updater.refresh().await.unwrap();

    // Nobody owns a/x.txt, but the search may not establish that by visiting all three
    // candidate roles; it must stop at the bound.
    let err = updater.download("a/x.txt").await.unwrap_err();
    assert!(matches!(err, Error::MaxRolesVisited { .. }), "{}", err);
}

#[tokio::test]
async fn delegated_role_with_wrong_signature_rejected() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);

    let alpha_key = RoleKey::generate();
    let rogue_key = RoleKey::generate();
    let top = delegating_targets(
        &repo,
        1,
        &[&alpha_key],
        vec![delegated_role("alpha", &alpha_key, &["a/*"], false)],
    );
    // alpha's document is signed by a key the delegation never authorized.
    let alpha = sign(&targets_payload(1, &[("a/x.txt", b"evil")]), &[&rogue_key]);
    repo.put_target("a/x.txt", b"evil");
    repo.publish_chain(1, &top, &[("alpha", &alpha)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();

    let err = updater.download("a/x.txt").await.unwrap_err();
    assert!(matches!(err, Error::VerifyMetadata { .. }), "{}", err);
}
