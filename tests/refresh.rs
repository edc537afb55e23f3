// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests of the refresh and download flow: the happy path, root rotation, and
//! each class of repository misbehavior the client must reject.


use ring::digest::{digest, SHA256};
use tempfile::TempDir;
use test_utils::{
    sign, targets_payload, to_bytes, RoleKey, TestRepo,
};
use tuft::schema::{RoleKeys, RoleType, Signed, Targets};
use tuft::{Error, UpdaterBuilder};

/// Publishes root v1 plus a v1 chain containing `file.txt`, returning the repo and the
/// trust-anchor root bytes.
fn simple_repo() -> (TestRepo, Vec<u8>) {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);
    let targets = sign(
        &targets_payload(1, &[("file.txt", b"hello")]),
        &[&repo.targets_key],
    );
    repo.put_target("file.txt", b"hello");
    repo.publish_chain(1, &targets, &[]);
    (repo, root_bytes)
}

fn signed_targets(repo: &TestRepo, version: u64, entries: &[(&str, &[u8])]) -> Signed<Targets> {
    sign(&targets_payload(version, entries), &[&repo.targets_key])
}

#[tokio::test]
async fn refresh_and_download() {
    let (repo, root_bytes) = simple_repo();
    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;

    updater.refresh().await.unwrap();
    assert_eq!(updater.root().version.get(), 1);
    assert_eq!(updater.timestamp().unwrap().version.get(), 1);
    assert_eq!(updater.snapshot().unwrap().version.get(), 1);
    assert_eq!(updater.targets().unwrap().version.get(), 1);

    let data = updater.download("file.txt").await.unwrap();
    assert_eq!(data, b"hello");

    // The downloaded bytes hash to exactly what the targets role recorded.
    let recorded = updater
        .targets()
        .unwrap()
        .targets
        .get("file.txt")
        .unwrap()
        .hashes
        .sha256
        .clone();
    assert_eq!(digest(&SHA256, &data).as_ref(), recorded.as_ref());
}

#[tokio::test]
async fn download_missing_target_fails() {
    let (repo, root_bytes) = simple_repo();
    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;

    updater.refresh().await.unwrap();
    let err = updater.download("missing.txt").await.unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }), "{}", err);
}

#[tokio::test]
async fn unchanged_timestamp_short_circuits() {
    let (repo, root_bytes) = simple_repo();
    let datastore = TempDir::new().unwrap();

    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();

    // A fresh client over the same datastore refetches the timestamp, finds it identical
    // to the trusted copy, and must not touch snapshot or targets at all.
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    repo.transport.clear_fetch_log();
    updater.refresh().await.unwrap();

    let fetched = repo.transport.fetched();
    assert!(fetched.contains(&"metadata/timestamp.json".to_owned()));
    assert!(
        !fetched.iter().any(|name| name.contains("snapshot.json")),
        "snapshot was fetched: {:?}",
        fetched
    );
    assert!(
        !fetched.iter().any(|name| name.contains("targets.json")),
        "targets was fetched: {:?}",
        fetched
    );

    // The short-circuited refresh still leaves a fully usable trust state.
    assert_eq!(updater.download("file.txt").await.unwrap(), b"hello");
}

#[tokio::test]
async fn root_rotation_updates_trust() {
    let (mut repo, root_bytes) = simple_repo();
    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();

    // Rotate the timestamp key and publish root v2 along with a fresh v2 chain signed by
    // the new key. The old root key still signs v2, and v2 signs itself.
    repo.timestamp_key = RoleKey::generate();
    repo.publish_root(2);
    let targets = signed_targets(&repo, 2, &[("file.txt", b"hello")]);
    repo.publish_chain(2, &targets, &[]);

    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.root().version.get(), 2);
    assert_eq!(updater.timestamp().unwrap().version.get(), 2);
    assert_eq!(updater.download("file.txt").await.unwrap(), b"hello");
}

#[tokio::test]
async fn root_version_must_be_sequential() {
    let (repo, root_bytes) = simple_repo();

    // Serve a root claiming version 3 where version 2 should be.
    let root = repo.root_payload(3);
    let bytes = to_bytes(&sign(&root, &[&repo.root_key]));
    repo.transport.put("metadata/2.root.json", bytes);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::RollbackAttack { .. }), "{}", err);
}

#[tokio::test]
async fn timestamp_rollback_detected() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);
    let targets = signed_targets(&repo, 2, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello");
    repo.publish_chain(2, &targets, &[]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.timestamp().unwrap().version.get(), 2);

    // The repository now serves version 1 again.
    let targets = signed_targets(&repo, 1, &[("file.txt", b"hello")]);
    repo.publish_chain(1, &targets, &[]);

    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::RollbackAttack { .. }), "{}", err);
}

#[tokio::test]
async fn newer_timestamp_accepted() {
    let (repo, root_bytes) = simple_repo();
    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();

    let targets = signed_targets(&repo, 2, &[("file.txt", b"hello v2")]);
    repo.put_target("file.txt", b"hello v2");
    repo.publish_chain(2, &targets, &[]);

    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.timestamp().unwrap().version.get(), 2);
    assert_eq!(updater.download("file.txt").await.unwrap(), b"hello v2");
}

#[tokio::test]
async fn timestamp_equivocation_detected() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);
    let targets = signed_targets(&repo, 2, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello");
    repo.publish_chain(2, &targets, &[]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();

    // Same timestamp version, different contents: the repository is telling two stories
    // under one version number.
    let targets = signed_targets(&repo, 2, &[("file.txt", b"tampered")]);
    repo.put_target("file.txt", b"tampered");
    repo.publish_chain(2, &targets, &[]);

    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::RollbackAttack { .. }), "{}", err);
}

#[tokio::test]
async fn expired_timestamp_detected() {
    let (repo, root_bytes) = simple_repo();

    let snapshot_bytes = repo.transport.get("metadata/snapshot.json").unwrap();
    repo.publish_timestamp(1, &snapshot_bytes, test_utils::long_ago());

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::ExpiredMetadata { .. }), "{}", err);
}

#[tokio::test]
async fn signature_threshold_enforced() {
    let repo = TestRepo::new();
    let second_timestamp_key = RoleKey::generate();

    // Root requires two distinct timestamp keys.
    let mut root = repo.root_payload(1);
    root.keys
        .insert(second_timestamp_key.keyid.clone(), second_timestamp_key.key.clone());
    root.roles.insert(
        RoleType::Timestamp,
        RoleKeys {
            keyids: vec![
                repo.timestamp_key.keyid.clone(),
                second_timestamp_key.keyid.clone(),
            ],
            threshold: test_utils::nz(2),
            _extra: std::collections::HashMap::new(),
        },
    );
    let root_bytes = repo.publish_root_signed(&root, &[&repo.root_key]);

    let targets = signed_targets(&repo, 1, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello");
    repo.publish_chain(1, &targets, &[]);
    let snapshot_bytes = repo.transport.get("metadata/snapshot.json").unwrap();

    // One authorized signature plus one from a key root never heard of: below threshold.
    // The unauthorized signature must not count toward it.
    let unauthorized = RoleKey::generate();
    repo.publish_timestamp_signed(
        1,
        &snapshot_bytes,
        test_utils::far_future(),
        &[&repo.timestamp_key, &unauthorized],
    );

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::VerifyMetadata { .. }), "{}", err);

    // Both authorized keys sign: the threshold is met.
    repo.publish_timestamp_signed(
        1,
        &snapshot_bytes,
        test_utils::far_future(),
        &[&repo.timestamp_key, &second_timestamp_key],
    );
    updater.refresh().await.unwrap();
    assert_eq!(updater.timestamp().unwrap().version.get(), 1);
}

#[tokio::test]
async fn snapshot_may_not_drop_files() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);
    let targets = signed_targets(&repo, 1, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello");
    let extra = signed_targets(&repo, 1, &[]);
    repo.publish_chain(1, &targets, &[("extra", &extra)]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes.clone(), datastore.path()).await;
    updater.refresh().await.unwrap();

    // The v2 snapshot silently forgets extra.json.
    let targets = signed_targets(&repo, 2, &[("file.txt", b"hello")]);
    repo.publish_chain(2, &targets, &[]);

    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::SnapshotFileDropped { .. }), "{}", err);
}

#[tokio::test]
async fn snapshot_hash_mismatch_detected() {
    let (repo, root_bytes) = simple_repo();

    // Replace the snapshot with bytes that cannot match the hash the timestamp records.
    repo.transport
        .put("metadata/snapshot.json", b"not the snapshot".to_vec());

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    let err = updater.refresh().await.unwrap_err();
    assert!(matches!(err, Error::HashMismatch { .. }), "{}", err);
}

#[tokio::test]
async fn oversized_target_rejected() {
    let repo = TestRepo::new();
    let root_bytes = repo.publish_root(1);
    // Metadata records a five-byte target, but the repository serves more.
    let targets = signed_targets(&repo, 1, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello world, this is far too long");
    repo.publish_chain(1, &targets, &[]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    let err = updater.download("file.txt").await.unwrap_err();
    assert!(matches!(err, Error::MaxSizeExceeded { .. }), "{}", err);
}

#[tokio::test]
async fn missing_trusted_root_is_fatal() {
    let repo = TestRepo::new();
    let datastore = TempDir::new().unwrap();
    let err = UpdaterBuilder::new(repo.metadata_url(), repo.targets_url())
        .transport(repo.transport.clone())
        .datastore(datastore.path())
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoTrustedRoot), "{}", err);
}

#[tokio::test]
async fn consistent_snapshot_filenames() {
    let mut repo = TestRepo::new();
    repo.consistent_snapshot = true;
    let root_bytes = repo.publish_root(1);
    let targets = signed_targets(&repo, 1, &[("file.txt", b"hello")]);
    repo.put_target("file.txt", b"hello");
    repo.publish_chain(1, &targets, &[]);

    let datastore = TempDir::new().unwrap();
    let mut updater = repo.updater(root_bytes, datastore.path()).await;
    updater.refresh().await.unwrap();
    assert_eq!(updater.download("file.txt").await.unwrap(), b"hello");

    // Version- and digest-prefixed names were used on the wire.
    let fetched = repo.transport.fetched();
    assert!(fetched.contains(&"metadata/1.snapshot.json".to_owned()));
    assert!(fetched.contains(&"metadata/1.targets.json".to_owned()));
    assert!(fetched.iter().any(|name| {
        name.starts_with("targets/") && name.ends_with(".file.txt")
    }));
}
