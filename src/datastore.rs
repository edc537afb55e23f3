// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use log::debug;
use snafu::{ensure, ResultExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// `Datastore` is the durable store for trusted metadata: one slot per role name, holding
/// the raw bytes of the last document that passed verification for that role. Documents are
/// written here only after they have been verified, so a read always yields bytes that were
/// trusted at the time they were stored.
#[derive(Debug, Clone)]
pub(crate) struct Datastore {
    /// A lock around retrieving the datastore path.
    path_lock: Arc<RwLock<DatastorePath>>,
    /// A lock to treat the `system_time` function as a critical section.
    time_lock: Arc<Mutex<()>>,
}

impl Datastore {
    pub(crate) fn new(path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            path_lock: Arc::new(RwLock::new(match path {
                None => DatastorePath::TempDir(TempDir::new().context(error::DatastoreInitSnafu)?),
                Some(p) => DatastorePath::Path(p),
            })),
            time_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn read(&self) -> RwLockReadGuard<'_, DatastorePath> {
        self.path_lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, DatastorePath> {
        self.path_lock.write().await
    }

    /// Gets the contents of a slot, or `None` if nothing has been stored in it.
    pub(crate) async fn bytes(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let lock = self.read().await;
        let path = lock.path().join(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(None),
                _ => Err(err).context(error::DatastoreOpenSnafu { path: &path }),
            },
        }
    }

    /// Replaces the contents of a slot. The write goes to a scratch file first and is
    /// renamed into place, so a slot never holds a half-written document.
    pub(crate) async fn create(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let lock = self.write().await;
        let path = lock.path().join(file);
        let scratch = lock.path().join(format!("{}.incoming", file));
        tokio::fs::write(&scratch, bytes)
            .await
            .context(error::DatastoreCreateSnafu { path: &scratch })?;
        tokio::fs::rename(&scratch, &path)
            .await
            .context(error::DatastoreCreateSnafu { path: &path })
    }

    /// Deletes a slot. Removing a slot that does not exist is not an error.
    pub(crate) async fn remove(&self, file: &str) -> Result<()> {
        let lock = self.write().await;
        let path = lock.path().join(file);
        debug!("removing '{}'", path.display());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::DatastoreRemoveSnafu { path: &path }),
            },
        }
    }

    /// Samples the system clock, ensuring it has not stepped backward since it was last
    /// sampled. Expiration checks use this time; a clock that moves backward would let
    /// expired metadata appear fresh again.
    pub(crate) async fn system_time(&self) -> Result<DateTime<Utc>> {
        // Treat this function as a critical section. This lock is not used for anything
        // else.
        let lock = self.time_lock.lock().await;

        let file = "latest_known_time.json";
        let poss_latest_known_time = self
            .bytes(file)
            .await?
            .map(|b| serde_json::from_slice::<DateTime<Utc>>(&b));

        let sys_time = Utc::now();

        if let Some(Ok(latest_known_time)) = poss_latest_known_time {
            ensure!(
                sys_time >= latest_known_time,
                error::SystemTimeSteppedBackwardSnafu {
                    sys_time,
                    latest_known_time
                }
            );
        }

        // Serializes to an RFC 3339 time string.
        let serialized = serde_json::to_vec(&sys_time).context(error::DatastoreSerializeSnafu {
            what: "latest known time".to_owned(),
        })?;
        self.create(file, &serialized).await?;

        drop(lock);
        Ok(sys_time)
    }
}

/// Because `TempDir` is an RAII object, we need to hold on to it. This private enum allows
/// us to hold either a `TempDir` or a `PathBuf` depending on whether or not the user wants
/// to manage the directory.
#[derive(Debug)]
enum DatastorePath {
    /// Path to a user-managed directory.
    Path(PathBuf),
    /// A `TempDir` that we created on the user's behalf.
    TempDir(TempDir),
}

impl DatastorePath {
    /// Provides convenient access to the underlying filepath.
    fn path(&self) -> &Path {
        match self {
            DatastorePath::Path(p) => p,
            DatastorePath::TempDir(t) => t.path(),
        }
    }
}
