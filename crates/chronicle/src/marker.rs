//! Persistence of the "last attestation run" marker.
//!
//! Two backends: a text file holding an RFC 3339 timestamp, and the
//! single-row marker table of a [`Store`]. The file marker serializes its
//! own callers but offers no protection against other processes; use the
//! store marker when several processes share one chain.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::Mutex;

use chronicle_core::attestation::{format_datetime, parse_datetime};
use chronicle_store::Store;

use crate::error::{ChronicleError, Result};

/// Where the scheduler remembers its last run.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Time of the last run, `None` before the first one.
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>>;

    /// Overwrite the marker with `now`.
    async fn record(&self, now: DateTime<Utc>) -> Result<()>;

    /// Overwrite the marker with `now` only if it still reads `expected`.
    async fn claim(&self, expected: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool>;
}

/// Marker kept in a text file, at second precision.
pub struct FileMarker {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Option<DateTime<Utc>>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChronicleError::filesystem(&self.path, e)),
        };

        if text.trim().is_empty() {
            return Ok(None);
        }

        parse_datetime(&text).map(Some).map_err(|e| {
            ChronicleError::filesystem(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            )
        })
    }

    // Temp file + rename: readers see the old or the new marker, never a mix.
    async fn write(&self, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ChronicleError::filesystem(parent, e))?;
            }
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, format_datetime(&now))
            .await
            .map_err(|e| ChronicleError::filesystem(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ChronicleError::filesystem(&self.path, e))?;

        Ok(())
    }
}

#[async_trait]
impl MarkerStore for FileMarker {
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn record(&self, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(now).await
    }

    async fn claim(&self, expected: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let current = self.read().await?;
        if current != expected.map(|e| e.trunc_subsecs(0)) {
            return Ok(false);
        }
        self.write(now).await?;
        Ok(true)
    }
}

/// Marker kept in the store's attestation table.
pub struct StoreMarker<S: Store> {
    store: Arc<S>,
}

impl<S: Store> StoreMarker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> MarkerStore for StoreMarker<S> {
    async fn last_run(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.last_attestation().await?)
    }

    async fn record(&self, now: DateTime<Utc>) -> Result<()> {
        Ok(self.store.record_attestation(now).await?)
    }

    async fn claim(&self, expected: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.store.claim_attestation(expected, now).await?)
    }
}
