//! Decides when to attest and drives attestation runs.
//!
//! There is no internal timer. An external trigger calls
//! [`Scheduler::run_if_due`] (or [`Scheduler::is_scheduled`] followed by
//! [`Scheduler::run`]) as often as it likes.
//!
//! The marker is advanced before the statement is built: a run that fails
//! or crashes midway skips that interval instead of retrying it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chronicle_core::{is_due, AttestationInterval, AttestationStatement, ChainEntry};
use chronicle_store::Store;

use crate::attestor::Attestor;
use crate::config::ChronicleConfig;
use crate::error::{ChronicleError, Result};
use crate::marker::MarkerStore;

/// Schedules attestation runs.
pub struct Scheduler<S: Store> {
    attestor: Attestor<S>,
    marker: Arc<dyn MarkerStore>,
    interval: Option<AttestationInterval>,
    gather_timeout: Option<Duration>,
}

impl<S: Store> Scheduler<S> {
    /// Create a scheduler. `interval: None` disables attestation.
    pub fn new(
        attestor: Attestor<S>,
        marker: Arc<dyn MarkerStore>,
        interval: Option<AttestationInterval>,
    ) -> Self {
        Self {
            attestor,
            marker,
            interval,
            gather_timeout: None,
        }
    }

    /// Create a scheduler from validated settings.
    pub fn from_config(
        attestor: Attestor<S>,
        marker: Arc<dyn MarkerStore>,
        config: &ChronicleConfig,
    ) -> Result<Self> {
        let scheduler = Self::new(attestor, marker, config.attestation_interval()?);
        Ok(match config.attestation_timeout() {
            Some(timeout) => scheduler.with_gather_timeout(timeout),
            None => scheduler,
        })
    }

    /// Bound the time spent gathering a statement.
    ///
    /// Only the reads that build the statement are covered. Signing and the
    /// chain append run to completion once started, so a run can outlast
    /// `timeout` when the store is slow to accept the write. An expired
    /// limit fails the run with [`ChronicleError::Timeout`].
    pub fn with_gather_timeout(mut self, timeout: Duration) -> Self {
        self.gather_timeout = Some(timeout);
        self
    }

    pub fn gather_timeout(&self) -> Option<Duration> {
        self.gather_timeout
    }

    pub fn attestor(&self) -> &Attestor<S> {
        &self.attestor
    }

    pub fn interval(&self) -> Option<&AttestationInterval> {
        self.interval.as_ref()
    }

    /// Whether an attestation run is due at `now`.
    pub async fn is_scheduled(&self, now: DateTime<Utc>) -> Result<bool> {
        let Some(interval) = &self.interval else {
            debug!("scheduled attestation not configured");
            return Ok(false);
        };

        let sources_exist = self
            .attestor
            .chain()
            .store()
            .has_replication_sources()
            .await?;
        let last_run = self.marker.last_run().await?;

        let due = is_due(now, last_run, Some(interval), sources_exist);
        debug!(%interval, ?last_run, sources_exist, due, "attestation schedule checked");
        Ok(due)
    }

    /// Run an attestation unconditionally.
    ///
    /// Records `now` as the last run before anything else; a marker write
    /// failure aborts without touching the chain.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ChainEntry> {
        self.marker.record(now).await?;
        info!(%now, "attestation marker advanced");
        self.attest().await
    }

    /// Run an attestation if one is due, claiming the marker first.
    ///
    /// Returns `Ok(None)` when nothing is due or another scheduler claimed
    /// this interval.
    pub async fn run_if_due(&self, now: DateTime<Utc>) -> Result<Option<ChainEntry>> {
        let Some(interval) = &self.interval else {
            return Ok(None);
        };

        if !self
            .attestor
            .chain()
            .store()
            .has_replication_sources()
            .await?
        {
            debug!("no replication sources, nothing to attest");
            return Ok(None);
        }

        let last_run = self.marker.last_run().await?;
        if !is_due(now, last_run, Some(interval), true) {
            debug!(?last_run, %now, "attestation not due");
            return Ok(None);
        }

        if !self.marker.claim(last_run, now).await? {
            warn!(?last_run, %now, "attestation marker claimed elsewhere");
            return Ok(None);
        }
        info!(%now, "attestation marker claimed");

        self.attest().await.map(Some)
    }

    async fn attest(&self) -> Result<ChainEntry> {
        let statement = self.gather(self.attestor.clock().now()).await?;
        self.attestor.commit_statement(&statement).await
    }

    // An append already handed to storage is never abandoned.
    async fn gather(&self, at: DateTime<Utc>) -> Result<AttestationStatement> {
        match self.gather_timeout {
            Some(limit) => tokio::time::timeout(limit, self.attestor.build_statement(at))
                .await
                .map_err(|_| ChronicleError::Timeout(limit))?,
            None => self.attestor.build_statement(at).await,
        }
    }
}
