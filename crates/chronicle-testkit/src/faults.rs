//! Fault injection around a real [`Store`].
//!
//! [`FaultyStore`] forwards every call to an inner store, except where a
//! fault has been switched on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chronicle_core::{Blake3Hash, ChainEntry, NewEntry};
use chronicle_store::{
    AppendResult, InsertResult, NewReplicationSource, ReplicationSource, Result, Store, StoreError,
};

/// A store wrapper that fails or stalls on demand.
pub struct FaultyStore<S: Store> {
    inner: Arc<S>,
    fail_listing: AtomicBool,
    fail_appends: AtomicBool,
    fail_tip_reads: AtomicBool,
    fail_marker_writes: AtomicBool,
    listing_delay_ms: AtomicU64,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_listing: AtomicBool::new(false),
            fail_appends: AtomicBool::new(false),
            fail_tip_reads: AtomicBool::new(false),
            fail_marker_writes: AtomicBool::new(false),
            listing_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Make `list_replication_sources` fail.
    pub fn fail_listing(&self, on: bool) {
        self.fail_listing.store(on, Ordering::SeqCst);
    }

    /// Make `append_entry` fail.
    pub fn fail_appends(&self, on: bool) {
        self.fail_appends.store(on, Ordering::SeqCst);
    }

    /// Make `tip` fail.
    pub fn fail_tip_reads(&self, on: bool) {
        self.fail_tip_reads.store(on, Ordering::SeqCst);
    }

    /// Make `record_attestation` and `claim_attestation` fail.
    pub fn fail_marker_writes(&self, on: bool) {
        self.fail_marker_writes.store(on, Ordering::SeqCst);
    }

    /// Sleep before answering `list_replication_sources`.
    pub fn delay_listing(&self, delay: Duration) {
        self.listing_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn injected(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Task(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Store for FaultyStore<S> {
    async fn append_entry(
        &self,
        expected_prev: Option<u64>,
        entry: NewEntry,
    ) -> Result<AppendResult> {
        Self::injected(&self.fail_appends, "append")?;
        self.inner.append_entry(expected_prev, entry).await
    }

    async fn tip(&self) -> Result<Option<ChainEntry>> {
        Self::injected(&self.fail_tip_reads, "tip")?;
        self.inner.tip().await
    }

    async fn get_entry(&self, sequence: u64) -> Result<Option<ChainEntry>> {
        self.inner.get_entry(sequence).await
    }

    async fn get_entry_by_hash(&self, curr_hash: &Blake3Hash) -> Result<Option<ChainEntry>> {
        self.inner.get_entry_by_hash(curr_hash).await
    }

    async fn get_entries_range(&self, from: u64, to: u64) -> Result<Vec<ChainEntry>> {
        self.inner.get_entries_range(from, to).await
    }

    async fn entries_since(&self, after: u64) -> Result<Vec<ChainEntry>> {
        self.inner.entries_since(after).await
    }

    async fn entry_count(&self) -> Result<u64> {
        self.inner.entry_count().await
    }

    async fn add_replication_source(
        &self,
        source: NewReplicationSource,
    ) -> Result<ReplicationSource> {
        self.inner.add_replication_source(source).await
    }

    async fn list_replication_sources(&self) -> Result<Vec<ReplicationSource>> {
        let delay = self.listing_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Self::injected(&self.fail_listing, "listing")?;
        self.inner.list_replication_sources().await
    }

    async fn get_replication_source(&self, unique_id: &str) -> Result<Option<ReplicationSource>> {
        self.inner.get_replication_source(unique_id).await
    }

    async fn has_replication_sources(&self) -> Result<bool> {
        self.inner.has_replication_sources().await
    }

    async fn insert_replicated_entry(
        &self,
        source_id: i64,
        entry: &ChainEntry,
    ) -> Result<InsertResult> {
        self.inner.insert_replicated_entry(source_id, entry).await
    }

    async fn latest_replicated_entry(&self, source_id: i64) -> Result<Option<ChainEntry>> {
        self.inner.latest_replicated_entry(source_id).await
    }

    async fn get_replicated_range(
        &self,
        source_id: i64,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEntry>> {
        self.inner.get_replicated_range(source_id, from, to).await
    }

    async fn last_attestation(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_attestation().await
    }

    async fn record_attestation(&self, now: DateTime<Utc>) -> Result<()> {
        Self::injected(&self.fail_marker_writes, "marker")?;
        self.inner.record_attestation(now).await
    }

    async fn claim_attestation(
        &self,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Self::injected(&self.fail_marker_writes, "marker")?;
        self.inner.claim_attestation(expected, now).await
    }
}
