//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chronicle_core::{Blake3Hash, ChainEntry, NewEntry};

use crate::error::{Result, StoreError};
use crate::traits::{AppendResult, InsertResult, NewReplicationSource, ReplicationSource, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; a
/// single write lock arbitrates the tip.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Local chain indexed by sequence.
    entries: BTreeMap<u64, ChainEntry>,

    /// Last sequence handed out; never reused.
    last_sequence: u64,

    /// Sources in registration order.
    sources: Vec<ReplicationSource>,

    /// Replicated chains: source id -> (remote sequence -> entry).
    replicated: HashMap<i64, BTreeMap<u64, ChainEntry>>,

    last_attestation: Option<DateTime<Utc>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Task(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// Matches the SQLite backend's millisecond column.
fn truncate_millis(dt: DateTime<Utc>) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(dt.timestamp_millis())
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {}", dt)))
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_entry(
        &self,
        expected_prev: Option<u64>,
        entry: NewEntry,
    ) -> Result<AppendResult> {
        let mut inner = self.write()?;

        let current = inner.entries.keys().next_back().copied();
        if current != expected_prev {
            tracing::debug!(?expected_prev, ?current, "append rejected, tip moved");
            return Ok(AppendResult::TipMoved { current });
        }

        let sequence = inner.last_sequence + 1;
        let entry = entry.into_entry(sequence, expected_prev.unwrap_or(0));
        inner.last_sequence = sequence;
        inner.entries.insert(sequence, entry.clone());

        Ok(AppendResult::Appended(entry))
    }

    async fn tip(&self) -> Result<Option<ChainEntry>> {
        let inner = self.read()?;
        Ok(inner.entries.values().next_back().cloned())
    }

    async fn get_entry(&self, sequence: u64) -> Result<Option<ChainEntry>> {
        let inner = self.read()?;
        Ok(inner.entries.get(&sequence).cloned())
    }

    async fn get_entry_by_hash(&self, curr_hash: &Blake3Hash) -> Result<Option<ChainEntry>> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .values()
            .find(|e| e.curr_hash == *curr_hash)
            .cloned())
    }

    async fn get_entries_range(&self, from: u64, to: u64) -> Result<Vec<ChainEntry>> {
        if from > to {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        Ok(inner.entries.range(from..=to).map(|(_, e)| e.clone()).collect())
    }

    async fn entries_since(&self, after: u64) -> Result<Vec<ChainEntry>> {
        let inner = self.read()?;
        Ok(inner
            .entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn entry_count(&self) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner.entries.len() as u64)
    }

    async fn add_replication_source(
        &self,
        source: NewReplicationSource,
    ) -> Result<ReplicationSource> {
        let mut inner = self.write()?;

        if inner.sources.iter().any(|s| s.unique_id == source.unique_id) {
            return Err(StoreError::AlreadyExists(format!(
                "replication source {}",
                source.unique_id
            )));
        }

        let id = inner.sources.last().map(|s| s.id + 1).unwrap_or(1);
        let stored = ReplicationSource {
            id,
            unique_id: source.unique_id,
            name: source.name,
            url: source.url,
            public_key: source.public_key,
        };
        inner.sources.push(stored.clone());

        Ok(stored)
    }

    async fn list_replication_sources(&self) -> Result<Vec<ReplicationSource>> {
        let inner = self.read()?;
        Ok(inner.sources.clone())
    }

    async fn get_replication_source(&self, unique_id: &str) -> Result<Option<ReplicationSource>> {
        let inner = self.read()?;
        Ok(inner
            .sources
            .iter()
            .find(|s| s.unique_id == unique_id)
            .cloned())
    }

    async fn has_replication_sources(&self) -> Result<bool> {
        let inner = self.read()?;
        Ok(!inner.sources.is_empty())
    }

    async fn insert_replicated_entry(
        &self,
        source_id: i64,
        entry: &ChainEntry,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;

        if !inner.sources.iter().any(|s| s.id == source_id) {
            return Err(StoreError::NotFound(format!(
                "replication source id {}",
                source_id
            )));
        }

        let chain = inner.replicated.entry(source_id).or_default();
        if let Some(existing) = chain.get(&entry.sequence) {
            if existing.linkage() == entry.linkage() {
                return Ok(InsertResult::AlreadyExists);
            }
            return Ok(InsertResult::Conflict {
                existing: existing.curr_hash,
            });
        }

        chain.insert(entry.sequence, entry.clone());
        Ok(InsertResult::Inserted)
    }

    async fn latest_replicated_entry(&self, source_id: i64) -> Result<Option<ChainEntry>> {
        let inner = self.read()?;
        Ok(inner
            .replicated
            .get(&source_id)
            .and_then(|chain| chain.values().next_back().cloned()))
    }

    async fn get_replicated_range(
        &self,
        source_id: i64,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEntry>> {
        if from > to {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        Ok(inner
            .replicated
            .get(&source_id)
            .map(|chain| chain.range(from..=to).map(|(_, e)| e.clone()).collect())
            .unwrap_or_default())
    }

    async fn last_attestation(&self) -> Result<Option<DateTime<Utc>>> {
        let inner = self.read()?;
        Ok(inner.last_attestation)
    }

    async fn record_attestation(&self, now: DateTime<Utc>) -> Result<()> {
        let now = truncate_millis(now)?;
        let mut inner = self.write()?;
        inner.last_attestation = Some(now);
        Ok(())
    }

    async fn claim_attestation(
        &self,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now = truncate_millis(now)?;
        let expected = expected.map(truncate_millis).transpose()?;
        let mut inner = self.write()?;

        if inner.last_attestation != expected {
            return Ok(false);
        }
        inner.last_attestation = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::traits::contract;

    #[tokio::test]
    async fn test_append_and_read() {
        let store = MemoryStore::new();
        contract::append_and_read(&store).await;
    }

    #[tokio::test]
    async fn test_stale_tip_rejected() {
        let store = MemoryStore::new();
        contract::stale_tip_rejected(&store).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_one_wins() {
        let store = Arc::new(MemoryStore::new());
        contract::concurrent_appends_one_wins(store).await;
    }

    #[tokio::test]
    async fn test_replication_sources() {
        let store = MemoryStore::new();
        contract::replication_sources(&store).await;
    }

    #[tokio::test]
    async fn test_replicated_entries() {
        let store = MemoryStore::new();
        contract::replicated_entries(&store).await;
    }

    #[tokio::test]
    async fn test_attestation_marker() {
        let store = MemoryStore::new();
        contract::attestation_marker(&store).await;
    }

    #[tokio::test]
    async fn test_marker_millisecond_precision() {
        let store = MemoryStore::new();
        let t = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();

        assert!(store.claim_attestation(None, t).await.unwrap());
        let stored = store.last_attestation().await.unwrap().unwrap();
        assert_eq!(stored.timestamp_millis(), t.timestamp_millis());
        assert_eq!(stored.timestamp_subsec_nanos(), 123_000_000);

        // A caller holding the unrounded value still matches.
        assert!(store.claim_attestation(Some(t), t).await.unwrap());
    }

    proptest! {
        #[test]
        fn test_replicated_range_matches_filter(
            len in 0u64..16,
            from in 0u64..20,
            to in 0u64..20,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let sequences = rt.block_on(async {
                let store = MemoryStore::new();
                let kp = contract::keypair(7);
                let source = store
                    .add_replication_source(contract::source("peer", &kp))
                    .await
                    .unwrap();
                for entry in contract::remote_chain(&kp, len) {
                    store.insert_replicated_entry(source.id, &entry).await.unwrap();
                }
                store
                    .get_replicated_range(source.id, from, to)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|e| e.sequence)
                    .collect::<Vec<_>>()
            });

            let expected: Vec<u64> = (1..=len).filter(|s| (from..=to).contains(s)).collect();
            prop_assert_eq!(sequences, expected);
        }
    }
}
