//! Store trait: the abstract interface for ledger persistence.
//!
//! This trait allows the chain and the attestation machinery to be
//! storage-agnostic. Implementations include SQLite (primary) and in-memory
//! (for tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chronicle_core::{Blake3Hash, ChainEntry, Ed25519PublicKey, NewEntry};

use crate::error::Result;

/// Result of appending to the local chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// The entry was persisted with a storage-assigned sequence.
    Appended(ChainEntry),
    /// The tip is no longer the one the entry was built on.
    TipMoved {
        /// Sequence of the current tip (`None` for an empty chain).
        current: Option<u64>,
    },
}

/// Result of ingesting an entry from a replicated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry was inserted successfully.
    Inserted,
    /// Entry already exists (idempotent - not an error).
    AlreadyExists,
    /// Conflict: a different entry exists at the same sequence.
    Conflict {
        /// `curr_hash` of the entry already stored at this sequence.
        existing: Blake3Hash,
    },
}

/// A remote ledger this instance replicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSource {
    /// Storage-assigned local id. Enumeration order follows it.
    pub id: i64,
    /// Stable external identifier of the remote ledger.
    pub unique_id: String,
    pub name: String,
    pub url: String,
    /// Signing key of the remote instance.
    pub public_key: Ed25519PublicKey,
}

/// A replication source to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReplicationSource {
    pub unique_id: String,
    pub name: String,
    pub url: String,
    pub public_key: Ed25519PublicKey,
}

/// The Store trait: async interface for ledger persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Storage arbitrates the tip**: `append_entry` only persists when the
///   current tip is exactly `expected_prev`; otherwise it reports `TipMoved`.
///   No two entries can share a predecessor.
/// - **Idempotent ingestion**: inserting the same replicated entry twice
///   returns `AlreadyExists`; a different entry at a known sequence returns
///   `Conflict`.
/// - **Marker claims are compare-and-set**: `claim_attestation` succeeds for
///   exactly one caller per observed marker value.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Local Chain
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an entry built on top of `expected_prev` (`None` = empty chain).
    ///
    /// The store assigns `sequence`; `prev_sequence` is `expected_prev` or 0.
    async fn append_entry(
        &self,
        expected_prev: Option<u64>,
        entry: NewEntry,
    ) -> Result<AppendResult>;

    /// The highest-sequence entry, if any.
    async fn tip(&self) -> Result<Option<ChainEntry>>;

    /// Get an entry by sequence.
    async fn get_entry(&self, sequence: u64) -> Result<Option<ChainEntry>>;

    /// Get an entry by its `curr_hash`.
    async fn get_entry_by_hash(&self, curr_hash: &Blake3Hash) -> Result<Option<ChainEntry>>;

    /// Entries with `from <= sequence <= to`, ordered by sequence.
    async fn get_entries_range(&self, from: u64, to: u64) -> Result<Vec<ChainEntry>>;

    /// Entries with `sequence > after`, ordered by sequence.
    async fn entries_since(&self, after: u64) -> Result<Vec<ChainEntry>>;

    /// Number of entries in the local chain.
    async fn entry_count(&self) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Replication Sources
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a source. Fails with `AlreadyExists` on a duplicate `unique_id`.
    async fn add_replication_source(
        &self,
        source: NewReplicationSource,
    ) -> Result<ReplicationSource>;

    /// All sources, ascending by local id.
    async fn list_replication_sources(&self) -> Result<Vec<ReplicationSource>>;

    /// Look up a source by its external identifier.
    async fn get_replication_source(&self, unique_id: &str) -> Result<Option<ReplicationSource>>;

    /// Whether any source is registered.
    async fn has_replication_sources(&self) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Replicated Chains
    // ─────────────────────────────────────────────────────────────────────────

    /// Store an entry ingested from a source, keyed by the remote sequence.
    ///
    /// Fails with `NotFound` if `source_id` is unknown.
    async fn insert_replicated_entry(
        &self,
        source_id: i64,
        entry: &ChainEntry,
    ) -> Result<InsertResult>;

    /// The highest-sequence ingested entry of a source.
    async fn latest_replicated_entry(&self, source_id: i64) -> Result<Option<ChainEntry>>;

    /// Ingested entries of a source with `from <= sequence <= to`.
    async fn get_replicated_range(
        &self,
        source_id: i64,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Attestation Marker
    // ─────────────────────────────────────────────────────────────────────────

    /// Time of the last attestation run, if any.
    async fn last_attestation(&self) -> Result<Option<DateTime<Utc>>>;

    /// Unconditionally set the marker to `now`.
    async fn record_attestation(&self, now: DateTime<Utc>) -> Result<()>;

    /// Set the marker to `now` iff it still equals `expected`.
    ///
    /// Returns `false` when another caller changed it first. Timestamps are
    /// kept at millisecond precision.
    async fn claim_attestation(
        &self,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}
