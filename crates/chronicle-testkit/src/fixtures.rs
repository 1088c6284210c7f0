//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use chronicle_core::{ChainEntry, Ed25519PublicKey, Keypair, NewEntry};
use chronicle_store::{
    InsertResult, MemoryStore, NewReplicationSource, ReplicationSource, Result, Store, StoreError,
};

/// A remote peer's chain, built in memory without any store.
#[derive(Debug, Clone)]
pub struct RemoteChain {
    keypair: Keypair,
    entries: Vec<ChainEntry>,
}

impl RemoteChain {
    /// An empty chain owned by a random key.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// An empty chain owned by a deterministic key.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            entries: Vec::new(),
        }
    }

    /// A chain with `len` entries whose payloads are `"<prefix> #<seq>"`.
    pub fn with_entries(seed: [u8; 32], prefix: &str, len: u64) -> Self {
        let mut chain = Self::with_seed(seed);
        for seq in 1..=len {
            chain.push(format!("{} #{}", prefix, seq).as_bytes());
        }
        chain
    }

    /// Sign and link the next entry.
    pub fn push(&mut self, payload: &[u8]) -> &ChainEntry {
        let prev = self.entries.last();
        let sequence = prev.map(|e| e.sequence + 1).unwrap_or(1);
        let prev_sequence = sequence - 1;

        let entry = NewEntry::next(
            prev,
            Bytes::copy_from_slice(payload),
            self.keypair.sign(payload),
            self.keypair.public_key(),
            now_millis(),
        )
        .into_entry(sequence, prev_sequence);

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn tip(&self) -> Option<&ChainEntry> {
        self.entries.last()
    }

    /// A stable identifier derived from the public key.
    pub fn unique_id(&self) -> String {
        hex::encode(&self.public_key().as_bytes()[..8])
    }
}

impl Default for RemoteChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Register `remote` under `unique_id` and ingest all of its entries.
pub async fn register_source<S: Store + ?Sized>(
    store: &S,
    unique_id: &str,
    remote: &RemoteChain,
) -> Result<ReplicationSource> {
    let source = store
        .add_replication_source(NewReplicationSource {
            unique_id: unique_id.to_string(),
            name: format!("peer {}", unique_id),
            url: format!("https://{}.chronicle.test", unique_id),
            public_key: remote.public_key(),
        })
        .await?;

    for entry in remote.entries() {
        match store.insert_replicated_entry(source.id, entry).await? {
            InsertResult::Inserted | InsertResult::AlreadyExists => {}
            InsertResult::Conflict { existing } => {
                return Err(StoreError::InvalidData(format!(
                    "sequence {} of {} already holds {}",
                    entry.sequence, unique_id, existing
                )));
            }
        }
    }

    Ok(source)
}

/// A test fixture with a keypair and memory store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub store: Arc<MemoryStore>,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Get the keypair's public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Register a source backed by a fresh remote chain of `len` entries.
    pub async fn add_source(
        &self,
        unique_id: &str,
        len: u64,
    ) -> Result<(ReplicationSource, RemoteChain)> {
        let mut seed = [0u8; 32];
        for (slot, byte) in seed.iter_mut().zip(unique_id.bytes()) {
            *slot = byte;
        }
        let remote = RemoteChain::with_entries(seed, unique_id, len);
        let source = register_source(self.store.as_ref(), unique_id, &remote).await?;
        Ok((source, remote))
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
