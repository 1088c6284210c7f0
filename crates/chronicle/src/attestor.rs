//! The attestation builder.
//!
//! Gathers the tip of every replicated source into an
//! [`AttestationStatement`], signs its canonical bytes, and commits them as
//! a new entry on the local chain.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use chronicle_core::{AttestationStatement, ChainEntry, Keypair, ReplicationHash};
use chronicle_store::Store;

use crate::blakechain::Blakechain;
use crate::error::{ChronicleError, Result};

/// Source of the statement timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Builds and commits attestation statements.
pub struct Attestor<S: Store> {
    chain: Arc<Blakechain<S>>,
    keypair: Keypair,
    version: String,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Attestor<S> {
    /// Create an attestor signing with `keypair` and stamping `version`.
    pub fn new(chain: Arc<Blakechain<S>>, keypair: Keypair, version: impl Into<String>) -> Self {
        Self {
            chain,
            keypair,
            version: version.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock used for statement timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chain(&self) -> &Arc<Blakechain<S>> {
        &self.chain
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Gather current source tips into a statement stamped `now`.
    ///
    /// Sources with no ingested entries are left out. Order follows the
    /// store's source enumeration. Store failures are reported as a
    /// retryable [`ChronicleError::ChainAppend`].
    pub async fn build_statement(&self, now: DateTime<Utc>) -> Result<AttestationStatement> {
        let store = self.chain.store();
        let sources = store
            .list_replication_sources()
            .await
            .map_err(|e| ChronicleError::ChainAppend(e.to_string()))?;

        let mut hashes = Vec::with_capacity(sources.len());
        for source in &sources {
            let tip = store
                .latest_replicated_entry(source.id)
                .await
                .map_err(|e| ChronicleError::ChainAppend(e.to_string()))?;
            match tip {
                Some(tip) => hashes.push(ReplicationHash::from_entry(&source.unique_id, &tip)),
                None => debug!(source = %source.unique_id, "source has no entries, skipped"),
            }
        }

        Ok(AttestationStatement::new(self.version.clone(), now, hashes))
    }

    /// Sign a statement's canonical bytes and append them to the chain.
    pub async fn commit_statement(&self, statement: &AttestationStatement) -> Result<ChainEntry> {
        let payload = statement.to_canonical_bytes()?;
        let signature = self.keypair.sign(&payload);

        let entry = self
            .chain
            .append_signed(&payload, signature, self.keypair.public_key())
            .await?;

        info!(
            sequence = entry.sequence,
            sources = statement.replication_hashes.len(),
            datetime = %chronicle_core::attestation::format_datetime(&statement.datetime),
            "committed attestation"
        );
        Ok(entry)
    }

    /// Build a statement at the clock's current time and commit it.
    pub async fn build_and_commit(&self) -> Result<ChainEntry> {
        let statement = self.build_statement(self.clock.now()).await?;
        self.commit_statement(&statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chronicle_core::{Blake3Hash, NewEntry};
    use chronicle_store::{MemoryStore, NewReplicationSource};

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    async fn add_source(store: &MemoryStore, unique_id: &str, entries: u64) -> i64 {
        let remote = Keypair::from_seed(&[unique_id.len() as u8; 32]);
        let source = store
            .add_replication_source(NewReplicationSource {
                unique_id: unique_id.to_string(),
                name: unique_id.to_string(),
                url: format!("https://{}.test", unique_id),
                public_key: remote.public_key(),
            })
            .await
            .unwrap();

        let mut prev: Option<ChainEntry> = None;
        for seq in 1..=entries {
            let payload = format!("{} #{}", unique_id, seq);
            let entry = NewEntry::next(
                prev.as_ref(),
                payload.clone().into_bytes().into(),
                remote.sign(payload.as_bytes()),
                remote.public_key(),
                0,
            )
            .into_entry(seq, seq - 1);
            store.insert_replicated_entry(source.id, &entry).await.unwrap();
            prev = Some(entry);
        }
        source.id
    }

    fn attestor(store: Arc<MemoryStore>) -> Attestor<MemoryStore> {
        let chain = Arc::new(Blakechain::new(store));
        Attestor::new(chain, Keypair::from_seed(&[42u8; 32]), "1.2.3")
            .with_clock(Arc::new(FixedClock(at_noon())))
    }

    #[tokio::test]
    async fn test_statement_skips_empty_sources() {
        let store = Arc::new(MemoryStore::new());
        add_source(&store, "a", 2).await;
        add_source(&store, "bb", 0).await;
        let c = add_source(&store, "ccc", 5).await;

        let attestor = attestor(store.clone());
        let statement = attestor.build_statement(at_noon()).await.unwrap();

        assert_eq!(statement.version, "1.2.3");
        assert_eq!(statement.datetime, at_noon());
        let sources: Vec<_> = statement
            .replication_hashes
            .iter()
            .map(|h| h.source.as_str())
            .collect();
        assert_eq!(sources, vec!["a", "ccc"]);

        let tip = store.latest_replicated_entry(c).await.unwrap().unwrap();
        assert_eq!(statement.hashes_for("ccc").unwrap().curr_hash, tip.curr_hash);
        assert_eq!(
            statement.hashes_for("ccc").unwrap().summary_hash,
            tip.summary_hash
        );
    }

    #[tokio::test]
    async fn test_commit_round_trip() {
        let store = Arc::new(MemoryStore::new());
        add_source(&store, "a", 1).await;
        let attestor = attestor(store);

        let entry = attestor.build_and_commit().await.unwrap();
        let fetched = attestor.chain().get(entry.sequence).await.unwrap().unwrap();

        assert_eq!(fetched, entry);
        assert!(fetched.verify_signature());
        assert_eq!(fetched.public_key, Keypair::from_seed(&[42u8; 32]).public_key());

        let statement = AttestationStatement::from_payload(&fetched.payload).unwrap();
        assert!(AttestationStatement::is_canonical(&fetched.payload));
        assert_eq!(statement.datetime, at_noon());
        assert_eq!(statement.replication_hashes.len(), 1);
    }

    #[tokio::test]
    async fn test_no_sources_commits_empty_statement() {
        let store = Arc::new(MemoryStore::new());
        let attestor = attestor(store);

        let entry = attestor.build_and_commit().await.unwrap();
        let statement = AttestationStatement::from_payload(&entry.payload).unwrap();
        assert!(statement.replication_hashes.is_empty());
        assert_ne!(entry.curr_hash, Blake3Hash::ZERO);
    }
}
