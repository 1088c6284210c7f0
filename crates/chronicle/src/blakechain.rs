//! The Blakechain: the local append-only ledger.
//!
//! Appends read the tip, compute the next linkage, and persist through a
//! tip-checked store insert. In-process appenders queue on an async mutex;
//! other processes sharing the store are fenced off by the store itself and
//! surface as a retryable [`ChronicleError::ChainAppend`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use chronicle_core::{
    verify_entries, Blake3Hash, ChainEntry, ChainFault, ChainVerification, Ed25519PublicKey,
    Ed25519Signature, Keypair, NewEntry,
};
use chronicle_store::{AppendResult, Store};

use crate::error::{ChronicleError, Result};

/// A signed, hash-linked ledger backed by a [`Store`].
pub struct Blakechain<S: Store> {
    store: Arc<S>,
    append_lock: Mutex<()>,
}

impl<S: Store> Blakechain<S> {
    /// Create a chain over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Append Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign `payload` with `signing_key` and append it.
    pub async fn append(&self, payload: &[u8], signing_key: &Keypair) -> Result<ChainEntry> {
        let signature = signing_key.sign(payload);
        self.append_signed(payload, signature, signing_key.public_key())
            .await
    }

    /// Append a payload with a signature produced elsewhere.
    ///
    /// The signature must verify against `public_key` over exactly `payload`.
    pub async fn append_signed(
        &self,
        payload: &[u8],
        signature: Ed25519Signature,
        public_key: Ed25519PublicKey,
    ) -> Result<ChainEntry> {
        if !public_key.is_valid_signature(payload, &signature) {
            return Err(ChronicleError::Signing(
                "signature does not verify over payload".into(),
            ));
        }

        let _guard = self.append_lock.lock().await;

        let tip = self
            .store
            .tip()
            .await
            .map_err(|e| ChronicleError::ChainAppend(e.to_string()))?;
        let expected_prev = tip.as_ref().map(|t| t.sequence);
        let entry = NewEntry::next(
            tip.as_ref(),
            Bytes::copy_from_slice(payload),
            signature,
            public_key,
            Utc::now().timestamp_millis(),
        );

        let result = self
            .store
            .append_entry(expected_prev, entry)
            .await
            .map_err(|e| ChronicleError::ChainAppend(e.to_string()))?;

        match result {
            AppendResult::Appended(entry) => {
                debug!(
                    sequence = entry.sequence,
                    curr_hash = %entry.curr_hash,
                    "appended chain entry"
                );
                Ok(entry)
            }
            AppendResult::TipMoved { current } => {
                warn!(?expected_prev, ?current, "chain tip moved during append");
                Err(ChronicleError::ChainAppend(format!(
                    "tip moved from {:?} to {:?}",
                    expected_prev, current
                )))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the closed range `[from, to]` satisfies the chain invariant.
    pub async fn verify_chain(&self, from: u64, to: u64) -> Result<bool> {
        Ok(self.verify_chain_report(from, to).await?.is_valid())
    }

    /// Replay the chain invariant over `[from, to]` and report the first fault.
    ///
    /// The entry named by the first entry's `prev_sequence` is used as the
    /// predecessor. Empty ranges are trivially valid.
    pub async fn verify_chain_report(&self, from: u64, to: u64) -> Result<ChainVerification> {
        if from > to {
            return Ok(ChainVerification::Valid { checked: 0 });
        }

        let entries = self.store.get_entries_range(from, to).await?;
        let Some(first) = entries.first() else {
            return Ok(ChainVerification::Valid { checked: 0 });
        };

        let prev = match first.prev_sequence {
            0 => None,
            seq => match self.store.get_entry(seq).await? {
                Some(prev) => Some(prev),
                None => {
                    return Ok(ChainVerification::Invalid {
                        sequence: first.sequence,
                        fault: ChainFault::BrokenPredecessor {
                            expected: seq,
                            found: 0,
                        },
                    });
                }
            },
        };

        let report = verify_entries(prev.as_ref(), &entries);
        if let ChainVerification::Invalid { sequence, fault } = &report {
            warn!(sequence = *sequence, ?fault, "chain verification failed");
        }
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The newest entry.
    pub async fn tip(&self) -> Result<Option<ChainEntry>> {
        Ok(self.store.tip().await?)
    }

    /// Get an entry by sequence.
    pub async fn get(&self, sequence: u64) -> Result<Option<ChainEntry>> {
        Ok(self.store.get_entry(sequence).await?)
    }

    /// Get an entry by its `curr_hash`.
    pub async fn get_by_hash(&self, curr_hash: &Blake3Hash) -> Result<Option<ChainEntry>> {
        Ok(self.store.get_entry_by_hash(curr_hash).await?)
    }

    /// Entries after `sequence`, oldest first.
    pub async fn entries_since(&self, sequence: u64) -> Result<Vec<ChainEntry>> {
        Ok(self.store.entries_since(sequence).await?)
    }

    /// Number of entries.
    pub async fn len(&self) -> Result<u64> {
        Ok(self.store.entry_count().await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_store::MemoryStore;

    fn chain() -> Blakechain<MemoryStore> {
        Blakechain::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let chain = chain();
        let key = Keypair::from_seed(&[7u8; 32]);

        let first = chain.append(b"first", &key).await.unwrap();
        let second = chain.append(b"second", &key).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.prev_sequence, first.sequence);
        assert!(second.follows(&first.linkage()));
        assert!(first.verify_signature() && second.verify_signature());
        assert_eq!(chain.len().await.unwrap(), 2);
        assert_eq!(chain.tip().await.unwrap(), Some(second.clone()));
        assert_eq!(
            chain.get_by_hash(&first.curr_hash).await.unwrap(),
            Some(first.clone())
        );
        assert_eq!(chain.entries_since(1).await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_append_signed_rejects_bad_signature() {
        let chain = chain();
        let key = Keypair::from_seed(&[7u8; 32]);
        let other = Keypair::from_seed(&[8u8; 32]);

        let signature = other.sign(b"payload");
        let err = chain
            .append_signed(b"payload", signature, key.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, ChronicleError::Signing(_)));
        assert!(!err.is_retryable());

        // Signature over different bytes.
        let signature = key.sign(b"payload");
        assert!(chain
            .append_signed(b"payload!", signature, key.public_key())
            .await
            .is_err());

        assert!(chain.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_rotated_keys_stay_verifiable() {
        let chain = chain();
        let old_key = Keypair::from_seed(&[1u8; 32]);
        let new_key = Keypair::from_seed(&[2u8; 32]);

        chain.append(b"before rotation", &old_key).await.unwrap();
        chain.append(b"after rotation", &new_key).await.unwrap();

        assert!(chain.verify_chain(1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_ranges() {
        let chain = chain();
        let key = Keypair::from_seed(&[3u8; 32]);
        for i in 0..5 {
            chain.append(format!("entry {}", i).as_bytes(), &key).await.unwrap();
        }

        assert!(chain.verify_chain(1, 5).await.unwrap());
        assert!(chain.verify_chain(3, 5).await.unwrap());
        assert!(chain.verify_chain(4, 4).await.unwrap());
        assert!(chain.verify_chain(0, 100).await.unwrap());
        assert!(chain.verify_chain(5, 1).await.unwrap());
        assert!(chain.verify_chain(50, 60).await.unwrap());

        assert_eq!(
            chain.verify_chain_report(2, 4).await.unwrap(),
            ChainVerification::Valid { checked: 3 }
        );
        // Idempotent.
        assert_eq!(
            chain.verify_chain_report(1, 5).await.unwrap(),
            chain.verify_chain_report(1, 5).await.unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_serialize() {
        let chain = Arc::new(chain());
        let key = Keypair::from_seed(&[9u8; 32]);

        let mut handles = Vec::new();
        for i in 0..16 {
            let chain = chain.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                chain.append(format!("writer {}", i).as_bytes(), &key).await
            }));
        }

        let mut sequences = Vec::new();
        let mut predecessors = Vec::new();
        for handle in handles {
            let entry = handle.await.unwrap().unwrap();
            sequences.push(entry.sequence);
            predecessors.push(entry.prev_sequence);
        }
        sequences.sort_unstable();
        predecessors.sort_unstable();

        assert_eq!(sequences, (1..=16).collect::<Vec<_>>());
        assert_eq!(predecessors, (0..16).collect::<Vec<_>>());
        assert!(chain.verify_chain(1, 16).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_writer_gets_retryable_error() {
        let store = Arc::new(MemoryStore::new());
        let chain = Blakechain::new(store.clone());
        let key = Keypair::from_seed(&[4u8; 32]);

        let first = chain.append(b"first", &key).await.unwrap();

        // Another writer built on the empty chain.
        let stale = NewEntry::next(
            None,
            Bytes::from_static(b"stale"),
            key.sign(b"stale"),
            key.public_key(),
            0,
        );
        let result = store.append_entry(None, stale).await.unwrap();
        assert_eq!(
            result,
            AppendResult::TipMoved {
                current: Some(first.sequence)
            }
        );

        // The chain itself recovers by re-reading the tip.
        let second = chain.append(b"second", &key).await.unwrap();
        assert_eq!(second.prev_sequence, first.sequence);
    }
}
