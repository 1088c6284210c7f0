//! Blakechain: the append-only chain construction and its verification.
//!
//! Every entry carries two rolling hashes:
//!
//! ```text
//! curr_hash[n]    = H(curr_hash[n-1] || payload[n] || signature[n])
//! summary_hash[n] = H(summary_hash[n-1] || curr_hash[n])
//! ```
//!
//! The first entry uses [`Linkage::genesis`] as its predecessor for both.
//! A forged history has to reproduce both relations, not just one.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature};

/// Input to the genesis hash.
///
/// **FROZEN**: changing this invalidates every existing chain.
pub const GENESIS_CONSTANT: &[u8] = b"chronicle/blakechain/genesis/v1";

/// The pair of hashes that bind an entry to its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Linkage {
    pub curr_hash: Blake3Hash,
    pub summary_hash: Blake3Hash,
}

impl Linkage {
    /// The predecessor linkage of the very first entry.
    pub fn genesis() -> Self {
        let h = Blake3Hash::hash(GENESIS_CONSTANT);
        Self {
            curr_hash: h,
            summary_hash: h,
        }
    }

    /// The linkage stored on an entry.
    pub fn of(entry: &ChainEntry) -> Self {
        Self {
            curr_hash: entry.curr_hash,
            summary_hash: entry.summary_hash,
        }
    }
}

/// Compute the linkage of the next entry. Pure and deterministic.
pub fn compute_next_linkage(
    prev_curr_hash: &Blake3Hash,
    prev_summary_hash: &Blake3Hash,
    payload: &[u8],
    signature: &Ed25519Signature,
) -> Linkage {
    let curr_hash = Blake3Hash::hash_parts(&[
        prev_curr_hash.as_bytes().as_slice(),
        payload,
        signature.as_bytes().as_slice(),
    ]);
    let summary_hash = Blake3Hash::hash_parts(&[
        prev_summary_hash.as_bytes().as_slice(),
        curr_hash.as_bytes().as_slice(),
    ]);
    Linkage {
        curr_hash,
        summary_hash,
    }
}

/// One record in an append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// Storage-assigned position, strictly increasing.
    pub sequence: u64,

    /// Sequence of the predecessor (0 for the first entry).
    pub prev_sequence: u64,

    /// The signed content.
    pub payload: Bytes,

    /// Detached Ed25519 signature over `payload`.
    pub signature: Ed25519Signature,

    /// Key that produced `signature`.
    pub public_key: Ed25519PublicKey,

    pub curr_hash: Blake3Hash,

    pub summary_hash: Blake3Hash,

    /// Append time (Unix ms). Advisory, not hashed.
    pub created_at: i64,
}

impl ChainEntry {
    /// The linkage stored on this entry.
    pub fn linkage(&self) -> Linkage {
        Linkage::of(self)
    }

    /// Check the detached signature against the stored public key.
    pub fn verify_signature(&self) -> bool {
        self.public_key
            .is_valid_signature(&self.payload, &self.signature)
    }

    /// Check whether this entry's stored hashes follow from `prev`.
    pub fn follows(&self, prev: &Linkage) -> bool {
        compute_next_linkage(
            &prev.curr_hash,
            &prev.summary_hash,
            &self.payload,
            &self.signature,
        ) == self.linkage()
    }
}

/// An entry ready to be persisted; the store assigns `sequence`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub payload: Bytes,
    pub signature: Ed25519Signature,
    pub public_key: Ed25519PublicKey,
    pub linkage: Linkage,
    pub created_at: i64,
}

impl NewEntry {
    /// Build the next entry on top of `prev` (or genesis when `None`).
    pub fn next(
        prev: Option<&ChainEntry>,
        payload: Bytes,
        signature: Ed25519Signature,
        public_key: Ed25519PublicKey,
        created_at: i64,
    ) -> Self {
        let prev_linkage = prev.map(Linkage::of).unwrap_or_else(Linkage::genesis);
        let linkage = compute_next_linkage(
            &prev_linkage.curr_hash,
            &prev_linkage.summary_hash,
            &payload,
            &signature,
        );
        Self {
            payload,
            signature,
            public_key,
            linkage,
            created_at,
        }
    }

    /// Materialize with the storage-assigned positions.
    pub fn into_entry(self, sequence: u64, prev_sequence: u64) -> ChainEntry {
        ChainEntry {
            sequence,
            prev_sequence,
            payload: self.payload,
            signature: self.signature,
            public_key: self.public_key,
            curr_hash: self.linkage.curr_hash,
            summary_hash: self.linkage.summary_hash,
            created_at: self.created_at,
        }
    }
}

/// Why an entry failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFault {
    /// `prev_sequence` does not name the preceding entry, or order is broken.
    BrokenPredecessor { expected: u64, found: u64 },
    /// Recomputed `curr_hash` differs from the stored one.
    CurrHashMismatch,
    /// `curr_hash` matches but the recomputed `summary_hash` does not.
    SummaryHashMismatch,
    /// The signature does not verify against the stored public key.
    BadSignature,
}

/// Outcome of replaying the chain invariant over a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Valid { checked: usize },
    Invalid { sequence: u64, fault: ChainFault },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid { .. })
    }
}

/// Replay the chain invariant over a contiguous run of entries.
///
/// `prev` is the entry immediately before `entries[0]`, or `None` when
/// `entries[0]` is the first entry of the chain. Stops at the first fault.
pub fn verify_entries(prev: Option<&ChainEntry>, entries: &[ChainEntry]) -> ChainVerification {
    let mut prev_linkage = prev.map(Linkage::of).unwrap_or_else(Linkage::genesis);
    let mut prev_sequence = prev.map(|p| p.sequence).unwrap_or(0);

    for entry in entries {
        if entry.prev_sequence != prev_sequence || entry.sequence <= prev_sequence {
            return ChainVerification::Invalid {
                sequence: entry.sequence,
                fault: ChainFault::BrokenPredecessor {
                    expected: prev_sequence,
                    found: entry.prev_sequence,
                },
            };
        }

        let expected = compute_next_linkage(
            &prev_linkage.curr_hash,
            &prev_linkage.summary_hash,
            &entry.payload,
            &entry.signature,
        );
        if expected.curr_hash != entry.curr_hash {
            return ChainVerification::Invalid {
                sequence: entry.sequence,
                fault: ChainFault::CurrHashMismatch,
            };
        }
        if expected.summary_hash != entry.summary_hash {
            return ChainVerification::Invalid {
                sequence: entry.sequence,
                fault: ChainFault::SummaryHashMismatch,
            };
        }

        if !entry.verify_signature() {
            return ChainVerification::Invalid {
                sequence: entry.sequence,
                fault: ChainFault::BadSignature,
            };
        }

        prev_linkage = entry.linkage();
        prev_sequence = entry.sequence;
    }

    ChainVerification::Valid {
        checked: entries.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use proptest::prelude::*;

    fn build_chain(keypair: &Keypair, payloads: &[&[u8]]) -> Vec<ChainEntry> {
        let mut chain: Vec<ChainEntry> = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let signature = keypair.sign(payload);
            let entry = NewEntry::next(
                chain.last(),
                Bytes::copy_from_slice(payload),
                signature,
                keypair.public_key(),
                1_700_000_000_000 + i as i64,
            )
            .into_entry(i as u64 + 1, i as u64);
            chain.push(entry);
        }
        chain
    }

    #[test]
    fn test_genesis_linkage_is_hash_of_constant() {
        let g = Linkage::genesis();
        assert_eq!(g.curr_hash, Blake3Hash::hash(GENESIS_CONSTANT));
        assert_eq!(g.curr_hash, g.summary_hash);
    }

    #[test]
    fn test_first_entry_links_to_genesis() {
        let kp = Keypair::from_seed(&[1; 32]);
        let chain = build_chain(&kp, &[&b"first"[..]]);
        assert!(chain[0].follows(&Linkage::genesis()));
        assert_eq!(chain[0].prev_sequence, 0);
    }

    #[test]
    fn test_formulas() {
        let kp = Keypair::from_seed(&[1; 32]);
        let chain = build_chain(&kp, &[&b"a"[..], &b"b"[..]]);
        let e = &chain[1];

        let curr = Blake3Hash::hash_parts(&[
            chain[0].curr_hash.as_bytes().as_slice(),
            &e.payload[..],
            e.signature.as_bytes().as_slice(),
        ]);
        let summary = Blake3Hash::hash_parts(&[
            chain[0].summary_hash.as_bytes().as_slice(),
            curr.as_bytes().as_slice(),
        ]);
        assert_eq!(e.curr_hash, curr);
        assert_eq!(e.summary_hash, summary);
    }

    #[test]
    fn test_valid_chain_verifies() {
        let kp = Keypair::from_seed(&[1; 32]);
        let chain = build_chain(&kp, &[&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..]]);
        assert_eq!(
            verify_entries(None, &chain),
            ChainVerification::Valid { checked: 4 }
        );

        // A sub-range verifies against its predecessor
        assert!(verify_entries(Some(&chain[1]), &chain[2..]).is_valid());
    }

    #[test]
    fn test_empty_range_is_valid() {
        assert!(verify_entries(None, &[]).is_valid());
    }

    #[test]
    fn test_tampered_payload_detected() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut chain = build_chain(&kp, &[&b"a"[..], &b"b"[..], &b"c"[..]]);
        chain[1].payload = Bytes::from_static(b"B");

        assert_eq!(
            verify_entries(None, &chain),
            ChainVerification::Invalid {
                sequence: 2,
                fault: ChainFault::CurrHashMismatch
            }
        );
    }

    #[test]
    fn test_tampered_summary_detected() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut chain = build_chain(&kp, &[&b"a"[..], &b"b"[..], &b"c"[..]]);
        chain[2].summary_hash.0[0] ^= 0x01;

        assert_eq!(
            verify_entries(None, &chain),
            ChainVerification::Invalid {
                sequence: 3,
                fault: ChainFault::SummaryHashMismatch
            }
        );
    }

    #[test]
    fn test_tampered_curr_hash_breaks_successor_range() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut chain = build_chain(&kp, &[&b"a"[..], &b"b"[..], &b"c"[..]]);
        chain[0].curr_hash.0[31] ^= 0x80;

        // The successor no longer follows from the tampered entry
        assert!(!verify_entries(Some(&chain[0]), &chain[1..]).is_valid());
    }

    #[test]
    fn test_resigned_entry_with_foreign_key_detected() {
        let kp = Keypair::from_seed(&[1; 32]);
        let other = Keypair::from_seed(&[2; 32]);
        let mut chain = build_chain(&kp, &[&b"a"[..], &b"b"[..]]);

        // Recompute hashes honestly but claim a different key
        chain[1].public_key = other.public_key();

        assert_eq!(
            verify_entries(None, &chain),
            ChainVerification::Invalid {
                sequence: 2,
                fault: ChainFault::BadSignature
            }
        );
    }

    #[test]
    fn test_predecessor_mismatch_detected() {
        let kp = Keypair::from_seed(&[1; 32]);
        let mut chain = build_chain(&kp, &[&b"a"[..], &b"b"[..]]);
        chain[1].prev_sequence = 0;

        assert!(matches!(
            verify_entries(None, &chain),
            ChainVerification::Invalid {
                sequence: 2,
                fault: ChainFault::BrokenPredecessor { expected: 1, found: 0 }
            }
        ));
    }

    #[test]
    fn test_verification_is_idempotent() {
        let kp = Keypair::from_seed(&[9; 32]);
        let chain = build_chain(&kp, &[&b"x"[..], &b"y"[..]]);
        assert_eq!(verify_entries(None, &chain), verify_entries(None, &chain));
    }

    proptest! {
        #[test]
        fn test_linkage_deterministic(
            prev in any::<[u8; 32]>(),
            summary in any::<[u8; 32]>(),
            payload in prop::collection::vec(any::<u8>(), 0..256),
            sig in prop::collection::vec(any::<u8>(), 64..=64),
        ) {
            let signature = Ed25519Signature::from_slice(&sig).unwrap();
            let a = compute_next_linkage(&Blake3Hash(prev), &Blake3Hash(summary), &payload, &signature);
            let b = compute_next_linkage(&Blake3Hash(prev), &Blake3Hash(summary), &payload, &signature);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_any_flipped_byte_is_detected(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 2..6),
            pick in any::<prop::sample::Index>(),
            field in 0u8..4,
            byte in any::<prop::sample::Index>(),
        ) {
            let kp = Keypair::from_seed(&[5; 32]);
            let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
            let mut chain = build_chain(&kp, &refs);
            let k = pick.index(chain.len());

            match field {
                0 => {
                    let mut p = chain[k].payload.to_vec();
                    let i = byte.index(p.len());
                    p[i] ^= 0x01;
                    chain[k].payload = Bytes::from(p);
                }
                1 => chain[k].signature.0[byte.index(64)] ^= 0x01,
                2 => chain[k].curr_hash.0[byte.index(32)] ^= 0x01,
                _ => chain[k].summary_hash.0[byte.index(32)] ^= 0x01,
            }

            // Every range that starts at or before the tampered entry fails
            for start in 0..=k {
                let prev = if start == 0 { None } else { Some(&chain[start - 1]) };
                prop_assert!(!verify_entries(prev, &chain[start..]).is_valid());
            }
        }
    }
}
