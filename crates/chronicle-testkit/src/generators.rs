//! Proptest generators for property-based testing.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use chronicle_core::{
    AttestationStatement, Blake3Hash, ChainEntry, Ed25519PublicKey, Keypair, ReplicationHash,
};

use crate::fixtures::RemoteChain;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a source identifier.
pub fn source_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,31}".prop_map(String::from)
}

/// Generate a whole-second UTC timestamp between 1970 and 2100.
pub fn datetime() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800i64)
        .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
}

/// Generate a fixed-length interval expression and its length in seconds.
pub fn fixed_interval() -> impl Strategy<Value = (String, i64)> {
    let unit = prop_oneof![
        Just(("seconds", 1i64)),
        Just(("sec", 1)),
        Just(("minutes", 60)),
        Just(("min", 60)),
        Just(("hours", 3_600)),
        Just(("h", 3_600)),
        Just(("days", 86_400)),
        Just(("weeks", 604_800)),
        Just(("fortnight", 1_209_600)),
    ];
    prop::collection::vec((1i64..=500, unit), 1..=3).prop_map(|terms| {
        let expr = terms
            .iter()
            .map(|(n, (unit, _))| format!("{} {}", n, unit))
            .collect::<Vec<_>>()
            .join(" ");
        let seconds = terms.iter().map(|(n, (_, secs))| n * secs).sum();
        (expr, seconds)
    })
}

/// Parameters for generating a chain.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub seed: [u8; 32],
    pub payloads: Vec<Vec<u8>>,
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            prop::collection::vec(payload(256), 1..=12),
        )
            .prop_map(|(seed, payloads)| ChainParams { seed, payloads })
            .boxed()
    }
}

/// Build the chain described by `params`.
pub fn chain_from_params(params: &ChainParams) -> Vec<ChainEntry> {
    let mut chain = RemoteChain::with_seed(params.seed);
    for payload in &params.payloads {
        chain.push(payload);
    }
    chain.entries().to_vec()
}

/// Generate an attestation statement with up to `max_sources` sources.
pub fn statement(max_sources: usize) -> impl Strategy<Value = AttestationStatement> {
    let hash = (source_id(), blake3_hash(), blake3_hash()).prop_map(|(source, curr, summary)| {
        ReplicationHash {
            source,
            curr_hash: curr,
            summary_hash: summary,
        }
    });
    (
        "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
        datetime(),
        prop::collection::vec(hash, 0..=max_sources),
    )
        .prop_map(|(version, at, hashes)| AttestationStatement::new(version, at, hashes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chronicle_core::{verify_entries, AttestationInterval, ChainVerification};

    proptest! {
        #[test]
        fn test_generated_chains_verify(params: ChainParams) {
            let entries = chain_from_params(&params);
            prop_assert_eq!(
                verify_entries(None, &entries),
                ChainVerification::Valid { checked: entries.len() }
            );
        }

        #[test]
        fn test_chain_is_deterministic(params: ChainParams) {
            let a = chain_from_params(&params);
            let b = chain_from_params(&params);
            let hashes = |c: &[ChainEntry]| {
                c.iter().map(|e| (e.curr_hash, e.summary_hash)).collect::<Vec<_>>()
            };
            prop_assert_eq!(hashes(&a), hashes(&b));
        }

        #[test]
        fn test_tampered_payload_is_caught(
            params: ChainParams,
            index in any::<prop::sample::Index>(),
            extra in any::<u8>(),
        ) {
            let mut entries = chain_from_params(&params);
            let k = index.index(entries.len());
            let mut tampered = entries[k].payload.to_vec();
            tampered.push(extra);
            entries[k].payload = Bytes::from(tampered);

            match verify_entries(None, &entries) {
                ChainVerification::Invalid { sequence, .. } => {
                    prop_assert_eq!(sequence, entries[k].sequence)
                }
                other => prop_assert!(false, "tampering went unnoticed: {:?}", other),
            }
        }

        #[test]
        fn test_fixed_interval_expressions((expr, seconds) in fixed_interval()) {
            let interval = AttestationInterval::parse(&expr).unwrap();
            prop_assert_eq!(interval.months(), 0);
            prop_assert_eq!(interval.fixed().num_seconds(), seconds);
        }

        #[test]
        fn test_statement_encoding_is_canonical(statement in statement(6)) {
            let bytes = statement.to_canonical_bytes().unwrap();
            prop_assert!(AttestationStatement::is_canonical(&bytes));
            prop_assert_eq!(AttestationStatement::from_payload(&bytes).unwrap(), statement);
        }
    }
}
