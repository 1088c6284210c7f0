//! Attestation statements: the payload of a cross-publication entry.
//!
//! The serialized bytes are exactly what gets signed and hashed into the
//! chain, so encoding must be deterministic. Field order is fixed by the
//! struct layout, hashes are URL-safe base64, and the timestamp is RFC 3339
//! UTC at second precision.
//!
//! ```text
//! {"version":"..","datetime":"2024-01-01T00:00:00Z","replication-hashes":[
//!   {"source":"..","currhash":"..","summaryhash":".."}]}
//! ```

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::ChainEntry;
use crate::crypto::Blake3Hash;
use crate::error::{CoreError, Result};

/// Tip hashes of one replicated source at statement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationHash {
    /// The source's stable unique id.
    pub source: String,
    #[serde(rename = "currhash", with = "b64_hash")]
    pub curr_hash: Blake3Hash,
    #[serde(rename = "summaryhash", with = "b64_hash")]
    pub summary_hash: Blake3Hash,
}

impl ReplicationHash {
    /// Take the tip hashes from the latest replicated entry of a source.
    pub fn from_entry(source: impl Into<String>, tip: &ChainEntry) -> Self {
        Self {
            source: source.into(),
            curr_hash: tip.curr_hash,
            summary_hash: tip.summary_hash,
        }
    }
}

/// The canonical statement committed by an attestation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationStatement {
    /// Protocol version of the attesting instance.
    pub version: String,
    #[serde(with = "rfc3339_seconds")]
    pub datetime: DateTime<Utc>,
    #[serde(rename = "replication-hashes")]
    pub replication_hashes: Vec<ReplicationHash>,
}

impl AttestationStatement {
    /// Create a statement. Sub-second precision is dropped from `datetime`.
    pub fn new(
        version: impl Into<String>,
        datetime: DateTime<Utc>,
        replication_hashes: Vec<ReplicationHash>,
    ) -> Self {
        Self {
            version: version.into(),
            datetime: datetime.trunc_subsecs(0),
            replication_hashes,
        }
    }

    /// Serialize to the canonical bytes that get signed.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Decode a statement from an entry payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Whether `payload` is exactly the canonical encoding of its own statement.
    pub fn is_canonical(payload: &[u8]) -> bool {
        match Self::from_payload(payload).and_then(|s| s.to_canonical_bytes()) {
            Ok(bytes) => bytes == payload,
            Err(_) => false,
        }
    }

    /// Look up the hashes recorded for a source.
    pub fn hashes_for(&self, source: &str) -> Option<&ReplicationHash> {
        self.replication_hashes.iter().find(|h| h.source == source)
    }
}

/// Render a timestamp the way statements carry it.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::DecodingError(format!("invalid timestamp {:?}: {}", s, e)))
}

mod b64_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::crypto::Blake3Hash;

    pub fn serialize<S: Serializer>(hash: &Blake3Hash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hash.to_base64url())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Blake3Hash, D::Error> {
        let text = String::deserialize(d)?;
        Blake3Hash::from_base64url(&text).map_err(serde::de::Error::custom)
    }
}

mod rfc3339_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_datetime(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_datetime(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_canonical_encoding_is_exact() {
        let statement = AttestationStatement::new(
            "1.0.0",
            fixed_time(),
            vec![ReplicationHash {
                source: "alpha".into(),
                curr_hash: Blake3Hash::from_bytes([0u8; 32]),
                summary_hash: Blake3Hash::from_bytes([1u8; 32]),
            }],
        );

        let bytes = statement.to_canonical_bytes().unwrap();
        let expected = format!(
            concat!(
                r#"{{"version":"1.0.0","datetime":"2024-01-01T00:00:00Z","#,
                r#""replication-hashes":[{{"source":"alpha","currhash":"{}","summaryhash":"{}"}}]}}"#
            ),
            format!("{}=", "A".repeat(43)),
            format!("{}AQE=", "AQEB".repeat(10)),
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn test_empty_statement() {
        let statement = AttestationStatement::new("0.1.0", fixed_time(), vec![]);
        let bytes = statement.to_canonical_bytes().unwrap();
        assert_eq!(
            bytes,
            br#"{"version":"0.1.0","datetime":"2024-01-01T00:00:00Z","replication-hashes":[]}"#
        );
    }

    #[test]
    fn test_subseconds_dropped() {
        let with_nanos = fixed_time() + chrono::Duration::milliseconds(750);
        let statement = AttestationStatement::new("1", with_nanos, vec![]);
        assert_eq!(statement.datetime, fixed_time());
    }

    #[test]
    fn test_decode_historic_payload() {
        let statement = AttestationStatement::new(
            "1.0.0",
            fixed_time(),
            vec![
                ReplicationHash {
                    source: "a".into(),
                    curr_hash: Blake3Hash::hash(b"a-curr"),
                    summary_hash: Blake3Hash::hash(b"a-sum"),
                },
                ReplicationHash {
                    source: "b".into(),
                    curr_hash: Blake3Hash::hash(b"b-curr"),
                    summary_hash: Blake3Hash::hash(b"b-sum"),
                },
            ],
        );
        let bytes = statement.to_canonical_bytes().unwrap();
        let decoded = AttestationStatement::from_payload(&bytes).unwrap();

        assert_eq!(decoded, statement);
        assert!(AttestationStatement::is_canonical(&bytes));
        assert_eq!(
            decoded.hashes_for("b").unwrap().curr_hash,
            Blake3Hash::hash(b"b-curr")
        );
        assert!(decoded.hashes_for("c").is_none());
    }

    #[test]
    fn test_non_canonical_payload_flagged() {
        let pretty = br#"{ "version": "1", "datetime": "2024-01-01T00:00:00Z", "replication-hashes": [] }"#;
        assert!(AttestationStatement::from_payload(pretty).is_ok());
        assert!(!AttestationStatement::is_canonical(pretty));
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(AttestationStatement::from_payload(b"not json").is_err());
        assert!(AttestationStatement::from_payload(
            br#"{"version":"1","datetime":"yesterday","replication-hashes":[]}"#
        )
        .is_err());
        assert!(AttestationStatement::from_payload(
            br#"{"version":"1","datetime":"2024-01-01T00:00:00Z","replication-hashes":[{"source":"a","currhash":"short","summaryhash":"short"}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_offset_timestamps_normalized_to_utc() {
        let parsed = parse_datetime("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(parsed, fixed_time());
        assert_eq!(format_datetime(&parsed), "2024-01-01T00:00:00Z");
    }
}
