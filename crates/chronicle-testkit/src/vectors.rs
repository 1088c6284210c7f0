//! Golden vectors for deterministic encoding.
//!
//! Statement bytes are signed and hashed into the chain, so every build
//! must produce exactly these strings.

use chrono::{TimeZone, Utc};

use chronicle_core::{AttestationStatement, Blake3Hash, ReplicationHash};

/// A statement and its expected canonical encoding.
#[derive(Debug, Clone)]
pub struct StatementVector {
    pub name: &'static str,
    pub version: &'static str,
    /// Unix seconds.
    pub datetime: i64,
    /// `(source, curr_hash fill byte, summary_hash fill byte)`.
    pub hashes: &'static [(&'static str, u8, u8)],
    pub expected_json: &'static str,
}

impl StatementVector {
    pub fn statement(&self) -> AttestationStatement {
        let datetime = Utc
            .timestamp_opt(self.datetime, 0)
            .single()
            .unwrap_or_default();
        let hashes = self
            .hashes
            .iter()
            .map(|(source, curr, summary)| ReplicationHash {
                source: source.to_string(),
                curr_hash: Blake3Hash([*curr; 32]),
                summary_hash: Blake3Hash([*summary; 32]),
            })
            .collect();
        AttestationStatement::new(self.version, datetime, hashes)
    }
}

/// All statement vectors.
pub fn statement_vectors() -> Vec<StatementVector> {
    vec![
        StatementVector {
            name: "no sources",
            version: "1.0.0",
            datetime: 1_704_067_200, // 2024-01-01T00:00:00Z
            hashes: &[],
            expected_json: r#"{"version":"1.0.0","datetime":"2024-01-01T00:00:00Z","replication-hashes":[]}"#,
        },
        StatementVector {
            name: "two sources in listing order",
            version: "2.1.0",
            datetime: 1_709_294_400, // 2024-03-01T12:00:00Z
            hashes: &[("zeta", 0x11, 0x22), ("alpha", 0x00, 0xff)],
            expected_json: concat!(
                r#"{"version":"2.1.0","datetime":"2024-03-01T12:00:00Z","replication-hashes":["#,
                r#"{"source":"zeta","currhash":"ERERERERERERERERERERERERERERERERERERERERERE=","#,
                r#""summaryhash":"IiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiI="},"#,
                r#"{"source":"alpha","currhash":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=","#,
                r#""summaryhash":"__________________________________________8="}]}"#,
            ),
        },
    ]
}

/// An interval expression and what it should parse to.
#[derive(Debug, Clone)]
pub struct IntervalVector {
    pub expr: &'static str,
    pub months: u32,
    pub seconds: i64,
}

/// Interval expressions seen in real settings files.
pub fn interval_vectors() -> Vec<IntervalVector> {
    vec![
        IntervalVector { expr: "1 day", months: 0, seconds: 86_400 },
        IntervalVector { expr: "+1 week", months: 0, seconds: 604_800 },
        IntervalVector { expr: "12 hours", months: 0, seconds: 43_200 },
        IntervalVector { expr: "a month", months: 1, seconds: 0 },
        IntervalVector { expr: "1 year", months: 12, seconds: 0 },
        IntervalVector { expr: "1 month, 2 days and 3 hours", months: 1, seconds: 183_600 },
        IntervalVector { expr: "90min", months: 0, seconds: 5_400 },
    ]
}

/// Check every vector, returning the names of those that fail.
pub fn verify_all_vectors() -> Vec<String> {
    let mut failures = Vec::new();

    for vector in statement_vectors() {
        match vector.statement().to_canonical_bytes() {
            Ok(bytes) if bytes == vector.expected_json.as_bytes() => {}
            _ => failures.push(vector.name.to_string()),
        }
    }

    for vector in interval_vectors() {
        match chronicle_core::AttestationInterval::parse(vector.expr) {
            Ok(i) if i.months() == vector.months && i.fixed().num_seconds() == vector.seconds => {}
            _ => failures.push(vector.expr.to_string()),
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_pass() {
        assert_eq!(verify_all_vectors(), Vec::<String>::new());
    }

    #[test]
    fn test_vectors_decode_back() {
        for vector in statement_vectors() {
            let decoded =
                AttestationStatement::from_payload(vector.expected_json.as_bytes()).unwrap();
            assert_eq!(decoded, vector.statement(), "{}", vector.name);
        }
    }
}
