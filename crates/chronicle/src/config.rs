//! Configuration for attestation scheduling.
//!
//! Settings are passed explicitly at construction; nothing is looked up
//! from ambient state. Unknown keys are ignored so the same settings
//! document can carry options for other components.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chronicle_core::AttestationInterval;
use serde::{Deserialize, Serialize};

use crate::error::{ChronicleError, Result};

/// Default location of the file marker, relative to the working directory.
pub const DEFAULT_MARKER_PATH: &str = "local/replication-last-run";

/// Settings recognized by Chronicle.
///
/// ```json
/// {"scheduled-attestation": "1 day", "attestation-timeout-secs": 30}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChronicleConfig {
    /// Interval expression between attestation runs. Absent disables
    /// attestation entirely.
    #[serde(default)]
    pub scheduled_attestation: Option<String>,

    /// Protocol version written into statements.
    #[serde(default = "default_version")]
    pub version: String,

    /// Where the file marker lives.
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,

    /// Upper bound on gathering an attestation statement.
    #[serde(default)]
    pub attestation_timeout_secs: Option<u64>,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_marker_path() -> PathBuf {
    PathBuf::from(DEFAULT_MARKER_PATH)
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            scheduled_attestation: None,
            version: default_version(),
            marker_path: default_marker_path(),
            attestation_timeout_secs: None,
        }
    }
}

impl ChronicleConfig {
    /// Parse and validate a JSON settings document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ChronicleError::Config(format!("invalid settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ChronicleError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Check that every option is usable.
    pub fn validate(&self) -> Result<()> {
        self.attestation_interval()?;
        if self.version.trim().is_empty() {
            return Err(ChronicleError::Config("version must not be empty".into()));
        }
        if self.attestation_timeout_secs == Some(0) {
            return Err(ChronicleError::Config(
                "attestation-timeout-secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The parsed attestation interval, `None` when attestation is disabled.
    pub fn attestation_interval(&self) -> Result<Option<AttestationInterval>> {
        self.scheduled_attestation
            .as_deref()
            .map(AttestationInterval::parse)
            .transpose()
            .map_err(ChronicleError::from)
    }

    pub fn attestation_timeout(&self) -> Option<Duration> {
        self.attestation_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChronicleConfig::from_json("{}").unwrap();
        assert_eq!(config, ChronicleConfig::default());
        assert_eq!(config.marker_path, PathBuf::from("local/replication-last-run"));
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert!(config.attestation_interval().unwrap().is_none());
        assert!(config.attestation_timeout().is_none());
    }

    #[test]
    fn test_recognized_options() {
        let config = ChronicleConfig::from_json(
            r#"{
                "scheduled-attestation": "1 day",
                "version": "2.3.0",
                "marker-path": "/var/lib/chronicle/marker",
                "attestation-timeout-secs": 30,
                "unrelated-option": true
            }"#,
        )
        .unwrap();

        let interval = config.attestation_interval().unwrap().unwrap();
        assert_eq!(interval.fixed().num_seconds(), 86_400);
        assert_eq!(config.version, "2.3.0");
        assert_eq!(config.marker_path, PathBuf::from("/var/lib/chronicle/marker"));
        assert_eq!(config.attestation_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_bad_interval_is_config_error() {
        let err = ChronicleConfig::from_json(r#"{"scheduled-attestation": "whenever"}"#)
            .unwrap_err();
        assert!(matches!(err, ChronicleError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = ChronicleConfig::from_json("{scheduled-attestation").unwrap_err();
        assert!(matches!(err, ChronicleError::Config(_)));

        let err = ChronicleConfig::from_json(r#"{"attestation-timeout-secs": 0}"#).unwrap_err();
        assert!(matches!(err, ChronicleError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scheduled-attestation": "2 hours"}"#).unwrap();

        let config = ChronicleConfig::from_file(&path).unwrap();
        assert_eq!(
            config.attestation_interval().unwrap().unwrap().fixed().num_seconds(),
            7_200
        );

        let missing = ChronicleConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ChronicleError::Config(_))));
    }
}
