//! Error types for Chronicle.

use std::path::PathBuf;
use std::time::Duration;

use chronicle_core::CoreError;
use chronicle_store::StoreError;
use thiserror::Error;

/// Errors that can occur during chain and attestation operations.
#[derive(Debug, Error)]
pub enum ChronicleError {
    /// The attestation marker could not be read or written.
    #[error("marker file {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tip moved under the append, or the store rejected the insert.
    #[error("chain append failed: {0}")]
    ChainAppend(String),

    /// Key material is invalid or a signature was rejected.
    #[error("signing error: {0}")]
    Signing(String),

    /// A statement could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The caller-imposed deadline elapsed.
    #[error("attestation timed out after {0:?}")]
    Timeout(Duration),
}

impl ChronicleError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChronicleError::ChainAppend(_))
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChronicleError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<CoreError> for ChronicleError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidKeyMaterial(_)
            | CoreError::InvalidSignature
            | CoreError::InvalidPublicKey => ChronicleError::Signing(e.to_string()),
            CoreError::EncodingError(_) | CoreError::DecodingError(_) => {
                ChronicleError::Serialization(e.to_string())
            }
            CoreError::InvalidInterval { .. } => ChronicleError::Config(e.to_string()),
        }
    }
}

/// Result type for Chronicle operations.
pub type Result<T> = std::result::Result<T, ChronicleError>;
