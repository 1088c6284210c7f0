//! Error types for Chronicle Core.

use thiserror::Error;

/// Core errors that can occur during key handling, encoding, and parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signing key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid interval expression {expr:?}: {reason}")]
    InvalidInterval { expr: String, reason: String },
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            CoreError::DecodingError(e.to_string())
        } else {
            CoreError::EncodingError(e.to_string())
        }
    }
}

impl From<base64::DecodeError> for CoreError {
    fn from(e: base64::DecodeError) -> Self {
        CoreError::DecodingError(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
