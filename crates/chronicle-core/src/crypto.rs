//! Cryptographic primitives for Chronicle.
//!
//! Wraps Ed25519 detached signatures and Blake3 hashing with strong types.
//! Everything here is stateless and safe to call from any thread.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Length of a raw Ed25519 seed.
pub const SEED_LENGTH: usize = 32;

/// Length of a `seed || public_key` secret key.
pub const SECRET_KEY_LENGTH: usize = 64;

/// A 32-byte Blake3 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    /// Compute the Blake3 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the in-order concatenation of `parts`.
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing on the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::DecodingError(format!("hash must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encode as URL-safe base64 (padded).
    pub fn to_base64url(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Decode from URL-safe base64.
    pub fn from_base64url(s: &str) -> Result<Self> {
        Self::from_slice(&URL_SAFE.decode(s)?)
    }

    /// The zero hash (sentinel value).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Blake3Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Blake3Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing on the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Encode as URL-safe base64 (padded).
    pub fn to_base64url(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Decode from URL-safe base64.
    pub fn from_base64url(s: &str) -> Result<Self> {
        Self::from_slice(&URL_SAFE.decode(s)?)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify_strict(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }

    /// Boolean form of [`Ed25519PublicKey::verify`].
    pub fn is_valid_signature(&self, message: &[u8], signature: &Ed25519Signature) -> bool {
        self.verify(message, signature).is_ok()
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Ed25519PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing on the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encode as URL-safe base64 (padded), the transport form of a signature.
    pub fn to_base64url(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Decode from URL-safe base64.
    pub fn from_base64url(s: &str) -> Result<Self> {
        Self::from_slice(&URL_SAFE.decode(s)?)
    }

    /// The zero signature (invalid, used as placeholder).
    pub const ZERO: Self = Self([0u8; 64]);
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Ed25519Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 64]> for Ed25519Signature {
    fn from(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

// serde only derives arrays up to 32 elements, so signatures travel as byte strings.
impl Serialize for Ed25519Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Ed25519Signature::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Verify a detached signature given as raw bytes.
///
/// Never fails loudly: malformed signatures or keys simply yield `false`.
pub fn verify_detached(message: &[u8], signature: &[u8], public_key: &Ed25519PublicKey) -> bool {
    match Ed25519Signature::from_slice(signature) {
        Ok(sig) => public_key.is_valid_signature(message, &sig),
        Err(_) => false,
    }
}

/// A keypair for signing chain entries.
///
/// This wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Load key material in either supported layout.
    ///
    /// Accepts a 32-byte seed or a 64-byte `seed || public_key` secret key.
    /// For the 64-byte layout the embedded public key must match the seed.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            SEED_LENGTH => {
                let mut seed = [0u8; SEED_LENGTH];
                seed.copy_from_slice(bytes);
                Ok(Self::from_seed(&seed))
            }
            SECRET_KEY_LENGTH => {
                let mut keypair = [0u8; SECRET_KEY_LENGTH];
                keypair.copy_from_slice(bytes);
                let signing_key = SigningKey::from_keypair_bytes(&keypair).map_err(|_| {
                    CoreError::InvalidKeyMaterial("public half does not match seed".into())
                })?;
                Ok(Self { signing_key })
            }
            n => Err(CoreError::InvalidKeyMaterial(format!(
                "expected {} or {} bytes, got {}",
                SEED_LENGTH, SECRET_KEY_LENGTH, n
            ))),
        }
    }

    /// Load key material from URL-safe base64 text.
    pub fn from_base64url(s: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(s.trim())
            .map_err(|e| CoreError::InvalidKeyMaterial(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// Get the public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The 64-byte `seed || public_key` form.
    pub fn to_secret_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}
