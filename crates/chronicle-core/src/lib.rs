//! # Chronicle Core
//!
//! Pure primitives for Chronicle: Blakechain linkage, signatures, attestation
//! statements, and schedule arithmetic.
//!
//! This crate contains no I/O, no storage, no clock. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`ChainEntry`] - One signed, hash-linked record in a ledger
//! - [`Linkage`] - The `curr_hash`/`summary_hash` pair binding an entry to its history
//! - [`AttestationStatement`] - Canonical payload of a cross-publication entry
//! - [`AttestationInterval`] - Relative interval between attestation runs
//!
//! ## Linkage
//!
//! See [`chain`] for the hash relations and [`verify_entries`] for replay.

pub mod attestation;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod schedule;

pub use attestation::{AttestationStatement, ReplicationHash};
pub use chain::{
    compute_next_linkage, verify_entries, ChainEntry, ChainFault, ChainVerification, Linkage,
    NewEntry, GENESIS_CONSTANT,
};
pub use crypto::{verify_detached, Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, Result};
pub use schedule::{is_due, AttestationInterval};
