//! # Chronicle Testkit
//!
//! Testing utilities for Chronicle.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Statement encodings and interval expressions with known results
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Remote chains and pre-populated stores
//! - **Faults**: A store wrapper that fails or stalls on demand
//!
//! ## Golden Vectors
//!
//! ```rust
//! use chronicle_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use chronicle_core::verify_entries;
//! use chronicle_testkit::generators::{chain_from_params, ChainParams};
//!
//! proptest! {
//!     #[test]
//!     fn chains_verify(params: ChainParams) {
//!         let entries = chain_from_params(&params);
//!         prop_assert!(verify_entries(None, &entries).is_valid());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use chronicle_testkit::fixtures::RemoteChain;
//!
//! let remote = RemoteChain::with_entries([7u8; 32], "peer", 3);
//! assert_eq!(remote.tip().map(|e| e.sequence), Some(3));
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use faults::FaultyStore;
pub use fixtures::{multi_party_fixtures, register_source, RemoteChain, TestFixture};
pub use generators::{chain_from_params, ChainParams};
pub use vectors::{interval_vectors, statement_vectors, verify_all_vectors, StatementVector};
