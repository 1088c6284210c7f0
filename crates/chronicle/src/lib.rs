//! # Chronicle
//!
//! An append-only, signed ledger (the Blakechain) with scheduled
//! cross-attestation of replicated peers.
//!
//! ## Overview
//!
//! - **Blakechain**: every entry carries a signed payload and two hashes
//!   binding it to everything before it
//! - **Replication**: entries of remote chains are stored per source
//! - **Attestation**: at a configured interval the newest hashes of every
//!   source are signed into a statement and appended to the local chain
//!
//! ## Key Concepts
//!
//! - **currHash**: `H(prev.curr_hash || payload || signature)`
//! - **summaryHash**: `H(prev.summary_hash || curr_hash)`
//! - **Marker**: the time of the last attestation run, advanced before the
//!   run starts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chronicle::{Attestor, Blakechain, ChronicleConfig, FileMarker, Scheduler};
//! use chronicle::core::Keypair;
//! use chronicle::store::SqliteStore;
//!
//! async fn example() -> chronicle::Result<()> {
//!     let config = ChronicleConfig::from_json(r#"{"scheduled-attestation": "1 day"}"#)?;
//!
//!     let store = Arc::new(SqliteStore::open("chronicle.db")?);
//!     let chain = Arc::new(Blakechain::new(store));
//!     chain.append(b"hello", &Keypair::generate()).await?;
//!
//!     let attestor = Attestor::new(chain, Keypair::generate(), config.version.clone());
//!     let marker = Arc::new(FileMarker::new(&config.marker_path));
//!     let scheduler = Scheduler::from_config(attestor, marker, &config)?;
//!
//!     if let Some(entry) = scheduler.run_if_due(chrono::Utc::now()).await? {
//!         println!("attested at sequence {}", entry.sequence);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `chronicle::core` - Chain primitives, statements, intervals
//! - `chronicle::store` - Storage abstraction, SQLite and in-memory stores

pub mod attestor;
pub mod blakechain;
pub mod config;
pub mod error;
pub mod marker;
pub mod scheduler;

pub use chronicle_core as core;
pub use chronicle_store as store;

pub use attestor::{Attestor, Clock, FixedClock, SystemClock};
pub use blakechain::Blakechain;
pub use config::{ChronicleConfig, DEFAULT_MARKER_PATH};
pub use error::{ChronicleError, Result};
pub use marker::{FileMarker, MarkerStore, StoreMarker};
pub use scheduler::Scheduler;

pub use chronicle_core::{
    AttestationInterval, AttestationStatement, Blake3Hash, ChainEntry, ChainVerification,
    Ed25519PublicKey, Ed25519Signature, Keypair, ReplicationHash,
};
