//! # Chronicle Store
//!
//! Storage abstraction for Chronicle. Provides a trait-based interface for
//! the local Blakechain, replicated chains, and the attestation marker, with
//! SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AppendResult`] - Outcome of a tip-checked append
//! - [`ReplicationSource`] - A remote ledger this instance replicates
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chronicle_store::{SqliteStore, Store};
//!
//! async fn example() -> chronicle_store::Result<()> {
//!     let store = SqliteStore::open("chronicle.db")?;
//!     let tip = store.tip().await?;
//!     println!("tip: {:?}", tip.map(|e| e.sequence));
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Tip arbitration**: `append_entry` persists only on top of the expected
//!   predecessor; no two entries may share a `prev_sequence`
//! - **Idempotent ingestion**: replicated entries are keyed by remote sequence
//! - **Compare-and-set marker**: one claim wins per observed marker value

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AppendResult, InsertResult, NewReplicationSource, ReplicationSource, Store};
