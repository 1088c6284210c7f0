//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::{Connection, TransactionBehavior};

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
/// The version check and the migrations share one immediate transaction, so
/// connections opening the same fresh file take turns instead of racing to
/// create the schema. Callers should set a busy timeout first.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for version in (current + 1)..=CURRENT_VERSION {
        apply_migration(&tx, version)?;

        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
        )?;
        tracing::debug!(version, "applied schema migration");
    }

    tx.commit()?;
    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Local chain
        CREATE TABLE chain (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            prev_sequence INTEGER NOT NULL,    -- 0 for the first entry
            payload BLOB NOT NULL,
            signature BLOB NOT NULL,           -- 64 bytes, Ed25519
            public_key BLOB NOT NULL,          -- 32 bytes, signer of this entry
            curr_hash BLOB NOT NULL,           -- 32 bytes, Blake3
            summary_hash BLOB NOT NULL,        -- 32 bytes, Blake3
            created_at INTEGER NOT NULL,       -- Unix ms, advisory

            UNIQUE(prev_sequence)
        );

        -- Remote ledgers we replicate
        CREATE TABLE replication_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unique_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            public_key BLOB NOT NULL
        );

        -- Entries ingested from replicated ledgers, keyed by remote sequence
        CREATE TABLE replication_chain (
            source_id INTEGER NOT NULL REFERENCES replication_sources(id),
            sequence INTEGER NOT NULL,
            prev_sequence INTEGER NOT NULL,
            payload BLOB NOT NULL,
            signature BLOB NOT NULL,
            public_key BLOB NOT NULL,
            curr_hash BLOB NOT NULL,
            summary_hash BLOB NOT NULL,
            created_at INTEGER NOT NULL,

            PRIMARY KEY (source_id, sequence)
        );

        -- Single-row attestation marker
        CREATE TABLE attestation_schedule (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_run INTEGER NOT NULL          -- Unix ms
        );

        CREATE INDEX idx_chain_curr_hash ON chain(curr_hash);
        "#,
    )?;

    Ok(())
}
