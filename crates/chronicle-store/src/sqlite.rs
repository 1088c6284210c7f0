//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use chronicle_core::{Blake3Hash, ChainEntry, Ed25519PublicKey, Ed25519Signature, NewEntry};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{AppendResult, InsertResult, NewReplicationSource, ReplicationSource, Store};

const ENTRY_COLUMNS: &str =
    "sequence, prev_sequence, payload, signature, public_key, curr_hash, summary_hash, created_at";

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime. Several `SqliteStore`s (or
/// processes) may share one database file; appends are arbitrated by an
/// immediate transaction and the `UNIQUE(prev_sequence)` constraint.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn fixed_blob<const N: usize>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    name: &str,
) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(idx, name.into(), rusqlite::types::Type::Blob))
}

// Columns in ENTRY_COLUMNS order.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChainEntry> {
    Ok(ChainEntry {
        sequence: row.get::<_, i64>(0)? as u64,
        prev_sequence: row.get::<_, i64>(1)? as u64,
        payload: Bytes::from(row.get::<_, Vec<u8>>(2)?),
        signature: Ed25519Signature(fixed_blob(row, 3, "signature")?),
        public_key: Ed25519PublicKey(fixed_blob(row, 4, "public_key")?),
        curr_hash: Blake3Hash(fixed_blob(row, 5, "curr_hash")?),
        summary_hash: Blake3Hash(fixed_blob(row, 6, "summary_hash")?),
        created_at: row.get(7)?,
    })
}

fn row_to_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplicationSource> {
    Ok(ReplicationSource {
        id: row.get(0)?,
        unique_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        public_key: Ed25519PublicKey(fixed_blob(row, 4, "public_key")?),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp out of range: {}", ms)))
}

#[async_trait]
impl Store for SqliteStore {
    async fn append_entry(
        &self,
        expected_prev: Option<u64>,
        entry: NewEntry,
    ) -> Result<AppendResult> {
        self.blocking(move |conn| {
            // IMMEDIATE takes the write lock up front, so the tip read below
            // cannot go stale before the insert.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<i64> =
                tx.query_row("SELECT MAX(sequence) FROM chain", [], |row| row.get(0))?;
            let current = current.map(|s| s as u64);

            if current != expected_prev {
                tracing::debug!(?expected_prev, ?current, "append rejected, tip moved");
                return Ok(AppendResult::TipMoved { current });
            }

            let prev_sequence = expected_prev.unwrap_or(0);
            let inserted = tx.execute(
                "INSERT INTO chain (
                    prev_sequence, payload, signature, public_key,
                    curr_hash, summary_hash, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    prev_sequence as i64,
                    entry.payload.as_ref(),
                    entry.signature.0.as_slice(),
                    entry.public_key.0.as_slice(),
                    entry.linkage.curr_hash.0.as_slice(),
                    entry.linkage.summary_hash.0.as_slice(),
                    entry.created_at,
                ],
            );

            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Ok(AppendResult::TipMoved { current });
                }
                Err(e) => return Err(e.into()),
            }

            let sequence = tx.last_insert_rowid() as u64;
            tx.commit()?;

            Ok(AppendResult::Appended(entry.into_entry(sequence, prev_sequence)))
        })
        .await
    }

    async fn tip(&self) -> Result<Option<ChainEntry>> {
        self.blocking(|conn| {
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM chain ORDER BY sequence DESC LIMIT 1"),
                [],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_entry(&self, sequence: u64) -> Result<Option<ChainEntry>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM chain WHERE sequence = ?1"),
                params![sequence as i64],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_entry_by_hash(&self, curr_hash: &Blake3Hash) -> Result<Option<ChainEntry>> {
        let curr_hash = *curr_hash;

        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM chain WHERE curr_hash = ?1"),
                params![curr_hash.0.as_slice()],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_entries_range(&self, from: u64, to: u64) -> Result<Vec<ChainEntry>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM chain
                 WHERE sequence >= ?1 AND sequence <= ?2
                 ORDER BY sequence"
            ))?;

            let entries = stmt
                .query_map(params![from as i64, to as i64], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
        .await
    }

    async fn entries_since(&self, after: u64) -> Result<Vec<ChainEntry>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM chain WHERE sequence > ?1 ORDER BY sequence"
            ))?;

            let entries = stmt
                .query_map(params![after as i64], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
        .await
    }

    async fn entry_count(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chain", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn add_replication_source(
        &self,
        source: NewReplicationSource,
    ) -> Result<ReplicationSource> {
        self.blocking(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO replication_sources (unique_id, name, url, public_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    &source.unique_id,
                    &source.name,
                    &source.url,
                    source.public_key.0.as_slice(),
                ],
            );

            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::AlreadyExists(format!(
                        "replication source {}",
                        source.unique_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            Ok(ReplicationSource {
                id: conn.last_insert_rowid(),
                unique_id: source.unique_id,
                name: source.name,
                url: source.url,
                public_key: source.public_key,
            })
        })
        .await
    }

    async fn list_replication_sources(&self) -> Result<Vec<ReplicationSource>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, unique_id, name, url, public_key
                 FROM replication_sources ORDER BY id",
            )?;

            let sources = stmt
                .query_map([], row_to_source)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(sources)
        })
        .await
    }

    async fn get_replication_source(&self, unique_id: &str) -> Result<Option<ReplicationSource>> {
        let unique_id = unique_id.to_string();

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT id, unique_id, name, url, public_key
                 FROM replication_sources WHERE unique_id = ?1",
                params![unique_id],
                row_to_source,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_replication_sources(&self) -> Result<bool> {
        self.blocking(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM replication_sources)",
                [],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn insert_replicated_entry(
        &self,
        source_id: i64,
        entry: &ChainEntry,
    ) -> Result<InsertResult> {
        let entry = entry.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let known: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM replication_sources WHERE id = ?1)",
                params![source_id],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::NotFound(format!(
                    "replication source id {}",
                    source_id
                )));
            }

            let existing: Option<(Vec<u8>, Vec<u8>)> = tx
                .query_row(
                    "SELECT curr_hash, summary_hash FROM replication_chain
                     WHERE source_id = ?1 AND sequence = ?2",
                    params![source_id, entry.sequence as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((curr, summary)) = existing {
                let existing_curr = Blake3Hash::from_slice(&curr)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                if existing_curr == entry.curr_hash
                    && summary.as_slice() == entry.summary_hash.0.as_slice()
                {
                    return Ok(InsertResult::AlreadyExists);
                }
                return Ok(InsertResult::Conflict {
                    existing: existing_curr,
                });
            }

            tx.execute(
                "INSERT INTO replication_chain (
                    source_id, sequence, prev_sequence, payload, signature,
                    public_key, curr_hash, summary_hash, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    source_id,
                    entry.sequence as i64,
                    entry.prev_sequence as i64,
                    entry.payload.as_ref(),
                    entry.signature.0.as_slice(),
                    entry.public_key.0.as_slice(),
                    entry.curr_hash.0.as_slice(),
                    entry.summary_hash.0.as_slice(),
                    entry.created_at,
                ],
            )?;
            tx.commit()?;

            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn latest_replicated_entry(&self, source_id: i64) -> Result<Option<ChainEntry>> {
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM replication_chain
                     WHERE source_id = ?1 ORDER BY sequence DESC LIMIT 1"
                ),
                params![source_id],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_replicated_range(
        &self,
        source_id: i64,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEntry>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM replication_chain
                 WHERE source_id = ?1 AND sequence >= ?2 AND sequence <= ?3
                 ORDER BY sequence"
            ))?;

            let entries = stmt
                .query_map(params![source_id, from as i64, to as i64], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(entries)
        })
        .await
    }

    async fn last_attestation(&self) -> Result<Option<DateTime<Utc>>> {
        self.blocking(|conn| {
            let last_run: Option<i64> = conn
                .query_row(
                    "SELECT last_run FROM attestation_schedule WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            last_run.map(millis_to_datetime).transpose()
        })
        .await
    }

    async fn record_attestation(&self, now: DateTime<Utc>) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO attestation_schedule (id, last_run) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET last_run = excluded.last_run",
                params![now.timestamp_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn claim_attestation(
        &self,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.blocking(move |conn| {
            let changed = match expected {
                None => conn.execute(
                    "INSERT OR IGNORE INTO attestation_schedule (id, last_run) VALUES (1, ?1)",
                    params![now.timestamp_millis()],
                )?,
                Some(expected) => conn.execute(
                    "UPDATE attestation_schedule SET last_run = ?1
                     WHERE id = 1 AND last_run = ?2",
                    params![now.timestamp_millis(), expected.timestamp_millis()],
                )?,
            };

            Ok(changed == 1)
        })
        .await
    }
}
