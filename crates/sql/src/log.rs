//! Per-table durable log store.
//!
//! Each table owns a single-file DuckDB database `log/log.db` holding two
//! tables: `schema_log`, the ordered DDL event sequence, and `insert_log`,
//! the set of data-file records. The log database always lives on the
//! local filesystem; the parquet objects it references live behind the
//! storage backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use duckdb::{params, Connection};
use icebase_core::{EngineError, Result, Storage};
use uuid::Uuid;

use crate::session::{engine_err, Session};
use crate::{quote_ident, quote_literal, vacuum, view};

const LOG_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_log (
    timestamp TIMESTAMP PRIMARY KEY,
    raw_query TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS insert_log (
    id UUID PRIMARY KEY,
    partition TEXT NOT NULL DEFAULT '',
    tombstoned_unix_time BIGINT NOT NULL DEFAULT 0,
    size BIGINT NOT NULL DEFAULT 0
);
";

/// A live data-file record from `insert_log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    /// Data file id; also the parquet object name.
    pub id: String,
    /// Tombstone instant, zero while live.
    pub tombstoned_unix_time: i64,
    /// Object size in bytes at the moment of write.
    pub size: i64,
}

/// Durable log handle for one table.
///
/// The handle lazily materialises `log.db` on first use and keeps
/// exclusive ownership of its connection. At most one handle per table
/// exists per process (enforced by the engine's log map).
pub struct TableLog {
    table: String,
    storage: Arc<dyn Storage>,
    log_dir: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl TableLog {
    /// Creates a handle; the log database is opened on first use.
    pub fn new(table: impl Into<String>, storage: Arc<dyn Storage>, local_root: &str) -> Self {
        let table = table.into();
        let log_dir = PathBuf::from(local_root).join(&table).join("log");
        Self {
            table,
            storage,
            log_dir,
            conn: Mutex::new(None),
        }
    }

    /// Table this log belongs to.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Storage-relative path of a data object.
    pub(crate) fn data_object(&self, id: &str) -> String {
        format!("{}/data/{}.parquet", self.table, id)
    }

    /// Storage-relative prefix of the table's data area.
    pub(crate) fn data_prefix(&self) -> String {
        format!("{}/data", self.table)
    }

    /// Runs a closure against the (lazily opened) log connection. The
    /// guard never crosses an await point.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> duckdb::Result<T>) -> Result<T> {
        let mut slot = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("log connection lock poisoned".into()))?;
        if slot.is_none() {
            std::fs::create_dir_all(&self.log_dir).map_err(|err| {
                EngineError::Internal(format!(
                    "failed to create log directory {}: {err}",
                    self.log_dir.display()
                ))
            })?;
            let db_path = self.log_dir.join("log.db");
            let conn = Connection::open(&db_path).map_err(engine_err)?;
            conn.execute_batch(LOG_SCHEMA).map_err(engine_err)?;
            tracing::debug!(table = %self.table, path = %db_path.display(), "opened log database");
            *slot = Some(conn);
        }
        let conn = slot
            .as_ref()
            .ok_or_else(|| EngineError::Internal("log connection unavailable".into()))?;
        f(conn).map_err(engine_err)
    }

    /// Records a DDL event with the current timestamp.
    pub fn log_ddl(&self, raw_sql: &str) -> Result<()> {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schema_log (timestamp, raw_query) VALUES (CAST(? AS TIMESTAMP), ?)",
                params![now, raw_sql],
            )
            .map(|_| ())
        })
    }

    /// All DDL events in replay order.
    pub fn schema_queries(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT raw_query FROM schema_log ORDER BY timestamp ASC")?;
            let mut rows = stmt.query([])?;
            let mut queries = Vec::new();
            while let Some(row) = rows.next()? {
                queries.push(row.get::<_, String>(0)?);
            }
            Ok(queries)
        })
    }

    /// Replays the schema log into the session transaction. Idempotent
    /// against an empty session.
    pub fn replay_schema(&self, session: &Session) -> Result<()> {
        for ddl in self.schema_queries()? {
            session
                .conn()
                .execute_batch(&ddl)
                .map_err(|err| EngineError::SchemaReplay(err.to_string()))?;
        }
        Ok(())
    }

    /// Ids of the live set, ordered by id descending (newest first).
    pub fn live_files(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CAST(id AS VARCHAR) FROM insert_log \
                 WHERE tombstoned_unix_time = 0 ORDER BY id DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get::<_, String>(0)?);
            }
            Ok(ids)
        })
    }

    /// All insert-log records, for inspection and garbage collection.
    pub fn records(&self) -> Result<Vec<InsertRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CAST(id AS VARCHAR), tombstoned_unix_time, size \
                 FROM insert_log ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(InsertRecord {
                    id: row.get(0)?,
                    tombstoned_unix_time: row.get(1)?,
                    size: row.get(2)?,
                });
            }
            Ok(records)
        })
    }

    fn record_insert(&self, id: &str, size: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO insert_log (id, partition, tombstoned_unix_time, size) \
                 VALUES (CAST(? AS UUID), '', 0, ?)",
                params![id, size as i64],
            )
            .map(|_| ())
        })
    }

    /// Single-transaction bookkeeping for a merge: the new file becomes
    /// live, every id in `tombstoned` stops being part of the live set.
    pub(crate) fn record_merge(
        &self,
        new_id: &str,
        size: u64,
        tombstoned: &[String],
        now_unix: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN TRANSACTION")?;
            let result = (|| {
                conn.execute(
                    "INSERT INTO insert_log (id, partition, tombstoned_unix_time, size) \
                     VALUES (CAST(? AS UUID), '', 0, ?)",
                    params![new_id, size as i64],
                )?;
                for id in tombstoned {
                    conn.execute(
                        "UPDATE insert_log SET tombstoned_unix_time = ? WHERE id = CAST(? AS UUID)",
                        params![now_unix, id],
                    )?;
                }
                Ok(())
            })();
            match result {
                Ok(()) => conn.execute_batch("COMMIT"),
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(err)
                }
            }
        })
    }

    /// Mutating path for `INSERT`: persists the statement's rows as a new
    /// parquet object and records it in `insert_log`.
    ///
    /// The log row is written only after the parquet write and stat
    /// succeed, so a failure can orphan a file (reclaimed by [`vacuum::gc`])
    /// but never expose a log row without a backing object.
    pub async fn insert(&self, session: &mut Session) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let object = self.data_object(&id);

        self.storage.create_dir(&self.data_prefix()).await?;

        let copy_sql = format!(
            "COPY {} TO {} (FORMAT PARQUET)",
            quote_ident(&self.table),
            quote_literal(&self.storage.write_path(&object)),
        );
        session.conn().execute_batch(&copy_sql).map_err(engine_err)?;

        let info = self.storage.stat(&object).await?;
        self.record_insert(&id, info.size)?;

        icebase_observability::record_parquet_write(&self.table, info.size);
        tracing::info!(table = %self.table, id = %id, size = info.size, "data file appended");
        Ok(())
    }

    /// Materialises the table's read view inside the session transaction.
    pub fn build_view(&self, session: &Session) -> Result<()> {
        view::rebuild_view(self, session)
    }

    /// Folds the live set into a single data file.
    pub async fn merge(&self, session: &mut Session) -> Result<usize> {
        vacuum::merge(self, session).await
    }

    /// Closes the log database. Idempotent.
    pub fn close(&self) {
        if let Ok(mut slot) = self.conn.lock() {
            slot.take();
        }
    }

    /// Closes the log and deletes everything the table owns: parquet
    /// objects through the storage backend and the local log directory.
    pub async fn destroy(&self) -> Result<()> {
        self.close();
        for object in self.storage.list(&format!("{}/", self.table)).await? {
            self.storage.delete(&object).await?;
        }
        if let Some(table_dir) = self.log_dir.parent() {
            match std::fs::remove_dir_all(table_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(EngineError::Internal(err.to_string())),
            }
        }
        tracing::info!(table = %self.table, "table destroyed");
        Ok(())
    }
}
