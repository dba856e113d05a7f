//! The shared in-memory analytical session.
//!
//! Everything in the session is derived state: schemas and views are
//! reconstructed from the per-table logs before each statement, and the
//! session transaction is rolled back unconditionally afterwards. Losing
//! the session loses nothing durable.

use duckdb::Connection;
use icebase_core::{EngineError, Result};

const EXTENSIONS: &[&str] = &["httpfs", "json", "parquet"];

/// Maps a driver error into the engine error space.
pub(crate) fn engine_err(err: duckdb::Error) -> EngineError {
    EngineError::Engine(err.to_string())
}

/// Session bootstrap settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Run `INSTALL <ext>` for each managed extension on open.
    pub install_extensions: bool,
    /// Run `LOAD <ext>` for each managed extension on open.
    pub load_extensions: bool,
    /// Credential DDL from the storage backend, empty when not needed.
    pub secret_sql: String,
}

/// Exclusively owned in-memory DuckDB instance.
pub struct Session {
    conn: Connection,
    config: SessionConfig,
}

impl Session {
    /// Opens an in-memory session and applies extensions and credentials.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(engine_err)?;
        apply_config(&conn, &config)?;
        Ok(Self { conn, config })
    }

    /// Borrow the underlying connection for a synchronous call.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Starts the per-statement transaction bracket.
    pub fn begin(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(engine_err)
    }

    /// Ends the bracket. The rollback is unconditional: durable effects
    /// already live in the log database and the parquet objects.
    pub fn rollback(&self) {
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %err, "failed to roll back session transaction");
        }
    }

    /// Discards the session wholesale and opens a fresh one with the same
    /// bootstrap settings.
    pub fn reset(&mut self) -> Result<()> {
        let conn = Connection::open_in_memory().map_err(engine_err)?;
        apply_config(&conn, &self.config)?;
        self.conn = conn;
        Ok(())
    }
}

fn apply_config(conn: &Connection, config: &SessionConfig) -> Result<()> {
    for ext in EXTENSIONS {
        if config.install_extensions {
            conn.execute_batch(&format!("INSTALL {ext};"))
                .map_err(engine_err)?;
        }
        if config.load_extensions {
            conn.execute_batch(&format!("LOAD {ext};"))
                .map_err(engine_err)?;
        }
    }
    if !config.secret_sql.is_empty() {
        conn.execute_batch(&config.secret_sql).map_err(engine_err)?;
        tracing::debug!("registered storage credentials with the session");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_query() {
        let session = Session::open(SessionConfig::default()).expect("session");
        let answer: i64 = session
            .conn()
            .query_row("SELECT 40 + 2", [], |row| row.get(0))
            .expect("query");
        assert_eq!(answer, 42);
    }

    #[test]
    fn rollback_discards_session_state() {
        let session = Session::open(SessionConfig::default()).expect("session");
        session.begin().unwrap();
        session
            .conn()
            .execute_batch("CREATE TABLE scratch (x INT)")
            .unwrap();
        session.rollback();

        let err = session
            .conn()
            .query_row("SELECT count(*) FROM scratch", [], |row| row.get::<_, i64>(0));
        assert!(err.is_err(), "table must not survive the rollback");
    }

    #[test]
    fn reset_replaces_all_state() {
        let mut session = Session::open(SessionConfig::default()).expect("session");
        session
            .conn()
            .execute_batch("CREATE TABLE keepsake (x INT)")
            .unwrap();
        session.reset().unwrap();
        let err = session
            .conn()
            .query_row("SELECT count(*) FROM keepsake", [], |row| row.get::<_, i64>(0));
        assert!(err.is_err());
    }
}
