//! The query dispatcher: one statement in, one response out.
//!
//! Each statement runs inside a short-lived transaction on the shared
//! in-memory session, bracketed by recovery (schema replay or view
//! reconstruction) before and log emission after. The session transaction
//! is rolled back unconditionally; durability lives in the per-table log
//! databases and the parquet objects they reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use icebase_core::{
    classify, storage_from_env, EngineError, Operation, ParseResponse, QueryResponse, Result,
    Storage,
};
use tokio::sync::Mutex;

use crate::log::TableLog;
use crate::session::{Session, SessionConfig};
use crate::{rows, vacuum};

/// Engine construction settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Storage root: the filesystem directory, or the key prefix inside
    /// the bucket when the object-store backend is selected. Also the
    /// local root for the per-table log databases.
    pub storage_dir: String,
    /// Split request bodies on top-level `;` and run each statement.
    pub query_splitting: bool,
    /// Run `INSTALL` for the managed engine extensions at session open.
    pub install_extensions: bool,
    /// Run `LOAD` for the managed engine extensions at session open.
    pub load_extensions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: "icebase_tables".to_string(),
            query_splitting: false,
            install_extensions: false,
            load_extensions: false,
        }
    }
}

impl EngineConfig {
    /// Overrides the storage root directory.
    pub fn with_storage_dir(mut self, dir: impl Into<String>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Enables `;` query splitting.
    pub fn with_query_splitting(mut self) -> Self {
        self.query_splitting = true;
        self
    }

    /// Configures extension management at session open.
    pub fn with_extensions(mut self, install: bool, load: bool) -> Self {
        self.install_extensions = install;
        self.load_extensions = load;
        self
    }
}

/// The append-only analytical table engine.
pub struct Engine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    session: Mutex<Session>,
    logs: Mutex<HashMap<String, Arc<TableLog>>>,
}

impl Engine {
    /// Builds an engine with the backend selected from the environment.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let storage = storage_from_env(&config.storage_dir);
        Self::with_storage(config, storage)
    }

    /// Builds an engine over an explicit storage backend.
    pub fn with_storage(config: EngineConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let session = Session::open(SessionConfig {
            install_extensions: config.install_extensions,
            load_extensions: config.load_extensions,
            secret_sql: storage.engine_secret("icebase"),
        })?;
        Ok(Self {
            config,
            storage,
            session: Mutex::new(session),
            logs: Mutex::new(HashMap::new()),
        })
    }

    /// The storage backend this engine persists through.
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Get-or-create the log handle for a table.
    async fn log_for(&self, table: &str) -> Arc<TableLog> {
        let mut logs = self.logs.lock().await;
        Arc::clone(logs.entry(table.to_string()).or_insert_with(|| {
            Arc::new(TableLog::new(
                table,
                Arc::clone(&self.storage),
                &self.config.storage_dir,
            ))
        }))
    }

    /// Handles one `/query` body: classify, recover, execute and log each
    /// statement; the response is the last statement's. The batch stops at
    /// the first error; prior statements remain durable.
    pub async fn handle_query(&self, body: &str) -> Result<QueryResponse> {
        let statements = if self.config.query_splitting {
            split_statements(body)
        } else {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        };

        let mut response = QueryResponse::empty();
        let total = statements.len();
        for (index, statement) in statements.iter().enumerate() {
            response = self.dispatch(statement, index, total).await?;
        }
        Ok(response)
    }

    async fn dispatch(&self, statement: &str, index: usize, total: usize) -> Result<QueryResponse> {
        let started = Instant::now();
        let (op, table) = classify(statement);
        tracing::info!(
            operation = %op,
            statement = index + 1,
            of = total,
            sql = statement,
            "dispatching"
        );

        let mut session = self.session.lock().await;
        session.begin()?;
        let result = self
            .run_in_transaction(&mut session, op, table.as_deref(), statement)
            .await;
        session.rollback();
        drop(session);

        match &result {
            Ok(_) => icebase_observability::record_statement(&op.to_string(), started.elapsed()),
            Err(err) => {
                icebase_observability::record_statement_failure(&op.to_string(), &err.to_string())
            }
        }
        result
    }

    async fn run_in_transaction(
        &self,
        session: &mut Session,
        op: Operation,
        table: Option<&str>,
        statement: &str,
    ) -> Result<QueryResponse> {
        let log = match table {
            Some(name) => Some(self.log_for(name).await),
            None => None,
        };

        // Pre-statement recovery: reads get the file-backed view, writes
        // get the bare replayed schema.
        if let Some(log) = &log {
            match op {
                Operation::Select | Operation::Vacuum => log.build_view(session)?,
                Operation::CreateTable | Operation::Insert => log.replay_schema(session)?,
                Operation::Other => {}
            }
        }

        let response = if op == Operation::Vacuum {
            let log = log
                .as_ref()
                .ok_or_else(|| EngineError::Parse("VACUUM requires a table name".into()))?;
            let vacuum_started = Instant::now();
            let merged = log.merge(session).await?;
            icebase_observability::record_vacuum(log.table(), merged, vacuum_started.elapsed());
            QueryResponse::empty()
        } else {
            rows::execute_capture(session.conn(), statement)?
        };

        // Post-statement log emission. Skipped entirely on error paths:
        // any failure above has already returned.
        match (op, &log) {
            (Operation::CreateTable, Some(log)) => log.log_ddl(statement)?,
            (Operation::Insert, Some(log)) => log.insert(session).await?,
            _ => {}
        }

        Ok(response)
    }

    /// Handles one `/parse` body.
    pub fn handle_parse(&self, body: &str) -> ParseResponse {
        let (op, table) = classify(body);
        ParseResponse {
            operation: op.to_string(),
            table: table.unwrap_or_default(),
        }
    }

    /// Routes a body to an endpoint handler and serialises the response,
    /// exactly as the HTTP surface does. Used by the in-process CLI
    /// client.
    pub async fn post_endpoint(&self, endpoint: &str, body: &str) -> Result<String> {
        match endpoint {
            "/query" => {
                let response = self.handle_query(body).await?;
                serde_json::to_string(&response)
                    .map_err(|err| EngineError::Internal(err.to_string()))
            }
            "/parse" => serde_json::to_string(&self.handle_parse(body))
                .map_err(|err| EngineError::Internal(err.to_string())),
            other => Err(EngineError::NotFound(format!("unknown endpoint: {other}"))),
        }
    }

    /// Deletes unreferenced parquet objects for a table.
    pub async fn gc(&self, table: &str) -> Result<Vec<String>> {
        let log = self.log_for(table).await;
        // Hold the session lock so no statement can be writing files
        // while the sweep runs.
        let _session = self.session.lock().await;
        vacuum::gc(&log).await
    }

    /// Closes all per-table log databases. Idempotent.
    pub async fn close(&self) {
        let logs = self.logs.lock().await;
        for log in logs.values() {
            log.close();
        }
    }

    /// Destroys every known table's durable state and resets the
    /// in-memory session.
    pub async fn destroy(&self) -> Result<()> {
        let mut logs = self.logs.lock().await;
        for (_, log) in logs.drain() {
            log.destroy().await?;
        }
        drop(logs);

        let mut session = self.session.lock().await;
        session.reset()
    }
}

/// Splits a request body on `;`, peeling `--` line comments off at the
/// split boundaries and dropping empty fragments.
pub fn split_statements(body: &str) -> Vec<String> {
    let mut statements = Vec::new();
    for fragment in body.split(';') {
        let mut rest = fragment.trim();
        while rest.starts_with("--") {
            rest = match rest.find('\n') {
                Some(pos) => rest[pos + 1..].trim(),
                None => "",
            };
        }
        if !rest.is_empty() {
            statements.push(rest.to_string());
        }
    }
    statements
}
