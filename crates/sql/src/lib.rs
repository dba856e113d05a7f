//! icebase-sql
//!
//! The engine half of icebase: a shared in-memory DuckDB session, the
//! per-table durable log store, read-view reconstruction, vacuum and the
//! per-statement dispatcher.

#![warn(missing_docs)]

pub mod engine;
pub mod log;
mod rows;
pub mod session;
pub mod vacuum;
pub mod view;

pub use engine::{split_statements, Engine, EngineConfig};
pub use log::TableLog;
pub use session::Session;

/// Quotes an identifier for interpolation into engine SQL.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal for interpolation into engine SQL.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
