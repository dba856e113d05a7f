//! Wire-level response model for the query endpoints.
//!
//! Cells are uniformly stringified (with `"NULL"` for null values and
//! canonical hyphenated strings for UUIDs), which keeps the payload
//! compatible with analytics-protocol CLI clients.

use serde::{Deserialize, Serialize};

/// Column name and engine type name for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name as reported by the engine.
    pub name: String,
    /// Engine type name, e.g. `BIGINT` or `VARCHAR`.
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Execution statistics attached to every successful response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Wall-clock execution time in seconds.
    pub elapsed: f64,
}

/// Result of one `/query` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Column metadata, one entry per result column.
    pub meta: Vec<ColumnMeta>,
    /// Row data; always present, never null.
    pub data: Vec<Vec<String>>,
    /// Number of rows in `data`.
    pub rows: usize,
    /// Execution statistics.
    pub statistics: Statistics,
}

impl Default for QueryResponse {
    fn default() -> Self {
        Self {
            meta: Vec::new(),
            data: Vec::new(),
            rows: 0,
            statistics: Statistics::default(),
        }
    }
}

impl QueryResponse {
    /// Empty response used for statements that produce no rows (VACUUM).
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Result of one `/parse` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResponse {
    /// Operation name, e.g. `CREATE_TABLE`.
    pub operation: String,
    /// Primary table name, or the empty string when none was identified.
    pub table: String,
}
