//! Read-view reconstruction.
//!
//! A read query never touches real tables: the logical table is rebuilt
//! inside the statement's session transaction as a view over the parquet
//! files currently in the live set.

use duckdb::Connection;
use icebase_core::Result;

use crate::log::TableLog;
use crate::session::{engine_err, Session};
use crate::{quote_ident, quote_literal};

#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    type_name: String,
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnDef>> {
    let sql = format!(
        "SELECT name, type FROM pragma_table_info({})",
        quote_literal(table)
    );
    let mut stmt = conn.prepare(&sql).map_err(engine_err)?;
    let mut rows = stmt.query([]).map_err(engine_err)?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next().map_err(engine_err)? {
        columns.push(ColumnDef {
            name: row.get(0).map_err(engine_err)?,
            type_name: row.get(1).map_err(engine_err)?,
        });
    }
    Ok(columns)
}

/// Rebuilds `log`'s table as a read-only view in the session transaction.
///
/// The schema log is replayed to learn the column list, the replayed table
/// is dropped, and the view is created over the live set ordered newest
/// first. An empty live set still produces a correctly-typed view that
/// yields zero rows. A table with no recorded schema is left alone; the
/// user's query will fail in the engine with its usual error.
pub fn rebuild_view(log: &TableLog, session: &Session) -> Result<()> {
    if log.schema_queries()?.is_empty() {
        tracing::debug!(table = %log.table(), "no schema recorded, skipping view");
        return Ok(());
    }
    log.replay_schema(session)?;

    let table = log.table();
    let conn = session.conn();
    let columns = table_columns(conn, table)?;

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .map_err(engine_err)?;

    let live = log.live_files()?;
    let select = if live.is_empty() {
        let typed_nulls = columns
            .iter()
            .map(|c| format!("CAST(NULL AS {}) AS {}", c.type_name, quote_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {typed_nulls} WHERE false")
    } else {
        let names = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let files = live
            .iter()
            .map(|id| quote_literal(&log.storage().read_path(&log.data_object(id))))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {names} FROM read_parquet([{files}])")
    };

    conn.execute_batch(&format!(
        "CREATE OR REPLACE VIEW {} AS {select}",
        quote_ident(table)
    ))
    .map_err(engine_err)?;
    tracing::debug!(table = %table, files = live.len(), "view rebuilt");
    Ok(())
}
