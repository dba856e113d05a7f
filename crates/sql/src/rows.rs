//! Result capture: drains a statement's Arrow batches into the
//! string-typed response model.

use std::time::Instant;

use duckdb::arrow::datatypes::DataType;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::Connection;
use icebase_core::{ColumnMeta, EngineError, QueryResponse, Result};

use crate::session::engine_err;

/// Engine type name for a result column.
fn type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Boolean => "BOOLEAN".into(),
        DataType::Int8 => "TINYINT".into(),
        DataType::Int16 => "SMALLINT".into(),
        DataType::Int32 => "INTEGER".into(),
        DataType::Int64 => "BIGINT".into(),
        DataType::UInt8 => "UTINYINT".into(),
        DataType::UInt16 => "USMALLINT".into(),
        DataType::UInt32 => "UINTEGER".into(),
        DataType::UInt64 => "UBIGINT".into(),
        DataType::Float32 => "FLOAT".into(),
        DataType::Float64 => "DOUBLE".into(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".into(),
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => "BLOB".into(),
        DataType::Date32 | DataType::Date64 => "DATE".into(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".into(),
        DataType::Timestamp(_, _) => "TIMESTAMP".into(),
        DataType::Decimal128(_, _) | DataType::Decimal256(_, _) => "DECIMAL".into(),
        DataType::Interval(_) => "INTERVAL".into(),
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
            "LIST".into()
        }
        DataType::Struct(_) => "STRUCT".into(),
        DataType::Map(_, _) => "MAP".into(),
        other => format!("{other:?}").to_ascii_uppercase(),
    }
}

/// Executes one statement on the session connection and captures rows and
/// column metadata. NULL cells render as the string `"NULL"`; UUID columns
/// arrive from the engine as canonical hyphenated text.
pub(crate) fn execute_capture(conn: &Connection, sql: &str) -> Result<QueryResponse> {
    let started = Instant::now();

    let mut stmt = conn.prepare(sql).map_err(engine_err)?;
    let batches: Vec<RecordBatch> = stmt.query_arrow([]).map_err(engine_err)?.collect();
    let schema = stmt.schema();

    let meta: Vec<ColumnMeta> = schema
        .fields()
        .iter()
        .map(|field| ColumnMeta {
            name: field.name().clone(),
            type_name: type_name(field.data_type()),
        })
        .collect();

    let options = FormatOptions::default().with_null("NULL");
    let mut data = Vec::new();
    for batch in &batches {
        let formatters = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| EngineError::Engine(err.to_string()))?;
        for row in 0..batch.num_rows() {
            data.push(
                formatters
                    .iter()
                    .map(|formatter| formatter.value(row).to_string())
                    .collect(),
            );
        }
    }

    let rows = data.len();
    let mut response = QueryResponse {
        meta,
        data,
        rows,
        ..QueryResponse::default()
    };
    response.statistics.elapsed = started.elapsed().as_secs_f64();
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionConfig};

    fn session() -> Session {
        Session::open(SessionConfig::default()).expect("session")
    }

    #[test]
    fn captures_meta_and_stringified_rows() {
        let session = session();
        let response =
            execute_capture(session.conn(), "SELECT 1::BIGINT AS id, 'a' AS name").unwrap();
        assert_eq!(
            response.meta,
            vec![
                ColumnMeta {
                    name: "id".into(),
                    type_name: "BIGINT".into()
                },
                ColumnMeta {
                    name: "name".into(),
                    type_name: "VARCHAR".into()
                },
            ]
        );
        assert_eq!(response.data, vec![vec!["1".to_string(), "a".to_string()]]);
        assert_eq!(response.rows, 1);
        assert!(response.statistics.elapsed >= 0.0);
    }

    #[test]
    fn null_cells_render_as_null_string() {
        let session = session();
        let response = execute_capture(session.conn(), "SELECT NULL::VARCHAR AS v").unwrap();
        assert_eq!(response.data, vec![vec!["NULL".to_string()]]);
    }

    #[test]
    fn uuid_cells_are_canonical() {
        let session = session();
        let response = execute_capture(
            session.conn(),
            "SELECT '0190cafe-cafe-7afe-8afe-beefbeefbeef'::UUID AS u",
        )
        .unwrap();
        assert_eq!(
            response.data,
            vec![vec!["0190cafe-cafe-7afe-8afe-beefbeefbeef".to_string()]]
        );
    }

    #[test]
    fn zero_row_result_keeps_data_as_empty_array() {
        let session = session();
        let response = execute_capture(session.conn(), "SELECT 1 AS x WHERE false").unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.rows, 0);
    }

    #[test]
    fn malformed_sql_is_an_engine_error() {
        let session = session();
        let err = execute_capture(session.conn(), "SELEC 1").unwrap_err();
        assert!(matches!(err, EngineError::Engine(_)));
    }
}
