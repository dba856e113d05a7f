//! End-to-end scenarios against the filesystem backend.

use std::sync::Arc;

use icebase_core::storage::FsStorage;
use icebase_core::Storage;
use icebase_sql::{Engine, EngineConfig, TableLog};
use tempfile::TempDir;

fn engine_at(dir: &TempDir, config: EngineConfig) -> Engine {
    let root = dir.path().to_string_lossy().into_owned();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path()));
    Engine::with_storage(config.with_storage_dir(root), storage).expect("engine")
}

fn parquet_files(dir: &TempDir, table: &str) -> Vec<String> {
    let data_dir = dir.path().join(table).join("data");
    let mut files: Vec<String> = match std::fs::read_dir(&data_dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

fn reopen_log(dir: &TempDir, table: &str) -> TableLog {
    let root = dir.path().to_string_lossy().into_owned();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(dir.path()));
    TableLog::new(table, storage, &root)
}

#[tokio::test]
async fn create_insert_select_roundtrip() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT, name VARCHAR)")
        .await
        .unwrap();
    engine
        .handle_query("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
        .await
        .unwrap();

    let response = engine.handle_query("SELECT COUNT(*) FROM t").await.unwrap();
    assert_eq!(response.meta[0].name, "count_star()");
    assert_eq!(response.data, vec![vec!["2".to_string()]]);
    assert_eq!(response.rows, 1);

    // Exactly one data file, one DDL event, one live log row.
    assert_eq!(parquet_files(&dir, "t").len(), 1);
    engine.close().await;
    let log = reopen_log(&dir, "t");
    assert_eq!(log.schema_queries().unwrap().len(), 1);
    let records = log.records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tombstoned_unix_time, 0);
    assert!(records[0].size > 0);
    log.close();
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let engine = engine_at(&dir, EngineConfig::default());
        engine
            .handle_query("CREATE TABLE t (id BIGINT, name VARCHAR)")
            .await
            .unwrap();
        engine
            .handle_query("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
            .await
            .unwrap();
        engine.close().await;
    }

    let engine = engine_at(&dir, EngineConfig::default());
    let response = engine.handle_query("SELECT COUNT(*) FROM t").await.unwrap();
    assert_eq!(response.data, vec![vec!["2".to_string()]]);

    // The replayed schema matches the original DDL.
    let response = engine
        .handle_query("SELECT id, name FROM t ORDER BY id LIMIT 1")
        .await
        .unwrap();
    assert_eq!(response.meta[0].type_name, "BIGINT");
    assert_eq!(response.meta[1].type_name, "VARCHAR");
    assert_eq!(response.data[0], vec!["1".to_string(), "a".to_string()]);
    engine.close().await;
}

#[tokio::test]
async fn repeated_inserts_then_vacuum_preserve_rows() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT, name VARCHAR)")
        .await
        .unwrap();
    engine
        .handle_query("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
        .await
        .unwrap();
    for _ in 0..3 {
        engine
            .handle_query("INSERT INTO t VALUES (3, 'c')")
            .await
            .unwrap();
    }
    assert_eq!(parquet_files(&dir, "t").len(), 4);

    let before = engine
        .handle_query("SELECT id, name FROM t ORDER BY id, name")
        .await
        .unwrap();

    let response = engine.handle_query("VACUUM t").await.unwrap();
    assert!(response.data.is_empty());

    // The table multiset is unchanged, duplicates intact.
    let after = engine
        .handle_query("SELECT id, name FROM t ORDER BY id, name")
        .await
        .unwrap();
    assert_eq!(before.data, after.data);

    let ids = engine
        .handle_query("SELECT id FROM t ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        ids.data,
        vec![
            vec!["1".to_string()],
            vec!["2".to_string()],
            vec!["3".to_string()],
            vec!["3".to_string()],
            vec!["3".to_string()],
        ]
    );

    // Old files are tombstoned, the merged file is the only live one.
    engine.close().await;
    let log = reopen_log(&dir, "t");
    let records = log.records().unwrap();
    assert_eq!(records.len(), 5);
    let live: Vec<_> = records
        .iter()
        .filter(|r| r.tombstoned_unix_time == 0)
        .collect();
    assert_eq!(live.len(), 1);
    assert!(live[0].size > 0);
    assert_eq!(
        records
            .iter()
            .filter(|r| r.tombstoned_unix_time > 0)
            .count(),
        4
    );
    log.close();
}

#[tokio::test]
async fn gc_reclaims_tombstoned_files_without_changing_results() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT)")
        .await
        .unwrap();
    engine.handle_query("INSERT INTO t VALUES (1)").await.unwrap();
    engine.handle_query("INSERT INTO t VALUES (2)").await.unwrap();
    engine.handle_query("VACUUM t").await.unwrap();
    assert_eq!(parquet_files(&dir, "t").len(), 3);

    let removed = engine.gc("t").await.unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(parquet_files(&dir, "t").len(), 1);

    let response = engine
        .handle_query("SELECT id FROM t ORDER BY id")
        .await
        .unwrap();
    assert_eq!(
        response.data,
        vec![vec!["1".to_string()], vec!["2".to_string()]]
    );
    engine.close().await;
}

#[tokio::test]
async fn live_set_always_points_at_existing_files() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT)")
        .await
        .unwrap();
    for i in 0..3 {
        engine
            .handle_query(&format!("INSERT INTO t VALUES ({i})"))
            .await
            .unwrap();
    }
    engine.close().await;

    let log = reopen_log(&dir, "t");
    let files = parquet_files(&dir, "t");
    for id in log.live_files().unwrap() {
        assert!(
            files.contains(&format!("{id}.parquet")),
            "live id {id} has no backing parquet object"
        );
    }
    log.close();
}

#[tokio::test]
async fn data_file_ids_are_time_ordered() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT)")
        .await
        .unwrap();
    engine.handle_query("INSERT INTO t VALUES (1)").await.unwrap();
    let first = parquet_files(&dir, "t");
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    engine.handle_query("INSERT INTO t VALUES (2)").await.unwrap();
    engine.close().await;

    let second: Vec<String> = parquet_files(&dir, "t")
        .into_iter()
        .filter(|f| !first.contains(f))
        .collect();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    // UUIDv7: lexicographic file order tracks creation time, and the
    // embedded timestamps are non-decreasing.
    assert!(first[0] < second[0]);
    let stamp = |name: &str| {
        uuid::Uuid::parse_str(name.trim_end_matches(".parquet"))
            .unwrap()
            .get_timestamp()
            .unwrap()
            .to_unix()
    };
    assert!(stamp(&first[0]) <= stamp(&second[0]));
}

#[tokio::test]
async fn query_splitting_returns_last_statement_and_stops_on_error() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default().with_query_splitting());

    let response = engine
        .handle_query(
            "-- build and probe\nCREATE TABLE t (id BIGINT);\nINSERT INTO t VALUES (7);\nSELECT COUNT(*) FROM t",
        )
        .await
        .unwrap();
    assert_eq!(response.data, vec![vec!["1".to_string()]]);

    // A failing statement aborts the batch but keeps prior statements durable.
    let err = engine
        .handle_query("INSERT INTO t VALUES (8); SELECT FROM nowhere nonsense;")
        .await;
    assert!(err.is_err());
    let response = engine.handle_query("SELECT COUNT(*) FROM t").await.unwrap();
    assert_eq!(response.data, vec![vec!["2".to_string()]]);
    engine.close().await;
}

#[tokio::test]
async fn vacuum_without_data_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT)")
        .await
        .unwrap();
    let response = engine.handle_query("VACUUM t").await.unwrap();
    assert!(response.data.is_empty());
    assert!(parquet_files(&dir, "t").is_empty());
    engine.close().await;
}

#[tokio::test]
async fn select_on_empty_table_yields_zero_rows_with_schema() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT, name VARCHAR)")
        .await
        .unwrap();
    let response = engine.handle_query("SELECT * FROM t").await.unwrap();
    assert!(response.data.is_empty());
    assert_eq!(response.rows, 0);
    assert_eq!(response.meta.len(), 2);
    assert_eq!(response.meta[0].type_name, "BIGINT");
    engine.close().await;
}

#[tokio::test]
async fn destroy_removes_durable_state() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    engine
        .handle_query("CREATE TABLE t (id BIGINT)")
        .await
        .unwrap();
    engine.handle_query("INSERT INTO t VALUES (1)").await.unwrap();
    engine.destroy().await.unwrap();

    assert!(!dir.path().join("t").exists());
    assert!(engine.handle_query("SELECT COUNT(*) FROM t").await.is_err());
}

#[tokio::test]
async fn parse_endpoint_classifies() {
    let dir = TempDir::new().unwrap();
    let engine = engine_at(&dir, EngineConfig::default());

    let parsed = engine.handle_parse("INSERT INTO events VALUES (1)");
    assert_eq!(parsed.operation, "INSERT");
    assert_eq!(parsed.table, "events");

    let json = engine
        .post_endpoint("/parse", "VACUUM events")
        .await
        .unwrap();
    assert_eq!(
        json,
        "{\"operation\":\"VACUUM\",\"table\":\"events\"}"
    );

    assert!(engine.post_endpoint("/nope", "SELECT 1").await.is_err());
}
