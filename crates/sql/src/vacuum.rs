//! Vacuum: fold the live set into one file, and reclaim orphans.

use chrono::Utc;
use icebase_core::Result;
use uuid::Uuid;

use crate::log::TableLog;
use crate::session::{engine_err, Session};
use crate::{quote_ident, quote_literal};

/// Rewrites the table's live set as a single parquet file and swaps the
/// live set atomically in the log database. Returns the number of files
/// folded in; an empty live set is a no-op.
///
/// The read view must already be in place in the session transaction (the
/// dispatcher builds it before delegating here). A failure before the
/// log-db swap leaves the live set untouched; a failure after the parquet
/// write may orphan the new file, which [`gc`] reclaims.
pub async fn merge(log: &TableLog, session: &mut Session) -> Result<usize> {
    let live = log.live_files()?;
    if live.is_empty() {
        tracing::debug!(table = %log.table(), "vacuum skipped, live set empty");
        return Ok(0);
    }

    let id = Uuid::now_v7().to_string();
    let object = log.data_object(&id);
    log.storage().create_dir(&log.data_prefix()).await?;

    let copy_sql = format!(
        "COPY (SELECT * FROM {}) TO {} (FORMAT PARQUET)",
        quote_ident(log.table()),
        quote_literal(&log.storage().write_path(&object)),
    );
    session.conn().execute_batch(&copy_sql).map_err(engine_err)?;

    let info = log.storage().stat(&object).await?;
    log.record_merge(&id, info.size, &live, Utc::now().timestamp())?;

    tracing::info!(
        table = %log.table(),
        merged = live.len(),
        id = %id,
        size = info.size,
        "live set folded into one file"
    );
    Ok(live.len())
}

/// Deletes parquet objects that are no longer referenced by the live set:
/// tombstoned files and orphans from failed inserts. Returns the deleted
/// object paths.
pub async fn gc(log: &TableLog) -> Result<Vec<String>> {
    let live = log.live_files()?;
    let mut deleted = Vec::new();
    for object in log.storage().list(&log.data_prefix()).await? {
        let id = object
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".parquet"))
            .unwrap_or_default();
        if !live.iter().any(|l| l.as_str() == id) {
            log.storage().delete(&object).await?;
            deleted.push(object);
        }
    }
    if !deleted.is_empty() {
        tracing::info!(table = %log.table(), removed = deleted.len(), "data files reclaimed");
    }
    Ok(deleted)
}
