use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};

static STATEMENTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static PARQUET_FILES_WRITTEN_TOTAL: AtomicU64 = AtomicU64::new(0);
static VACUUM_RUNS_TOTAL: AtomicU64 = AtomicU64::new(0);

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Records latency for one dispatched statement and bumps the statement
/// counter.
pub fn record_statement(operation: &str, duration: Duration) {
    let total = STATEMENTS_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "statement_latency_ms",
        operation,
        latency_ms = duration_ms(duration),
        statements_total = total
    );
}

/// Marks a statement failure for observability logs.
pub fn record_statement_failure(operation: &str, reason: &str) {
    warn!(metric = "statement_failure", operation, reason);
}

/// Records a parquet data file written for a table.
pub fn record_parquet_write(table: &str, size_bytes: u64) {
    let total = PARQUET_FILES_WRITTEN_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "parquet_file_written",
        table,
        size_bytes,
        parquet_files_written_total = total
    );
}

/// Records a completed vacuum, with the number of files folded into one.
pub fn record_vacuum(table: &str, merged_files: usize, duration: Duration) {
    let total = VACUUM_RUNS_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "vacuum_latency_ms",
        table,
        merged_files,
        latency_ms = duration_ms(duration),
        vacuum_runs_total = total
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_monotonically() {
        let before = STATEMENTS_TOTAL.load(Ordering::Relaxed);
        record_statement("SELECT", Duration::from_millis(3));
        record_statement("INSERT", Duration::from_millis(5));
        assert_eq!(STATEMENTS_TOTAL.load(Ordering::Relaxed), before + 2);
    }
}
