//! Idempotent batch copy between two relational databases.
//!
//! Each table is paged through fixed-size offset windows. Every window is
//! reconciled against the destination's columns, transcoded to literal SQL
//! and written with one multi-row `INSERT IGNORE` per column set. A window
//! that fails is retried in small chunks, and a chunk that still fails is
//! logged and skipped. Foreign key checks stay off for the whole table and
//! are switched back on whatever the outcome.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CopyConfig;
use crate::core::{ColumnSet, Row, TableSink, TableSource};
use crate::error::{MigrateError, Result};
use crate::reconcile::{project, Reconciled};
use crate::transcode::render_insert_ignore;

/// Tables owned by schema-migration tooling; never copied.
pub const CONTROL_TABLES: &[&str] = &["alembic_version", "schema_migrations"];

/// Per-table copy settings.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Rows per offset window.
    pub batch_size: usize,
    /// Rows per retry statement after a window insert fails.
    pub retry_chunk_size: usize,
    /// Delete destination rows before copying.
    pub clear_existing: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry_chunk_size: 25,
            clear_existing: false,
        }
    }
}

impl From<&CopyConfig> for CopyOptions {
    fn from(config: &CopyConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry_chunk_size: config.retry_chunk_size.max(1),
            clear_existing: config.clear_existing,
        }
    }
}

/// Result of copying one table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableCopyStats {
    pub table: String,
    /// Rows contained in insert statements that succeeded.
    pub rows_migrated: u64,
    /// Rows with no column in common with the destination.
    pub rows_skipped: u64,
    /// Rows in retry chunks that still failed.
    pub rows_failed: u64,
    pub rows_cleared: u64,
    pub windows: u64,
    /// Set when the whole table was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub duration_secs: f64,
}

impl TableCopyStats {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    fn skipped(table: &str, reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Self::new(table)
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

/// Copy one table. Returns the number of rows migrated, with details.
///
/// A table missing on either side is skipped, not an error. When the
/// destination already holds rows and `clear_existing` is off, duplicates
/// are silently ignored, so the copy can be re-run after a partial failure.
pub async fn copy_table(
    source: &dyn TableSource,
    sink: &mut dyn TableSink,
    table: &str,
    opts: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<TableCopyStats> {
    let dest_columns = sink.column_set(table).await?;
    if dest_columns.is_empty() {
        info!("{}: not present at destination, skipping", table);
        return Ok(TableCopyStats::skipped(table, "absent at destination"));
    }

    let source_columns = source.column_set(table).await?;
    if source_columns.is_empty() {
        info!("{}: not present at source, skipping", table);
        return Ok(TableCopyStats::skipped(table, "absent at source"));
    }

    sink.set_foreign_key_checks(false).await?;
    let outcome = copy_windows(source, &mut *sink, table, &dest_columns, opts, cancel).await;
    let restored = sink.set_foreign_key_checks(true).await;
    finish_guarded(table, outcome, restored)
}

/// Combine the guarded outcome with the result of re-enabling checks.
///
/// The guarded error wins; a restore failure after success is reported.
pub(crate) fn finish_guarded<T>(
    table: &str,
    outcome: Result<T>,
    restored: Result<()>,
) -> Result<T> {
    match (outcome, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            error!(
                "{}: failed to re-enable foreign key checks: {}",
                table, restore_err
            );
            Err(e)
        }
    }
}

async fn copy_windows(
    source: &dyn TableSource,
    sink: &mut dyn TableSink,
    table: &str,
    dest_columns: &ColumnSet,
    opts: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<TableCopyStats> {
    let started = Instant::now();
    let mut stats = TableCopyStats::new(table);

    if opts.clear_existing {
        stats.rows_cleared = sink.delete_all(table).await?;
        info!("{}: cleared {} existing rows", table, stats.rows_cleared);
    } else if sink.has_rows(table).await? {
        info!(
            "{}: destination already has rows, duplicates will be ignored",
            table
        );
    }

    let total = source.row_count(table).await.unwrap_or_else(|e| {
        debug!("{}: row count unavailable: {}", table, e);
        0
    });

    let mut offset = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let batch = source.fetch_window(table, offset, opts.batch_size).await?;
        if batch.is_empty() {
            break;
        }
        let fetched = batch.len();
        let last = batch.is_last(opts.batch_size);
        stats.windows += 1;

        let window = write_window(sink, table, dest_columns, batch.rows, offset, opts).await?;
        stats.rows_migrated += window.migrated;
        stats.rows_skipped += window.skipped;
        stats.rows_failed += window.failed;

        offset += fetched as u64;
        if total > 0 {
            debug!(
                "{}: {}/{} rows read ({:.1}%)",
                table,
                offset.min(total),
                total,
                offset.min(total) as f64 * 100.0 / total as f64
            );
        }
        if last {
            break;
        }
    }

    stats.duration_secs = started.elapsed().as_secs_f64();
    info!(
        "{}: {} rows migrated, {} skipped, {} failed in {:.1}s",
        table, stats.rows_migrated, stats.rows_skipped, stats.rows_failed, stats.duration_secs
    );
    Ok(stats)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct WindowOutcome {
    migrated: u64,
    skipped: u64,
    failed: u64,
}

/// Reconcile, group by column set, and insert one window.
async fn write_window(
    sink: &mut dyn TableSink,
    table: &str,
    dest_columns: &ColumnSet,
    rows: Vec<Row>,
    offset: u64,
    opts: &CopyOptions,
) -> Result<WindowOutcome> {
    let mut outcome = WindowOutcome::default();
    let mut groups: Vec<(Vec<String>, Vec<Row>)> = Vec::new();

    for (i, row) in rows.into_iter().enumerate() {
        match project(row, dest_columns) {
            Reconciled::Skip => {
                warn!(
                    "{}: row {} has no column present at destination, skipping",
                    table,
                    offset + i as u64
                );
                outcome.skipped += 1;
            }
            Reconciled::Row(row) => {
                let columns: Vec<String> = row.keys().cloned().collect();
                match groups.iter_mut().find(|(cols, _)| *cols == columns) {
                    Some((_, members)) => members.push(row),
                    None => groups.push((columns, vec![row])),
                }
            }
        }
    }

    for (columns, members) in &groups {
        let sql = render_insert_ignore(table, columns, members)?;
        match sink.execute_raw(&sql).await {
            Ok(_) => outcome.migrated += members.len() as u64,
            Err(e) => {
                warn!(
                    "{}: insert of {} rows at offset {} failed ({}), retrying in chunks of {}",
                    table,
                    members.len(),
                    offset,
                    e,
                    opts.retry_chunk_size
                );
                for (n, chunk) in members.chunks(opts.retry_chunk_size).enumerate() {
                    let sql = render_insert_ignore(table, columns, chunk)?;
                    match sink.execute_raw(&sql).await {
                        Ok(_) => outcome.migrated += chunk.len() as u64,
                        Err(e) => {
                            warn!(
                                "{}: skipping chunk {} ({} rows) of window at offset {}: {}",
                                table,
                                n,
                                chunk.len(),
                                offset,
                                e
                            );
                            outcome.failed += chunk.len() as u64;
                        }
                    }
                }
            }
        }
    }

    Ok(outcome)
}

/// Whether the opt-in environment variable is set to `1`.
pub fn opt_in_enabled(env_var: &str) -> bool {
    std::env::var(env_var).map(|v| v.trim() == "1").unwrap_or(false)
}

/// Aggregate result of a multi-table copy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyReport {
    pub tables_attempted: usize,
    pub tables_copied: usize,
    pub tables_skipped: usize,
    /// `(table, error)` for tables that raised.
    pub tables_failed: Vec<(String, String)>,
    pub rows_migrated: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,
    pub tables: Vec<TableCopyStats>,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.tables_failed.is_empty() && self.rows_failed == 0
    }

    fn record(&mut self, stats: TableCopyStats) {
        if stats.was_skipped() {
            self.tables_skipped += 1;
        } else {
            self.tables_copied += 1;
        }
        self.rows_migrated += stats.rows_migrated;
        self.rows_skipped += stats.rows_skipped;
        self.rows_failed += stats.rows_failed;
        self.tables.push(stats);
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} tables attempted, {} copied, {} skipped, {} failed; {} rows migrated, {} skipped, {} failed",
            self.tables_attempted,
            self.tables_copied,
            self.tables_skipped,
            self.tables_failed.len(),
            self.rows_migrated,
            self.rows_skipped,
            self.rows_failed
        )
    }
}

/// Tables to copy: the configured list, or everything at the destination,
/// minus control tables and configured exclusions.
pub async fn resolve_tables(sink: &mut dyn TableSink, config: &CopyConfig) -> Result<Vec<String>> {
    let candidates = if config.tables.is_empty() {
        sink.list_tables().await?
    } else {
        config.tables.clone()
    };
    Ok(candidates
        .into_iter()
        .filter(|t| !CONTROL_TABLES.contains(&t.as_str()))
        .filter(|t| !config.exclude_tables.iter().any(|e| e == t))
        .collect())
}

/// Copy every selected table, isolating per-table failures.
///
/// Checks connectivity first, then the destination's cleanliness: with
/// rows present the copy clears them (`clear_existing`), refuses
/// (`require_clean`), or continues relying on ignored duplicates.
pub async fn copy_all_tables(
    source: &dyn TableSource,
    sink: &mut dyn TableSink,
    config: &CopyConfig,
    cancel: &CancellationToken,
) -> Result<CopyReport> {
    source.ping().await.map_err(|e| MigrateError::Connection {
        endpoint: config.source.display_target(),
        message: e.to_string(),
        hint: "Check that the source server is running and that copy.source credentials are valid."
            .to_string(),
    })?;
    sink.ping().await.map_err(|e| MigrateError::Connection {
        endpoint: config.target.display_target(),
        message: e.to_string(),
        hint: "Check that the target server is running and that copy.target credentials are valid."
            .to_string(),
    })?;

    let tables = resolve_tables(&mut *sink, config).await?;
    info!("Copying {} tables", tables.len());

    let mut with_data = Vec::new();
    for table in &tables {
        match sink.has_rows(table).await {
            Ok(true) => with_data.push(table.clone()),
            Ok(false) => {}
            Err(e) => debug!("{}: cannot inspect destination rows: {}", table, e),
        }
    }
    if !with_data.is_empty() {
        if config.clear_existing {
            info!(
                "{} destination tables hold rows and will be cleared first",
                with_data.len()
            );
        } else if config.require_clean {
            return Err(MigrateError::DirtyTarget(with_data));
        } else {
            warn!(
                "Destination tables already hold rows ({}); continuing, duplicates will be ignored",
                with_data.join(", ")
            );
        }
    }

    let opts = CopyOptions::from(config);
    let mut report = CopyReport::default();
    for table in &tables {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        report.tables_attempted += 1;
        match copy_table(source, &mut *sink, table, &opts, cancel).await {
            Ok(stats) => report.record(stats),
            Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
            Err(e) => {
                error!("{}: copy failed: {}", table, e);
                report.tables_failed.push((table.clone(), e.to_string()));
            }
        }
    }

    info!("Copy finished: {}", report.summary());
    Ok(report)
}
