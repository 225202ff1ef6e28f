//! Initial-data loader for SQL dumps.
//!
//! A dump is split into statements, session statements are dropped and each
//! `INSERT` is reconciled against the destination's current columns before
//! being executed as `INSERT IGNORE` with foreign key checks off. Loading is
//! skipped when enough key tables already hold data.

use std::io::ErrorKind;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SeedConfig;
use crate::copier::finish_guarded;
use crate::core::TableSink;
use crate::error::{MigrateError, Result};
use crate::reconcile::ColumnCache;
use crate::transcode::{insert_prefix_end, parse_insert, split_statements};

/// Statement prefixes that only configure the dumping session.
const SESSION_PREFIXES: &[&str] = &[
    "SET FOREIGN_KEY_CHECKS",
    "SET SQL_MODE",
    "SET AUTOCOMMIT",
    "SET TIME_ZONE",
    "SET @OLD_",
    "SET NAMES",
    "SET CHARACTER_SET",
    "SET UNIQUE_CHECKS",
    "START TRANSACTION",
    "BEGIN",
    "COMMIT",
    "LOCK TABLES",
    "UNLOCK TABLES",
];

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Whether `statement` only configures the session that produced the dump.
pub fn is_session_statement(statement: &str) -> bool {
    let normalized: String = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    SESSION_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(&normalized, prefix))
}

/// `INSERT` statements of a dump, in file order.
pub fn extract_inserts(dump: &str) -> Result<Vec<String>> {
    Ok(split_statements(dump)?
        .into_iter()
        .filter(|s| !is_session_statement(s))
        .filter(|s| starts_with_ignore_case(s, "INSERT"))
        .map(str::to_string)
        .collect())
}

/// Tables the statements insert into, in order of first appearance.
pub fn seeded_tables(statements: &[String]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for statement in statements {
        if let Ok(insert) = parse_insert(statement) {
            if !tables.contains(&insert.table) {
                tables.push(insert.table);
            }
        }
    }
    tables
}

/// Rewrite an unparseable `INSERT` so duplicates are ignored.
pub fn force_ignore(statement: &str) -> Result<Option<String>> {
    Ok(insert_prefix_end(statement)?
        .map(|end| format!("INSERT IGNORE{}", &statement[end..])))
}

/// What to do with one dump statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten {
    /// Reconciled statement and the number of columns removed from it.
    Execute { sql: String, columns_dropped: usize },
    /// Statement the parser could not read, forced to `INSERT IGNORE`.
    Raw(String),
    /// Nothing left to insert.
    Drop(String),
}

/// Reconcile one statement against the destination.
pub async fn rewrite(
    statement: &str,
    cache: &mut ColumnCache,
    sink: &mut dyn TableSink,
) -> Result<Rewritten> {
    let mut insert = match parse_insert(statement) {
        Ok(insert) => insert,
        Err(e) => {
            debug!("unparsed statement executed as-is: {}", e);
            return Ok(match force_ignore(statement)? {
                Some(sql) => Rewritten::Raw(sql),
                None => Rewritten::Drop("not an INSERT".to_string()),
            });
        }
    };

    let columns = cache.columns(sink, &insert.table).await?;
    if columns.is_empty() {
        return Ok(Rewritten::Drop(format!("{} absent at destination", insert.table)));
    }

    let mut columns_dropped = 0;
    if !insert.columns.is_empty() {
        columns_dropped = insert.retain_columns(|c| columns.contains(c));
        if insert.columns.is_empty() {
            return Ok(Rewritten::Drop(format!(
                "no column of {} exists at destination",
                insert.table
            )));
        }
    }

    insert.ignore = true;
    Ok(Rewritten::Execute {
        sql: insert.to_sql()?,
        columns_dropped,
    })
}

/// Outcome of a seed load.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub key_tables_total: usize,
    pub key_tables_with_data: usize,
    /// Load skipped because enough key tables already had rows.
    pub skipped_existing: bool,
    /// The dump file does not exist.
    pub missing_file: bool,
    pub statements_found: usize,
    pub statements_executed: usize,
    pub statements_dropped: usize,
    pub statements_raw: usize,
    pub columns_dropped: usize,
}

/// Count key tables holding rows. A table that cannot be checked counts as empty.
pub async fn key_tables_with_data(sink: &mut dyn TableSink, key_tables: &[String]) -> usize {
    let mut with_data = 0;
    for table in key_tables {
        match sink.has_rows(table).await {
            Ok(true) => {
                debug!("{} already has rows", table);
                with_data += 1;
            }
            Ok(false) => {}
            Err(e) => debug!("cannot check {}: {}", table, e),
        }
    }
    with_data
}

/// Load the configured dump.
pub async fn seed(sink: &mut dyn TableSink, config: &SeedConfig) -> Result<SeedReport> {
    let mut report = SeedReport {
        key_tables_total: config.key_tables.len(),
        ..Default::default()
    };

    report.key_tables_with_data = key_tables_with_data(sink, &config.key_tables).await;
    let needed = config.key_tables.len() as f64 * config.skip_threshold;
    if !config.key_tables.is_empty() && report.key_tables_with_data as f64 >= needed {
        info!(
            "Initial data already present ({}/{} key tables). Skipping load.",
            report.key_tables_with_data, report.key_tables_total
        );
        report.skipped_existing = true;
        return Ok(report);
    }

    let dump = match std::fs::read_to_string(&config.file) {
        Ok(dump) => dump,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!(
                "Initial data file {} not found; continuing without it",
                config.file.display()
            );
            report.missing_file = true;
            return Ok(report);
        }
        Err(e) => return Err(e.into()),
    };

    let statements = extract_inserts(&dump)?;
    info!(
        "Loading initial data: {} INSERT statements ({}/{} key tables have data)",
        statements.len(),
        report.key_tables_with_data,
        report.key_tables_total
    );
    load_statements(sink, &statements, &mut report).await?;
    Ok(report)
}

/// Execute reconciled statements with foreign key checks off.
pub async fn load_statements(
    sink: &mut dyn TableSink,
    statements: &[String],
    report: &mut SeedReport,
) -> Result<()> {
    report.statements_found = statements.len();
    if statements.is_empty() {
        warn!("No INSERT statements to execute");
        return Ok(());
    }

    sink.set_foreign_key_checks(false).await?;
    let outcome = execute_all(&mut *sink, statements, report).await;
    let restored = sink.set_foreign_key_checks(true).await;
    finish_guarded("initial data", outcome, restored)?;

    info!(
        "Initial data loaded: {} executed, {} dropped, {} columns removed",
        report.statements_executed, report.statements_dropped, report.columns_dropped
    );
    Ok(())
}

async fn execute_all(
    sink: &mut dyn TableSink,
    statements: &[String],
    report: &mut SeedReport,
) -> Result<()> {
    let mut cache = ColumnCache::new();
    let total = statements.len();
    for (idx, statement) in statements.iter().enumerate() {
        if (idx + 1) % 10 == 0 || idx + 1 == total {
            debug!("statement {}/{}", idx + 1, total);
        }
        let sql = match rewrite(statement, &mut cache, &mut *sink).await? {
            Rewritten::Execute {
                sql,
                columns_dropped,
            } => {
                report.columns_dropped += columns_dropped;
                sql
            }
            Rewritten::Raw(sql) => {
                report.statements_raw += 1;
                sql
            }
            Rewritten::Drop(reason) => {
                debug!("statement {} dropped: {}", idx + 1, reason);
                report.statements_dropped += 1;
                continue;
            }
        };
        sink.execute_raw(&sql).await.map_err(|e| {
            MigrateError::transfer("initial data", format!("statement {}: {}", idx + 1, e))
        })?;
        report.statements_executed += 1;
    }
    debug!("column cache answered {} lookups", cache.hits());
    Ok(())
}

/// Delete every row of every table the dump inserts into.
pub async fn unseed(sink: &mut dyn TableSink, config: &SeedConfig) -> Result<Vec<(String, u64)>> {
    let dump = match std::fs::read_to_string(&config.file) {
        Ok(dump) => dump,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let existing = sink.list_tables().await?;
    let tables: Vec<String> = seeded_tables(&extract_inserts(&dump)?)
        .into_iter()
        .filter(|t| {
            let present = existing.contains(t);
            if !present {
                debug!("{} absent at destination, nothing to delete", t);
            }
            present
        })
        .collect();

    sink.set_foreign_key_checks(false).await?;
    let outcome = async {
        let mut deleted = Vec::with_capacity(tables.len());
        for table in &tables {
            let rows = sink.delete_all(table).await?;
            info!("{}: deleted {} rows", table, rows);
            deleted.push((table.clone(), rows));
        }
        Ok::<_, MigrateError>(deleted)
    }
    .await;
    let restored = sink.set_foreign_key_checks(true).await;
    finish_guarded("initial data", outcome, restored)
}
