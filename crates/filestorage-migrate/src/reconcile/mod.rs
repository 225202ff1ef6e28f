//! Schema reconciliation between differently-evolved tables.
//!
//! Rows are projected onto the columns both sides have. A row that shares
//! no column with the destination is skipped, never an error, so tables can
//! be copied while their schemas are mid-migration.

use std::collections::HashMap;

use tracing::debug;

use crate::core::{ColumnSet, Row, SqlValue, TableSink};
use crate::error::Result;

/// Outcome of reconciling one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Row projected onto the shared columns.
    Row(Row),
    /// No shared column; drop the row.
    Skip,
}

impl Reconciled {
    pub fn into_row(self) -> Option<Row> {
        match self {
            Reconciled::Row(row) => Some(row),
            Reconciled::Skip => None,
        }
    }
}

/// Columns present on both sides, sorted by name.
pub fn common_columns(source: &ColumnSet, dest: &ColumnSet) -> Vec<String> {
    source.intersection(dest).cloned().collect()
}

/// Project `row` onto `source ∩ dest`.
///
/// The result has exactly the shared columns as keys; a shared column the
/// row does not carry is filled with NULL. An absent table on either side
/// is an empty set and yields [`Reconciled::Skip`].
pub fn reconcile(source: &ColumnSet, dest: &ColumnSet, row: &Row) -> Reconciled {
    let common = common_columns(source, dest);
    if common.is_empty() {
        return Reconciled::Skip;
    }
    let projected = common
        .into_iter()
        .map(|col| {
            let value = row.get(&col).cloned().unwrap_or(SqlValue::Null);
            (col, value)
        })
        .collect();
    Reconciled::Row(projected)
}

/// Consume `row`, keeping only the columns `dest` has.
///
/// Equivalent to `reconcile(row.keys(), dest, row)` without cloning values.
pub fn project(mut row: Row, dest: &ColumnSet) -> Reconciled {
    row.retain(|col, _| dest.contains(col));
    if row.is_empty() {
        Reconciled::Skip
    } else {
        Reconciled::Row(row)
    }
}

/// Per-run cache of destination column sets.
#[derive(Debug, Default)]
pub struct ColumnCache {
    tables: HashMap<String, ColumnSet>,
    hits: u64,
}

impl ColumnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column set of `table`, introspecting the sink only on first use.
    pub async fn columns(&mut self, sink: &mut dyn TableSink, table: &str) -> Result<&ColumnSet> {
        if self.tables.contains_key(table) {
            self.hits += 1;
        } else {
            let columns = sink.column_set(table).await?;
            debug!("{}: {} columns at destination", table, columns.len());
            self.tables.insert(table.to_string(), columns);
        }
        Ok(&self.tables[table])
    }

    /// Number of lookups answered without introspection.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of distinct tables introspected.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
