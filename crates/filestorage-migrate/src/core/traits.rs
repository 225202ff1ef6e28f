//! Core traits at the database seams.
//!
//! - [`TableSource`]: reads column sets and offset windows from a copy source
//! - [`TableSink`]: one session on a copy target; executes raw literal SQL
//! - [`HistoryStore`]: one session on a history-preserving destination
//! - [`HistoryStoreFactory`]: opens history stores with a session profile
//!
//! The orchestrator, copier and drainer only see these traits, so they run
//! unchanged against the in-memory implementations used in tests.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

use super::record::{Tid, TransactionRecord};
use super::value::RowBatch;

/// Column names physically present in one table. Empty when the table is absent.
pub type ColumnSet = BTreeSet<String>;

/// Read side of the table copy.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Columns of `table`, or an empty set when the table does not exist.
    async fn column_set(&self, table: &str) -> Result<ColumnSet>;

    /// Number of rows in `table`.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Fetch at most `limit` rows starting at `offset`, in a stable order.
    async fn fetch_window(&self, table: &str, offset: u64, limit: usize) -> Result<RowBatch>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;

    /// Get the database type identifier (e.g., "mysql").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Write side of the table copy and the seed loader.
///
/// A sink is one database session: `FOREIGN_KEY_CHECKS` is session state,
/// so toggling it and the inserts it guards must share the connection.
#[async_trait]
pub trait TableSink: Send {
    /// Columns of `table`, or an empty set when the table does not exist.
    async fn column_set(&mut self, table: &str) -> Result<ColumnSet>;

    /// Whether `table` holds at least one row.
    async fn has_rows(&mut self, table: &str) -> Result<bool>;

    /// Base tables in the current database, sorted by name.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Execute SQL text with no parameter binding. Returns affected rows.
    async fn execute_raw(&mut self, sql: &str) -> Result<u64>;

    /// Toggle session-level foreign key enforcement.
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()>;

    /// Delete every row of `table`. Returns deleted rows.
    async fn delete_all(&mut self, table: &str) -> Result<u64>;

    /// Round-trip a trivial query.
    async fn ping(&mut self) -> Result<()>;

    /// Get the database type identifier.
    fn db_type(&self) -> &str;
}

/// Row counts of the essential history tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryCounts {
    pub transactions: i64,
    pub object_states: i64,
    pub current_objects: i64,
}

/// Session tuning applied when a history store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    /// Apply the configured session settings (first attempt).
    Tuned,
    /// Plain session with server defaults (fallback attempt).
    Minimal,
}

/// Destination that keeps every historical object state.
#[async_trait]
pub trait HistoryStore: Send {
    /// Verify (and with `create_schema`, create) the history tables.
    async fn prepare(&mut self, create_schema: bool) -> Result<()>;

    /// Highest TID already committed, if any.
    async fn last_committed_tid(&mut self) -> Result<Option<Tid>>;

    /// Store one transaction atomically: its metadata row, one state row per
    /// delta, then the current-object pointers.
    async fn store_transaction(&mut self, txn: &TransactionRecord) -> Result<()>;

    /// Count rows in the essential tables.
    async fn count_rows(&mut self) -> Result<HistoryCounts>;

    /// Human-readable database size, when the backend can report it.
    async fn database_size(&mut self) -> Result<Option<String>>;
}

/// Opens [`HistoryStore`] sessions against a named destination database.
#[async_trait]
pub trait HistoryStoreFactory: Send + Sync {
    async fn open(&self, database: &str, profile: SessionProfile)
        -> Result<Box<dyn HistoryStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_counts_default_is_zero() {
        let counts = HistoryCounts::default();
        assert_eq!(counts.transactions, 0);
        assert_eq!(counts.object_states, 0);
        assert_eq!(counts.current_objects, 0);
    }

    #[test]
    fn test_column_set_sorted() {
        let set: ColumnSet = ["b", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(set.iter().next().map(String::as_str), Some("a"));
    }
}
