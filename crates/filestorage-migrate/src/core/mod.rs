//! Core abstractions shared by every component.
//!
//! - [`value`]: SQL value representation, rows and offset windows
//! - [`record`]: transaction records read from the object log
//! - [`identifier`]: identifier validation and quoting
//! - [`traits`]: the database seams (`TableSource`, `TableSink`, `HistoryStore`)

pub mod identifier;
pub mod record;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use record::{ObjectDelta, Oid, Tid, TransactionRecord, TransactionStatus};
pub use traits::{
    ColumnSet, HistoryCounts, HistoryStore, HistoryStoreFactory, SessionProfile, TableSink,
    TableSource,
};
pub use value::{Row, RowBatch, SqlValue};
