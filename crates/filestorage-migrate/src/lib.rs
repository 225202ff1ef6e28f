//! # filestorage-migrate
//!
//! Moves an object database kept in FileStorage transaction logs into
//! PostgreSQL with full history, and copies relational tables between two
//! differently-evolved MySQL schemas.
//!
//! The library provides:
//!
//! - **Log draining** that replays every committed transaction in order
//!   into a history-preserving destination, resuming after the last
//!   committed transaction
//! - **Fallbacks** from a tuned session to a minimal one, then to an
//!   external conversion tool
//! - **Idempotent table copy** with column reconciliation and literal SQL
//!   `INSERT IGNORE` statements
//! - **Seed loading** of SQL dumps against the current schema
//!
//! ## Example
//!
//! ```rust,no_run
//! use filestorage_migrate::{Config, Orchestrator, RunOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> filestorage_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator
//!         .run(RunOptions::default(), &CancellationToken::new())
//!         .await?;
//!     println!("{}", report.render());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod copier;
pub mod core;
pub mod drain;
pub mod drivers;
pub mod error;
pub mod filestorage;
pub mod orchestrator;
pub mod reconcile;
pub mod seed;
pub mod transcode;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use config::Config;
pub use copier::{copy_all_tables, copy_table, CopyOptions, CopyReport, TableCopyStats};
pub use core::{
    ColumnSet, HistoryStore, HistoryStoreFactory, Row, SqlValue, TableSink, TableSource, Tid,
    TransactionRecord,
};
pub use drain::{DrainReport, DrainState, Drainer};
pub use error::{MigrateError, Result};
pub use filestorage::{scan, LogReader, LogSummary};
pub use orchestrator::{
    health_check, HealthReport, MigrationReport, Orchestrator, RunOptions, StoreOutcome,
};
pub use seed::SeedReport;
