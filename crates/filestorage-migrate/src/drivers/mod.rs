//! Database drivers behind the core traits.
//!
//! - [`postgres`]: destination reset and history-preserving store
//! - [`mysql`]: table source and raw-SQL sink for the copy and seed steps
//! - [`common`]: TLS settings shared by both

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use mysql::{MysqlSink, MysqlSource};
pub use postgres::{PgAdmin, PgHistoryFactory, PgHistoryStore};
