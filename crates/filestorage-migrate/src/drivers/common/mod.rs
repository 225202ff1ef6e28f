//! Utilities shared by the database drivers.

pub mod tls;

pub use tls::{mysql_ssl_opts, sqlx_ssl_mode, SslMode, TlsBuilder};
