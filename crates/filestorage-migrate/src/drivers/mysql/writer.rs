//! MySQL copy target.
//!
//! Statements arrive as fully rendered literal SQL, so the sink uses the
//! text protocol (`query_drop`) and never binds parameters.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use tracing::{debug, info};

use crate::config::MysqlConfig;
use crate::core::identifier::quote_mysql;
use crate::core::{ColumnSet, TableSink};
use crate::drivers::common::mysql_ssl_opts;
use crate::error::Result;

/// A single session on the copy target.
///
/// Foreign key checks are session state, so every statement runs on the same
/// connection.
pub struct MysqlSink {
    conn: Conn,
    target: String,
}

impl MysqlSink {
    pub async fn connect(config: &MysqlConfig) -> Result<Self> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .init(vec!["SET NAMES utf8mb4"]);
        if let Some(ssl) = mysql_ssl_opts(&config.ssl_mode) {
            builder = builder.ssl_opts(ssl);
        }

        let opts: Opts = builder.into();
        let mut conn = Conn::new(opts)
            .await
            .map_err(|e| super::connection_error(config, e))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| super::connection_error(config, e))?;

        info!("Connected to MySQL target: {}", config.display_target());
        Ok(Self {
            conn,
            target: config.display_target(),
        })
    }

    pub async fn disconnect(self) -> Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl TableSink for MysqlSink {
    async fn column_set(&mut self, table: &str) -> Result<ColumnSet> {
        let columns: Vec<String> = self
            .conn
            .exec(
                "SELECT CAST(COLUMN_NAME AS CHAR(255)) FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?",
                (table,),
            )
            .await?;
        Ok(columns.into_iter().collect())
    }

    async fn has_rows(&mut self, table: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", quote_mysql(table)?);
        let found: Option<u8> = self.conn.query_first(sql).await?;
        Ok(found.is_some())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables: Vec<String> = self
            .conn
            .query(
                "SELECT CAST(TABLE_NAME AS CHAR(255)) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
                 ORDER BY TABLE_NAME",
            )
            .await?;
        Ok(tables)
    }

    async fn execute_raw(&mut self, sql: &str) -> Result<u64> {
        self.conn.query_drop(sql).await?;
        Ok(self.conn.affected_rows())
    }

    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        let flag = if enabled { 1 } else { 0 };
        self.conn
            .query_drop(format!("SET FOREIGN_KEY_CHECKS = {}", flag))
            .await?;
        debug!("{}: FOREIGN_KEY_CHECKS = {}", self.target, flag);
        Ok(())
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64> {
        self.conn
            .query_drop(format!("DELETE FROM {}", quote_mysql(table)?))
            .await?;
        Ok(self.conn.affected_rows())
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }
}
