//! MySQL copy source.
//!
//! Windows are read with `LIMIT/OFFSET` ordered by the primary key (or the
//! first column when the table has none), so consecutive windows neither
//! overlap nor skip rows while the source is quiescent.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Row as _, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MysqlConfig;
use crate::core::identifier::quote_mysql;
use crate::core::{ColumnSet, Row, RowBatch, SqlValue, TableSource};
use crate::drivers::common::sqlx_ssl_mode;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Column name, lowercased `DATA_TYPE`, and whether it is unsigned.
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    data_type: String,
    unsigned: bool,
    /// Declared width of a `BIT(n)` column.
    bits: Option<u32>,
}

impl ColumnInfo {
    fn new(name: String, data_type: &str, column_type: &str) -> Self {
        let data_type = data_type.to_lowercase();
        let column_type = column_type.to_lowercase();
        let bits = if data_type == "bit" {
            Some(declared_width(&column_type).unwrap_or(1))
        } else {
            None
        };
        Self {
            name,
            unsigned: column_type.contains("unsigned"),
            data_type,
            bits,
        }
    }

    /// Select-list expression. `BIT` and `YEAR` come back as plain unsigned
    /// integers and `TIME` as text, so values outside a time of day survive.
    fn projection(&self) -> Result<String> {
        let name = quote_mysql(&self.name)?;
        Ok(match self.data_type.as_str() {
            "bit" | "year" => format!("CAST({0} AS UNSIGNED) AS {0}", name),
            "time" => format!("CAST({0} AS CHAR) AS {0}", name),
            _ => name,
        })
    }
}

/// `n` in `bit(n)`.
fn declared_width(column_type: &str) -> Option<u32> {
    let open = column_type.find('(')?;
    let close = column_type[open..].find(')')? + open;
    column_type[open + 1..close].trim().parse().ok()
}

/// `TIME` text: a time of day when it is one, the text as-is for durations
/// such as `-12:00:00` or `838:59:59`.
fn time_value(text: String) -> SqlValue<'static> {
    match chrono::NaiveTime::parse_from_str(&text, "%H:%M:%S%.f") {
        Ok(t) => SqlValue::Time(t),
        Err(_) => SqlValue::text_owned(text),
    }
}

#[derive(Debug, Clone)]
struct TableLayout {
    columns: Vec<ColumnInfo>,
    order_by: Vec<String>,
}

/// Read side of the manual table copy.
pub struct MysqlSource {
    pool: MySqlPool,
    target: String,
    layouts: Mutex<HashMap<String, TableLayout>>,
}

impl MysqlSource {
    pub async fn connect(config: &MysqlConfig) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(sqlx_ssl_mode(&config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| super::connection_error(config, e))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| super::connection_error(config, e))?;

        info!("Connected to MySQL source: {}", config.display_target());
        Ok(Self {
            pool,
            target: config.display_target(),
            layouts: Mutex::new(HashMap::new()),
        })
    }

    async fn layout(&self, table: &str) -> Result<TableLayout> {
        let mut layouts = self.layouts.lock().await;
        if let Some(layout) = layouts.get(table) {
            return Ok(layout.clone());
        }

        let rows: Vec<MySqlRow> = sqlx::query(
            "SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME, \
                    CAST(DATA_TYPE AS CHAR(64)) AS DATA_TYPE, \
                    CAST(COLUMN_TYPE AS CHAR(255)) AS COLUMN_TYPE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::pool(e, format!("loading columns of {}", table)))?;

        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| {
                ColumnInfo::new(
                    row.get("COLUMN_NAME"),
                    &row.get::<String, _>("DATA_TYPE"),
                    &row.get::<String, _>("COLUMN_TYPE"),
                )
            })
            .collect();

        let mut order_by: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(COLUMN_NAME AS CHAR(255)) FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
             ORDER BY ORDINAL_POSITION",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrateError::pool(e, format!("loading primary key of {}", table)))?;
        if order_by.is_empty() {
            if let Some(first) = columns.first() {
                debug!("{}: no primary key, ordering windows by {}", table, first.name);
                order_by.push(first.name.clone());
            }
        }

        let layout = TableLayout { columns, order_by };
        layouts.insert(table.to_string(), layout.clone());
        Ok(layout)
    }

    fn row_to_values(row: &MySqlRow, columns: &[ColumnInfo]) -> Row {
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| (col.name.clone(), Self::decode(row, i, col)))
            .collect()
    }

    fn decode(row: &MySqlRow, i: usize, col: &ColumnInfo) -> SqlValue<'static> {
        let is_null = row.try_get_raw(i).map(|r| r.is_null()).unwrap_or(true);
        if is_null {
            return SqlValue::Null;
        }

        let decoded = match (col.data_type.as_str(), col.unsigned) {
            ("tinyint", false) => row.try_get::<i8, _>(i).map(|v| SqlValue::I64(v.into())),
            ("tinyint", true) => row.try_get::<u8, _>(i).map(|v| SqlValue::I64(v.into())),
            ("smallint", false) => row.try_get::<i16, _>(i).map(|v| SqlValue::I64(v.into())),
            ("smallint", true) => row.try_get::<u16, _>(i).map(|v| SqlValue::I64(v.into())),
            ("mediumint" | "int" | "integer", false) => {
                row.try_get::<i32, _>(i).map(|v| SqlValue::I64(v.into()))
            }
            ("mediumint" | "int" | "integer", true) => {
                row.try_get::<u32, _>(i).map(|v| SqlValue::I64(v.into()))
            }
            ("bigint", false) => row.try_get::<i64, _>(i).map(SqlValue::I64),
            ("bigint", true) => row.try_get::<u64, _>(i).map(SqlValue::U64),
            ("float", _) => row.try_get::<f32, _>(i).map(SqlValue::F32),
            ("double" | "real", _) => row.try_get::<f64, _>(i).map(SqlValue::F64),
            ("decimal" | "numeric", _) => {
                row.try_get::<rust_decimal::Decimal, _>(i).map(SqlValue::Decimal)
            }
            ("bit", _) if col.bits == Some(1) => {
                row.try_get::<u64, _>(i).map(|v| SqlValue::Bool(v != 0))
            }
            ("bit", _) => row.try_get::<u64, _>(i).map(SqlValue::U64),
            ("year", _) => row.try_get::<u64, _>(i).map(|v| SqlValue::I64(v as i64)),
            ("binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob", _) => {
                row.try_get::<Vec<u8>, _>(i).map(SqlValue::bytes_owned)
            }
            ("date", _) => row.try_get::<chrono::NaiveDate, _>(i).map(SqlValue::Date),
            ("time", _) => row.try_get::<String, _>(i).map(time_value),
            ("datetime" | "timestamp", _) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(SqlValue::DateTime),
            _ => row.try_get::<String, _>(i).map(SqlValue::text_owned),
        };

        decoded
            .or_else(|_| row.try_get::<String, _>(i).map(SqlValue::text_owned))
            .or_else(|_| row.try_get::<Vec<u8>, _>(i).map(SqlValue::bytes_owned))
            .unwrap_or_else(|e| {
                warn!(
                    "column {} ({}): cannot decode value, copying NULL: {}",
                    col.name, col.data_type, e
                );
                SqlValue::Null
            })
    }
}

#[async_trait]
impl TableSource for MysqlSource {
    async fn column_set(&self, table: &str) -> Result<ColumnSet> {
        Ok(self
            .layout(table)
            .await?
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_mysql(table)?);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_window(&self, table: &str, offset: u64, limit: usize) -> Result<RowBatch> {
        let layout = self.layout(table).await?;
        if layout.columns.is_empty() {
            return Ok(RowBatch::new(offset, Vec::new()));
        }

        let select: Vec<String> = layout
            .columns
            .iter()
            .map(ColumnInfo::projection)
            .collect::<Result<_>>()?;
        let order: Vec<String> = layout
            .order_by
            .iter()
            .map(|c| quote_mysql(c))
            .collect::<Result<_>>()?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            select.join(", "),
            quote_mysql(table)?,
            order.join(", "),
            limit,
            offset
        );

        let rows: Vec<MySqlRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let rows = rows
            .iter()
            .map(|row| Self::row_to_values(row, &layout.columns))
            .collect();
        Ok(RowBatch::new(offset, rows))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("pinging {}", self.target)))?;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_columns_keep_their_width() {
        assert_eq!(ColumnInfo::new("flag".into(), "bit", "bit(1)").bits, Some(1));
        assert_eq!(ColumnInfo::new("mask".into(), "BIT", "BIT(8)").bits, Some(8));
        assert_eq!(ColumnInfo::new("n".into(), "int", "int(11) unsigned").bits, None);
        assert!(ColumnInfo::new("n".into(), "int", "int(11) unsigned").unsigned);
    }

    #[test]
    fn test_projection_casts_bit_year_and_time() {
        assert_eq!(
            ColumnInfo::new("mask".into(), "bit", "bit(8)").projection().unwrap(),
            "CAST(`mask` AS UNSIGNED) AS `mask`"
        );
        assert_eq!(
            ColumnInfo::new("ano".into(), "year", "year(4)").projection().unwrap(),
            "CAST(`ano` AS UNSIGNED) AS `ano`"
        );
        assert_eq!(
            ColumnInfo::new("dur".into(), "time", "time").projection().unwrap(),
            "CAST(`dur` AS CHAR) AS `dur`"
        );
        assert_eq!(
            ColumnInfo::new("nome".into(), "varchar", "varchar(50)").projection().unwrap(),
            "`nome`"
        );
    }

    #[test]
    fn test_time_outside_a_day_stays_text() {
        assert_eq!(
            time_value("10:30:00".to_string()),
            SqlValue::Time(chrono::NaiveTime::from_hms_opt(10, 30, 0).unwrap())
        );
        assert_eq!(
            time_value("838:59:59".to_string()),
            SqlValue::text_owned("838:59:59".to_string())
        );
        assert_eq!(
            time_value("-01:00:00".to_string()),
            SqlValue::text_owned("-01:00:00".to_string())
        );
    }
}
