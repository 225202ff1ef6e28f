//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL superuser connection used for destructive resets.
    pub admin: AdminConfig,

    /// Role and per-database settings for the migrated databases.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Transaction logs to drain, in the order they are drained.
    #[serde(default)]
    pub stores: Vec<StoreConfig>,

    /// Drainer tuning.
    #[serde(default)]
    pub drain: DrainConfig,

    /// Optional cross-database table copy (opt-in via environment).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyConfig>,

    /// Optional initial-data SQL dump loader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<SeedConfig>,
}

impl Config {
    /// Look up a store by name.
    pub fn store(&self, name: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.name == name)
    }
}

/// PostgreSQL superuser connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Database host.
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Superuser name (default: "postgres").
    #[serde(default = "default_postgres")]
    pub user: String,

    /// Superuser password. Empty means local/peer authentication is tried first.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Maintenance database to connect to (default: "postgres").
    #[serde(default = "default_postgres")]
    pub database: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Owner role and settings applied to every recreated database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Role that owns the migrated data (default: "zodbuser").
    #[serde(default = "default_role")]
    pub role: String,

    /// Password for the role.
    #[serde(default, skip_serializing)]
    pub role_password: String,

    /// Database encoding (default: "UTF8").
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// LC_COLLATE / LC_CTYPE for new databases (default: "C").
    #[serde(default = "default_locale")]
    pub locale: String,

    /// `ALTER DATABASE ... SET temp_buffers`.
    #[serde(default = "default_32mb")]
    pub temp_buffers: String,

    /// `ALTER DATABASE ... SET work_mem`.
    #[serde(default = "default_32mb")]
    pub work_mem: String,

    /// `ALTER DATABASE ... SET statement_timeout`.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout: String,

    /// Seconds to wait after terminating backends before dropping.
    #[serde(default = "default_grace")]
    pub terminate_grace_secs: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            role_password: String::new(),
            encoding: default_encoding(),
            locale: default_locale(),
            temp_buffers: default_32mb(),
            work_mem: default_32mb(),
            statement_timeout: default_statement_timeout(),
            terminate_grace_secs: default_grace(),
        }
    }
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("role", &self.role)
            .field("role_password", &"[REDACTED]")
            .field("encoding", &self.encoding)
            .field("locale", &self.locale)
            .field("temp_buffers", &self.temp_buffers)
            .field("work_mem", &self.work_mem)
            .field("statement_timeout", &self.statement_timeout)
            .field("terminate_grace_secs", &self.terminate_grace_secs)
            .finish()
    }
}

/// One transaction log and the database it drains into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name used in logs and reports (e.g. "main").
    pub name: String,

    /// Path to the transaction log file.
    pub path: PathBuf,

    /// Destination database name.
    pub database: String,

    /// Create the history-preserving tables if they are missing (default: true).
    #[serde(default = "default_true")]
    pub create_schema: bool,

    /// Whether operators intend to keep history once migration is done.
    /// Only affects the guidance printed in the report.
    #[serde(default = "default_true")]
    pub keep_history_after: bool,
}

/// Drainer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Emit a progress line every N transactions (default: 100).
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,

    /// Emit a progress line at least this often (default: 10s).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    /// Log a running count every N transactions while verifying (default: 1000).
    #[serde(default = "default_verify_every")]
    pub verify_log_every: u64,

    /// Size heuristic used when counting transactions fails (default: 0.5 MiB/txn).
    #[serde(default = "default_bytes_per_txn")]
    pub bytes_per_txn_estimate: u64,

    /// Session settings for the first copy attempt; the fallback attempt skips them.
    #[serde(default = "default_tuned_session")]
    pub tuned_session: Vec<String>,

    /// External conversion utility used as the last resort.
    #[serde(default)]
    pub external_tool: ExternalToolConfig,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            progress_every: default_progress_every(),
            progress_interval_secs: default_progress_interval(),
            verify_log_every: default_verify_every(),
            bytes_per_txn_estimate: default_bytes_per_txn(),
            tuned_session: default_tuned_session(),
            external_tool: ExternalToolConfig::default(),
        }
    }
}

/// External conversion utility invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolConfig {
    /// Set to false to skip the external fallback entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Program to run (default: "python3").
    #[serde(default = "default_tool_program")]
    pub program: String,

    /// Leading arguments (default: ["-m", "ZODB.scripts.zodbconvert"]).
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,

    /// Kill the tool after this many seconds (default: 3600).
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExternalToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_tool_program(),
            args: default_tool_args(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

/// MySQL connection used by the table copier and the seed loader.
#[derive(Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    /// Database host.
    #[serde(default = "default_loopback")]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl MysqlConfig {
    /// `host:port/database`, safe to log.
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Cross-database table copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Database rows are read from.
    pub source: MysqlConfig,

    /// Database rows are written to. Its schema must already exist.
    pub target: MysqlConfig,

    /// Tables to copy. Empty means every table present at the target.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Tables never copied (control tables are always excluded).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Rows per offset window (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per retry chunk after a window insert fails (default: 25).
    #[serde(default = "default_retry_chunk")]
    pub retry_chunk_size: usize,

    /// Delete existing target rows before copying (default: false).
    #[serde(default)]
    pub clear_existing: bool,

    /// Refuse to run against a target holding rows, unless clearing (default: true).
    #[serde(default = "default_true")]
    pub require_clean: bool,

    /// Environment variable that must equal "1" for the copy to run.
    #[serde(default = "default_opt_in_env")]
    pub opt_in_env: String,
}

/// Initial-data SQL dump loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Database the dump is applied to.
    pub target: MysqlConfig,

    /// Path of the SQL dump.
    pub file: PathBuf,

    /// Tables inspected to decide whether the seed already ran.
    #[serde(default)]
    pub key_tables: Vec<String>,

    /// Fraction of key tables holding rows at which the load is skipped (default: 0.5).
    #[serde(default = "default_skip_threshold")]
    pub skip_threshold: f64,
}

// Default value functions for serde
fn default_localhost() -> String {
    "localhost".to_string()
}

fn default_loopback() -> String {
    "127.0.0.1".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_role() -> String {
    "zodbuser".to_string()
}

fn default_encoding() -> String {
    "UTF8".to_string()
}

fn default_locale() -> String {
    "C".to_string()
}

fn default_32mb() -> String {
    "32MB".to_string()
}

fn default_statement_timeout() -> String {
    "1h".to_string()
}

fn default_grace() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_progress_every() -> u64 {
    100
}

fn default_progress_interval() -> u64 {
    10
}

fn default_verify_every() -> u64 {
    1000
}

fn default_bytes_per_txn() -> u64 {
    512 * 1024
}

fn default_tuned_session() -> Vec<String> {
    vec![
        "SET synchronous_commit = off".to_string(),
        "SET lock_timeout = '60s'".to_string(),
    ]
}

fn default_tool_program() -> String {
    "python3".to_string()
}

fn default_tool_args() -> Vec<String> {
    vec!["-m".to_string(), "ZODB.scripts.zodbconvert".to_string()]
}

fn default_tool_timeout() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    1000
}

fn default_retry_chunk() -> usize {
    25
}

fn default_opt_in_env() -> String {
    "ALLOW_MANUAL_DATA_MIGRATION".to_string()
}

fn default_skip_threshold() -> f64 {
    0.5
}
