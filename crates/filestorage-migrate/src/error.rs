//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Copy source (MySQL via sqlx) connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Destination PostgreSQL connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Copy target (MySQL via mysql_async) connection or query error
    #[error("Sink database error: {0}")]
    Sink(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A database endpoint could not be reached
    #[error("Cannot connect to {endpoint}: {message}\n\n{hint}")]
    Connection {
        endpoint: String,
        message: String,
        hint: String,
    },

    /// The transaction log is structurally damaged at a known offset
    #[error("Malformed transaction log {path} at offset {offset}: {message}")]
    LogFormat {
        path: String,
        offset: u64,
        message: String,
    },

    /// SQL text could not be tokenized or parsed
    #[error("SQL syntax error at byte {offset}: {message}")]
    SqlSyntax { offset: usize, message: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Post-migration verification failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The bundled conversion utility failed or timed out
    #[error("External conversion tool failed: {0}")]
    ExternalTool(String),

    /// Destination tables hold rows and neither clearing nor continuing was allowed
    #[error("Target database is not clean; tables with data: {}", .0.join(", "))]
    DirtyTarget(Vec<String>),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a LogFormat error
    pub fn log_format(path: impl Into<String>, offset: u64, message: impl Into<String>) -> Self {
        MigrateError::LogFormat {
            path: path.into(),
            offset,
            message: message.into(),
        }
    }

    /// Create a SqlSyntax error
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        MigrateError::SqlSyntax {
            offset,
            message: message.into(),
        }
    }

    /// Whether this error means an endpoint was unreachable or refused us.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MigrateError::Connection { .. } | MigrateError::Pool { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Connection { .. } | MigrateError::Pool { .. } => 3,
            MigrateError::Validation(_) | MigrateError::DirtyTarget(_) => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
