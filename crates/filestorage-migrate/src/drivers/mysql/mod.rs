//! MySQL/MariaDB driver for the table copy and the seed loader.
//!
//! - [`MysqlSource`]: sqlx pool reading offset windows
//! - [`MysqlSink`]: one mysql_async session executing literal SQL

mod reader;
mod writer;

pub use reader::MysqlSource;
pub use writer::MysqlSink;

use crate::config::MysqlConfig;
use crate::error::MigrateError;

/// Map a failed connection attempt to an error carrying a remediation hint.
fn connection_error(config: &MysqlConfig, e: impl ToString) -> MigrateError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    let hint = if lower.contains("access denied") {
        format!(
            "Check the credentials of user '{}' and its grants on database '{}'.",
            config.user, config.database
        )
    } else if lower.contains("unknown database") {
        format!(
            "Database '{}' does not exist. Create it and run the schema migrations first.",
            config.database
        )
    } else {
        format!(
            "Verify the MySQL server at {}:{} is running and reachable \
             (bind-address, firewall, container network).",
            config.host, config.port
        )
    };
    MigrateError::Connection {
        endpoint: config.display_target(),
        message,
        hint,
    }
}
