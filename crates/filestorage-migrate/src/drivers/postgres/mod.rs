//! PostgreSQL destination driver.
//!
//! - [`PgAdmin`]: superuser session that resets destination databases
//! - [`PgHistoryStore`]: history-preserving store the drainer writes into
//! - [`PgHistoryFactory`]: opens history stores as the owner role

mod admin;
mod history;

pub use admin::{create_database_sql, database_settings_sql, ensure_role_sql, PgAdmin};
pub use history::{PgHistoryFactory, PgHistoryStore, HISTORY_SCHEMA, HISTORY_TABLES};

use std::time::Duration;

use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::debug;

use crate::config::AdminConfig;
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result};

/// Connection timeout for every destination session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Open one session. The connection task is spawned onto the runtime and
/// ends when the returned client is dropped.
pub async fn connect(config: &AdminConfig) -> Result<Client> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    if !config.password.is_empty() {
        pg_config.password(&config.password);
    }
    pg_config.application_name("filestorage-migrate");
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(CONNECT_TIMEOUT);

    let endpoint = format!("{}:{}/{}", config.host, config.port, config.database);
    let refused = |e: tokio_postgres::Error| connection_error(&endpoint, &config.user, e);

    let client = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
        None => {
            let (client, connection) = pg_config.connect(NoTls).await.map_err(refused)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("postgres connection closed: {}", e);
                }
            });
            client
        }
        Some(tls) => {
            let (client, connection) = pg_config.connect(tls).await.map_err(refused)?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    debug!("postgres connection closed: {}", e);
                }
            });
            client
        }
    };

    debug!("connected to {} as {}", endpoint, config.user);
    Ok(client)
}

fn connection_error(endpoint: &str, user: &str, e: tokio_postgres::Error) -> MigrateError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    let hint = if lower.contains("password") || lower.contains("authentication") {
        format!(
            "Check the password for role '{}'. The admin password can be set in the \
             config file or entered at the prompt.",
            user
        )
    } else if lower.contains("does not exist") {
        "The database or role does not exist yet. Run without --skip-reset to recreate it."
            .to_string()
    } else {
        "Verify the PostgreSQL server is running and accepting TCP connections \
         (listen_addresses, pg_hba.conf, firewall)."
            .to_string()
    };
    MigrateError::Connection {
        endpoint: endpoint.to_string(),
        message,
        hint,
    }
}
