//! Destructive reset of destination databases.
//!
//! A reset is total: connections are terminated, the database is dropped and
//! recreated with a fixed encoding and locale, the owner role is recreated or
//! refreshed, privileges are granted and per-database settings applied.

use std::time::{Duration, Instant};

use tokio_postgres::Client;
use tracing::{debug, info};

use crate::config::{AdminConfig, DestinationConfig};
use crate::core::identifier::{pg_string_literal, quote_pg, validate_setting_value};
use crate::error::Result;

/// Superuser session on the maintenance database.
pub struct PgAdmin {
    client: Client,
    config: AdminConfig,
}

impl PgAdmin {
    /// Authenticate against the maintenance database.
    pub async fn connect(config: &AdminConfig) -> Result<Self> {
        let client = super::connect(config).await?;
        client.simple_query("SELECT 1").await?;
        info!(
            "Authenticated as {} on {}:{}",
            config.user, config.host, config.port
        );
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Round-trip latency of a trivial query.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.client.simple_query("SELECT 1").await?;
        Ok(started.elapsed())
    }

    pub async fn database_exists(&self, database: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
                &[&database],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Drop and recreate `database` owned by the destination role.
    pub async fn reset_database(&self, dest: &DestinationConfig, database: &str) -> Result<()> {
        let quoted = quote_pg(database)?;

        let terminated = self
            .client
            .execute(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[&database],
            )
            .await?;
        if terminated > 0 {
            info!("{}: terminated {} open connections", database, terminated);
            tokio::time::sleep(Duration::from_secs(dest.terminate_grace_secs)).await;
        }

        self.client
            .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quoted))
            .await?;
        debug!("{}: dropped", database);

        self.ensure_role(dest).await?;

        self.client
            .batch_execute(&create_database_sql(dest, database)?)
            .await?;
        self.client
            .batch_execute(&format!(
                "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
                quoted,
                quote_pg(&dest.role)?
            ))
            .await?;
        for statement in database_settings_sql(dest, database)? {
            self.client.batch_execute(&statement).await?;
        }

        self.grant_schema(dest, database).await;
        info!(
            "{}: recreated (encoding {}, locale {}, owner {})",
            database, dest.encoding, dest.locale, dest.role
        );
        Ok(())
    }

    /// Create the owner role if missing, then refresh its attributes and password.
    pub async fn ensure_role(&self, dest: &DestinationConfig) -> Result<()> {
        for statement in ensure_role_sql(dest)? {
            self.client.batch_execute(&statement).await?;
        }
        debug!("role {} ready", dest.role);
        Ok(())
    }

    /// Grant the public schema of the fresh database to the owner role.
    ///
    /// Needs a session on that database. Failure only matters on servers
    /// where the role does not already own the schema, so it is logged.
    async fn grant_schema(&self, dest: &DestinationConfig, database: &str) {
        let result = async {
            let client = super::connect(&self.config.for_database(database)).await?;
            client
                .batch_execute(&format!(
                    "GRANT ALL ON SCHEMA public TO {}",
                    quote_pg(&dest.role)?
                ))
                .await?;
            Ok::<_, crate::error::MigrateError>(())
        }
        .await;
        if let Err(e) = result {
            debug!("{}: schema grant skipped: {}", database, e);
        }
    }
}

/// `CREATE DATABASE` with a fixed encoding and locale from `template0`.
pub fn create_database_sql(dest: &DestinationConfig, database: &str) -> Result<String> {
    validate_setting_value(&dest.encoding)?;
    validate_setting_value(&dest.locale)?;
    Ok(format!(
        "CREATE DATABASE {} WITH OWNER {} ENCODING {} TEMPLATE template0 \
         LC_COLLATE {} LC_CTYPE {} CONNECTION LIMIT -1",
        quote_pg(database)?,
        quote_pg(&dest.role)?,
        pg_string_literal(&dest.encoding)?,
        pg_string_literal(&dest.locale)?,
        pg_string_literal(&dest.locale)?,
    ))
}

/// Per-database resource settings.
pub fn database_settings_sql(dest: &DestinationConfig, database: &str) -> Result<Vec<String>> {
    let quoted = quote_pg(database)?;
    [
        ("temp_buffers", &dest.temp_buffers),
        ("work_mem", &dest.work_mem),
        ("statement_timeout", &dest.statement_timeout),
    ]
    .into_iter()
    .map(|(name, value)| {
        validate_setting_value(value)?;
        Ok(format!(
            "ALTER DATABASE {} SET {} = {}",
            quoted,
            name,
            pg_string_literal(value)?
        ))
    })
    .collect()
}

/// Idempotent role creation followed by an attribute and password refresh.
pub fn ensure_role_sql(dest: &DestinationConfig) -> Result<Vec<String>> {
    let role = quote_pg(&dest.role)?;
    let create = format!(
        "DO $do$ BEGIN \
         IF NOT EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = {}) THEN \
         CREATE ROLE {} LOGIN; \
         END IF; \
         END $do$",
        pg_string_literal(&dest.role)?,
        role
    );
    let mut alter = format!("ALTER ROLE {} WITH LOGIN CREATEDB CREATEROLE", role);
    if !dest.role_password.is_empty() {
        alter.push_str(&format!(
            " PASSWORD {}",
            pg_string_literal(&dest.role_password)?
        ));
    }
    Ok(vec![create, alter])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> DestinationConfig {
        DestinationConfig {
            role: "zodbuser".to_string(),
            role_password: "it's".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_database_sql() {
        let sql = create_database_sql(&dest(), "zodb_sapl").unwrap();
        assert_eq!(
            sql,
            "CREATE DATABASE \"zodb_sapl\" WITH OWNER \"zodbuser\" ENCODING E'UTF8' \
             TEMPLATE template0 LC_COLLATE E'C' LC_CTYPE E'C' CONNECTION LIMIT -1"
        );
    }

    #[test]
    fn test_create_database_rejects_odd_locale() {
        let mut d = dest();
        d.locale = "C'; DROP".to_string();
        assert!(create_database_sql(&d, "zodb").is_err());
    }

    #[test]
    fn test_settings_sql() {
        let sql = database_settings_sql(&dest(), "zodb").unwrap();
        assert_eq!(sql.len(), 3);
        assert_eq!(sql[0], "ALTER DATABASE \"zodb\" SET temp_buffers = E'32MB'");
        assert_eq!(sql[2], "ALTER DATABASE \"zodb\" SET statement_timeout = E'1h'");
    }

    #[test]
    fn test_role_sql_escapes_password() {
        let sql = ensure_role_sql(&dest()).unwrap();
        assert!(sql[0].contains("rolname = E'zodbuser'"));
        assert!(sql[0].contains("CREATE ROLE \"zodbuser\" LOGIN"));
        assert_eq!(
            sql[1],
            "ALTER ROLE \"zodbuser\" WITH LOGIN CREATEDB CREATEROLE PASSWORD E'it''s'"
        );
    }

    #[test]
    fn test_role_sql_without_password() {
        let mut d = dest();
        d.role_password.clear();
        let sql = ensure_role_sql(&d).unwrap();
        assert!(!sql[1].contains("PASSWORD"));
    }
}
