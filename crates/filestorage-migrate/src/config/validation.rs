//! Configuration validation.

use std::collections::HashSet;

use super::{Config, MysqlConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.admin.host.is_empty() {
        return Err(MigrateError::Config("admin.host is required".into()));
    }
    if config.admin.user.is_empty() {
        return Err(MigrateError::Config("admin.user is required".into()));
    }
    if config.destination.role.is_empty() {
        return Err(MigrateError::Config("destination.role is required".into()));
    }

    let mut names = HashSet::new();
    let mut databases = HashSet::new();
    for store in &config.stores {
        if store.name.is_empty() {
            return Err(MigrateError::Config("stores[].name is required".into()));
        }
        if store.database.is_empty() {
            return Err(MigrateError::Config(format!(
                "stores.{}.database is required",
                store.name
            )));
        }
        if !names.insert(store.name.as_str()) {
            return Err(MigrateError::Config(format!(
                "duplicate store name '{}'",
                store.name
            )));
        }
        if !databases.insert(store.database.as_str()) {
            return Err(MigrateError::Config(format!(
                "stores share destination database '{}'",
                store.database
            )));
        }
    }

    if config.drain.progress_every == 0 {
        return Err(MigrateError::Config(
            "drain.progress_every must be at least 1".into(),
        ));
    }
    if config.drain.bytes_per_txn_estimate == 0 {
        return Err(MigrateError::Config(
            "drain.bytes_per_txn_estimate must be at least 1".into(),
        ));
    }

    if let Some(copy) = &config.copy {
        validate_mysql("copy.source", &copy.source)?;
        validate_mysql("copy.target", &copy.target)?;
        if copy.source.host == copy.target.host
            && copy.source.port == copy.target.port
            && copy.source.database == copy.target.database
        {
            return Err(MigrateError::Config(
                "copy.source and copy.target cannot be the same database".into(),
            ));
        }
        if copy.batch_size == 0 {
            return Err(MigrateError::Config(
                "copy.batch_size must be at least 1".into(),
            ));
        }
        if copy.retry_chunk_size == 0 {
            return Err(MigrateError::Config(
                "copy.retry_chunk_size must be at least 1".into(),
            ));
        }
    }

    if let Some(seed) = &config.seed {
        validate_mysql("seed.target", &seed.target)?;
        if !(0.0..=1.0).contains(&seed.skip_threshold) {
            return Err(MigrateError::Config(
                "seed.skip_threshold must be between 0 and 1".into(),
            ));
        }
    }

    Ok(())
}

fn validate_mysql(section: &str, mysql: &MysqlConfig) -> Result<()> {
    if mysql.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", section)));
    }
    if mysql.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if mysql.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", section)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AdminConfig, CopyConfig, DestinationConfig, DrainConfig, StoreConfig,
    };

    fn mysql(database: &str) -> MysqlConfig {
        MysqlConfig {
            host: "127.0.0.1".to_string(),
            port: 3306,
            database: database.to_string(),
            user: "root".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }

    fn valid_config() -> Config {
        Config {
            admin: AdminConfig {
                host: "localhost".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: String::new(),
                database: "postgres".to_string(),
                ssl_mode: "disable".to_string(),
            },
            destination: DestinationConfig::default(),
            stores: vec![StoreConfig {
                name: "main".to_string(),
                path: "/tmp/Data.fs".into(),
                database: "zodb".to_string(),
                create_schema: true,
                keep_history_after: true,
            }],
            drain: DrainConfig::default(),
            copy: Some(CopyConfig {
                source: mysql("legacy"),
                target: mysql("current"),
                tables: vec![],
                exclude_tables: vec![],
                batch_size: 1000,
                retry_chunk_size: 25,
                clear_existing: false,
                require_clean: true,
                opt_in_env: "ALLOW_MANUAL_DATA_MIGRATION".to_string(),
            }),
            seed: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_admin_host() {
        let mut config = valid_config();
        config.admin.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_store_name() {
        let mut config = valid_config();
        let mut second = config.stores[0].clone();
        second.database = "other".to_string();
        config.stores.push(second);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_shared_destination_database() {
        let mut config = valid_config();
        let mut second = config.stores[0].clone();
        second.name = "documents".to_string();
        config.stores.push(second);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_copy_same_database_rejected() {
        let mut config = valid_config();
        if let Some(copy) = config.copy.as_mut() {
            copy.target = mysql("legacy");
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        if let Some(copy) = config.copy.as_mut() {
            copy.batch_size = 0;
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_progress_interval_rejected() {
        let mut config = valid_config();
        config.drain.progress_every = 0;
        assert!(validate(&config).is_err());
    }
}
