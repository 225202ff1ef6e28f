//! Migration orchestrator - main workflow coordinator.
//!
//! A run authenticates against the destination server, recreates every
//! store's database, checks the transaction logs, drains the stores one
//! after another and finally runs the opt-in table copy. Store outcomes are
//! combined with a logical AND into one [`MigrationReport`].

mod report;

pub use report::{CopyStep, EndpointHealth, HealthReport, MigrationReport, StoreOutcome};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, CopyConfig, SeedConfig, StoreConfig};
use crate::copier::{copy_all_tables, opt_in_enabled, CopyReport};
use crate::core::{HistoryStoreFactory, TableSource};
use crate::drain::{Drainer, ToolTarget};
use crate::drivers::{MysqlSink, MysqlSource, PgAdmin, PgHistoryFactory};
use crate::error::{MigrateError, Result};
use crate::filestorage::LogReader;
use crate::seed::{self, SeedReport};

/// Which optional steps a run performs.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Drop and recreate every store's database first.
    pub reset: bool,
    /// Run the opt-in table copy after the drains.
    pub copy: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset: true,
            copy: true,
        }
    }
}

/// Result of opening a log before draining it.
#[derive(Debug, Clone, Serialize)]
pub struct LogCheck {
    pub store: String,
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

/// Check that each store's log exists and has a readable header.
///
/// Problems are reported, not raised: the drainer copies damaged logs
/// as far as they go.
pub fn check_logs(stores: &[StoreConfig]) -> Vec<LogCheck> {
    stores
        .iter()
        .map(|store| {
            let mut check = LogCheck {
                store: store.name.clone(),
                path: store.path.clone(),
                exists: store.path.is_file(),
                size: 0,
                problem: None,
            };
            if !check.exists {
                warn!(
                    "{}: log file {} not found, store will be skipped",
                    store.name,
                    store.path.display()
                );
                return check;
            }
            match LogReader::open(&store.path) {
                Ok(reader) => {
                    check.size = reader.len();
                    info!(
                        "{}: {} ({:.2} MB)",
                        store.name,
                        store.path.display(),
                        check.size as f64 / (1024.0 * 1024.0)
                    );
                }
                Err(e) => {
                    warn!("{}: {}", store.name, e);
                    check.problem = Some(e.to_string());
                }
            }
            check
        })
        .collect()
}

/// Drain one store, or skip it when its log is missing.
pub async fn drain_store(
    factory: &dyn HistoryStoreFactory,
    config: &Config,
    store: &StoreConfig,
    cancel: &CancellationToken,
) -> StoreOutcome {
    if !store.path.is_file() {
        warn!(
            "{}: {} does not exist, nothing to migrate",
            store.name,
            store.path.display()
        );
        return StoreOutcome::Skipped {
            store: store.name.clone(),
            database: store.database.clone(),
            reason: format!("log file {} not found", store.path.display()),
        };
    }

    let tool = ToolTarget {
        url: config
            .destination
            .connection_url(&config.admin, &store.database),
        redacted: config
            .destination
            .redacted_url(&config.admin, &store.database),
    };
    let drainer = Drainer::new(factory, &config.drain);
    StoreOutcome::Drained(drainer.drain(store, &tool, cancel).await)
}

/// Drain every configured store in order.
///
/// A failed store does not stop the next one. Cancellation stops between
/// stores.
pub async fn drain_stores(
    factory: &dyn HistoryStoreFactory,
    config: &Config,
    stores: &[&StoreConfig],
    cancel: &CancellationToken,
) -> Result<Vec<StoreOutcome>> {
    let mut outcomes = Vec::with_capacity(stores.len());
    for (idx, store) in stores.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        info!("Store {}/{}: {}", idx + 1, stores.len(), store.name);
        let outcome = drain_store(factory, config, store, cancel).await;
        if outcome.succeeded() {
            info!("{}: {}", store.name, outcome.status());
        } else {
            error!("{}: {}", store.name, outcome.status());
        }
        outcomes.push(outcome);
    }
    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    Ok(outcomes)
}

/// Run the opt-in table copy, or explain why it did not run.
pub async fn copy_step(copy: Option<&CopyConfig>, cancel: &CancellationToken) -> CopyStep {
    let Some(config) = copy else {
        return CopyStep::Skipped {
            reason: "no copy section configured".to_string(),
        };
    };
    if !opt_in_enabled(&config.opt_in_env) {
        info!(
            "Manual data copy not requested; set {}=1 to enable it",
            config.opt_in_env
        );
        return CopyStep::Skipped {
            reason: format!("{} is not set to 1", config.opt_in_env),
        };
    }

    match run_copy(config, cancel).await {
        Ok(report) => {
            info!("Manual data copy: {}", report.summary());
            CopyStep::Completed(report)
        }
        Err(e) => {
            error!("Manual data copy failed:\n{}", e.format_detailed());
            CopyStep::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Connect to both MySQL databases and copy every selected table.
pub async fn run_copy(config: &CopyConfig, cancel: &CancellationToken) -> Result<CopyReport> {
    let source = MysqlSource::connect(&config.source).await?;
    let mut sink = match MysqlSink::connect(&config.target).await {
        Ok(sink) => sink,
        Err(e) => {
            source.close().await;
            return Err(e);
        }
    };

    let outcome = copy_all_tables(&source, &mut sink, config, cancel).await;
    source.close().await;
    if let Err(e) = sink.disconnect().await {
        warn!("closing copy target: {}", e);
    }
    outcome
}

/// Connect to the seed target and load the configured dump.
pub async fn run_seed(config: &SeedConfig) -> Result<SeedReport> {
    let mut sink = MysqlSink::connect(&config.target).await?;
    let outcome = seed::seed(&mut sink, config).await;
    if let Err(e) = sink.disconnect().await {
        warn!("closing seed target: {}", e);
    }
    outcome
}

/// Connect to the seed target and delete what the dump would load.
pub async fn run_unseed(config: &SeedConfig) -> Result<Vec<(String, u64)>> {
    let mut sink = MysqlSink::connect(&config.target).await?;
    let outcome = seed::unseed(&mut sink, config).await;
    if let Err(e) = sink.disconnect().await {
        warn!("closing seed target: {}", e);
    }
    outcome
}

/// Probe every configured endpoint and time a round trip.
pub async fn health_check(config: &Config) -> HealthReport {
    let mut endpoints = Vec::new();

    let admin_target = format!(
        "{}:{}/{}",
        config.admin.host, config.admin.port, config.admin.database
    );
    let started = Instant::now();
    let admin = match PgAdmin::connect(&config.admin).await {
        Ok(admin) => admin.ping().await.map(|_| started.elapsed()),
        Err(e) => Err(e),
    };
    endpoints.push(EndpointHealth::from_result("admin", admin_target, admin));

    if let Some(copy) = &config.copy {
        let started = Instant::now();
        let source = match MysqlSource::connect(&copy.source).await {
            Ok(source) => {
                let pinged = source.ping().await.map(|()| started.elapsed());
                source.close().await;
                pinged
            }
            Err(e) => Err(e),
        };
        endpoints.push(EndpointHealth::from_result(
            "copy.source",
            copy.source.display_target(),
            source,
        ));

        let started = Instant::now();
        let target: Result<Duration> = match MysqlSink::connect(&copy.target).await {
            Ok(sink) => {
                let elapsed = started.elapsed();
                sink.disconnect().await.map(|()| elapsed)
            }
            Err(e) => Err(e),
        };
        endpoints.push(EndpointHealth::from_result(
            "copy.target",
            copy.target.display_target(),
            target,
        ));
    }

    let healthy = endpoints.iter().all(|e| e.ok);
    HealthReport { healthy, endpoints }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    admin: PgAdmin,
}

impl Orchestrator {
    /// Authenticate against the destination server.
    pub async fn new(config: Config) -> Result<Self> {
        let admin = PgAdmin::connect(&config.admin).await?;
        let latency = admin.ping().await?;
        info!(
            "Authenticated as {} on {}:{} ({} ms)",
            config.admin.user,
            config.admin.host,
            config.admin.port,
            latency.as_millis()
        );
        Ok(Self { config, admin })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn factory(&self) -> PgHistoryFactory {
        PgHistoryFactory::new(
            self.config.admin.clone(),
            self.config.destination.clone(),
            self.config.drain.tuned_session.clone(),
        )
    }

    /// Run the migration.
    pub async fn run(&self, opts: RunOptions, cancel: &CancellationToken) -> Result<MigrationReport> {
        let started = Instant::now();
        let mut report = MigrationReport::new(uuid::Uuid::new_v4().to_string(), Utc::now());
        info!("Starting migration run: {}", report.run_id);

        let mut to_drain: Vec<&StoreConfig> = Vec::new();
        if opts.reset {
            info!("Phase 1: Recreating destination databases");
            for store in &self.config.stores {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                match self
                    .admin
                    .reset_database(&self.config.destination, &store.database)
                    .await
                {
                    Ok(()) => {
                        report.databases_reset.push(store.database.clone());
                        to_drain.push(store);
                    }
                    Err(e) => {
                        error!(
                            "{}: cannot recreate {}:\n{}",
                            store.name,
                            store.database,
                            e.format_detailed()
                        );
                        report.stores.push(StoreOutcome::ResetFailed {
                            store: store.name.clone(),
                            database: store.database.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        } else {
            info!("Phase 1: Skipped, destination databases kept as they are");
            to_drain.extend(self.config.stores.iter());
        }

        info!("Phase 2: Checking transaction logs");
        report.logs = check_logs(&self.config.stores);
        let unreadable = report.logs.iter().filter(|c| c.problem.is_some()).count();
        if unreadable > 0 {
            warn!("{} logs could not be opened cleanly; draining them anyway", unreadable);
        }

        info!("Phase 3: Draining {} stores", to_drain.len());
        let factory = self.factory();
        let drained = drain_stores(&factory, &self.config, &to_drain, cancel).await?;
        report.stores.extend(drained);

        report.copy = if opts.copy {
            info!("Phase 4: Manual data copy");
            copy_step(self.config.copy.as_ref(), cancel).await
        } else {
            CopyStep::Skipped {
                reason: "disabled for this run".to_string(),
            }
        };
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        report.finish(started.elapsed(), &self.config.stores);
        if report.success {
            info!("Migration completed successfully");
        } else {
            error!("Migration finished with failures: {}", report.failed_stores().join(", "));
        }
        Ok(report)
    }

    /// Drain one configured store into its existing database.
    pub async fn drain_one(&self, name: &str, cancel: &CancellationToken) -> Result<StoreOutcome> {
        let store = self
            .config
            .store(name)
            .ok_or_else(|| MigrateError::Config(format!("no store named '{}'", name)))?;
        let factory = self.factory();
        Ok(drain_store(&factory, &self.config, store, cancel).await)
    }
}
