//! filestorage-migrate CLI - drain FileStorage logs into PostgreSQL with history.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use filestorage_migrate::config::DrainConfig;
use filestorage_migrate::orchestrator::{self, CopyStep};
use filestorage_migrate::{Config, MigrateError, Orchestrator, RunOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when the run finished but something in it failed.
const EXIT_PARTIAL_FAILURE: u8 = 4;

#[derive(Parser)]
#[command(name = "filestorage-migrate")]
#[command(about = "Drain FileStorage transaction logs into PostgreSQL, keeping full history")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Answer yes to confirmation prompts (required to reset databases non-interactively)
    #[arg(short, long)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the destination databases and drain every configured store
    Run {
        /// Keep the destination databases instead of dropping and recreating them
        #[arg(long)]
        skip_reset: bool,

        /// Do not run the manual data copy, even when it is enabled
        #[arg(long)]
        skip_copy: bool,
    },

    /// Drain one store into its existing database
    Drain {
        /// Store name from the configuration
        #[arg(long)]
        store: String,
    },

    /// Check the structure of a transaction log without copying it
    VerifyLog {
        /// Path to the log file
        path: PathBuf,

        /// Log a running count every N transactions
        #[arg(long)]
        every: Option<u64>,
    },

    /// Copy tables between the configured MySQL databases (opt-in via environment)
    Copy,

    /// Load the initial-data SQL dump into the seed target
    Seed {
        /// Delete rows of every table the dump inserts into instead
        #[arg(long)]
        remove: bool,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_PARTIAL_FAILURE),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns whether everything the command did succeeded.
async fn run() -> Result<bool, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    // Log checks need no configuration file.
    if let Commands::VerifyLog { path, every } = &cli.command {
        let every = every.unwrap_or_else(|| DrainConfig::default().verify_log_every);
        let summary = filestorage_migrate::scan(path, every)?;
        if cli.output_json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("Log OK: {}", path.display());
            println!("  Transactions: {}", summary.transactions);
            println!("  Object revisions: {}", summary.objects);
            println!("  State bytes: {}", summary.state_bytes);
            println!("  File size: {}", summary.file_size);
            if let (Some(first), Some(last)) = (summary.first_tid, summary.last_tid) {
                println!("  Tids: {} .. {}", first, last);
            }
        }
        return Ok(true);
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler();

    match cli.command {
        Commands::VerifyLog { .. } => Ok(true),

        Commands::Run {
            skip_reset,
            skip_copy,
        } => {
            if !skip_reset {
                confirm_reset(&config, cli.yes)?;
            }
            let orchestrator = connect(config).await?;
            let opts = RunOptions {
                reset: !skip_reset,
                copy: !skip_copy,
            };
            let report = orchestrator.run(opts, &cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.render());
            }
            Ok(report.success)
        }

        Commands::Drain { store } => {
            let orchestrator = connect(config).await?;
            let outcome = orchestrator.drain_one(&store, &cancel_token).await?;
            if cancel_token.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{} -> {}: {}", outcome.store(), outcome.database(), outcome.status());
            }
            Ok(outcome.succeeded())
        }

        Commands::Copy => {
            if config.copy.is_none() {
                return Err(MigrateError::Config("no copy section configured".to_string()));
            }
            let step = orchestrator::copy_step(config.copy.as_ref(), &cancel_token).await;
            if cancel_token.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&step)?);
            } else {
                println!("Manual data copy: {}", step.status());
                if let CopyStep::Completed(report) = &step {
                    for table in &report.tables {
                        println!(
                            "  {}: {} migrated, {} skipped, {} failed",
                            table.table, table.rows_migrated, table.rows_skipped, table.rows_failed
                        );
                    }
                }
            }
            Ok(step.succeeded())
        }

        Commands::Seed { remove } => {
            let seed = config
                .seed
                .as_ref()
                .ok_or_else(|| MigrateError::Config("no seed section configured".to_string()))?;

            if remove {
                let prompt = format!(
                    "Delete every row of the tables {} inserts into?",
                    seed.file.display()
                );
                if !cli.yes && !confirm(&prompt)? {
                    return Err(MigrateError::Cancelled);
                }
                let deleted = orchestrator::run_unseed(seed).await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&deleted)?);
                } else {
                    for (table, rows) in &deleted {
                        println!("  {}: {} rows deleted", table, rows);
                    }
                }
                return Ok(true);
            }

            let report = orchestrator::run_seed(seed).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.skipped_existing {
                println!(
                    "Initial data already present ({}/{} key tables), nothing loaded",
                    report.key_tables_with_data, report.key_tables_total
                );
            } else if report.missing_file {
                println!("Initial data file {} not found, nothing loaded", seed.file.display());
            } else {
                println!(
                    "Initial data loaded: {} statements executed, {} dropped, {} columns removed",
                    report.statements_executed, report.statements_dropped, report.columns_dropped
                );
            }
            Ok(true)
        }

        Commands::HealthCheck => {
            let report = orchestrator::health_check(&config).await;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("Health Check Results:");
                print!("{}", report.render());
            }

            if !report.healthy {
                return Err(MigrateError::pool("Health check failed", "health-check"));
            }
            Ok(true)
        }
    }
}

/// Authenticate, prompting once for the superuser password when none is
/// configured and the server refused us.
async fn connect(mut config: Config) -> Result<Orchestrator, MigrateError> {
    match Orchestrator::new(config.clone()).await {
        Ok(orchestrator) => Ok(orchestrator),
        Err(e)
            if e.is_connectivity()
                && config.admin.password.is_empty()
                && std::io::stdin().is_terminal() =>
        {
            warn!("Connection without a password failed: {}", e);
            config.admin.password = dialoguer::Password::new()
                .with_prompt(format!("Password for PostgreSQL user {}", config.admin.user))
                .interact()
                .map_err(|e| MigrateError::Config(e.to_string()))?;
            Orchestrator::new(config).await
        }
        Err(e) => Err(e),
    }
}

fn confirm_reset(config: &Config, yes: bool) -> Result<(), MigrateError> {
    if yes {
        return Ok(());
    }
    let databases: Vec<&str> = config.stores.iter().map(|s| s.database.as_str()).collect();
    if !std::io::stdin().is_terminal() {
        return Err(MigrateError::Config(format!(
            "refusing to drop databases {} without --yes",
            databases.join(", ")
        )));
    }
    let prompt = format!(
        "Drop and recreate {} on {}? All data in them will be lost",
        databases.join(", "),
        config.admin.host
    );
    if confirm(&prompt)? {
        Ok(())
    } else {
        Err(MigrateError::Cancelled)
    }
}

fn confirm(prompt: &str) -> Result<bool, MigrateError> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| MigrateError::Config(e.to_string()))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current step...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("cannot listen for {}: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Stopping after the current step...");
                token.cancel();
            }
            Err(e) => warn!("cannot listen for Ctrl-C: {}", e),
        }
    });

    cancel_token
}
