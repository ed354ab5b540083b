//! placa-enforcer - Pico y placa enforcement CLI
//!
//! Rule queries (`evaluate`, `rules`) need no database. Ledger queries
//! (`status`, `vehicles`) open the database read-only so they never block a
//! running `ingest`, which is the only writer.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use placa_common::config::{load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig};
use placa_common::db::{connect_readonly, init_database};
use placa_common::time::parse_local_datetime;
use placa_common::{Clock, FixedClock};
use placa_enforcer::detection::{DetectionSource, JsonLinesSource};
use placa_enforcer::ledger::PlateLedger;
use placa_enforcer::orchestrator::SightingOrchestrator;
use placa_enforcer::{build_calendar, clock_from_config, cooldown_from_config, status_of};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "placa-enforcer")]
#[command(about = "Pico y placa rule evaluation and violation ledger")]
#[command(version)]
struct Args {
    /// Folder holding placa.db
    #[arg(long, global = true, env = "PLACA_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, env = "PLACA_CONFIG")]
    config: Option<PathBuf>,

    /// Pin the clock (demo mode), e.g. 2025-11-10T08:00
    #[arg(long, global = true, value_parser = parse_datetime_arg)]
    now: Option<NaiveDateTime>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Can this plate circulate at the given time?
    Evaluate {
        plate: String,
        /// Local date-time; defaults to now
        #[arg(long, value_parser = parse_datetime_arg)]
        at: Option<NaiveDateTime>,
    },
    /// Ledger snapshot and today's outlook for a plate
    Status { plate: String },
    /// Effective rules for a date
    Rules {
        /// YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// All registered vehicles
    Vehicles,
    /// Process newline-delimited JSON detection events
    Ingest {
        /// Input file; stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn parse_datetime_arg(text: &str) -> std::result::Result<NaiveDateTime, String> {
    parse_local_datetime(text).ok_or_else(|| format!("expected YYYY-MM-DDTHH:MM[:SS], got {:?}", text))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise the config file's level once it is loaded
    let env_filter = std::env::var_os("RUST_LOG").is_some();
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, filter_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting placa-enforcer v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (config, config_path) =
        load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    if !env_filter {
        match EnvFilter::try_new(&config.logging.level) {
            Ok(level) => filter_handle
                .reload(level)
                .context("Failed to apply configured log level")?,
            Err(e) => warn!(level = %config.logging.level, error = %e, "Ignoring invalid log level"),
        }
    }

    let calendar = build_calendar(&config).context("Invalid restriction calendar")?;

    // --now beats demo_datetime
    let pinned: Option<Arc<dyn Clock>> = match args.now {
        Some(at) => Some(Arc::new(FixedClock(at))),
        None if config.demo_datetime.is_some() => Some(clock_from_config(&config)?),
        None => None,
    };
    let clock = match &pinned {
        Some(clock) => clock.clone(),
        None => clock_from_config(&config)?,
    };

    match args.command {
        Command::Evaluate { plate, at } => {
            let at = at.unwrap_or_else(|| clock.now());
            let evaluation = calendar.evaluate(&plate, at)?;
            print_json(&evaluation)?;
        }
        Command::Rules { date } => {
            let date = date.unwrap_or_else(|| clock.now().date());
            print_json(&calendar.rules_for(date))?;
        }
        Command::Status { plate } => {
            let ledger = open_readonly(args.root_folder, &config).await?;
            let report = status_of(&ledger, &calendar, &plate, clock.now()).await?;
            print_json(&report)?;
        }
        Command::Vehicles => {
            let ledger = open_readonly(args.root_folder, &config).await?;
            print_json(&ledger.list_vehicles().await?)?;
        }
        Command::Ingest { input } => {
            let initializer =
                RootFolderInitializer::new(RootFolderResolver::new(args.root_folder, &config).resolve());
            initializer.ensure_directory_exists()?;

            let db_path = initializer.database_path();
            info!("Database path: {}", db_path.display());
            let pool = init_database(&db_path)
                .await
                .with_context(|| format!("Failed to open ledger at {}", db_path.display()))?;

            let mut orchestrator = SightingOrchestrator::new(
                PlateLedger::new(pool),
                Arc::new(calendar),
                cooldown_from_config(&config),
            );
            if let Some(clock) = pinned {
                orchestrator = orchestrator.with_rule_clock(clock);
            }

            let mut source: Box<dyn DetectionSource> = match &input {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    info!("Reading detections from {}", path.display());
                    Box::new(JsonLinesSource::new(BufReader::new(file)))
                }
                None => {
                    info!("Reading detections from stdin");
                    Box::new(JsonLinesSource::new(BufReader::new(tokio::io::stdin())))
                }
            };

            // An interrupted event's transaction is rolled back when dropped
            tokio::select! {
                stats = orchestrator.run(source.as_mut()) => print_json(&stats)?,
                _ = shutdown_signal() => warn!("Ingest interrupted"),
            }
        }
    }

    Ok(())
}

async fn open_readonly(root_folder: Option<PathBuf>, config: &TomlConfig) -> Result<PlateLedger> {
    let initializer = RootFolderInitializer::new(RootFolderResolver::new(root_folder, config).resolve());
    let db_path = initializer.database_path();

    let pool = match connect_readonly(&db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open ledger at {}: {}", db_path.display(), e);
            return Err(e.into());
        }
    };
    Ok(PlateLedger::new(pool))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ctrl+C / SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping ingest");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping ingest");
        },
    }
}
