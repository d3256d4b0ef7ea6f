use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use contracts::{EngineConfig, JobKind};
use ledger_api::{
    load_config_file, load_engine_config, serve_with_shutdown, spawn_scheduler, LedgerService,
};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ledger-cli", about = "Investment accrual and commission engine")]
struct Cli {
    /// Engine config JSON. Defaults to $LEDGER_CONFIG, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the config and $LEDGER_SQLITE_PATH.
    #[arg(long, global = true)]
    sqlite_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API with the job scheduler running.
    Serve {
        #[arg(default_value = "127.0.0.1:8080")]
        addr: SocketAddr,

        /// Serve requests without starting the timer loops.
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Run the daily accrual for a date (default: today, UTC).
    Accrue { date: Option<NaiveDate> },
    /// Complete investments whose term ended on or before a date.
    Mature { date: Option<NaiveDate> },
    /// Delete daily-return history older than the retention window.
    Purge {
        /// Retention window in days, overriding the config.
        days: Option<u32>,
    },
    /// Print the job gates and next fire times.
    Status,
    /// Project the return of a deposit without touching the store.
    Quote { tier: String, amount: f64 },
}

fn load_config(cli: &Cli) -> Result<EngineConfig, String> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path),
        None => load_engine_config(),
    }
    .map_err(|err| err.to_string())?;
    if let Some(path) = cli.sqlite_path.as_ref().filter(|path| !path.trim().is_empty()) {
        config.sqlite_path = Some(path.clone());
    }
    Ok(config)
}

fn at_start_of(date: Option<NaiveDate>) -> DateTime<Utc> {
    match date {
        Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
        None => Utc::now(),
    }
}

fn print_json(value: &impl Serialize) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(())
}

fn open_service(config: EngineConfig) -> Result<LedgerService, String> {
    LedgerService::open_sqlite(config).map_err(|err| format!("failed to open sqlite store: {err}"))
}

fn run_job(config: EngineConfig, job: JobKind, at: DateTime<Utc>) -> Result<(), String> {
    let service = open_service(config)?;
    let report = service.run_job(job, at).map_err(|err| err.to_string())?;
    print_json(&report)
}

async fn run_server(
    config: EngineConfig,
    addr: SocketAddr,
    no_scheduler: bool,
) -> Result<(), String> {
    let service = Arc::new(open_service(config)?);
    let scheduler = if no_scheduler {
        None
    } else {
        Some(spawn_scheduler(Arc::clone(&service)))
    };

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    };
    let served = serve_with_shutdown(addr, service, shutdown).await;

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    served.map_err(|err| err.to_string())
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut config = load_config(&cli)?;
    match cli.command {
        Command::Serve { addr, no_scheduler } => run_server(config, addr, no_scheduler).await,
        Command::Accrue { date } => run_job(config, JobKind::DailyAccrual, at_start_of(date)),
        Command::Mature { date } => run_job(config, JobKind::MaturitySweep, at_start_of(date)),
        Command::Purge { days } => {
            if let Some(days) = days {
                config.retention_days = days;
            }
            run_job(config, JobKind::RetentionSweep, Utc::now())
        }
        Command::Status => {
            let service = LedgerService::in_memory(config);
            let status = service.scheduler_status(Utc::now());
            println!("{status}");
            print_json(&status)
        }
        Command::Quote { tier, amount } => {
            let service = LedgerService::in_memory(config);
            let quote = service
                .projected_return(amount, &tier)
                .map_err(|err| err.to_string())?;
            let verdict = match service.validate_investment_amount(&tier, amount) {
                Ok(_) => "within tier bounds".to_string(),
                Err(err) => err.to_string(),
            };
            println!("{verdict}");
            print_json(&quote)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
