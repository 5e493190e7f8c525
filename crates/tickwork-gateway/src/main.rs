use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tickwork_core::TickworkConfig;
use tickwork_scheduler::SchedulerService;
use tickwork_store::SqliteStore;
use tracing::info;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tickwork", version, about = "Multi-tenant cron scheduler")]
struct Args {
    /// Path to a TOML config file (default: $TICKWORK_CONFIG or ~/.tickwork/tickwork.toml)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until Ctrl-C (the default)
    Serve,
    /// Tenant records
    Tenant {
        #[command(subcommand)]
        action: commands::TenantAction,
    },
    /// Job definitions
    Job {
        #[command(subcommand)]
        action: commands::JobAction,
    },
    /// Credit balances
    Credits {
        #[command(subcommand)]
        action: commands::CreditsAction,
    },
    /// Show a tenant's newest execution log entries
    Logs {
        tenant: String,
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Encrypt or decrypt a payload for a tenant
    Cipher {
        #[command(subcommand)]
        action: commands::CipherCommand,
    },
    /// Return queue items stuck in `processing` to `pending`
    Reclaim {
        tenant: String,
        /// Minimum time since the item was claimed
        #[arg(long, default_value = "600")]
        older_than_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tickwork_gateway=info,tickwork_scheduler=info,tickwork_store=info".into()
            }),
        )
        .init();

    let args = Args::parse();

    // explicit path > TICKWORK_CONFIG env > ~/.tickwork/tickwork.toml
    let config_path = args
        .config
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var("TICKWORK_CONFIG").ok());
    let config = TickworkConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        TickworkConfig::default()
    });

    let db_path = config.database.path.clone();
    config.database.ensure_parent_dir()?;
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let service = Arc::new(SchedulerService::builder(store).config(config).build()?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service).await,
        Command::Tenant { action } => commands::tenant(&service, action).await,
        Command::Job { action } => commands::job(&service, action).await,
        Command::Credits { action } => commands::credits(&service, action).await,
        Command::Logs { tenant, limit } => commands::logs(&service, &tenant.into(), limit).await,
        Command::Cipher { action } => commands::cipher(&service, action).await,
        Command::Reclaim {
            tenant,
            older_than_secs,
        } => commands::reclaim(&service, &tenant.into(), older_than_secs).await,
    }
}

async fn serve(service: Arc<SchedulerService>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = Arc::clone(&service);
    let task = tokio::spawn(async move { runner.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // signal the scheduler to stop and wait for in-flight runs
    let _ = shutdown_tx.send(true);
    task.await?;
    Ok(())
}
