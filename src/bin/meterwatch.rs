//! meterwatch CLI: operator interface to the maintenance scheduler.

use clap::{Parser, Subcommand};
use meterwatch::api;
use meterwatch::config::Config;
use meterwatch::fleet::Fleet;
use meterwatch::model::AssetId;
use meterwatch::notify::{LogNotifier, Notifier, WebhookNotifier};
use meterwatch::schedule::{ReadingRequest, Scheduler};
use meterwatch::store::{AssetRegistry, Backend, WorkOrderStore};
use meterwatch::telemetry::{TelemetryConfig, init_telemetry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "meterwatch", about = "Usage-threshold preventive maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address (overrides BIND_ADDR)
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Skip the reconciliation sweep at startup
        #[arg(long)]
        no_sweep: bool,
    },
    /// Register assets and plans from a TOML fleet file
    Seed {
        file: PathBuf,
    },
    /// Record a meter reading
    Reading {
        asset_id: String,
        value: f64,
        /// Who took the reading
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reconcile every asset once
    Reconcile,
    /// List work orders for an asset
    Orders {
        asset_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { bind, no_sweep } => cmd_serve(config, bind, no_sweep).await,
        Command::Seed { file } => cmd_seed(&open_scheduler(&config).await?, file).await,
        Command::Reading {
            asset_id,
            value,
            by,
            notes,
        } => cmd_reading(&open_scheduler(&config).await?, asset_id, value, by, notes).await,
        Command::Reconcile => cmd_reconcile(&open_scheduler(&config).await?).await,
        Command::Orders { asset_id } => cmd_orders(&open_scheduler(&config).await?, asset_id).await,
    }
}

async fn open_scheduler(config: &Config) -> anyhow::Result<Scheduler> {
    if config.database_url.is_none() {
        eprintln!("warning: DATABASE_URL not set, changes will not outlive this process");
    }
    let backend = Backend::open(config).await?;
    Ok(Scheduler::from_backend(&backend, config.scheduler.clone()))
}

async fn cmd_serve(config: Config, bind: Option<SocketAddr>, no_sweep: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let backend = Backend::open(&config).await?;
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };
    let scheduler =
        Scheduler::from_backend(&backend, config.scheduler.clone()).with_notifier(notifier);

    if config.scheduler.startup_sweep && !no_sweep {
        let report = scheduler.reconcile_all().await?;
        tracing::info!(
            orders = report.orders_created,
            alerts = report.alerts_created,
            "startup sweep complete"
        );
    }

    let app = api::router(scheduler, backend.idempotency.clone(), config.idempotency.clone());
    let addr = bind.unwrap_or(config.bind_addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "meterwatch listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn cmd_seed(scheduler: &Scheduler, file: PathBuf) -> anyhow::Result<()> {
    let fleet = Fleet::load(&file)?;
    let report = fleet.apply(scheduler).await?;
    for asset in &report.assets {
        println!("{}  {}", asset.id, asset.name);
    }
    println!("\n{} asset(s), {} plan(s)", report.assets.len(), report.plans);
    Ok(())
}

async fn cmd_reading(
    scheduler: &Scheduler,
    asset_id: String,
    value: f64,
    by: Option<String>,
    notes: Option<String>,
) -> anyhow::Result<()> {
    let asset_id: AssetId = asset_id.parse()?;
    let ingestion = scheduler
        .record_reading(ReadingRequest {
            asset_id,
            new_value: value,
            recorded_by: by,
            notes,
        })
        .await?;

    println!(
        "Recorded: {} -> {} (+{})",
        ingestion.reading.previous_value, ingestion.reading.new_value, ingestion.reading.delta
    );
    for alert in &ingestion.alerts {
        println!("Alert:    {}", alert.message);
    }
    for order in &ingestion.orders {
        println!("Order:    #{} {}", order.number, order.title);
    }
    if let Some(err) = &ingestion.reconcile_error {
        println!("Reconciliation deferred: {err}");
    }
    Ok(())
}

async fn cmd_reconcile(scheduler: &Scheduler) -> anyhow::Result<()> {
    let report = scheduler.reconcile_all().await?;
    println!(
        "{} asset(s): {} order(s), {} alert(s)",
        report.assets, report.orders_created, report.alerts_created
    );
    for (asset, err) in &report.failed {
        println!("failed {asset}: {err}");
    }
    Ok(())
}

async fn cmd_orders(scheduler: &Scheduler, asset_id: String) -> anyhow::Result<()> {
    let asset_id: AssetId = asset_id.parse()?;
    let store = scheduler.store();
    store.get_asset(asset_id).await?;
    let orders = store.list_work_orders(asset_id).await?;

    if orders.is_empty() {
        println!("No work orders found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<9}  {:<10}  {:<40}  CREATED",
        "NUMBER", "MILESTONE", "PRIORITY", "STATUS", "TITLE"
    );
    println!("{}", "-".repeat(100));
    for order in &orders {
        let title = if order.title.chars().count() > 40 {
            order.title.chars().take(40).collect::<String>()
        } else {
            order.title.clone()
        };
        println!(
            "{:<8}  {:<10}  {:<9}  {:<10}  {:<40}  {}",
            order.number,
            order.milestone_threshold,
            order.priority.to_string(),
            order.status.to_string(),
            title,
            order.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} order(s)", orders.len());
    Ok(())
}
