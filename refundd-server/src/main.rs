//! Refundd
//!
//! Deposit-and-refund reconciliation daemon: watches a single script
//! address for fixed-amount deposits and refunds each depositor exactly
//! once.

mod config;
mod shutdown;
mod submitter;

use clap::Parser;
use config::FileConfig;
use refundd_core::indexer::BlockfrostIndexer;
use refundd_core::ledger::Ledger;
use refundd_core::processors::{ReconEngine, WebhookDispatcher};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::sync::Arc;
use submitter::WalletServiceSubmitter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Refundd - deposit-and-refund reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "refundd-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./refundd-config.toml")]
    config: PathBuf,

    /// Run one reconciliation cycle and exit instead of starting the loop
    #[arg(long, default_value = "false")]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting refundd-server v{}", env!("CARGO_PKG_VERSION"));

    let file_config = FileConfig::load(&args.config).map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Open the embedded ledger.
    let connect_options = SqliteConnectOptions::new()
        .filename(&file_config.database.path)
        .create_if_missing(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            tracing::error!("Failed to open ledger database: {}", e);
            e
        })?;
    let ledger = Ledger::open(db_pool.clone()).await?;
    tracing::info!(path = ?file_config.database.path, "Ledger opened");

    // Wire the engine.
    let indexer = Arc::new(BlockfrostIndexer::new(
        file_config.indexer.base_url.clone(),
        file_config.indexer.api_key.clone(),
    ));
    let submitter = Arc::new(WalletServiceSubmitter::new(
        file_config.refund.wallet_url.clone(),
    ));
    let engine = ReconEngine::new(file_config.engine_config(), indexer, ledger, submitter);

    if let Some(webhook) = &file_config.webhook {
        let dispatcher = Arc::new(WebhookDispatcher::new(webhook.url.clone()));
        let id = engine.subscribe(dispatcher).await;
        tracing::info!(listener = %id, url = %webhook.url, "Deposit webhook registered");
    }

    if args.once {
        let summary = engine.trigger_manual_check().await;
        tracing::info!(
            examined = summary.examined,
            matched = summary.matched,
            "Single reconciliation cycle complete"
        );
    } else {
        engine.start().await;
        shutdown::wait_for_stop().await;
        engine.stop().await;
    }

    tracing::info!("Closing ledger database...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
