//! Email outbox API server
//!
//! Accepts outbound email batches, records them in the submission ledger and
//! exposes the recovery endpoints operators use to un-stick abandoned work.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use email_outbox_api::{build_router, AppState};
use email_outbox_config::{validate_config, AppConfig, ConfigLoader, LogFormat, ENV_PREFIX};
use email_outbox_metrics::{init_tracing, MetricsCollector};
use email_outbox_service::{FilePayloadStore, SubmissionService};
use email_outbox_store::{OutboxSettings, SqliteStore};
use tracing::info;

/// Email outbox API CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML, YAML or JSON config file; environment variables
    /// prefixed with EMAIL_OUTBOX_ override it
    #[arg(long, env = "EMAIL_OUTBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::from_file_with_env(path, ENV_PREFIX)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ConfigLoader::from_env().context("loading config from environment")?,
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(
        &config.logging.level,
        config.logging.format == LogFormat::Json,
    )?;

    info!("Starting email outbox");
    info!("  Database: {}", config.database.url);
    info!("  Payloads: {}", config.payload_storage.path.display());
    info!(
        "  Stale threshold: {} minutes",
        config.outbox.stale_threshold_minutes
    );

    let settings = OutboxSettings::new(
        config.outbox.stale_threshold_minutes,
        config.outbox.scan_page_size,
    );
    let store = SqliteStore::connect(
        &config.database.url,
        config.database.max_connections,
        settings,
    )
    .await
    .context("opening outbox database")?;

    let payloads = FilePayloadStore::new(&config.payload_storage.path);
    let service = SubmissionService::new(Arc::new(payloads), Arc::new(store));
    let metrics = Arc::new(MetricsCollector::new()?);

    let state = AppState::new(
        service,
        metrics,
        &config.payload_storage.attachments_base_path,
    );
    let app = build_router(state, config.server.request_timeout());

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Email outbox stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
