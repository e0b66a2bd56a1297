//! wasend - Campaign dispatcher entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wasend_common::config::{Config, LoggingConfig};
use wasend_common::types::{Contact, Priority};
use wasend_core::{create_gateway, DispatchPipeline};
use wasend_storage::create_counter_store;

#[derive(Parser)]
#[command(name = "wasend", about = "Rate-limited WhatsApp campaign dispatcher")]
struct Cli {
    /// Configuration file (default: ./wasend.toml, then /etc/wasend/wasend.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON array of contacts
    #[arg(long)]
    contacts: PathBuf,

    /// Message template, e.g. "Olá {{first_name}}"
    #[arg(long, required_unless_present = "template_file", conflicts_with = "template_file")]
    template: Option<String>,

    /// Read the message template from a file
    #[arg(long)]
    template_file: Option<PathBuf>,

    /// Dispatch priority: low, normal or high
    #[arg(long, default_value = "normal")]
    priority: Priority,

    /// Write the dispatch log as JSON when done
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting wasend...");

    let template = match (&cli.template, &cli.template_file) {
        (Some(template), _) => template.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read template file {}", path.display()))?,
        (None, None) => anyhow::bail!("Either --template or --template-file is required"),
    };

    let raw = tokio::fs::read_to_string(&cli.contacts)
        .await
        .with_context(|| format!("Failed to read contacts file {}", cli.contacts.display()))?;
    let contacts: Vec<Contact> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse contacts file {}", cli.contacts.display()))?;

    // Initialize daily counter storage
    let store = create_counter_store(&config.storage).await?;
    info!("Daily counter storage ready ({})", config.storage.backend);

    // Initialize gateway
    let gateway = create_gateway(&config.gateway)?;
    info!("Using {} gateway", config.gateway.backend);

    let pipeline = DispatchPipeline::new(config.pipeline.clone(), gateway, store)?;

    pipeline.on_stats_change(|stats| {
        debug!(
            pending = stats.pending,
            sent = stats.sent,
            delivered = stats.delivered,
            failed = stats.failed,
            blocked = stats.blocked,
            daily_count = stats.daily_count,
            "Progress {:.0}%",
            stats.progress_percentage()
        );
    });

    let ids = pipeline.enqueue(contacts, &template, cli.priority).await?;
    info!("Queued {} messages", ids.len());

    pipeline.start().await;

    tokio::select! {
        _ = pipeline.wait_until_idle() => {
            // Let the last delivery confirmations land
            tokio::time::sleep(Duration::from_secs(config.pipeline.confirmation_delay_secs)).await;
            info!("Dispatch finished");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
            pipeline.stop().await;
        }
    }

    let stats = pipeline.get_stats().await;
    info!(
        total = stats.total,
        delivered = stats.delivered,
        sent = stats.sent,
        failed = stats.failed,
        blocked = stats.blocked,
        pending = stats.pending,
        daily_count = stats.daily_count,
        daily_limit = stats.daily_limit,
        "Dispatch summary"
    );

    if let Some(path) = &cli.export {
        let json = pipeline.export_json().await?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write dispatch log {}", path.display()))?;
        info!("Dispatch log written to {}", path.display());
    }

    info!("wasend shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},wasend=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
