//! taghubd - SensorTag hub daemon.
//!
//! Discovers nearby SensorTags, keeps a session per tag, and exports
//! decoded measurements over InfluxDB line protocol.
//!
//! Run with: `taghubd --config taghub.toml`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use taghub_core::btle::BtleTransport;
use taghub_core::TagHub;
use taghub_daemon::{Config, LineProtocolSink};

/// SensorTag hub: discovers tags and exports their measurements.
#[derive(Parser, Debug)]
#[command(name = "taghubd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bluetooth adapter (index or name, overrides config).
    #[arg(short, long)]
    adapter: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_validated(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default()?,
    };
    if let Some(adapter) = args.adapter {
        config.adapter.name = Some(adapter);
    }

    let sink = LineProtocolSink::connect(&config.sink.endpoint, config.sink.measurement.clone())
        .await
        .with_context(|| format!("connecting measurement sink at {}", config.sink.endpoint))?;

    // No adapter means nothing can ever work; fail startup rather than spin.
    let transport = BtleTransport::new(config.adapter.name.as_deref())
        .await
        .context("opening Bluetooth adapter")?;

    let hub = TagHub::new(Arc::new(transport), Arc::new(sink), config.hub_config());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    hub.run(cancel).await.context("hub terminated")?;
    Ok(())
}
