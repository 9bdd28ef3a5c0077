//! etcd-monitor - etcd cluster monitoring daemon
//!
//! Runs periodic health checks and metrics collection against an etcd
//! cluster and raises alerts through the configured channels.

use anyhow::Result;
use monitor_lib::MonitorService;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting etcd-monitor");

    // Optional config file path as the only argument
    let path = std::env::args().nth(1);
    let settings = config::Settings::load(path.as_deref())?;
    let monitor_config = settings.into_monitor_config();
    info!(
        endpoints = ?monitor_config.cluster.endpoints,
        channels = monitor_config.channels.len(),
        "Monitor configured"
    );

    let service = MonitorService::new(monitor_config);
    service.start().await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    service.stop().await;

    Ok(())
}
