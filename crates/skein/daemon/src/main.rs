//! Skein daemon
//!
//! Serves the query and bulk import workflows over REST, drives their
//! instances on a partitioned worker pool and sweeps expired instances
//! and page cursors.

use clap::Parser;
use skein_daemon::error::{DaemonError, DaemonResult};
use skein_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Skein Daemon CLI
#[derive(Parser)]
#[command(name = "skeind")]
#[command(about = "Skein daemon - durable query and bulk import workflows", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SKEIN_CONFIG")]
    config: Option<String>,

    /// Listen address, overriding the configuration
    #[arg(short, long, env = "SKEIN_LISTEN_ADDR")]
    listen: Option<String>,

    /// Node id, overriding the configuration
    #[arg(long, env = "SKEIN_NODE_ID")]
    node_id: Option<String>,

    /// Log level
    #[arg(long, env = "SKEIN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "SKEIN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }
    config.logging.level = cli.log_level;
    config.logging.json = cli.json;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.node.id,
        cluster = ?config.cluster(),
        workers = config.runtime.workers,
        "Starting skeind"
    );

    let server = Server::new(config)?;
    server.run().await
}
