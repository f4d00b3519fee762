//! Hoplink routing node: entry point.
//!
//! Starts the routing node with configuration from a TOML file, environment
//! variables and command-line overrides, in that order of precedence.

mod api;
mod config;
mod node;
mod rest;
mod state;
mod storage;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::RouterConfig;
use node::RouterNode;

/// Hoplink Routing Node
#[derive(Parser, Debug)]
#[command(name = "hoplink-node", version, about = "Hoplink Routing Node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "hoplink.toml")]
    config: PathBuf,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the channel node's base URL.
    #[arg(long)]
    node_url: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Override the log format (text, json).
    #[arg(long)]
    log_format: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = RouterConfig::default();
        init_tracing(&config.logging.level, &config.logging.format);
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration: file, then environment, then CLI
    let mut config = RouterConfig::load(&args.config)?;
    config.apply_env()?;
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(node_url) = args.node_url {
        config.engine.node_url = node_url;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging.level, &config.logging.format);
    config.validate()?;

    tracing::info!("Hoplink Routing Node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the node
    let mut node = RouterNode::new(config)?;
    node.start().await?;

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node run loop error");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Hoplink node exited cleanly");
    Ok(())
}
