//! Rondo Node - round-synchronized agent runner.

use anyhow::Context;
use clap::Parser;
use rondo_node::{init_logging, LogFormat, Node, NodeConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Rondo Node - runs an agent against a local round-ticking engine
#[derive(Parser, Debug)]
#[command(name = "rondo-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent address, overrides the config file
    #[arg(long)]
    agent_address: Option<String>,

    /// Comma-separated round ids, overrides the config file
    #[arg(long, value_delimiter = ',')]
    rounds: Option<Vec<String>>,

    /// Stop after this many completed cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load_yaml(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(address) = &self.agent_address {
            config.agent_address = address.clone();
        }
        if let Some(rounds) = &self.rounds {
            config.rounds = rounds.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Rondo node");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            tracing::info!("shutdown requested");
            cancel.cancel();
        });
    }

    let node = Node::new(config)?;
    let report = node.run(cancel, args.max_cycles).await?;

    tracing::info!(cycles = report.cycles, "Rondo node exited");
    Ok(())
}
