//! Tether
//!
//! Plugin host: discovers packages, registers them as one batch and keeps
//! them running until Ctrl-C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tether::{
    discover_packages, HostContext, PluginDescriptor, PluginRegistry, PluginStatus, RuntimeConfig,
};

/// Tether plugin host
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether plugin host", long_about = None)]
struct Args {
    /// Config file (defaults to ./tether.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra plugin directories to scan, in addition to the user plugins root
    #[arg(short, long = "plugins")]
    plugins: Vec<PathBuf>,

    /// Print the registered plugins and exit
    #[arg(long)]
    list: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    info!("Starting tether v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => RuntimeConfig::load_from(path),
        None => RuntimeConfig::load(),
    }
    .context("failed to load configuration")?;

    let mut dirs = vec![config.user_plugins_root.clone()];
    dirs.extend(args.plugins.iter().cloned());

    let mut descriptors: Vec<PluginDescriptor> = Vec::new();
    for dir in &dirs {
        match discover_packages(dir).await {
            Ok(found) => {
                info!(dir = %dir.display(), count = found.len(), "Scanned plugin directory");
                descriptors.extend(found.iter().map(|p| p.descriptor()));
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to scan plugin directory"),
        }
    }

    let ctx = HostContext::builder(config).build();
    let registry = PluginRegistry::new(ctx);

    let reports = registry.register(descriptors, true).await;
    let failed = reports
        .iter()
        .filter(|r| r.status == PluginStatus::Error)
        .count();
    info!(total = reports.len(), failed, "Initial registration finished");

    registry.host_mounted();

    if args.list {
        for plugin in registry.list() {
            println!(
                "{:<36} {:<10} {:<12} {}",
                plugin.id,
                format!("{:?}", plugin.status).to_lowercase(),
                plugin.mode,
                plugin.error.as_deref().unwrap_or(plugin.name.as_str())
            );
        }
        registry.shutdown().await;
        return Ok(());
    }

    info!("Running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }

    info!("Shutting down");
    registry.shutdown().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info,plugin=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
