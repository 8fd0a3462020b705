//! tempkey - temporary short keys for links and text
//!
//! This is the main entry point. It loads the configuration, restores any
//! backups, starts one expiry loop per bucket and runs until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tempkey::backup::{self, BackupRoutine};
use tempkey::config::{Config, DEFAULT_CONFIG_PATH};
use tempkey::context::AppContext;
use tempkey::keyspace::KeyTier;
use tempkey::logging;
use tokio::signal;
use tracing::{error, info};

/// Temporary short keys for links and text.
#[derive(Parser, Debug)]
#[command(name = "tempkey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Path to the YAML configuration file (same as the positional argument)
    #[arg(long = "config", value_name = "PATH", conflicts_with = "config")]
    config_flag: Option<PathBuf>,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config_flag
            .clone()
            .or_else(|| self.config.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
tempkey v{} - temporary short keys for links and text
──────────────────────────────────────────────────────
Serving {} domain(s): {}

Use Ctrl+C to shutdown gracefully.
"#,
        tempkey::VERSION,
        config.domain_names.len(),
        config.domain_names.join(", ")
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    logging::init(&config.logging);
    print_banner(&config);

    let ctx = Arc::new(AppContext::from_config(&config));

    if let Some(dir) = &config.backup_dir {
        let restored = backup::restore_all(dir, &ctx).await;
        info!(entries = restored, dir = %dir.display(), "backups restored");
    }

    let expiry = ctx.start_expiry();
    info!(loops = expiry.len(), "expiry loops started");

    let backups = config.backup_dir.as_ref().map(|dir| {
        BackupRoutine::start(Arc::clone(&ctx), dir.clone(), config.backup_interval)
    });

    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutdown signal received, stopping...");

    drop(backups);
    drop(expiry);

    if let Some(dir) = &config.backup_dir {
        let written = backup::save_all(dir, &ctx).await;
        info!(buckets = written, "final backup written");
    }

    for partition in ctx.partitions() {
        for tier in KeyTier::ALL {
            let stats = partition.bucket(tier).stats();
            info!(
                domain = %partition.domain(),
                tier = %tier,
                active = stats.active,
                free = stats.free,
                adds = stats.adds,
                rejected = stats.rejected,
                evictions = stats.evictions,
                "bucket statistics"
            );
        }
    }

    info!("Shutdown complete");
    Ok(())
}
