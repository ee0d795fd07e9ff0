//! Fleetwatch - agent fleet supervision control plane
//!
//! Runs the control plane with its standalone collaborators: an in-memory
//! host inventory, cluster membership from the config file, and config
//! pushes written to the log.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fleetwatch_core::{
    health::print_health_summary, standalone::StaticClusterNodes, ControlPlane, FleetConfig,
};
use std::path::PathBuf;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetwatch")]
#[command(about = "Supervise a fleet of engine agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (overrides FLEETWATCH_CONFIG and ./fleetwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane until interrupted
    Serve {
        /// Don't push configs to static clusters on startup
        #[arg(long)]
        no_initial_sync: bool,
    },

    /// Start the control plane, run health checks, and exit
    Health {
        /// Show check details
        #[arg(short, long)]
        verbose: bool,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!("fleetwatch={},fleetwatch_core={}", level, level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Fleetwatch v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.unwrap_or_else(FleetConfig::default_path);

    match cli.command {
        Commands::Serve { no_initial_sync } => serve(&config_path, !no_initial_sync).await,
        Commands::Health { verbose } => health(&config_path, verbose).await,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                FleetConfig::default()
                    .save(&config_path)
                    .with_context(|| format!("writing {}", config_path.display()))?;
                println!("Wrote default config to {}", config_path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let config = FleetConfig::load(&config_path)?;
                let rendered =
                    toml::to_string_pretty(&config).context("rendering configuration")?;
                println!("# {}", config_path.display());
                println!("{}", rendered);
                Ok(())
            }
        },
    }
}

async fn serve(config_path: &std::path::Path, initial_sync: bool) -> anyhow::Result<()> {
    let config = FleetConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let cluster_ids = StaticClusterNodes::new(&config.clusters).cluster_ids();

    let plane = ControlPlane::standalone(config)
        .await
        .context("initializing control plane")?;
    plane.start().await;

    if initial_sync {
        for cluster_id in &cluster_ids {
            match plane.supervision().sync_cluster(cluster_id).await {
                Ok(report) if report.is_complete() => info!(
                    "Cluster {}: config v{} pushed to {} agent(s)",
                    cluster_id,
                    report.config_version,
                    report.delivered.len()
                ),
                Ok(report) => warn!(
                    "Cluster {}: {} of {} push(es) failed",
                    cluster_id,
                    report.failed.len(),
                    report.attempted()
                ),
                Err(e) => warn!("Cluster {}: initial sync failed: {}", cluster_id, e),
            }
        }
    }

    info!("Fleetwatch running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutting down...");
    plane.shutdown().await;
    Ok(())
}

async fn health(config_path: &std::path::Path, verbose: bool) -> anyhow::Result<()> {
    let config = FleetConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let plane = ControlPlane::standalone(config).await?;
    plane.start().await;

    let summary = plane.health().await;
    print_health_summary(&summary, verbose);

    plane.shutdown().await;
    Ok(())
}
