//! WolfQuorum - Vote-Weighted Cluster Quorum Daemon
//!
//! Runs the quorum engine for one node and serves local clients over IPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfquorum::config::{LoggingConfig, WolfQuorumConfig};
use wolfquorum::network::IpcServer;
use wolfquorum::quorum::{majority, QuorumPolicy};
use wolfquorum::service::{QuorumService, ServiceHandle};

/// WolfQuorum - Vote-Weighted Cluster Quorum
#[derive(Parser)]
#[command(name = "wolfquorum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfquorum.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the quorum daemon
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfquorum.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value_t = 1)]
        node_id: u32,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output, node_id } => {
            init_logging(&LoggingConfig::default(), cli.log_level.as_deref());
            run_init(output, node_id)
        }
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the quorum daemon
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> anyhow::Result<()> {
    let config = match WolfQuorumConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            init_logging(&LoggingConfig::default(), log_level.as_deref());
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file exists and is valid TOML");
            return Err(e.into());
        }
    };
    init_logging(&config.logging, log_level.as_deref());
    tracing::info!("Starting WolfQuorum node {}", config.node.id);

    let service = QuorumService::new(&config);
    let mut status = service.status();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ipc_server = if config.ipc.enabled {
        let server = Arc::new(IpcServer::new(
            config.ipc.bind_address.clone(),
            service.ipc_sender(),
        ));
        let serving = server.clone();
        tokio::spawn(async move {
            if let Err(e) = serving.start().await {
                tracing::error!("IPC server error: {}", e);
            }
        });
        Some(server)
    } else {
        None
    };

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(config_path.clone(), service.handle()));

    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow().clone();
            if current.quorate {
                tracing::info!(
                    "Node is quorate with members {:?} (ring {})",
                    current.members,
                    current.ring_id
                );
            } else {
                tracing::warn!("Node is NOT quorate (ring {})", current.ring_id);
            }
        }
    });

    let engine_task = tokio::spawn(service.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    if let Some(server) = ipc_server {
        server.stop();
    }
    engine_task.await??;

    tracing::info!("WolfQuorum stopped");
    Ok(())
}

/// Reread the reloadable quorum keys on SIGHUP
#[cfg(unix)]
async fn reload_on_hangup(config_path: PathBuf, handle: ServiceHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Configuration reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match WolfQuorumConfig::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Reloading configuration from {:?}", config_path);
                if handle.reload(config.quorum).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring invalid configuration: {}", e),
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: u32) -> anyhow::Result<()> {
    std::fs::write(&output, WolfQuorumConfig::template(node_id))
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nSet expected_votes to the total votes of your cluster.");
    println!("Then start with: wolfquorum start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match WolfQuorumConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Votes: {}", config.quorum.votes);
            println!("  Expected Votes: {}", config.quorum.expected_votes);
            println!(
                "  Initial Quorum: {}",
                majority(config.quorum.expected_votes)
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> anyhow::Result<()> {
    let config = WolfQuorumConfig::from_file(&config_path)?;
    let policy = QuorumPolicy::from_settings(&config.quorum);

    println!("WolfQuorum Node Information");
    println!("===========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!(
        "IPC:              {}",
        if config.ipc.enabled {
            config.ipc.bind_address.as_str()
        } else {
            "(disabled)"
        }
    );
    println!();
    println!("Votes:");
    println!("  Votes:          {}", config.quorum.votes);
    println!("  Expected:       {}", config.quorum.expected_votes);
    println!("  Quorum:         {}", majority(config.quorum.expected_votes));
    println!();
    println!("Policy:");
    println!("  Two Node:       {}", policy.two_node);
    println!("  Wait For All:   {}", policy.wait_for_all);
    println!("  Tie Breaker:    {}", policy.auto_tie_breaker);
    println!(
        "  Last Man:       {} ({} ms window)",
        policy.last_man_standing, config.quorum.last_man_standing_window_ms
    );
    println!("  Device Poll:    {} ms", config.quorum.quorumdev_poll_ms);
    println!("  Leave Timeout:  {} ms", config.quorum.leaving_timeout_ms);

    Ok(())
}
