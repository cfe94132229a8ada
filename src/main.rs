use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meshplane::cluster::{
    spawn_node_manager, spawn_policy_daemon, EventBus, MemoryRegistry, NodeManager, PolicyDaemon,
    Registry,
};
use meshplane::config::{load_config_file, MeshConfig};

/// Control plane daemon: node lifecycle management and weight policy
#[derive(Parser, Debug)]
#[command(name = "meshplane", version, about)]
struct Args {
    /// Mesh config file (YAML or JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Load environment variables from this file before starting
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Load and validate configuration
    let config = match args.config {
        Some(ref path) => match load_config_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => MeshConfig::default(),
    };

    // Wire the shared store and the bus, then hand explicit handles to the
    // daemons. Nothing here is global state.
    let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
    let bus = Arc::new(EventBus::new(config.bus.capacity));

    let manager = Arc::new(NodeManager::with_config(
        registry.clone(),
        bus.clone(),
        config.registry.manager_config(),
    ));
    let policy = Arc::new(PolicyDaemon::with_config(
        registry.clone(),
        bus.clone(),
        config.policy.build_policy(),
        config.policy.policy_config(&config.registry),
    ));

    let manager_shutdown = spawn_node_manager(manager);
    let policy_shutdown = spawn_policy_daemon(policy);

    info!(
        "Control plane running (policy metric: {}, gateway pair: {:?}/{:?})",
        config.policy.metric, config.gateway.router, config.gateway.balancer
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    let _ = manager_shutdown.send(());
    let _ = policy_shutdown.send(());
}
