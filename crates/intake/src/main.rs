//! # Intake - Nodegate primary-node service
//!
//! Hands out per-node pod address blocks, labels and removes Node objects,
//! and applies assigned blocks to the node's cluster objects.
//!
//! ## Architecture
//! ```text
//! intake-client (ssh forced command) → Intake API → Allocator → ledgers
//!                                           ↓
//!                                        kubectl
//! ```

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Parser, Subcommand};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use nodegate_common::constants::env;
use nodegate_common::{AddressBlock, NodeFacts, Role};

mod allocator;
mod cluster;
mod config;
mod reconciler;
mod routes;
mod state;

use allocator::Allocator;
use config::AppConfig;
use reconciler::Reconciler;
use state::AppState;

/// Nodegate Intake - address allocation and node intake
#[derive(Parser, Debug)]
#[command(name = "intake")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/intake.toml", global = true)]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR", global = true)]
    listen: Option<String>,

    /// Ledger directory (overrides config)
    #[arg(long, env = "NODEGATE_LEDGER_DIR", global = true)]
    ledger_dir: Option<PathBuf>,

    /// Kubeconfig for kubectl (overrides config)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Join token (overrides config and the join info file)
    #[arg(long, env = env::JOIN_TOKEN, global = true, hide_env_values = true)]
    join_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Intake API
    Serve,

    /// Apply an address block to a node's Node and CiliumNode objects
    #[command(group(ArgGroup::new("target").required(true).args(["assignment", "node", "bootstrap"])))]
    Reconcile {
        /// Assignment file as returned by /register
        #[arg(long)]
        assignment: Option<PathBuf>,

        /// Node name
        #[arg(long, requires = "cidr")]
        node: Option<String>,

        /// Block to apply
        #[arg(long, requires = "node")]
        cidr: Option<Ipv4Net>,

        /// Look up this node (from the node facts file) in its role's ledger
        #[arg(long)]
        bootstrap: bool,
    },

    /// Assign a block locally, without the API
    #[command(group(ArgGroup::new("target").required(true).args(["name", "bootstrap"])))]
    Allocate {
        #[arg(long, requires_all = ["ip", "role"])]
        name: Option<String>,

        #[arg(long)]
        ip: Option<Ipv4Addr>,

        #[arg(long)]
        role: Option<Role>,

        /// Use this node's facts file
        #[arg(long)]
        bootstrap: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;

    match args.command {
        Command::Serve => serve(config).await,
        Command::Reconcile {
            assignment,
            node,
            cidr,
            bootstrap,
        } => {
            let (node, cidr) = match (assignment, node, cidr) {
                (Some(path), _, _) => {
                    let block = read_assignment(&path)?;
                    (block.name, block.cidr)
                }
                (None, Some(node), Some(cidr)) => (node, cidr),
                _ if bootstrap => bootstrap_block(&config).await?,
                _ => bail!("one of --assignment, --node/--cidr, or --bootstrap is required"),
            };
            reconcile(&config, &node, cidr).await
        }
        Command::Allocate {
            name,
            ip,
            role,
            bootstrap,
        } => {
            let (name, ip, role) = match (name, ip, role) {
                (Some(name), Some(ip), Some(role)) => (name, ip, role),
                _ if bootstrap => {
                    let facts = NodeFacts::load(&config.node_facts_path)
                        .context("Failed to load node facts")?;
                    (facts.hostname, facts.ip, facts.role)
                }
                _ => bail!("--name, --ip, and --role are required without --bootstrap"),
            };
            allocate(&config, &name, ip, role).await
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("🔥 Starting Nodegate Intake v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.ledger_dir)
        .await
        .with_context(|| format!("Failed to create ledger directory {}", config.ledger_dir.display()))?;

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let state = AppState::new(config.clone())?;
    info!(ledger_dir = ?config.ledger_dir, "📋 Ledgers at {}", config.ledger_dir.display());

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Intake listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("👋 Intake shutdown complete");
    Ok(())
}

async fn reconcile(config: &AppConfig, node: &str, cidr: Ipv4Net) -> Result<()> {
    let cluster = Arc::new(state::kubectl_from(config));
    let reconciler = Reconciler::new(cluster, config.reconcile.to_config());

    let outcome = reconciler
        .reconcile(node, cidr)
        .await
        .with_context(|| format!("Failed to reconcile {} with {}", node, cidr))?;

    if !outcome.schema_established {
        tracing::warn!(node = node, "Reconciled without an Established CRD");
    }
    info!(attempts = outcome.agent_patch_attempts, "✅ {} reconciled with {}", node, cidr);
    Ok(())
}

async fn allocate(config: &AppConfig, name: &str, ip: Ipv4Addr, role: Role) -> Result<()> {
    nodegate_common::validate_hostname(name)?;

    let (control_plane, worker) = config.pool_specs()?;
    let allocator = Allocator::new(config.ledger_dir.clone(), control_plane, worker);
    let assignment = allocator
        .assign(role, name, ip)
        .await
        .with_context(|| format!("Failed to allocate a {} block for {}", role, name))?;

    println!("{}", serde_json::to_string_pretty(&assignment.block)?);
    Ok(())
}

fn read_assignment(path: &Path) -> Result<AddressBlock> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read assignment {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Malformed assignment {}", path.display()))
}

/// This node's block from its role's ledger
async fn bootstrap_block(config: &AppConfig) -> Result<(String, Ipv4Net)> {
    let facts = NodeFacts::load(&config.node_facts_path).context("Failed to load node facts")?;

    let (control_plane, worker) = config.pool_specs()?;
    let allocator = Allocator::new(config.ledger_dir.clone(), control_plane, worker);
    let ledger = allocator.snapshot(facts.role).await;

    match ledger.get(&facts.hostname) {
        Some(block) => Ok((facts.hostname, block.cidr)),
        None => bail!(
            "{} has no block in {}; run `intake allocate --bootstrap` first",
            facts.hostname,
            allocator.ledger_path(facts.role).display()
        ),
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
