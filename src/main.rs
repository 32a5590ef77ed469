//! MCP workload gateway daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   proxy-cli ──▶ admin API ──▶ WorkloadManager ──▶ TransportFactory
//!                                    │                    │
//!                               GroupManager      ┌───────┴────────┐
//!                                                 ▼                ▼
//!   MCP client ─────────────────────────▶ StdioTransport     HttpTransport ──▶ HTTP MCP server
//!                                                 │                │
//!                                                 ▼                ▼
//!                                      Deployer (child process per workload)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use mcp_gateway::admin::{self, AdminState};
use mcp_gateway::config::load_config;
use mcp_gateway::deployer::ProcessDeployer;
use mcp_gateway::lifecycle::{signals, Launcher, Shutdown};
use mcp_gateway::middleware::registry::MiddlewareRegistry;
use mcp_gateway::net::listener::ServerHandle;
use mcp_gateway::observability::{logging, metrics};
use mcp_gateway::{GatewayConfig, GroupManager, WorkloadManager};

#[derive(Parser)]
#[command(name = "mcp-gateway", version, about = "Runs MCP servers behind managed proxies")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "MCP_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    logging::init(&config.observability.log_level);

    tracing::info!("mcp-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config = ?args.config,
        groups = config.groups.len(),
        workloads = config.workloads.len(),
        admin = config.admin.enabled,
        "Configuration loaded"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        Some(metrics::install(Some(addr))?)
    } else {
        None
    };

    let registry = MiddlewareRegistry::from_config(&config).await?;
    let mut launcher = Launcher::new(
        Arc::new(ProcessDeployer::new()),
        registry,
        config.timeouts.to_transport_timeouts(),
    );
    if let Some(handle) = metrics_handle {
        launcher = launcher.with_metrics(handle);
    }

    let shutdown = Shutdown::new();
    let groups = GroupManager::new();
    let workloads = WorkloadManager::new(groups.clone());

    launcher
        .launch_all(&config, &groups, &workloads, &shutdown.token())
        .await?;

    let admin_server = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(
            workloads.clone(),
            launcher.clone(),
            &config.admin.api_key,
            shutdown.token(),
        );
        let server = ServerHandle::spawn(listener, admin::router(state))?;
        tracing::info!(address = %server.local_addr(), "Admin API listening");
        Some(server)
    } else {
        None
    };

    signals::spawn_signal_handler(shutdown.clone());
    shutdown.triggered().await;

    let drain = config.timeouts.to_transport_timeouts().drain;
    if let Some(server) = admin_server {
        server.shutdown(drain).await;
    }

    // The root token is already cancelled; teardown needs its own.
    let teardown = tokio_util::sync::CancellationToken::new();
    if let Err(e) = workloads.stop_all(&teardown).await {
        tracing::error!(error = %e, "Some workloads failed to stop");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
