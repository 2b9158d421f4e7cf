//! Buddy Agent - Main entry point
//!
//! Starts the local Cassandra node, waits until it has joined its cluster and
//! then serves the snapshot API until SIGINT/SIGTERM.

use anyhow::Result;
use buddy_agent::{
    api,
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    engine::ProcessSupervisor,
    nodetool::Nodetool,
    orchestrator::{OrchestratorSettings, SnapshotOrchestrator},
    transfer::TransferEngine,
    utils,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    // Initialize start time for uptime tracking
    api::health::init_start_time();

    tracing::info!(
        "Starting buddy-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    let transfer = TransferEngine::from_config(&config.store, &config.engine.data_path)?;
    let orchestrator = Arc::new(SnapshotOrchestrator::new(
        Box::new(ProcessSupervisor::new(config.engine.clone())),
        Arc::new(Nodetool::new(&config.nodetool)),
        transfer,
        OrchestratorSettings {
            remote_prefix: config.store.prefix.clone(),
            readiness: config.orchestrator.readiness(),
            clear_snapshot_after_upload: config.orchestrator.clear_snapshot_after_upload,
        },
    ));

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();

    // Bring the node up before accepting requests
    tokio::select! {
        result = orchestrator.startup() => {
            if let Err(e) = result {
                tracing::error!("Engine startup failed: {}", e);
                shutdown_coordinator.shutdown(&orchestrator).await;
                return Err(e.into());
            }
        }
        _ = shutdown_coordinator.wait_for_signal() => {
            shutdown_coordinator.shutdown(&orchestrator).await;
            return Ok(());
        }
    }

    // Determine port
    let port = args.port.unwrap_or(config.agent.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = api::create_router(api::AppState {
        orchestrator: Arc::clone(&orchestrator),
        agent_id: config.agent.id.clone(),
    });

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health endpoint: http://{}/health", addr);
    tracing::info!("Snapshot endpoints: http://{}/snapshots/{{create,restore}}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_coordinator.signalled());
    let server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await;

    // Stop the engine
    shutdown_coordinator.shutdown(&orchestrator).await;

    // Wait for server to finish (with timeout)
    match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
        Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
        Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
    }

    Ok(())
}
