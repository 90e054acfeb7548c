use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kateway::config::Config;
use kateway::coordination::MemoryCoordinator;
use kateway::lag::{LagComputer, MemoryOffsets};
use kateway::server::{admin, GatewayOptions, GatewayServer};
use kateway::topology::{Clusters, MemoryTopicAdmin};
use kateway::KatewayEngine;

// ========================================
// MAIN ENTRY POINT
// ========================================

#[tokio::main]
async fn main() {
    let config = Config::global();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Standalone mode: coordination, offsets and topic admin run in-process.
    let store = Arc::new(MemoryCoordinator::new());
    let offsets = MemoryOffsets::new();
    let clusters = Clusters::new(store.clone(), &config.clusters.clusters);

    let gateway = match GatewayServer::new(GatewayOptions::from_config(&config.server)) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, "cannot start gateway");
            std::process::exit(1);
        }
    };

    let engine = KatewayEngine::new(
        gateway.clone(),
        clusters,
        LagComputer::new(Arc::new(offsets)),
        Arc::new(MemoryTopicAdmin::new(store)),
        config.admin.clone(),
    );

    info!(id = gateway.id(), name = gateway.name(), "kateway starting");
    gateway.start(admin::router(engine));

    wait_for_signal().await;
    gateway.shutdown().await;
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                }
            }
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}
