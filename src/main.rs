//! rcon-gateway daemon entry point.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::signal;
use tokio::time::interval;

use rcon_gateway::config::{Config, ServerConfig};
use rcon_gateway::{
    Gateway, JsonFileZoneStore, ReconciliationEngine, Registry, WebSocketConnector,
};

async fn reconcile_all(engine: &ReconciliationEngine, servers: &[ServerConfig]) {
    for server in servers {
        match engine.run(&server.id, &server.identity()).await {
            Ok(report) if !report.is_complete() => warn!(
                "[{}] reconciliation finished with {} failed repair(s)",
                server.id,
                report.failures.len()
            ),
            Ok(_) => {}
            Err(e) => error!("[{}] reconciliation aborted: {}", server.id, e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting rcon-gateway for {} server(s), store at {}",
        cfg.servers.len(),
        cfg.store_path.display()
    );

    // Gateway
    let registry = Arc::new(Registry::new(
        Arc::new(WebSocketConnector::new()),
        cfg.protocol,
        cfg.connect_timeout(),
    ));
    let gateway = Arc::new(Gateway::new(registry.clone(), cfg.command_timeout()));

    // Idle session sweeper
    let sweeper_handle = registry
        .clone()
        .spawn_sweeper(cfg.sweep_interval(), cfg.idle_timeout());

    // Zone reconciliation
    let store = Arc::new(JsonFileZoneStore::open(&cfg.store_path).await?);
    let engine = ReconciliationEngine::new(gateway, store, cfg.reconcile_settings());
    let servers = cfg.servers.clone();
    let on_start = cfg.reconcile.on_start;
    let every = cfg.reconcile.interval_secs.map(Duration::from_secs);
    let reconcile_handle = tokio::spawn(async move {
        if on_start {
            reconcile_all(&engine, &servers).await;
        }
        if let Some(every) = every {
            let mut ticker = interval(every);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                reconcile_all(&engine, &servers).await;
            }
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // Abort tasks
    sweeper_handle.abort();
    reconcile_handle.abort();
    registry.close_all();

    info!("Shutdown complete.");
    Ok(())
}
