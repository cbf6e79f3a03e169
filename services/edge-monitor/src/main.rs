//! Edge Monitor
//!
//! Supervises the edge nodes declared in the cluster: keeps each edge
//! agent's loaded configuration in line with the config store and requests
//! restarts for nodes that stay offline.
//!
//! ## Architecture
//!
//! - **Watcher**: Turns node resources into entity set snapshots
//! - **Orchestrator**: Starts and stops one monitor per node
//! - **Monitors**: Config reconciliation and offline escalation per node
//! - **Event drain**: Writes every supervision event to the log

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use edge_monitor::cluster::StaticResourceFeed;
use edge_monitor::cmdesc::HttpCommandEscalation;
use edge_monitor::config::Config;
use edge_monitor::mock::MockTelemetry;
use edge_monitor::store::HttpConfigStore;
use edge_monitor::{log_event, EntitySetWatcher, MonitorDeps, MonitorOrchestrator};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting edge monitor");
    info!(
        configdb_url = %config.configdb_url,
        cmdesc_url = %config.cmdesc_url,
        nodes_file = %config.nodes_file,
        agent_config_app = %config.agent_config_app,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();

    // Collaborators (telemetry is mock for now)
    let deps = MonitorDeps {
        telemetry: Arc::new(MockTelemetry::new()),
        store: Arc::new(HttpConfigStore::new(
            &config.configdb_url,
            config.store_poll_interval(),
        )?),
        cmdesc: Arc::new(HttpCommandEscalation::new(&config.cmdesc_url)?),
        settings: config.monitor_settings(),
    };
    let feed = Arc::new(StaticResourceFeed::new(&config.nodes_file));

    // Start the entity set watcher
    let watcher = EntitySetWatcher::new();
    let entities = watcher.subscribe();
    let (failed_tx, failed_rx) = oneshot::channel();
    let watcher_handle = watcher.spawn(feed, shutdown.child_token(), move |err| {
        let _ = failed_tx.send(err);
    });

    // Start the orchestrator
    let (mut orchestrator, mut events) = MonitorOrchestrator::new(deps, shutdown.child_token());
    let orchestrator_handle = tokio::spawn(async move {
        orchestrator.run(entities).await;
    });

    // Drain supervision events into the log
    let drain_handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = failed_rx => {
            match result {
                Ok(err) => error!(error = %err, "Entity set watcher failed"),
                Err(_) => warn!("Entity set watcher exited"),
            }
        }
    }

    // Signal shutdown to all workers
    shutdown.cancel();

    if let Err(e) = watcher_handle.await {
        error!(error = %e, "Watcher task panicked");
    }
    if let Err(e) = orchestrator_handle.await {
        error!(error = %e, "Orchestrator task panicked");
    }

    info!("Waiting for monitors to shut down...");
    if tokio::time::timeout(Duration::from_secs(2), drain_handle)
        .await
        .is_err()
    {
        warn!("Event drain did not finish in time");
    }

    info!("Edge monitor shutdown complete");
    Ok(())
}
