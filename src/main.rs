// =============================================================================
// Aurum Engine — Main Entry Point
// =============================================================================
//
// Wires the concrete Broker/Store pair, builds the dependency graph
// (`AppState::new`), spawns every background worker behind one
// `tokio::sync::watch` shutdown channel (spec.md §5: "single shutdown
// event"), and serves the webhook/health HTTP surface until Ctrl+C.
// =============================================================================

mod api;
mod app_state;
mod broker;
mod collector;
mod context;
mod decision;
mod dispatcher;
mod errors;
mod execution;
mod health;
mod indicators;
mod market_data;
mod persistence;
mod pipeline;
mod position_engine;
mod revaluator;
mod risk;
mod runtime_config;
mod scheduler;
mod scoring;
mod signal;
mod structurer;
mod validator;
mod wait_buffer;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::{Broker, MockBroker};
use crate::persistence::{InMemoryStore, Store};
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("aurum engine starting up");

    let config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    info!(symbol = %config.symbol, webhook_port = config.webhook_port, "runtime config loaded");

    // Broker/Store are external interfaces (spec.md §6) — out of scope to
    // implement concretely. `MockBroker`/`InMemoryStore` stand in as the
    // process's concrete bindings until a real MT/SQLite adapter lands.
    let broker: Arc<dyn Broker> = Arc::new(MockBroker::default());
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let state = AppState::new(config.clone(), broker, store);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(state.revaluator.clone().run(shutdown_rx.clone()));
    tokio::spawn(state.health_monitor.clone().run(shutdown_rx.clone()));
    tokio::spawn(state.scheduler.clone().run(shutdown_rx.clone()));

    // PositionManager has no `run()` of its own (spec.md §4.7 describes a
    // per-position tick, not a self-driving loop); this is the thin
    // scheduling wrapper the way the teacher's `main.rs` drives
    // `exit::monitor::run_exit_monitor` on a fixed interval.
    {
        let position_manager = state.position_manager.clone();
        let broker = state.broker.clone();
        let symbol = state.config.symbol.clone();
        let min_lot_interval = std::time::Duration::from_secs(state.config.pm_check_interval_sec);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let min_lot = broker.symbol_info(&symbol).await.map(|info| info.min_lot).unwrap_or(0.01);
            let mut interval = tokio::time::interval(min_lot_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        position_manager.tick(broker.as_ref(), &symbol, min_lot).await;
                    }
                    _ = shutdown.changed() => {
                        info!("position manager loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    let bind_addr = format!("0.0.0.0:{}", state.config.webhook_port);
    let http_state = state.clone();
    let mut http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let app = api::router(http_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind HTTP server");
                return;
            }
        };
        info!(addr = %bind_addr, "webhook/health server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
            .ok();
    });

    info!("all subsystems running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }
    if let Err(e) = state.score_config.persist("score_config.json") {
        error!(error = %e, "failed to save score config on shutdown");
    }

    info!("aurum engine shut down complete");
    Ok(())
}
