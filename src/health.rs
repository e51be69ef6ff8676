// =============================================================================
// HealthMonitor (C12)
// =============================================================================
//
// Background connection watchdog, grounded on
// `original_source/health_monitor.py`: polls `Broker::is_connected` on a
// fixed interval, logs the edge (first disconnect, recovery) rather than
// every tick, and drives a bounded reconnect attempt loop with a fixed
// delay between tries.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::persistence::{Store, SystemEventRow};

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub check_interval: StdDuration,
    pub reconnect_retries: u32,
    pub reconnect_interval: StdDuration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: StdDuration::from_secs(60),
            reconnect_retries: 3,
            reconnect_interval: StdDuration::from_secs(10),
        }
    }
}

pub struct HealthMonitor {
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    config: HealthMonitorConfig,
    /// Tracks whether the last observed state was "disconnected", so the
    /// edge (not every poll) gets logged — `health_monitor.py`'s
    /// `_was_disconnected` instance flag.
    was_disconnected: AtomicBool,
}

impl HealthMonitor {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn Store>, config: HealthMonitorConfig) -> Arc<Self> {
        Arc::new(Self { broker, store, config, was_disconnected: AtomicBool::new(false) })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("health monitor started");
        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => { self.check().await; }
                _ = shutdown.changed() => { info!("health monitor shutting down"); break; }
            }
        }
    }

    async fn check(&self) {
        let connected = self.broker.is_connected().await;
        if !connected {
            let first_detection = !self.was_disconnected.swap(true, Ordering::SeqCst);
            if first_detection {
                error!("broker connection lost");
                let _ = self
                    .store
                    .record_system_event(SystemEventRow {
                        created_at: chrono::Utc::now(),
                        event: "connection_lost".to_string(),
                        detail: String::new(),
                        level: "error".to_string(),
                    })
                    .await;
            }
            self.reconnect().await;
        } else if self.was_disconnected.swap(false, Ordering::SeqCst) {
            info!("broker connection recovered");
            let _ = self
                .store
                .record_system_event(SystemEventRow {
                    created_at: chrono::Utc::now(),
                    event: "connection_recovered".to_string(),
                    detail: String::new(),
                    level: "info".to_string(),
                })
                .await;
        }
    }

    /// Up to `reconnect_retries` attempts, `reconnect_interval` apart
    /// (`health_monitor.py::_reconnect`).
    async fn reconnect(&self) {
        for attempt in 1..=self.config.reconnect_retries {
            match self.broker.reconnect().await {
                Ok(()) => {
                    info!(attempt, "broker reconnect succeeded");
                    return;
                }
                Err(e) => warn!(attempt, error = %e, "broker reconnect attempt failed"),
            }
            tokio::time::sleep(self.config.reconnect_interval).await;
        }
        error!(retries = self.config.reconnect_retries, "broker reconnect exhausted all retries");
    }
}
