//! Periodic liveness sweep.
//!
//! Evicts connections idle past the threshold and keeps the rest warm with
//! keep-alive comment frames so intermediary proxies do not reap them.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::registry::ConnectionRegistry;

pub struct HeartbeatMonitor {
    registry: ConnectionRegistry,
    interval: Duration,
    idle_threshold: Duration,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub fn new(registry: ConnectionRegistry, interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            registry,
            interval,
            idle_threshold,
            handle: None,
        }
    }

    /// Idempotent; a running monitor is left alone.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let registry = self.registry.clone();
        let interval = self.interval;
        let threshold = self.idle_threshold;
        self.handle = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // the first tick completes immediately
            loop {
                tick.tick().await;
                let (evicted, pinged) = registry.sweep_idle(threshold).await;
                if evicted > 0 {
                    tracing::info!(evicted, pinged, "heartbeat sweep evicted idle connections");
                } else {
                    tracing::debug!(pinged, "heartbeat sweep");
                }
            }
        }));
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "heartbeat monitor started"
        );
    }

    /// Idempotent; must run before the registry tears down its connections.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("heartbeat monitor stopped");
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
