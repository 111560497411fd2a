//! Prometheus metrics and the monitoring endpoints that expose them

pub mod collector;
pub mod health;

pub use collector::{
    BroadcastMetrics, LobbyMetrics, MetricsCollector, MetricsTimer, ReservationMetrics,
    ServiceMetrics, SessionMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};

use std::sync::Arc;

/// Owns the monitoring server for the lifetime of the service
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, server: Arc<HealthServer>) -> Self {
        Self { collector, server }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    /// Serve until [`stop`](Self::stop) is called
    pub async fn start(&self) -> anyhow::Result<()> {
        self.server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.server.stop().await
    }
}
