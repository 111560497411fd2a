//! Health checks for the lobby service
//!
//! Liveness only asks whether the service is running. Readiness and the full
//! check also look at the lobby manager, the broadcaster and the reservation
//! cleanup backlog.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub lobbies_created: u64,
    pub lobbies_closed: u64,
    pub games_started: u64,
    pub substitutions: u64,
    pub connected_players: usize,
    pub open_sockets: usize,
    /// Reservations waiting in the background cleanup queue
    pub pending_cleanups: usize,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Check every component and gather statistics
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_lobby_manager(&app_state).await,
            Self::check_broadcaster(&app_state),
            Self::check_reservation_cleanup(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(&c.status));

        let collector = app_state.metrics();
        collector.update_health_status(status.as_gauge());
        for check in &checks {
            collector.update_component_health(&check.name, check.status != HealthStatus::Unhealthy);
        }

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Whether the service is running at all
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Whether the service can take requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let status = Self::check_lobby_manager(&app_state)
            .await
            .status
            .worst(&Self::check_broadcaster(&app_state).status);
        Ok(status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        component("service_running", status, message, start)
    }

    async fn check_lobby_manager(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.lobby_manager().get_stats().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Lobby manager stats check failed: {}", e);
                (
                    HealthStatus::Degraded,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        component("lobby_manager", status, message, start)
    }

    fn check_broadcaster(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.broadcaster().is_closed() {
            (
                HealthStatus::Unhealthy,
                Some("Broadcaster has stopped".to_string()),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        component("broadcaster", status, message, start)
    }

    fn check_reservation_cleanup(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let pending = app_state.cleanup().pending();
        let (status, message) = if pending == 0 {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some(format!("{} reservation(s) awaiting cleanup", pending)),
            )
        };

        component("reservation_cleanup", status, message, start)
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let registry = app_state.registry();
        let mut stats = ServiceStats {
            connected_players: registry.connected_players(),
            open_sockets: registry.total_sockets(),
            pending_cleanups: app_state.cleanup().pending(),
            uptime_info: format!(
                "Up {}s",
                app_state.metrics().service().uptime_seconds.get()
            ),
            ..ServiceStats::default()
        };

        match app_state.lobby_manager().get_stats().await {
            Ok(lobby_stats) => {
                stats.lobbies_created = lobby_stats.lobbies_created;
                stats.lobbies_closed = lobby_stats.lobbies_closed;
                stats.games_started = lobby_stats.games_started;
                stats.substitutions = lobby_stats.substitutions;
            }
            Err(e) => error!("Failed to get lobby stats for health check: {}", e),
        }
        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

fn component(
    name: &str,
    status: HealthStatus,
    message: Option<String>,
    start: std::time::Instant,
) -> ComponentCheck {
    ComponentCheck {
        name: name.to_string(),
        status,
        message,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
    }
}
