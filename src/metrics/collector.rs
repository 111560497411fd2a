//! Metrics collection using Prometheus
//!
//! Lobby lifecycle, session, reservation and broadcaster metrics for the
//! lobby service, all registered in one private registry.

use crate::types::LobbyType;
use anyhow::Result;
use prometheus::core::Collector;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Lobby lifecycle metrics
    lobby_metrics: LobbyMetrics,

    /// Connected players and sockets
    session_metrics: SessionMetrics,

    /// Game-server reservation metrics
    reservation_metrics: ReservationMetrics,

    /// Outbound event fan-out
    broadcast_metrics: BroadcastMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Client requests handled, by request name and outcome
    pub requests_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby lifecycle metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Lobbies currently open, by type
    pub active_lobbies: IntGaugeVec,

    /// Total lobbies created
    pub lobbies_created_total: IntCounterVec,

    /// Total lobbies closed, by how they ended
    pub lobbies_closed_total: IntCounterVec,

    /// Ready-up phases started
    pub ready_ups_started_total: IntCounter,

    /// Players moved to spectators when a ready-up timed out
    pub ready_up_evictions_total: IntCounter,

    /// Games started (every player ready)
    pub games_started_total: IntCounterVec,

    /// Players that took a vacated slot of a running game
    pub substitutions_total: IntCounter,

    /// Duration of lobby operations
    pub lobby_operation_duration: HistogramVec,
}

/// Session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Players with at least one socket
    pub connected_players: IntGauge,

    /// Open sockets across all players
    pub open_sockets: IntGauge,

    /// Disconnect callbacks that fired after the grace period
    pub disconnect_callbacks_total: IntCounter,
}

/// Reservation metrics
#[derive(Clone)]
pub struct ReservationMetrics {
    /// Reservation API calls, by operation and status
    pub requests_total: IntCounterVec,

    /// Time until a reservation reported ready
    pub ready_wait_seconds: Histogram,

    /// Rollbacks handed to the background cleanup queue
    pub rollback_escalations_total: IntCounter,
}

/// Broadcaster metrics
#[derive(Clone)]
pub struct BroadcastMetrics {
    /// Messages delivered, by mode
    pub delivered_total: IntCounterVec,

    /// Direct messages dropped because the player had no socket
    pub dropped_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let reservation_metrics = ReservationMetrics::new(&registry)?;
        let broadcast_metrics = BroadcastMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            session_metrics,
            reservation_metrics,
            broadcast_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    pub fn reservation(&self) -> &ReservationMetrics {
        &self.reservation_metrics
    }

    pub fn broadcast(&self) -> &BroadcastMetrics {
        &self.broadcast_metrics
    }

    /// Record a handled client request
    pub fn record_request(&self, request: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .requests_total
            .with_label_values(&[request, status])
            .inc();
    }

    /// Record lobby creation
    pub fn record_lobby_created(&self, lobby_type: LobbyType) {
        let label = lobby_type.name();
        self.lobby_metrics
            .lobbies_created_total
            .with_label_values(&[label])
            .inc();
        self.lobby_metrics
            .active_lobbies
            .with_label_values(&[label])
            .inc();
    }

    /// Record a lobby leaving the active set
    pub fn record_lobby_closed(&self, lobby_type: LobbyType, reason: &str) {
        self.lobby_metrics
            .lobbies_closed_total
            .with_label_values(&[reason])
            .inc();
        self.lobby_metrics
            .active_lobbies
            .with_label_values(&[lobby_type.name()])
            .dec();
    }

    pub fn record_ready_up_started(&self) {
        self.lobby_metrics.ready_ups_started_total.inc();
    }

    pub fn record_ready_up_evictions(&self, count: usize) {
        self.lobby_metrics
            .ready_up_evictions_total
            .inc_by(count as u64);
    }

    pub fn record_game_started(&self, lobby_type: LobbyType) {
        self.lobby_metrics
            .games_started_total
            .with_label_values(&[lobby_type.name()])
            .inc();
    }

    pub fn record_substitution(&self) {
        self.lobby_metrics.substitutions_total.inc();
    }

    /// Record the duration of a lobby operation
    pub fn record_lobby_operation(&self, operation: &str, duration: Duration) {
        self.lobby_metrics
            .lobby_operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update connection gauges from the session registry
    pub fn update_sessions(&self, players: usize, sockets: usize) {
        self.session_metrics
            .connected_players
            .set(players as i64);
        self.session_metrics.open_sockets.set(sockets as i64);
    }

    pub fn record_disconnect_callback(&self) {
        self.session_metrics.disconnect_callbacks_total.inc();
    }

    /// Record a reservation API call
    pub fn record_reservation_request(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.reservation_metrics
            .requests_total
            .with_label_values(&[operation, status])
            .inc();
    }

    pub fn record_reservation_ready(&self, waited: Duration) {
        self.reservation_metrics
            .ready_wait_seconds
            .observe(waited.as_secs_f64());
    }

    pub fn record_rollback_escalation(&self) {
        self.reservation_metrics.rollback_escalations_total.inc();
    }

    /// Record a delivered broadcaster message
    pub fn record_delivery(&self, mode: &str) {
        self.broadcast_metrics
            .delivered_total
            .with_label_values(&[mode])
            .inc();
    }

    pub fn record_dropped_delivery(&self) {
        self.broadcast_metrics.dropped_total.inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

fn register<M: Collector + Clone + 'static>(registry: &Registry, metric: M) -> Result<M> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    register(registry, IntCounter::new(name, help)?)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    register(registry, IntGauge::new(name, help)?)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    register(registry, IntCounterVec::new(Opts::new(name, help), labels)?)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    register(registry, IntGaugeVec::new(Opts::new(name, help), labels)?)
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            uptime_seconds: gauge(
                registry,
                "stadium_lobby_uptime_seconds",
                "Seconds since the service started",
            )?,
            requests_total: counter_vec(
                registry,
                "stadium_lobby_requests_total",
                "Client requests handled",
                &["request", "status"],
            )?,
            health_status: gauge(
                registry,
                "stadium_lobby_health_status",
                "Overall health: 2 healthy, 1 degraded, 0 unhealthy",
            )?,
            component_health: gauge_vec(
                registry,
                "stadium_lobby_component_health",
                "1 while the component passes its check",
                &["component"],
            )?,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let lobby_operation_duration = register(
            registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "stadium_lobby_lobby_operation_duration_seconds",
                    "Time spent in create and join, including reservation waits",
                )
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
                &["operation"],
            )?,
        )?;

        Ok(Self {
            active_lobbies: gauge_vec(
                registry,
                "stadium_lobby_active_lobbies",
                "Lobbies that have not ended",
                &["lobby_type"],
            )?,
            lobbies_created_total: counter_vec(
                registry,
                "stadium_lobby_lobbies_created_total",
                "Lobbies that reached the waiting state",
                &["lobby_type"],
            )?,
            lobbies_closed_total: counter_vec(
                registry,
                "stadium_lobby_lobbies_closed_total",
                "Lobbies closed, by reason",
                &["reason"],
            )?,
            ready_ups_started_total: counter(
                registry,
                "stadium_lobby_ready_ups_started_total",
                "Ready-up phases started",
            )?,
            ready_up_evictions_total: counter(
                registry,
                "stadium_lobby_ready_up_evictions_total",
                "Unready players moved to spectators on ready-up timeout",
            )?,
            games_started_total: counter_vec(
                registry,
                "stadium_lobby_games_started_total",
                "Lobbies where every player readied up",
                &["lobby_type"],
            )?,
            substitutions_total: counter(
                registry,
                "stadium_lobby_substitutions_total",
                "Players that filled a vacated slot in a running game",
            )?,
            lobby_operation_duration,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            connected_players: gauge(
                registry,
                "stadium_lobby_connected_players",
                "Players with at least one socket",
            )?,
            open_sockets: gauge(registry, "stadium_lobby_open_sockets", "Open sockets")?,
            disconnect_callbacks_total: counter(
                registry,
                "stadium_lobby_disconnect_callbacks_total",
                "Disconnect callbacks fired after the grace period",
            )?,
        })
    }
}

impl ReservationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ready_wait_seconds = register(
            registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "stadium_lobby_reservation_ready_wait_seconds",
                    "Time until a reservation reported ready",
                )
                .buckets(vec![1.0, 5.0, 10.0, 20.0, 40.0, 60.0, 120.0, 180.0]),
            )?,
        )?;

        Ok(Self {
            requests_total: counter_vec(
                registry,
                "stadium_lobby_reservation_requests_total",
                "Reservation API calls",
                &["operation", "status"],
            )?,
            ready_wait_seconds,
            rollback_escalations_total: counter(
                registry,
                "stadium_lobby_rollback_escalations_total",
                "Reservation rollbacks handed to the cleanup queue",
            )?,
        })
    }
}

impl BroadcastMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            delivered_total: counter_vec(
                registry,
                "stadium_lobby_broadcast_delivered_total",
                "Broadcaster messages delivered",
                &["mode"],
            )?,
            dropped_total: counter(
                registry,
                "stadium_lobby_broadcast_dropped_total",
                "Direct messages dropped for players without a socket",
            )?,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
