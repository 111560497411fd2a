//! Monitoring HTTP endpoints
//!
//! `/alive` and `/ready` are plain-text probes for the orchestrator,
//! `/health` returns the full component report, `/metrics` is the Prometheus
//! scrape target and `/lobbies` shows what players currently see in the
//! lobby browser and substitute list.

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Where the monitoring server listens
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl HealthServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid monitoring address {}:{}", self.host, self.port))
    }
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 8080)
    }
}

#[derive(Clone)]
struct MonitorState {
    collector: Arc<MetricsCollector>,
    app: Option<Arc<AppState>>,
}

/// Axum server for probes, metrics and lobby overview
pub struct HealthServer {
    config: HealthServerConfig,
    state: MonitorState,
    stop_tx: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, collector: Arc<MetricsCollector>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            state: MonitorState {
                collector,
                app: None,
            },
            stop_tx,
        }
    }

    /// Probes report unavailable until the application is attached
    pub fn with_app_state(mut self, app: Arc<AppState>) -> Self {
        self.state.app = Some(app);
        self
    }

    pub async fn start(&self) -> Result<()> {
        let addr = self.config.address()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind monitoring server to {}", addr))?;
        info!("Monitoring endpoints on http://{}", addr);

        let mut stop_rx = self.stop_tx.subscribe();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                // A dropped sender also ends the wait
                let _ = stop_rx.wait_for(|stopped| *stopped).await;
            })
            .await?;

        info!("Monitoring server on {} stopped", addr);
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/alive", get(alive))
            .route("/ready", get(ready))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/lobbies", get(lobbies))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        debug!("Stopping monitoring server");
        self.stop_tx.send_replace(true);
        Ok(())
    }
}

fn not_attached() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized").into_response()
}

fn probe_response(status: Result<HealthStatus>, up: &'static str) -> Response {
    match status {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, up).into_response(),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded").into_response(),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Down").into_response(),
        Err(e) => {
            error!("Probe failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Down").into_response()
        }
    }
}

async fn alive(State(state): State<MonitorState>) -> Response {
    match state.app {
        Some(app) => probe_response(HealthCheck::liveness_check(app).await, "Alive"),
        None => not_attached(),
    }
}

async fn ready(State(state): State<MonitorState>) -> Response {
    match state.app {
        Some(app) => probe_response(HealthCheck::readiness_check(app).await, "Ready"),
        None => not_attached(),
    }
}

async fn health(State(state): State<MonitorState>) -> Response {
    let Some(app) = state.app else {
        return not_attached();
    };
    match HealthCheck::check(app).await {
        Ok(report) => {
            let code = match report.status {
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::OK,
            };
            (code, Json(report)).into_response()
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn metrics(State(state): State<MonitorState>) -> Response {
    match encode_metrics(&state.collector) {
        Ok(text) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("{}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn lobbies(State(state): State<MonitorState>) -> Response {
    let Some(app) = state.app else {
        return not_attached();
    };
    let manager = app.lobby_manager();
    let overview = async {
        let list = manager.lobby_list().await?;
        let substitutes = manager.substitute_slots().await?;
        anyhow::Ok(json!({
            "waiting": list.lobbies,
            "substitute_slots": substitutes,
        }))
    };
    match overview.await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            error!("Failed to build lobby overview: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics(collector: &MetricsCollector) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&collector.registry().gather())
        .context("Failed to encode metrics")
}
