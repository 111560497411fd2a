//! Main application configuration
//!
//! This module defines the primary configuration structures for the lobby
//! service, including environment variable loading, TOML file loading and
//! validation.

use crate::config::lobby::LobbySettings;
use crate::config::reservation::ReservationSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub lobby: LobbySettings,
    pub reservation: ReservationSettings,
    pub broadcast: BroadcastSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Broadcaster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Interval of the broadcaster's idle tick in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "stadium-lobby".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

/// Parse an environment variable into `target` if it is set
fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> Result<()> {
    if let Ok(value) = env::var(key) {
        *target = value
            .parse()
            .map_err(|_| anyhow!("Invalid {} value: {}", key, value))?;
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still win
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        override_from_env("SERVICE_NAME", &mut self.service.name)?;
        override_from_env("LOG_LEVEL", &mut self.service.log_level)?;
        override_from_env("HEALTH_PORT", &mut self.service.health_port)?;
        override_from_env(
            "SHUTDOWN_TIMEOUT_SECONDS",
            &mut self.service.shutdown_timeout_seconds,
        )?;

        // Lobby settings
        override_from_env(
            "READY_UP_TIMEOUT_SECONDS",
            &mut self.lobby.ready_up_timeout_seconds,
        )?;
        override_from_env(
            "SUBSTITUTE_GRACE_SECONDS",
            &mut self.lobby.substitute_grace_seconds,
        )?;
        override_from_env(
            "DISCONNECT_GRACE_SECONDS",
            &mut self.lobby.disconnect_grace_seconds,
        )?;
        override_from_env("ENFORCE_REGION", &mut self.lobby.enforce_region)?;

        // Reservation settings
        override_from_env("RESERVATION_API_KEY", &mut self.reservation.api_key)?;
        override_from_env("RESERVATION_NA_ENDPOINT", &mut self.reservation.na_endpoint)?;
        override_from_env("RESERVATION_EU_ENDPOINT", &mut self.reservation.eu_endpoint)?;
        override_from_env("RESERVATION_AU_ENDPOINT", &mut self.reservation.au_endpoint)?;
        override_from_env(
            "RESERVATION_POLL_INTERVAL_SECONDS",
            &mut self.reservation.poll_interval_seconds,
        )?;
        override_from_env(
            "RESERVATION_POLL_CEILING_SECONDS",
            &mut self.reservation.poll_ceiling_seconds,
        )?;
        override_from_env(
            "RESERVATION_ROLLBACK_MAX_ATTEMPTS",
            &mut self.reservation.rollback_max_attempts,
        )?;

        // Broadcast settings
        override_from_env("BROADCAST_TICK_MS", &mut self.broadcast.tick_interval_ms)?;

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get broadcaster tick interval as Duration
    pub fn broadcast_tick(&self) -> Duration {
        Duration::from_millis(self.broadcast.tick_interval_ms)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    // Validate lobby timing
    if config.lobby.ready_up_timeout_seconds == 0 {
        return Err(anyhow!("Ready-up timeout must be greater than 0"));
    }

    // Validate reservation settings
    let reservation = &config.reservation;
    for (name, endpoint) in [
        ("NA", &reservation.na_endpoint),
        ("EU", &reservation.eu_endpoint),
        ("AU", &reservation.au_endpoint),
    ] {
        if endpoint.is_empty() {
            return Err(anyhow!("{} reservation endpoint cannot be empty", name));
        }
    }
    if reservation.poll_interval_seconds == 0 {
        return Err(anyhow!("Reservation poll interval must be greater than 0"));
    }
    if reservation.poll_ceiling_seconds < reservation.poll_interval_seconds {
        return Err(anyhow!(
            "Reservation poll ceiling must be at least one poll interval"
        ));
    }
    if reservation.rollback_max_attempts == 0 {
        return Err(anyhow!("Rollback attempts must be at least 1"));
    }

    if config.broadcast.tick_interval_ms == 0 {
        return Err(anyhow!("Broadcast tick interval must be greater than 0"));
    }

    Ok(())
}
