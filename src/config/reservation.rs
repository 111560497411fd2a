//! Reservation provider configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints, credentials and retry policy for the server reservation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationSettings {
    /// API key sent with every request
    pub api_key: String,
    /// Base URL serving North and South America
    pub na_endpoint: String,
    /// Base URL serving Europe, Asia and the fallback regions
    pub eu_endpoint: String,
    /// Base URL serving Oceania
    pub au_endpoint: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Seconds between readiness polls while creating a lobby
    pub poll_interval_seconds: u64,
    /// Give up on a reservation that isn't ready after this many seconds
    pub poll_ceiling_seconds: u64,
    /// Delete attempts made inline before handing off to the cleanup queue
    pub rollback_max_attempts: u32,
    /// First backoff between rollback attempts, doubled each retry
    pub rollback_initial_backoff_ms: u64,
    /// Backoff cap
    pub rollback_max_backoff_ms: u64,
    /// Seconds between background cleanup sweeps
    pub cleanup_interval_seconds: u64,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            na_endpoint: "https://na.serveme.tf".to_string(),
            eu_endpoint: "https://serveme.tf".to_string(),
            au_endpoint: "https://au.serveme.tf".to_string(),
            request_timeout_seconds: 15,
            poll_interval_seconds: 10,
            poll_ceiling_seconds: 180, // 3 minutes
            rollback_max_attempts: 5,
            rollback_initial_backoff_ms: 500,
            rollback_max_backoff_ms: 5000,
            cleanup_interval_seconds: 60,
        }
    }
}

impl ReservationSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.poll_ceiling_seconds)
    }

    pub fn rollback_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.rollback_initial_backoff_ms)
    }

    pub fn rollback_max_backoff(&self) -> Duration {
        Duration::from_millis(self.rollback_max_backoff_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}
