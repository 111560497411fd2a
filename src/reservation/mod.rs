//! Game server reservations with an external booking service
//!
//! The booking service is reached through a [`ReservationProvider`]. The
//! [`ReservationClient`] adds region routing, readiness polling and bounded
//! rollback on top of it; reservations whose rollback keeps failing are
//! handed to the [`CleanupQueue`].

pub mod cleanup;
pub mod client;
pub mod http;
pub mod provider;
pub mod region;

pub use cleanup::CleanupQueue;
pub use client::{ReservationClient, RollbackOutcome};
pub use http::HttpReservationProvider;
pub use provider::{MockReservationProvider, ReservationProvider};
pub use region::Endpoint;

use crate::types::PlayerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Provider-side server id
    pub server_id: u64,
    pub whitelist_id: u64,
    pub rcon: String,
    pub password: String,
}

/// A booking accepted by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u64,
    /// `host:port` of the assigned server
    pub server_address: String,
    pub rcon: String,
    pub password: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Readiness reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Ready,
}

/// Everything needed to address a reservation again later
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationRef {
    pub id: u64,
    pub endpoint: Endpoint,
    /// Player the reservation was made on behalf of
    pub owner: PlayerId,
}
