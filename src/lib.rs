//! Stadium Lobby - lobby matchmaking and session core
//!
//! This crate manages competitive game lobbies: slot layout and eligibility,
//! the lobby lifecycle from creation to game start, game-server
//! reservations, per-player socket sessions and outbound event fan-out.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod feed;
pub mod geo;
pub mod lobby;
pub mod metrics;
pub mod notify;
pub mod players;
pub mod provision;
pub mod reservation;
pub mod service;
pub mod session;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{ErrorKind, LobbyError, Result};
pub use types::*;

// Re-export key components
pub use broadcast::Broadcaster;
pub use lobby::{LobbyManager, LobbyStore};
pub use session::SessionRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
