//! Configuration management for the lobby service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values.

pub mod app;
pub mod lobby;
pub mod reservation;

// Re-export commonly used types
pub use app::{validate_config, AppConfig, BroadcastSettings, ServiceSettings};
pub use lobby::LobbySettings;
pub use reservation::ReservationSettings;
