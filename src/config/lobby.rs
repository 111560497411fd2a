//! Lobby lifecycle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and policy knobs for the lobby state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    /// Seconds a full lobby waits for every occupant to ready up
    pub ready_up_timeout_seconds: u64,
    /// Seconds a player may be absent from the game server before a
    /// substitute is requested
    pub substitute_grace_seconds: u64,
    /// Seconds a player may have zero sockets before being treated as gone
    pub disconnect_grace_seconds: u64,
    /// Reject lobby creation when the server's region can't be resolved
    pub enforce_region: bool,
    /// Let admins and moderators hold more than one active lobby
    pub privileged_multi_create: bool,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            ready_up_timeout_seconds: 30,
            substitute_grace_seconds: 120,
            disconnect_grace_seconds: 30,
            enforce_region: true,
            privileged_multi_create: true,
        }
    }
}

impl LobbySettings {
    pub fn ready_up_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_up_timeout_seconds)
    }

    pub fn substitute_grace(&self) -> Duration {
        Duration::from_secs(self.substitute_grace_seconds)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_seconds)
    }
}
