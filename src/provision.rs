//! Game server configuration through the server manager

use crate::error::{LobbyError, Result};
use crate::lobby::Lobby;
use crate::types::{LobbyId, ServerRecord};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Pushes configuration to the game server behind a lobby
#[async_trait]
pub trait ServerProvisioner: Send + Sync {
    /// Load the lobby's config, whitelist and password onto its server
    async fn setup_server(&self, lobby: &Lobby) -> Result<()>;

    /// Check that the RCON credentials work
    async fn verify(&self, server: &ServerRecord) -> Result<()>;

    /// Re-execute the lobby config on its server
    async fn reexec_config(&self, lobby: &Lobby) -> Result<()>;

    /// Stop tracking the server of a closed lobby
    async fn end(&self, lobby_id: LobbyId) -> Result<()>;
}

#[derive(Debug, Default)]
struct MockState {
    fail_setup: bool,
    fail_verify: bool,
    setup_delay: Duration,
    calls: Vec<String>,
}

/// Provisioner that records calls and fails on demand
#[derive(Debug, Default)]
pub struct MockProvisioner {
    state: Mutex<MockState>,
}

impl MockProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_setup(&self, fail: bool) {
        self.state().fail_setup = fail;
    }

    pub fn fail_verify(&self, fail: bool) {
        self.state().fail_verify = fail;
    }

    /// Make `setup_server` take this long
    pub fn set_setup_delay(&self, delay: Duration) {
        self.state().setup_delay = delay;
    }

    /// Calls made so far, e.g. `"setup:3"`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }
}

#[async_trait]
impl ServerProvisioner for MockProvisioner {
    async fn setup_server(&self, lobby: &Lobby) -> Result<()> {
        self.record(format!("setup:{}", lobby.id()));
        let (delay, fail) = {
            let state = self.state();
            (state.setup_delay, state.fail_setup)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(LobbyError::ProvisioningFailed {
                message: format!("could not configure {}", lobby.server().host),
            }
            .into());
        }
        Ok(())
    }

    async fn verify(&self, server: &ServerRecord) -> Result<()> {
        self.record(format!("verify:{}", server.host));
        if self.state().fail_verify {
            return Err(LobbyError::ProvisioningFailed {
                message: "Wrong RCON password".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn reexec_config(&self, lobby: &Lobby) -> Result<()> {
        self.record(format!("reexec:{}", lobby.id()));
        Ok(())
    }

    async fn end(&self, lobby_id: LobbyId) -> Result<()> {
        self.record(format!("end:{}", lobby_id));
        Ok(())
    }
}
