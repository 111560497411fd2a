//! Lobby persistence interface and the in-memory store

use crate::error::{LobbyError, Result};
use crate::lobby::instance::Lobby;
use crate::types::{LobbyId, LobbyState, LobbyType, StoredServer};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Data-access layer for lobbies and server records
#[async_trait]
pub trait LobbyStore: Send + Sync {
    /// Allocate a fresh lobby id
    async fn next_id(&self) -> Result<LobbyId>;

    async fn save(&self, lobby: &Lobby) -> Result<()>;

    async fn load(&self, id: LobbyId) -> Result<Lobby>;

    /// Physically remove a lobby that never finished setting up
    async fn delete(&self, id: LobbyId) -> Result<()>;

    /// Record that `host` backs a lobby; fails if already claimed
    async fn claim_host(&self, host: &str) -> Result<()>;

    async fn release_host(&self, host: &str) -> Result<()>;

    async fn host_in_use(&self, host: &str) -> Result<bool>;

    /// A non-ended lobby created by the player
    async fn active_lobby_created_by(&self, player_id: &str) -> Result<Option<LobbyId>>;

    /// The non-ended lobby in which the player holds a slot
    async fn playing_lobby_of(&self, player_id: &str) -> Result<Option<LobbyId>>;

    async fn spectating_lobbies_of(&self, player_id: &str) -> Result<Vec<LobbyId>>;

    /// Whether an active lobby in the region already plays this map and format
    async fn map_region_format_exists(
        &self,
        map_name: &str,
        region_code: Option<&str>,
        lobby_type: LobbyType,
    ) -> Result<bool>;

    /// Lobbies shown in the public list
    async fn waiting_lobbies(&self) -> Result<Vec<Lobby>>;

    async fn lobbies_in_progress(&self) -> Result<Vec<Lobby>>;

    async fn stored_server(&self, id: u64) -> Result<StoredServer>;
}

#[derive(Debug, Default)]
struct StoreState {
    lobbies: HashMap<LobbyId, Lobby>,
    hosts: HashSet<String>,
    stored_servers: HashMap<u64, StoredServer>,
    last_id: LobbyId,
}

impl StoreState {
    fn active(&self) -> impl Iterator<Item = &Lobby> {
        self.lobbies.values().filter(|l| l.state().is_active())
    }

    fn sorted(mut lobbies: Vec<Lobby>) -> Vec<Lobby> {
        lobbies.sort_by_key(Lobby::id);
        lobbies
    }
}

/// Store kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryLobbyStore {
    state: RwLock<StoreState>,
}

impl InMemoryLobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_stored_server(&self, server: StoredServer) {
        self.write().stored_servers.insert(server.id, server);
    }

    pub fn lobby_count(&self) -> usize {
        self.read().lobbies.len()
    }

    pub fn claimed_hosts(&self) -> usize {
        self.read().hosts.len()
    }
}

#[async_trait]
impl LobbyStore for InMemoryLobbyStore {
    async fn next_id(&self) -> Result<LobbyId> {
        let mut state = self.write();
        state.last_id += 1;
        Ok(state.last_id)
    }

    async fn save(&self, lobby: &Lobby) -> Result<()> {
        self.write().lobbies.insert(lobby.id(), lobby.clone());
        Ok(())
    }

    async fn load(&self, id: LobbyId) -> Result<Lobby> {
        self.read()
            .lobbies
            .get(&id)
            .cloned()
            .ok_or_else(|| LobbyError::LobbyNotFound { lobby_id: id }.into())
    }

    async fn delete(&self, id: LobbyId) -> Result<()> {
        self.write().lobbies.remove(&id);
        Ok(())
    }

    async fn claim_host(&self, host: &str) -> Result<()> {
        if !self.write().hosts.insert(host.to_string()) {
            return Err(LobbyError::HostInUse {
                host: host.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn release_host(&self, host: &str) -> Result<()> {
        self.write().hosts.remove(host);
        Ok(())
    }

    async fn host_in_use(&self, host: &str) -> Result<bool> {
        Ok(self.read().hosts.contains(host))
    }

    async fn active_lobby_created_by(&self, player_id: &str) -> Result<Option<LobbyId>> {
        Ok(self
            .read()
            .active()
            .filter(|l| l.created_by() == player_id)
            .map(Lobby::id)
            .min())
    }

    async fn playing_lobby_of(&self, player_id: &str) -> Result<Option<LobbyId>> {
        Ok(self
            .read()
            .active()
            .find(|l| l.slot_of(player_id).is_some())
            .map(Lobby::id))
    }

    async fn spectating_lobbies_of(&self, player_id: &str) -> Result<Vec<LobbyId>> {
        let mut ids: Vec<LobbyId> = self
            .read()
            .active()
            .filter(|l| l.is_spectator(player_id))
            .map(Lobby::id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn map_region_format_exists(
        &self,
        map_name: &str,
        region_code: Option<&str>,
        lobby_type: LobbyType,
    ) -> Result<bool> {
        Ok(self.read().active().any(|l| {
            l.map_name() == map_name
                && l.lobby_type() == lobby_type
                && l.region().map(|r| r.code.as_str()) == region_code
        }))
    }

    async fn waiting_lobbies(&self) -> Result<Vec<Lobby>> {
        let lobbies = self
            .read()
            .lobbies
            .values()
            .filter(|l| l.state() == LobbyState::Waiting)
            .cloned()
            .collect();
        Ok(StoreState::sorted(lobbies))
    }

    async fn lobbies_in_progress(&self) -> Result<Vec<Lobby>> {
        let lobbies = self
            .read()
            .lobbies
            .values()
            .filter(|l| l.state() == LobbyState::InProgress)
            .cloned()
            .collect();
        Ok(StoreState::sorted(lobbies))
    }

    async fn stored_server(&self, id: u64) -> Result<StoredServer> {
        self.read()
            .stored_servers
            .get(&id)
            .cloned()
            .ok_or_else(|| LobbyError::ServerNotFound { server_id: id }.into())
    }
}
