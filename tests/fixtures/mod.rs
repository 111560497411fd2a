//! Shared setup for the integration tests
//!
//! Builds a lobby manager on in-memory collaborators and exposes the mocks
//! so tests can script failures and inspect what was sent.

#![allow(dead_code)]

use stadium_lobby::broadcast::messages::GLOBAL_ROOM;
use stadium_lobby::broadcast::Broadcaster;
use stadium_lobby::config::{LobbySettings, ReservationSettings};
use stadium_lobby::geo::{RegionResolver, StaticRegionResolver};
use async_trait::async_trait;
use stadium_lobby::error::Result;
use stadium_lobby::lobby::{
    CreateLobby, InMemoryLobbyStore, Lobby, LobbyCollaborators, LobbyHooks, LobbyManager,
    LobbyStore, ServerSource,
};
use stadium_lobby::metrics::MetricsCollector;
use stadium_lobby::notify::ChatNotifier;
use stadium_lobby::players::InMemoryPlayerDirectory;
use stadium_lobby::provision::MockProvisioner;
use stadium_lobby::reservation::{CleanupQueue, MockReservationProvider, ReservationClient};
use stadium_lobby::session::SessionRegistry;
use stadium_lobby::transport::{MockSocket, MockTransport, Socket, Transport};
use stadium_lobby::types::{LobbyId, LobbyType, Player, StoredServer, TwitchRestriction};
use std::sync::Arc;
use std::time::Duration;

pub const SIXES_CLASSES: [&str; 6] = ["scout1", "scout2", "roamer", "pocket", "demoman", "medic"];

/// Complete lobby system wired to mocks
pub struct TestSystem {
    pub manager: LobbyManager,
    pub store: Arc<InMemoryLobbyStore>,
    pub directory: Arc<InMemoryPlayerDirectory>,
    pub reservations: Arc<MockReservationProvider>,
    pub provisioner: Arc<MockProvisioner>,
    pub transport: Arc<MockTransport>,
    pub registry: SessionRegistry,
    pub metrics: Arc<MetricsCollector>,
    pub cleanup: CleanupQueue,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::build(MockReservationProvider::new(), LobbySettings::default())
    }

    pub fn with_provider(provider: MockReservationProvider) -> Self {
        Self::build(provider, LobbySettings::default())
    }

    /// Every store call yields first, so concurrent requests interleave
    pub fn with_yielding_store() -> Self {
        Self::assemble(MockReservationProvider::new(), LobbySettings::default(), true)
    }

    pub fn build(provider: MockReservationProvider, settings: LobbySettings) -> Self {
        Self::assemble(provider, settings, false)
    }

    fn assemble(provider: MockReservationProvider, settings: LobbySettings, yielding: bool) -> Self {
        let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        let registry = SessionRegistry::new();
        let transport = Arc::new(MockTransport::new());
        let (broadcaster, _) = Broadcaster::start(
            registry.clone(),
            transport.clone(),
            Duration::from_secs(1),
            Some(metrics.clone()),
        );

        let resolver: Arc<dyn RegionResolver> = Arc::new(
            StaticRegionResolver::new()
                .with_entry("10.", "EU", "Europe")
                .with_entry("172.16.", "NA", "North America"),
        );
        let reservations = Arc::new(provider);
        let (cleanup, _) = CleanupQueue::start(
            reservations.clone(),
            Duration::from_secs(60),
            Some(metrics.clone()),
        );
        let client = ReservationClient::new(
            reservations.clone(),
            resolver.clone(),
            ReservationSettings::default(),
            cleanup.clone(),
            Some(metrics.clone()),
        );

        let store = Arc::new(InMemoryLobbyStore::new());
        let shared_store: Arc<dyn LobbyStore> = if yielding {
            Arc::new(YieldingStore(store.clone()))
        } else {
            store.clone()
        };
        let directory = Arc::new(InMemoryPlayerDirectory::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let collaborators = LobbyCollaborators {
            store: shared_store,
            players: directory.clone(),
            reservations: client,
            resolver,
            provisioner: provisioner.clone(),
            notifier: Arc::new(ChatNotifier::new(broadcaster.clone())),
        };
        let hooks = LobbyHooks::new(registry.clone(), transport.clone(), broadcaster.clone());
        let manager =
            LobbyManager::with_metrics(collaborators, broadcaster, hooks, settings, metrics.clone());

        Self {
            manager,
            store,
            directory,
            reservations,
            provisioner,
            transport,
            registry,
            metrics,
            cleanup,
        }
    }

    /// Register a player in the directory
    pub fn player(&self, id: &str) -> Player {
        let player = Player::new(id, format!("Player {}", id));
        self.directory.insert(player.clone());
        player
    }

    /// Open a socket for the player and subscribe it to the global room
    pub fn connect(&self, player_id: &str) -> Arc<MockSocket> {
        let socket = Arc::new(MockSocket::new());
        self.registry.add(player_id, socket.clone());
        self.transport.join_room(socket.id(), GLOBAL_ROOM);
        socket
    }

    pub async fn create_sixes(&self, creator: &Player, address: &str) -> LobbyId {
        self.manager
            .create_lobby(creator, "10.0.0.100", sixes_request(address))
            .await
            .expect("lobby creation failed")
    }

    /// Seat twelve fresh players; returns them with their sockets in slot order
    pub async fn fill_sixes(&self, lobby_id: LobbyId) -> Vec<(Player, Arc<MockSocket>)> {
        let mut seated = Vec::new();
        for team in ["red", "blu"] {
            for class in SIXES_CLASSES {
                let player = self.player(&format!("{}_{}_{}", lobby_id, team, class));
                let socket = self.connect(&player.id);
                self.manager
                    .join_lobby(&player, socket.as_ref(), lobby_id, team, class, "")
                    .await
                    .expect("join failed");
                seated.push((player, socket));
            }
        }
        seated
    }
}

/// In-memory store that hands control back to the scheduler on every call
pub struct YieldingStore(pub Arc<InMemoryLobbyStore>);

#[async_trait]
impl LobbyStore for YieldingStore {
    async fn next_id(&self) -> Result<LobbyId> {
        tokio::task::yield_now().await;
        self.0.next_id().await
    }

    async fn save(&self, lobby: &Lobby) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.save(lobby).await
    }

    async fn load(&self, id: LobbyId) -> Result<Lobby> {
        tokio::task::yield_now().await;
        self.0.load(id).await
    }

    async fn delete(&self, id: LobbyId) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.delete(id).await
    }

    async fn claim_host(&self, host: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.claim_host(host).await
    }

    async fn release_host(&self, host: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.release_host(host).await
    }

    async fn host_in_use(&self, host: &str) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.host_in_use(host).await
    }

    async fn active_lobby_created_by(&self, player_id: &str) -> Result<Option<LobbyId>> {
        tokio::task::yield_now().await;
        self.0.active_lobby_created_by(player_id).await
    }

    async fn playing_lobby_of(&self, player_id: &str) -> Result<Option<LobbyId>> {
        tokio::task::yield_now().await;
        self.0.playing_lobby_of(player_id).await
    }

    async fn spectating_lobbies_of(&self, player_id: &str) -> Result<Vec<LobbyId>> {
        tokio::task::yield_now().await;
        self.0.spectating_lobbies_of(player_id).await
    }

    async fn map_region_format_exists(
        &self,
        map_name: &str,
        region_code: Option<&str>,
        lobby_type: LobbyType,
    ) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0
            .map_region_format_exists(map_name, region_code, lobby_type)
            .await
    }

    async fn waiting_lobbies(&self) -> Result<Vec<Lobby>> {
        tokio::task::yield_now().await;
        self.0.waiting_lobbies().await
    }

    async fn lobbies_in_progress(&self) -> Result<Vec<Lobby>> {
        tokio::task::yield_now().await;
        self.0.lobbies_in_progress().await
    }

    async fn stored_server(&self, id: u64) -> Result<StoredServer> {
        tokio::task::yield_now().await;
        self.0.stored_server(id).await
    }
}

pub fn sixes_request(address: &str) -> CreateLobby {
    CreateLobby {
        lobby_type: LobbyType::Sixes,
        map_name: format!("cp_process_{}", address.replace(['.', ':'], "_")),
        league: "etf2l".to_string(),
        server: ServerSource::Direct {
            address: address.to_string(),
            rcon_password: "rcon".to_string(),
        },
        whitelist_id: String::new(),
        mumble_required: false,
        password: String::new(),
        steam_group: None,
        twitch_restriction: TwitchRestriction::None,
        class_requirements: Vec::new(),
        general_requirement: None,
    }
}

/// Let the broadcaster and other spawned tasks catch up
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
