//! Performance benchmarks for slot lookup, eligibility and lobby joins

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stadium_lobby::broadcast::Broadcaster;
use stadium_lobby::config::{LobbySettings, ReservationSettings};
use stadium_lobby::geo::StaticRegionResolver;
use stadium_lobby::lobby::slots::{check_eligibility, classes, slot_count, slot_index};
use stadium_lobby::lobby::{
    CreateLobby, InMemoryLobbyStore, Lobby, LobbyCollaborators, LobbyHooks, LobbyListData,
    LobbyManager, LobbyOptions, ServerSource,
};
use stadium_lobby::notify::ChatNotifier;
use stadium_lobby::players::InMemoryPlayerDirectory;
use stadium_lobby::provision::MockProvisioner;
use stadium_lobby::reservation::{CleanupQueue, MockReservationProvider, ReservationClient};
use stadium_lobby::session::SessionRegistry;
use stadium_lobby::transport::{MockSocket, MockTransport};
use stadium_lobby::types::{
    LobbyType, Player, PlayerStats, Requirement, ServerRecord, TwitchRestriction,
};
use std::sync::Arc;
use std::time::Duration;

fn create_bench_system() -> (LobbyManager, Arc<InMemoryPlayerDirectory>, SessionRegistry) {
    let registry = SessionRegistry::new();
    let transport = Arc::new(MockTransport::new());
    let (broadcaster, _) =
        Broadcaster::start(registry.clone(), transport.clone(), Duration::from_secs(1), None);
    let resolver = Arc::new(StaticRegionResolver::new().with_entry("10.", "EU", "Europe"));
    let provider = Arc::new(MockReservationProvider::new());
    let (cleanup, _) = CleanupQueue::start(provider.clone(), Duration::from_secs(60), None);
    let reservations = ReservationClient::new(
        provider,
        resolver.clone(),
        ReservationSettings::default(),
        cleanup,
        None,
    );
    let directory = Arc::new(InMemoryPlayerDirectory::new());

    let collaborators = LobbyCollaborators {
        store: Arc::new(InMemoryLobbyStore::new()),
        players: directory.clone(),
        reservations,
        resolver,
        provisioner: Arc::new(MockProvisioner::new()),
        notifier: Arc::new(ChatNotifier::new(broadcaster.clone())),
    };
    let hooks = LobbyHooks::new(registry.clone(), transport, broadcaster.clone());
    let manager = LobbyManager::new(collaborators, broadcaster, hooks, LobbySettings::default());
    (manager, directory, registry)
}

fn highlander_request(address: &str) -> CreateLobby {
    CreateLobby {
        lobby_type: LobbyType::Highlander,
        map_name: format!("pl_upward_{}", address),
        league: "ugc".to_string(),
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

fn bench_slot_lookup(c: &mut Criterion) {
    c.bench_function("slot_index_all_types", |b| {
        b.iter(|| {
            for lobby_type in LobbyType::ALL {
                for team in ["red", "blu"] {
                    for class in classes(lobby_type) {
                        black_box(slot_index(lobby_type, team, class).ok());
                    }
                }
            }
        })
    });
}

fn bench_eligibility(c: &mut Criterion) {
    let stats = PlayerStats {
        hours: 1200,
        lobbies: 40,
        reliability: 0.93,
    };
    let requirement = Requirement {
        hours: 500,
        lobbies: 10,
        reliability: 0.9,
    };

    c.bench_function("check_eligibility", |b| {
        b.iter(|| black_box(check_eligibility(black_box(&stats), Some(&requirement)).is_ok()))
    });
}

fn bench_lobby_list(c: &mut Criterion) {
    let lobbies: Vec<Lobby> = (0..50)
        .map(|id| {
            Lobby::new(
                id,
                LobbyType::Sixes,
                format!("cp_process_{}", id),
                "etf2l",
                ServerRecord::default(),
                format!("creator{}", id),
                LobbyOptions::default(),
            )
        })
        .collect();

    c.bench_function("lobby_list_50", |b| {
        b.iter(|| {
            let list = LobbyListData::from_lobbies(black_box(&lobbies));
            black_box(serde_json::to_value(list).ok())
        })
    });
}

fn bench_fill_highlander(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("fill_highlander_lobby", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (manager, directory, registry) = create_bench_system();
                let creator = Player::new("creator", "creator");
                directory.insert(creator.clone());
                let lobby_id = manager
                    .create_lobby(&creator, "10.0.0.100", highlander_request("10.0.0.1:27015"))
                    .await
                    .unwrap();

                for slot in 0..slot_count(LobbyType::Highlander) {
                    let team = if slot < 9 { "red" } else { "blu" };
                    let class = classes(LobbyType::Highlander)[slot % 9];
                    let player = Player::new(format!("p{}", slot), format!("Player {}", slot));
                    directory.insert(player.clone());
                    let socket = Arc::new(MockSocket::new());
                    registry.add(&player.id, socket.clone());
                    manager
                        .join_lobby(&player, socket.as_ref(), lobby_id, team, class, "")
                        .await
                        .unwrap();
                }
                black_box(lobby_id)
            })
        })
    });
}

criterion_group!(
    benches,
    bench_slot_lookup,
    bench_eligibility,
    bench_lobby_list,
    bench_fill_highlander
);
criterion_main!(benches);
