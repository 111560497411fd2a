//! Integration tests for the lobby service
//!
//! These tests drive the whole system through the lobby manager:
//! - eligibility and join restrictions
//! - ready-up, game start and ready-up expiry
//! - reservation failures and their rollback
//! - concurrent joins
//! - substitutes driven by the server event feed
//! - the inbound request layer

mod fixtures;

use fixtures::{settle, sixes_request, TestSystem, SIXES_CLASSES};
use stadium_lobby::transport::Socket;
use futures::future::join_all;
use serde_json::json;
use stadium_lobby::broadcast::messages::{
    LOBBY_JOINED, LOBBY_LEFT, LOBBY_LIST_DATA, LOBBY_READY_UP, LOBBY_START, SUB_LIST_DATA,
};
use stadium_lobby::error::{error_kind, ErrorKind};
use stadium_lobby::feed::{dispatch, spawn_listener, ChannelEventFeed, ServerEvent};
use stadium_lobby::lobby::{ClassRequirement, LobbyStore, ServerSource};
use stadium_lobby::players::PlayerDirectory;
use stadium_lobby::reservation::MockReservationProvider;
use stadium_lobby::service::{RequestContext, RequestHandler};
use stadium_lobby::types::{LobbyState, Requirement};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_requirements_gate_slots() {
    let system = TestSystem::new();
    let creator = system.player("creator");

    let mut request = sixes_request("10.0.0.1:27015");
    request.class_requirements.push(ClassRequirement {
        class: "medic".to_string(),
        red: true,
        blu: false,
        requirement: Requirement {
            hours: 500,
            lobbies: 0,
            reliability: 0.0,
        },
    });
    let lobby_id = system
        .manager
        .create_lobby(&creator, "10.0.0.100", request)
        .await
        .unwrap();

    let rookie = system.player("rookie");
    let socket = system.connect(&rookie.id);
    let err = system
        .manager
        .join_lobby(&rookie, socket.as_ref(), lobby_id, "red", "medic", "")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "You don't have enough hours, slot requires 500 hours"
    );
    assert_eq!(error_kind(&err), ErrorKind::StateConflict);

    // The BLU medic slot is not restricted
    system
        .manager
        .join_lobby(&rookie, socket.as_ref(), lobby_id, "blu", "medic", "")
        .await
        .unwrap();

    let mut veteran = system.player("veteran");
    veteran.stats.hours = 900;
    system.directory.insert(veteran.clone());
    let socket = system.connect(&veteran.id);
    system
        .manager
        .join_lobby(&veteran, socket.as_ref(), lobby_id, "red", "medic", "")
        .await
        .unwrap();

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.occupied_count(), 2);
}

#[tokio::test]
async fn test_password_and_lobby_ban() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let mut request = sixes_request("10.0.0.2:27015");
    request.password = "hunter2".to_string();
    let lobby_id = system
        .manager
        .create_lobby(&creator, "10.0.0.100", request)
        .await
        .unwrap();

    let guest = system.player("guest");
    let socket = system.connect(&guest.id);
    let err = system
        .manager
        .join_lobby(&guest, socket.as_ref(), lobby_id, "red", "scout1", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid password.");

    system
        .manager
        .join_lobby(&guest, socket.as_ref(), lobby_id, "red", "scout1", "hunter2")
        .await
        .unwrap();
    system
        .manager
        .ban_player(&creator, lobby_id, &guest.id)
        .await
        .unwrap();

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert!(lobby.slot_of(&guest.id).is_none());
    assert!(lobby.is_spectator(&guest.id));

    let err = system
        .manager
        .join_lobby(&guest, socket.as_ref(), lobby_id, "red", "scout1", "hunter2")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You have been banned from this lobby.");
}

#[tokio::test]
async fn test_full_lobby_starts_ready_up() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.3:27015").await;
    settle().await;
    system.transport.clear_broadcasts();

    let seated = system.fill_sixes(lobby_id).await;
    settle().await;

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::ReadyingUp);
    assert!(lobby.ready_up_deadline().is_some());

    let ready_ups = system.transport.broadcasts_named(LOBBY_READY_UP);
    assert_eq!(ready_ups.len(), 1);
    assert_eq!(ready_ups[0].0, format!("{}_private", lobby_id));
    assert_eq!(ready_ups[0].1.payload, json!({"timeout": 30}));

    let lists = system.transport.broadcasts_named(LOBBY_LIST_DATA);
    assert!(lists.iter().all(|(room, _)| room == "0_public"));
    // A lobby that is readying up is no longer listed
    let last = &lists.last().unwrap().1.payload;
    assert_eq!(last["lobbies"].as_array().unwrap().len(), 0);

    for (_, socket) in &seated {
        assert_eq!(socket.emitted_named(LOBBY_JOINED).len(), 1);
    }
    assert_eq!(system.transport.room_members(&format!("{}_private", lobby_id)).len(), 12);
    assert_eq!(system.manager.get_stats().await.unwrap().ready_ups_started, 1);
}

#[tokio::test]
async fn test_everyone_ready_starts_game() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.4:27015").await;
    let seated = system.fill_sixes(lobby_id).await;

    let (last, rest) = seated.split_last().unwrap();
    for (player, _) in rest {
        system.manager.player_ready(player, lobby_id).await.unwrap();
    }
    assert_eq!(
        system.manager.get_lobby(lobby_id).await.unwrap().state(),
        LobbyState::ReadyingUp
    );

    system.manager.player_ready(&last.0, lobby_id).await.unwrap();
    settle().await;

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::InProgress);
    for (player, socket) in &seated {
        let starts = socket.emitted_named(LOBBY_START);
        assert_eq!(starts.len(), 1, "{} got no lobbyStart", player.id);
        assert_eq!(starts[0].payload["host"], "10.0.0.4:27015");
        assert_eq!(
            starts[0].payload["password"],
            lobby.server().server_password.as_str()
        );
    }
    assert_eq!(system.manager.get_stats().await.unwrap().games_started, 1);
}

#[tokio::test]
async fn test_not_ready_reverts_to_waiting() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.5:27015").await;
    let seated = system.fill_sixes(lobby_id).await;

    system
        .manager
        .player_ready(&seated[0].0, lobby_id)
        .await
        .unwrap();
    system
        .manager
        .player_not_ready(&seated[1].0, lobby_id)
        .await
        .unwrap();

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::Waiting);
    assert_eq!(lobby.unready_players().len(), 12);

    let err = system
        .manager
        .player_ready(&seated[0].0, lobby_id)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Lobby hasn't been filled up yet.");
}

#[tokio::test(start_paused = true)]
async fn test_ready_up_expiry_evicts_unready_players() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.6:27015").await;
    let seated = system.fill_sixes(lobby_id).await;

    for (player, _) in &seated[..11] {
        system.manager.player_ready(player, lobby_id).await.unwrap();
    }
    let (straggler, straggler_socket) = &seated[11];

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::Waiting);
    assert_eq!(lobby.occupied_count(), 11);
    assert!(lobby.slot_of(&straggler.id).is_none());
    assert!(lobby.is_spectator(&straggler.id));
    assert_eq!(lobby.unready_players().len(), 11);
    assert_eq!(straggler_socket.emitted_named(LOBBY_LEFT).len(), 1);

    let stats = system.manager.get_stats().await.unwrap();
    assert_eq!(stats.ready_up_evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ready_up_timer_is_ignored() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.7:27015").await;
    let seated = system.fill_sixes(lobby_id).await;

    // Cancel the first ready-up and start a second one 20s later
    tokio::time::sleep(Duration::from_secs(10)).await;
    let (leaver, socket) = &seated[0];
    system.manager.leave_lobby(leaver, lobby_id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    // Deadlines are wall-clock; keep them apart while tokio time is paused
    std::thread::sleep(Duration::from_millis(5));
    system
        .manager
        .join_lobby(leaver, socket.as_ref(), lobby_id, "red", "scout1", "")
        .await
        .unwrap();

    // First timer fires here; the second ready-up must survive it
    tokio::time::sleep(Duration::from_secs(15)).await;
    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::ReadyingUp);
    assert_eq!(lobby.occupied_count(), 12);

    tokio::time::sleep(Duration::from_secs(20)).await;
    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::Waiting);
    assert_eq!(lobby.occupied_count(), 0);
}

#[tokio::test]
async fn test_joining_second_lobby_leaves_first_once() {
    let system = TestSystem::new();
    let first_creator = system.player("c1");
    let second_creator = system.player("c2");
    let first = system.create_sixes(&first_creator, "10.0.0.8:27015").await;
    let second = system.create_sixes(&second_creator, "10.0.0.9:27015").await;

    let player = system.player("hopper");
    let socket = system.connect(&player.id);
    system
        .manager
        .join_lobby(&player, socket.as_ref(), first, "red", "medic", "")
        .await
        .unwrap();
    system
        .manager
        .join_lobby(&player, socket.as_ref(), second, "blu", "medic", "")
        .await
        .unwrap();
    settle().await;

    let first_lobby = system.manager.get_lobby(first).await.unwrap();
    let second_lobby = system.manager.get_lobby(second).await.unwrap();
    assert!(first_lobby.slot_of(&player.id).is_none());
    assert_eq!(second_lobby.slot_of(&player.id), Some(11));

    let left = socket.emitted_named(LOBBY_LEFT);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload["id"], first);
    assert!(!system
        .transport
        .room_members(&format!("{}_private", first))
        .contains(socket.id()));
    assert!(system
        .transport
        .room_members(&format!("{}_private", second))
        .contains(socket.id()));
}

#[tokio::test]
async fn test_switching_slots_in_same_lobby() {
    let system = TestSystem::new();
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.10:27015").await;

    let player = system.player("switcher");
    let socket = system.connect(&player.id);
    system
        .manager
        .join_lobby(&player, socket.as_ref(), lobby_id, "red", "scout1", "")
        .await
        .unwrap();
    system
        .manager
        .join_lobby(&player, socket.as_ref(), lobby_id, "blu", "pocket", "")
        .await
        .unwrap();
    settle().await;

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.slot_of(&player.id), Some(9));
    assert_eq!(lobby.occupied_count(), 1);
    assert_eq!(socket.emitted_named(LOBBY_JOINED).len(), 1);
    assert!(socket.emitted_named(LOBBY_LEFT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reservation_timeout_rolls_back() {
    let system = TestSystem::with_provider(MockReservationProvider::new().never_ready());
    let creator = system.player("creator");

    let mut request = sixes_request("unused");
    let starts_at = chrono::Utc::now();
    request.server = ServerSource::Reservation {
        server_id: 42,
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(2),
    };

    let err = system
        .manager
        .create_lobby(&creator, "10.0.0.100", request)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Reservation failed: Couldn't get Serveme reservation, try another server."
    );
    assert_eq!(error_kind(&err), ErrorKind::ExternalDependency);

    assert_eq!(system.store.lobby_count(), 0);
    assert_eq!(system.store.claimed_hosts(), 0);
    let created = system.reservations.created();
    assert_eq!(created.len(), 1);
    assert_eq!(system.reservations.deleted(), vec![created[0].1.id]);
    assert!(system.provisioner.calls().is_empty());

    // The creator may try again straight away
    let id = system.create_sixes(&creator, "10.0.0.11:27015").await;
    assert_eq!(
        system.manager.get_lobby(id).await.unwrap().state(),
        LobbyState::Waiting
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_rollback_escalates_to_cleanup_queue() {
    let provider = MockReservationProvider::new().never_ready();
    provider.failing_deletes(100);
    let system = TestSystem::with_provider(provider);
    let creator = system.player("creator");

    let mut request = sixes_request("unused");
    let starts_at = chrono::Utc::now();
    request.server = ServerSource::Reservation {
        server_id: 7,
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(2),
    };

    assert!(system
        .manager
        .create_lobby(&creator, "10.0.0.100", request)
        .await
        .is_err());
    assert_eq!(system.cleanup.pending(), 1);
    assert!(system.reservations.deleted().is_empty());
}

#[tokio::test]
async fn test_provisioning_failure_cleans_up() {
    let system = TestSystem::new();
    system.provisioner.fail_setup(true);
    let creator = system.player("creator");

    let err = system
        .manager
        .create_lobby(&creator, "10.0.0.100", sixes_request("10.0.0.12:27015"))
        .await
        .unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::ExternalDependency);
    assert_eq!(system.store.lobby_count(), 0);
    assert_eq!(system.store.claimed_hosts(), 0);

    system.provisioner.fail_setup(false);
    system.create_sixes(&creator, "10.0.0.12:27015").await;
}

#[tokio::test]
async fn test_concurrent_joins_fill_lobby_once() {
    let system = Arc::new(TestSystem::new());
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.13:27015").await;

    let joins = ["red", "blu"].into_iter().flat_map(|team| {
        SIXES_CLASSES.into_iter().map(move |class| (team, class))
    });
    let tasks = joins.map(|(team, class)| {
        let system = system.clone();
        tokio::spawn(async move {
            let player = system.player(&format!("{}_{}", team, class));
            let socket = system.connect(&player.id);
            system
                .manager
                .join_lobby(&player, socket.as_ref(), lobby_id, team, class, "")
                .await
        })
    });

    let results = join_all(tasks).await;
    assert!(results.into_iter().all(|r| r.unwrap().is_ok()));

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.occupied_count(), 12);
    assert_eq!(lobby.state(), LobbyState::ReadyingUp);
    assert_eq!(system.manager.get_stats().await.unwrap().ready_ups_started, 1);
}

#[tokio::test]
async fn test_concurrent_joins_race_for_one_slot() {
    let system = Arc::new(TestSystem::new());
    let creator = system.player("creator");
    let lobby_id = system.create_sixes(&creator, "10.0.0.14:27015").await;

    let tasks = (0..8).map(|i| {
        let system = system.clone();
        tokio::spawn(async move {
            let player = system.player(&format!("racer{}", i));
            let socket = system.connect(&player.id);
            system
                .manager
                .join_lobby(&player, socket.as_ref(), lobby_id, "red", "medic", "")
                .await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.to_string(), "This slot has been filled.");
    }
}

#[tokio::test]
async fn test_one_player_racing_into_two_lobbies_keeps_one_slot() {
    let system = TestSystem::with_yielding_store();
    let first = system
        .create_sixes(&system.player("c1"), "10.0.0.20:27015")
        .await;
    let second = system
        .create_sixes(&system.player("c2"), "10.0.0.21:27015")
        .await;

    let player = system.player("twin");
    let laptop = system.connect(&player.id);
    let phone = system.connect(&player.id);
    let (a, b) = tokio::join!(
        system
            .manager
            .join_lobby(&player, laptop.as_ref(), first, "red", "roamer", ""),
        system
            .manager
            .join_lobby(&player, phone.as_ref(), second, "red", "roamer", ""),
    );
    a.unwrap();
    b.unwrap();

    let mut seats = 0;
    for id in [first, second] {
        if system
            .manager
            .get_lobby(id)
            .await
            .unwrap()
            .slot_of(&player.id)
            .is_some()
        {
            seats += 1;
        }
    }
    assert_eq!(seats, 1);
    assert!(system.store.playing_lobby_of(&player.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rejected_join_keeps_previous_slot() {
    let system = TestSystem::new();
    let first = system
        .create_sixes(&system.player("c1"), "10.0.0.22:27015")
        .await;
    let second = system
        .create_sixes(&system.player("c2"), "10.0.0.23:27015")
        .await;

    let holder = system.player("holder");
    let holder_socket = system.connect(&holder.id);
    system
        .manager
        .join_lobby(&holder, holder_socket.as_ref(), second, "red", "pocket", "")
        .await
        .unwrap();

    let player = system.player("mover");
    let socket = system.connect(&player.id);
    system
        .manager
        .join_lobby(&player, socket.as_ref(), first, "red", "medic", "")
        .await
        .unwrap();

    let err = system
        .manager
        .join_lobby(&player, socket.as_ref(), second, "red", "pocket", "")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "This slot has been filled.");
    settle().await;

    assert_eq!(
        system.manager.get_lobby(first).await.unwrap().slot_of(&player.id),
        Some(5)
    );
    assert!(system
        .manager
        .get_lobby(second)
        .await
        .unwrap()
        .slot_of(&player.id)
        .is_none());
    assert!(socket.emitted_named(LOBBY_LEFT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_during_reservation_poll_keeps_later_host_claim() {
    let system = Arc::new(TestSystem::with_provider(
        MockReservationProvider::new().never_ready(),
    ));
    let booker = system.player("booker");

    let mut request = sixes_request("unused");
    let starts_at = chrono::Utc::now();
    request.server = ServerSource::Reservation {
        server_id: 9,
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(2),
    };
    let booking = {
        let system = system.clone();
        let booker = booker.clone();
        tokio::spawn(async move {
            system
                .manager
                .create_lobby(&booker, "10.0.0.100", request)
                .await
        })
    };

    while system.store.lobby_count() == 0 {
        tokio::task::yield_now().await;
    }
    let pending = system
        .store
        .active_lobby_created_by(&booker.id)
        .await
        .unwrap()
        .unwrap();
    let reserved_host = system.reservations.created()[0].1.server_address.clone();

    system.manager.close_lobby(&booker, pending).await.unwrap();
    assert_eq!(system.store.claimed_hosts(), 0);

    let rival = system.player("rival");
    let rival_lobby = system.create_sixes(&rival, &reserved_host).await;

    let err = booking.await.unwrap().unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::ExternalDependency);
    assert_eq!(system.store.claimed_hosts(), 1);
    assert_eq!(
        system.manager.get_lobby(rival_lobby).await.unwrap().state(),
        LobbyState::Waiting
    );

    let latecomer = system.player("latecomer");
    let mut request = sixes_request(&reserved_host);
    request.map_name = "cp_sunshine".to_string();
    let err = system
        .manager
        .create_lobby(&latecomer, "10.0.0.100", request)
        .await
        .unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::StateConflict);
}

#[tokio::test]
async fn test_concurrent_creation_on_one_host() {
    let system = Arc::new(TestSystem::new());

    let tasks = (0..4).map(|i| {
        let system = system.clone();
        tokio::spawn(async move {
            let creator = system.player(&format!("creator{}", i));
            let mut request = sixes_request("10.0.0.15:27015");
            request.map_name = format!("cp_map_{}", i);
            system
                .manager
                .create_lobby(&creator, "10.0.0.100", request)
                .await
        })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(system.store.lobby_count(), 1);
}

/// Fill, ready and start a lobby
async fn running_lobby(system: &TestSystem, address: &str) -> (u64, Vec<String>) {
    let creator = system.player(&format!("creator_{}", address));
    let lobby_id = system.create_sixes(&creator, address).await;
    let seated = system.fill_sixes(lobby_id).await;
    for (player, _) in &seated {
        system.manager.player_ready(player, lobby_id).await.unwrap();
    }
    let ids = seated.into_iter().map(|(p, _)| p.id).collect();
    (lobby_id, ids)
}

#[tokio::test(start_paused = true)]
async fn test_absent_player_is_substituted() {
    let system = TestSystem::new();
    let (lobby_id, players) = running_lobby(&system, "10.0.0.16:27015").await;
    let absent = &players[5];

    dispatch(
        &system.manager,
        ServerEvent::PlayerConnected {
            lobby_id,
            player_id: absent.clone(),
        },
    )
    .await
    .unwrap();
    dispatch(
        &system.manager,
        ServerEvent::PlayerDisconnected {
            lobby_id,
            player_id: absent.clone(),
        },
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(system.manager.substitute_slots().await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    let open = system.manager.substitute_slots().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].slot, 5);
    assert_eq!(open[0].class, "medic");
    assert!(!system.transport.broadcasts_named(SUB_LIST_DATA).is_empty());

    let sub = system.player("sub");
    let socket = system.connect(&sub.id);
    system
        .manager
        .join_lobby(&sub, socket.as_ref(), lobby_id, "red", "medic", "")
        .await
        .unwrap();

    let starts = socket.emitted_named(LOBBY_START);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].payload["class"], "medic");
    assert!(system.manager.substitute_slots().await.unwrap().is_empty());
    assert_eq!(system.manager.get_stats().await.unwrap().substitutions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_returning_player_keeps_slot() {
    let system = TestSystem::new();
    let (lobby_id, players) = running_lobby(&system, "10.0.0.17:27015").await;
    let flaky = &players[0];

    system
        .manager
        .player_left_server(lobby_id, flaky)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    system
        .manager
        .player_joined_server(lobby_id, flaky)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.slot_of(flaky), Some(0));
    assert!(system.manager.substitute_slots().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_event_feed_drives_lobby_end() {
    let system = TestSystem::new();
    let (lobby_id, players) = running_lobby(&system, "10.0.0.18:27015").await;

    let (tx, feed) = ChannelEventFeed::new();
    let listener = spawn_listener(system.manager.clone(), feed);
    tx.send(ServerEvent::MatchEnded { lobby_id }).unwrap();
    drop(tx);
    listener.await.unwrap();

    let lobby = system.manager.get_lobby(lobby_id).await.unwrap();
    assert_eq!(lobby.state(), LobbyState::Ended);
    assert_eq!(system.store.claimed_hosts(), 0);
    assert!(system
        .provisioner
        .calls()
        .contains(&format!("end:{}", lobby_id)));

    for player_id in &players {
        let player = system.directory.player(player_id).await.unwrap();
        assert_eq!(player.stats.lobbies, 1);
    }

    // The host can back a new lobby now
    let creator = system.player("next");
    system.create_sixes(&creator, "10.0.0.18:27015").await;
}

#[tokio::test]
async fn test_request_handler_round_trip() {
    let system = TestSystem::new();
    let handler = RequestHandler::new(
        system.manager.clone(),
        system.directory.clone(),
        system.metrics.clone(),
    );
    let creator = system.player("creator");
    let ctx = RequestContext {
        player_id: creator.id.clone(),
        socket: system.connect(&creator.id),
        remote_addr: "10.0.0.100".to_string(),
    };

    let response = handler
        .handle_json(
            &ctx,
            &json!({
                "request": "lobbyCreate",
                "data": {
                    "mapName": "cp_gullywash_final1",
                    "type": "6s",
                    "league": "ugc",
                    "serverType": "server",
                    "server": "10.0.0.19:27015",
                    "rcon": "secret"
                }
            })
            .to_string(),
        )
        .await;
    assert!(response.success, "{:?}", response.message);
    let lobby_id = response.data.unwrap()["id"].as_u64().unwrap();

    let response = handler
        .handle_json(
            &ctx,
            &json!({
                "request": "lobbyJoin",
                "data": {"id": lobby_id, "team": "green", "class": "medic"}
            })
            .to_string(),
        )
        .await;
    assert!(!response.success);
    assert_eq!(response.message.as_deref(), Some("Invalid team: green"));

    let response = handler
        .handle_json(
            &ctx,
            &json!({"request": "lobbyClose", "data": {"id": lobby_id}}).to_string(),
        )
        .await;
    assert!(response.success);

    let response = handler
        .handle_json(
            &ctx,
            &json!({"request": "lobbyClose", "data": {"id": lobby_id}}).to_string(),
        )
        .await;
    assert_eq!(response.message.as_deref(), Some("Lobby already closed."));

    let response = handler.handle_json(&ctx, "{not json").await;
    assert!(!response.success);
}

#[tokio::test]
async fn test_lobby_list_goes_to_requesting_socket() {
    let system = TestSystem::new();
    let handler = RequestHandler::new(
        system.manager.clone(),
        system.directory.clone(),
        system.metrics.clone(),
    );
    let player = system.player("browser");
    system
        .create_sixes(&system.player("host"), "10.0.0.24:27015")
        .await;

    let asking = system.connect(&player.id);
    let other_tab = system.connect(&player.id);
    let ctx = RequestContext {
        player_id: player.id.clone(),
        socket: asking.clone(),
        remote_addr: "10.0.0.100".to_string(),
    };

    let response = handler
        .handle_json(&ctx, &json!({"request": "requestLobbyListData"}).to_string())
        .await;
    assert!(response.success);
    settle().await;

    let lists = asking.emitted_named(LOBBY_LIST_DATA);
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].payload["lobbies"].as_array().unwrap().len(), 1);
    assert!(other_tab.emitted_named(LOBBY_LIST_DATA).is_empty());
}
