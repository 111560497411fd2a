//! Room membership side effects of joining, leaving and spectating

use crate::broadcast::messages::{LOBBY_JOINED, LOBBY_LEFT};
use crate::broadcast::Broadcaster;
use crate::lobby::instance::Lobby;
use crate::session::SessionRegistry;
use crate::transport::Transport;
use crate::types::LobbyId;
use crate::utils::{private_room, public_room};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Serialize)]
struct LobbyLeft {
    id: LobbyId,
}

/// Keeps transport rooms in step with lobby membership
#[derive(Clone)]
pub struct LobbyHooks {
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    broadcaster: Broadcaster,
}

impl LobbyHooks {
    pub fn new(
        registry: SessionRegistry,
        transport: Arc<dyn Transport>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            registry,
            transport,
            broadcaster,
        }
    }

    /// Subscribe every socket of a new occupant and send `lobbyJoined`
    pub fn after_join(&self, lobby: &Lobby, player_id: &str) {
        let public = public_room(lobby.id());
        let private = private_room(lobby.id());
        for socket in self.registry.sockets(player_id).unwrap_or_default() {
            self.transport.join_room(socket.id(), &public);
            self.transport.join_room(socket.id(), &private);
        }
        debug!("Player {} joined rooms of lobby {}", player_id, lobby.id());
        self.broadcaster
            .send_to_player(player_id, LOBBY_JOINED, lobby.view());
    }

    /// Drop a former occupant from the private room and send `lobbyLeft`
    pub fn after_leave(&self, lobby_id: LobbyId, player_id: &str) {
        let private = private_room(lobby_id);
        for socket in self.registry.sockets(player_id).unwrap_or_default() {
            self.transport.leave_room(socket.id(), &private);
        }
        debug!("Player {} left lobby {}", player_id, lobby_id);
        self.broadcaster
            .send_to_player(player_id, LOBBY_LEFT, LobbyLeft { id: lobby_id });
    }

    pub fn after_spectate(&self, lobby_id: LobbyId, socket_id: &str) {
        self.transport.join_room(socket_id, &public_room(lobby_id));
    }

    pub fn after_spectator_leave(&self, lobby_id: LobbyId, socket_id: &str) {
        self.transport.leave_room(socket_id, &public_room(lobby_id));
    }
}
