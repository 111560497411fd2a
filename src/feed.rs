//! Game server event feed
//!
//! Events reported by the server manager arrive as one tagged union and are
//! dispatched by a single exhaustive match.

use crate::error::Result;
use crate::lobby::LobbyManager;
use crate::types::{LobbyId, PlayerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Something that happened on a lobby's game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "playerDisc")]
    PlayerDisconnected {
        lobby_id: LobbyId,
        #[serde(rename = "steamId")]
        player_id: PlayerId,
    },
    #[serde(rename = "playerConn")]
    PlayerConnected {
        lobby_id: LobbyId,
        #[serde(rename = "steamId")]
        player_id: PlayerId,
    },
    #[serde(rename = "discFromServer")]
    DisconnectedFromServer { lobby_id: LobbyId },
    #[serde(rename = "matchEnded")]
    MatchEnded { lobby_id: LobbyId },
    #[serde(rename = "playerSub")]
    PlayerSubstitute {
        lobby_id: LobbyId,
        #[serde(rename = "steamId")]
        player_id: PlayerId,
    },
}

impl ServerEvent {
    pub fn lobby_id(&self) -> LobbyId {
        match self {
            ServerEvent::PlayerDisconnected { lobby_id, .. }
            | ServerEvent::PlayerConnected { lobby_id, .. }
            | ServerEvent::DisconnectedFromServer { lobby_id }
            | ServerEvent::MatchEnded { lobby_id }
            | ServerEvent::PlayerSubstitute { lobby_id, .. } => *lobby_id,
        }
    }
}

/// Source of server events
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Next event, or `None` once the feed is closed
    async fn next_event(&self) -> Option<ServerEvent>;
}

/// Feed backed by an in-process channel
pub struct ChannelEventFeed {
    rx: Mutex<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl ChannelEventFeed {
    pub fn new() -> (mpsc::UnboundedSender<ServerEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Mutex::new(rx) })
    }
}

#[async_trait]
impl EventFeed for ChannelEventFeed {
    async fn next_event(&self) -> Option<ServerEvent> {
        self.rx.lock().await.recv().await
    }
}

/// Apply one server event to the lobby it names
pub async fn dispatch(manager: &LobbyManager, event: ServerEvent) -> Result<()> {
    debug!("Server event: {:?}", event);
    match event {
        ServerEvent::PlayerDisconnected {
            lobby_id,
            player_id,
        } => manager.player_left_server(lobby_id, &player_id).await,
        ServerEvent::PlayerConnected {
            lobby_id,
            player_id,
        } => manager.player_joined_server(lobby_id, &player_id).await,
        ServerEvent::DisconnectedFromServer { lobby_id } => manager.server_lost(lobby_id).await,
        ServerEvent::MatchEnded { lobby_id } => manager.match_ended(lobby_id).await,
        ServerEvent::PlayerSubstitute {
            lobby_id,
            player_id,
        } => manager.player_reported(lobby_id, &player_id).await,
    }
}

/// Drain `feed` into the manager until it closes
///
/// A failing event is logged and the loop moves on.
pub fn spawn_listener<F>(manager: LobbyManager, feed: F) -> JoinHandle<()>
where
    F: EventFeed + 'static,
{
    tokio::spawn(async move {
        info!("Server event listener started");
        while let Some(event) = feed.next_event().await {
            let lobby_id = event.lobby_id();
            if let Err(e) = dispatch(&manager, event).await {
                error!("Failed to handle server event for lobby {}: {}", lobby_id, e);
            }
        }
        info!("Server event feed closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event: ServerEvent = serde_json::from_value(json!({
            "name": "playerDisc",
            "lobbyId": 12,
            "steamId": "76561198000000000"
        }))
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::PlayerDisconnected {
                lobby_id: 12,
                player_id: "76561198000000000".to_string()
            }
        );

        let ended: ServerEvent =
            serde_json::from_value(json!({"name": "matchEnded", "lobbyId": 3})).unwrap();
        assert_eq!(ended.lobby_id(), 3);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let parsed = serde_json::from_value::<ServerEvent>(json!({"name": "mystery", "lobbyId": 1}));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_channel_feed_closes() {
        let (tx, feed) = ChannelEventFeed::new();
        tx.send(ServerEvent::MatchEnded { lobby_id: 1 }).unwrap();
        drop(tx);

        assert_eq!(
            feed.next_event().await,
            Some(ServerEvent::MatchEnded { lobby_id: 1 })
        );
        assert_eq!(feed.next_event().await, None);
    }
}
