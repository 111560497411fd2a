//! Outbound event names and message envelopes

use crate::types::PlayerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room every connected client joins to receive the public lobby list
pub const GLOBAL_ROOM: &str = "0_public";

/// Event names
pub const LOBBY_READY_UP: &str = "lobbyReadyUp";
pub const LOBBY_START: &str = "lobbyStart";
pub const LOBBY_LIST_DATA: &str = "lobbyListData";
pub const LOBBY_DATA: &str = "lobbyData";
pub const LOBBY_JOINED: &str = "lobbyJoined";
pub const LOBBY_LEFT: &str = "lobbyLeft";
pub const SUB_LIST_DATA: &str = "subListData";
pub const CHAT_RECEIVE: &str = "chatReceive";

/// A single queued delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BroadcastMessage {
    /// Every socket currently registered for one player
    Direct {
        player_id: PlayerId,
        event: String,
        payload: Value,
    },
    /// Every socket subscribed to a room
    Room {
        room: String,
        event: String,
        payload: Value,
    },
}

impl BroadcastMessage {
    pub fn event(&self) -> &str {
        match self {
            BroadcastMessage::Direct { event, .. } | BroadcastMessage::Room { event, .. } => event,
        }
    }
}

/// Payload of `lobbyReadyUp`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyUpNotice {
    /// Seconds until unready players are removed
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization_tags_mode() {
        let msg = BroadcastMessage::Room {
            room: "3_private".to_string(),
            event: LOBBY_READY_UP.to_string(),
            payload: json!({"timeout": 30}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["mode"], "room");
        assert_eq!(value["payload"]["timeout"], 30);
        assert_eq!(msg.event(), "lobbyReadyUp");
    }
}
