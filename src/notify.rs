//! Bot chat notifications posted into a lobby's chat room

use crate::broadcast::messages::CHAT_RECEIVE;
use crate::broadcast::Broadcaster;
use crate::types::LobbyId;
use crate::utils::{current_timestamp, public_room};
use serde::Serialize;

/// Posts a short system message to everyone viewing a lobby
pub trait Notifier: Send + Sync {
    fn notify(&self, lobby_id: LobbyId, text: &str);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessage<'a> {
    room: LobbyId,
    message: &'a str,
    timestamp: i64,
    bot: bool,
}

/// Sends `chatReceive` bot messages through the broadcaster
#[derive(Clone)]
pub struct ChatNotifier {
    broadcaster: Broadcaster,
}

impl ChatNotifier {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }
}

impl Notifier for ChatNotifier {
    fn notify(&self, lobby_id: LobbyId, text: &str) {
        self.broadcaster.send_to_room(
            &public_room(lobby_id),
            CHAT_RECEIVE,
            ChatMessage {
                room: lobby_id,
                message: text,
                timestamp: current_timestamp().timestamp(),
                bot: true,
            },
        );
    }
}
