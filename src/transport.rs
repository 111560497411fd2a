//! Socket and room primitives of the real-time transport layer
//!
//! The websocket server itself lives outside this crate. Everything here
//! talks to it through [`Socket`] (one live connection) and [`Transport`]
//! (room membership and room-wide broadcast).

use crate::error::Result;
use crate::types::SocketId;
use crate::utils::generate_socket_id;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// A single live client connection
pub trait Socket: Send + Sync {
    /// Transport-assigned session id
    fn id(&self) -> &str;

    /// Queue a named event for delivery to this connection
    fn emit(&self, event: &str, payload: &Value) -> Result<()>;
}

/// Room primitives provided by the transport server
pub trait Transport: Send + Sync {
    /// Subscribe a socket to a room
    fn join_room(&self, socket_id: &str, room: &str);

    /// Unsubscribe a socket from a room
    fn leave_room(&self, socket_id: &str, room: &str);

    /// Deliver an event to every socket subscribed to `room`
    fn broadcast_to_room(&self, room: &str, event: &str, payload: &Value);
}

/// Event captured by the mock transport types
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: String,
    pub payload: Value,
}

/// Socket that records everything emitted to it
#[derive(Debug)]
pub struct MockSocket {
    id: SocketId,
    emitted: Mutex<Vec<RecordedEvent>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::with_id(generate_socket_id())
    }

    pub fn with_id(id: impl Into<SocketId>) -> Self {
        Self {
            id: id.into(),
            emitted: Mutex::new(Vec::new()),
        }
    }

    /// All events emitted so far
    pub fn emitted(&self) -> Vec<RecordedEvent> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events emitted with the given name
    pub fn emitted_named(&self, event: &str) -> Vec<RecordedEvent> {
        self.emitted()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }
}

impl Default for MockSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket for MockSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                event: event.to_string(),
                payload: payload.clone(),
            });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockTransportState {
    rooms: HashMap<String, HashSet<SocketId>>,
    broadcasts: Vec<(String, RecordedEvent)>,
}

/// Transport that tracks room membership and records room broadcasts
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockTransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket ids currently subscribed to `room`
    pub fn room_members(&self, room: &str) -> HashSet<SocketId> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .get(room)
            .cloned()
            .unwrap_or_default()
    }

    /// Room broadcasts with the given event name, as `(room, event)` pairs
    pub fn broadcasts_named(&self, event: &str) -> Vec<(String, RecordedEvent)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broadcasts
            .iter()
            .filter(|(_, e)| e.event == event)
            .cloned()
            .collect()
    }

    pub fn clear_broadcasts(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broadcasts
            .clear();
    }
}

impl Transport for MockTransport {
    fn join_room(&self, socket_id: &str, room: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id.to_string());
    }

    fn leave_room(&self, socket_id: &str, room: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(socket_id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    fn broadcast_to_room(&self, room: &str, event: &str, payload: &Value) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .broadcasts
            .push((
                room.to_string(),
                RecordedEvent {
                    event: event.to_string(),
                    payload: payload.clone(),
                },
            ));
    }
}
