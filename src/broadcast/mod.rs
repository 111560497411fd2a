//! Outbound event delivery to players and rooms

pub mod broadcaster;
pub mod messages;

pub use broadcaster::Broadcaster;
pub use messages::{BroadcastMessage, ReadyUpNotice};
