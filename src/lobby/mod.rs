//! Lobby lifecycle for the matchmaking service
//!
//! Slot layout and eligibility live in [`slots`], the lobby record in
//! [`instance`], persistence behind [`store::LobbyStore`], and every
//! transition in [`manager::LobbyManager`].

pub mod hooks;
pub mod instance;
pub mod manager;
pub mod slots;
pub mod store;

// Re-export commonly used types
pub use hooks::LobbyHooks;
pub use instance::{ConnectInfo, Lobby, LobbyListData, LobbyOptions, LobbyView, SlotEntry};
pub use manager::{
    ClassRequirement, CreateLobby, LobbyCollaborators, LobbyManager, LobbyManagerStats,
    RequirementKind, ServerSource, SubstituteSlot,
};
pub use store::{InMemoryLobbyStore, LobbyStore};
