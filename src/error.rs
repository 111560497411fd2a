//! Error types for the lobby service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Specific failure reasons are carried by
//! [`LobbyError`], which callers can recover with `downcast_ref`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Broad classification of a failure, used to decide whether side effects
/// may already have happened and how the failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing argument, rejected before any mutation
    Validation,
    /// Actor lacks the role or ownership required
    Authorization,
    /// Lobby or slot is in a state that forbids the action
    StateConflict,
    /// Reservation provider or game server failed
    ExternalDependency,
    /// Unknown lobby, player or server id
    NotFound,
    /// Lock poisoning and other programming errors
    Internal,
}

/// Custom error types for specific lobby scenarios
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("{reason}")]
    InvalidArgument { reason: String },

    #[error("{reason}")]
    Unauthorized { reason: String },

    #[error("You can't {action} yourself.")]
    SelfTarget { action: String },

    #[error("{reason}")]
    Banned { reason: String },

    #[error("Lobby not found: {lobby_id}")]
    LobbyNotFound { lobby_id: u64 },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Server not found: {server_id}")]
    ServerNotFound { server_id: u64 },

    #[error("{reason}")]
    StateConflict { reason: String },

    #[error("This slot has been filled.")]
    SlotOccupied { slot: usize },

    #[error("{reason}")]
    NotEligible { reason: String },

    #[error("A lobby is already using this server.")]
    HostInUse { host: String },

    #[error("Reservation failed: {message}")]
    ReservationFailed { message: String },

    #[error("Server setup failed: {message}")]
    ProvisioningFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LobbyError {
    /// Map this error onto the failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            LobbyError::InvalidArgument { .. } | LobbyError::ConfigurationError { .. } => {
                ErrorKind::Validation
            }
            LobbyError::Unauthorized { .. }
            | LobbyError::SelfTarget { .. }
            | LobbyError::Banned { .. } => ErrorKind::Authorization,
            LobbyError::StateConflict { .. }
            | LobbyError::SlotOccupied { .. }
            | LobbyError::NotEligible { .. }
            | LobbyError::HostInUse { .. } => ErrorKind::StateConflict,
            LobbyError::ReservationFailed { .. } | LobbyError::ProvisioningFailed { .. } => {
                ErrorKind::ExternalDependency
            }
            LobbyError::LobbyNotFound { .. }
            | LobbyError::PlayerNotFound { .. }
            | LobbyError::ServerNotFound { .. } => ErrorKind::NotFound,
            LobbyError::InternalError { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        LobbyError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        LobbyError::Unauthorized {
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        LobbyError::StateConflict {
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        LobbyError::InternalError {
            message: message.into(),
        }
    }
}

/// Classify an anyhow error produced anywhere in the crate
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<LobbyError>()
        .map(LobbyError::kind)
        .unwrap_or(ErrorKind::Internal)
}
