//! Common types used throughout the lobby service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable external player identifier (platform account id)
pub type PlayerId = String;

/// Unique identifier for lobbies
pub type LobbyId = u64;

/// Identifier of a single live socket connection
pub type SocketId = String;

/// Format of a lobby; decides the class roster and team size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobbyType {
    Debug,
    Sixes,
    Highlander,
    Ultiduo,
    Bball,
    Fours,
}

impl LobbyType {
    pub const ALL: [LobbyType; 6] = [
        LobbyType::Debug,
        LobbyType::Sixes,
        LobbyType::Highlander,
        LobbyType::Ultiduo,
        LobbyType::Bball,
        LobbyType::Fours,
    ];

    /// Parse the client-facing format name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(LobbyType::Debug),
            "6s" => Some(LobbyType::Sixes),
            "highlander" => Some(LobbyType::Highlander),
            "ultiduo" => Some(LobbyType::Ultiduo),
            "bball" => Some(LobbyType::Bball),
            "4v4" => Some(LobbyType::Fours),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LobbyType::Debug => "debug",
            LobbyType::Sixes => "6s",
            LobbyType::Highlander => "highlander",
            LobbyType::Ultiduo => "ultiduo",
            LobbyType::Bball => "bball",
            LobbyType::Fours => "4v4",
        }
    }
}

impl fmt::Display for LobbyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle state of a lobby
///
/// `Waiting` and `ReadyingUp` may alternate; every other transition moves
/// forward only and `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobbyState {
    Initializing,
    Waiting,
    ReadyingUp,
    InProgress,
    Ended,
}

impl LobbyState {
    /// Whether a lobby may move from `self` to `next`
    pub fn can_transition_to(self, next: LobbyState) -> bool {
        use LobbyState::*;
        match (self, next) {
            (Ended, _) => false,
            (_, Ended) => true,
            (Initializing, Waiting) => true,
            (Waiting, ReadyingUp) | (ReadyingUp, Waiting) => true,
            (ReadyingUp, InProgress) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        self != LobbyState::Ended
    }
}

impl fmt::Display for LobbyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LobbyState::Initializing => "initializing",
            LobbyState::Waiting => "waiting",
            LobbyState::ReadyingUp => "readyingUp",
            LobbyState::InProgress => "inProgress",
            LobbyState::Ended => "ended",
        };
        write!(f, "{}", name)
    }
}

/// Team side within a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blu,
}

impl Team {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "red" => Some(Team::Red),
            "blu" => Some(Team::Blu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blu => "blu",
        }
    }
}

/// Site-wide role of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlayerRole {
    #[default]
    Player,
    Moderator,
    Admin,
}

/// What a ban prevents the player from doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BanKind {
    CreateLobby,
    JoinLobby,
    JoinMumbleLobby,
}

/// A time-limited ban record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBan {
    pub kind: BanKind,
    pub until: DateTime<Utc>,
    pub reason: String,
}

/// Experience figures used for slot requirement gating
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Recorded game hours
    pub hours: u32,
    /// Completed lobbies
    pub lobbies: u32,
    /// Reliability score, higher is better
    pub reliability: f64,
}

/// Player information held for the duration of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub role: PlayerRole,
    pub bans: Vec<PlayerBan>,
    pub stats: PlayerStats,
    pub twitch_name: Option<String>,
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: PlayerRole::Player,
            bans: Vec::new(),
            stats: PlayerStats::default(),
            twitch_name: None,
        }
    }

    /// The ban of this kind that expires last, if any is still running
    pub fn active_ban(&self, kind: BanKind, now: DateTime<Utc>) -> Option<&PlayerBan> {
        self.bans
            .iter()
            .filter(|ban| ban.kind == kind && ban.until > now)
            .max_by_key(|ban| ban.until)
    }

    pub fn is_admin(&self) -> bool {
        self.role == PlayerRole::Admin
    }

    /// Admins and moderators
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, PlayerRole::Admin | PlayerRole::Moderator)
    }

    /// Display name, falling back to the id
    pub fn alias(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Geographic region of a game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Continent code, e.g. "EU"
    pub code: String,
    pub name: String,
}

/// Connection info for the server backing a lobby
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    /// `host:port`
    pub host: String,
    pub rcon_password: String,
    pub server_password: String,
}

/// Gating applied to one slot of a lobby
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub hours: u32,
    pub lobbies: u32,
    pub reliability: f64,
}

/// Twitch-based slot restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TwitchRestriction {
    #[default]
    None,
    Followers,
    Subscribers,
}

/// A server saved by an operator for reuse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredServer {
    pub id: u64,
    pub name: String,
    pub address: String,
    pub rcon_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lobby_type_names_roundtrip() {
        for lobby_type in LobbyType::ALL {
            assert_eq!(LobbyType::from_name(lobby_type.name()), Some(lobby_type));
        }
        assert_eq!(LobbyType::from_name("9v9"), None);
    }

    #[test]
    fn test_state_transitions() {
        use LobbyState::*;
        assert!(Initializing.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(ReadyingUp));
        assert!(ReadyingUp.can_transition_to(Waiting));
        assert!(ReadyingUp.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Ended));
        assert!(!InProgress.can_transition_to(Waiting));
        assert!(!Waiting.can_transition_to(Initializing));
        assert!(!Ended.can_transition_to(Ended));
        assert!(!Ended.can_transition_to(Waiting));
    }

    #[test]
    fn test_active_ban_ignores_expired() {
        let now = Utc::now();
        let mut player = Player::new("76561198000000001", "scout");
        player.bans.push(PlayerBan {
            kind: BanKind::JoinLobby,
            until: now - Duration::hours(1),
            reason: "old".to_string(),
        });
        assert!(player.active_ban(BanKind::JoinLobby, now).is_none());

        player.bans.push(PlayerBan {
            kind: BanKind::JoinLobby,
            until: now + Duration::hours(1),
            reason: "griefing".to_string(),
        });
        let ban = player.active_ban(BanKind::JoinLobby, now).unwrap();
        assert_eq!(ban.reason, "griefing");
        assert!(player.active_ban(BanKind::CreateLobby, now).is_none());
    }
}
