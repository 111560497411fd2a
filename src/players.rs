//! Player identity and profile lookups

use crate::error::{LobbyError, Result};
use crate::types::{Player, PlayerId, TwitchRestriction};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Access to player records and the social checks used by join restrictions
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Resolve an authenticated session token
    async fn player_by_token(&self, token: &str) -> Result<Player>;

    async fn player(&self, player_id: &str) -> Result<Player>;

    async fn save_player(&self, player: Player) -> Result<()>;

    async fn in_steam_group(&self, player_id: &str, group: &str) -> Result<bool>;

    /// Whether the player's Twitch account passes the channel restriction
    async fn twitch_allowed(
        &self,
        player: &Player,
        channel: &str,
        restriction: TwitchRestriction,
    ) -> Result<bool>;

    /// Count a completed lobby towards the player's stats
    async fn record_lobby_played(&self, player_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    players: HashMap<PlayerId, Player>,
    tokens: HashMap<String, PlayerId>,
    steam_groups: HashMap<String, HashSet<PlayerId>>,
    /// channel -> twitch names
    followers: HashMap<String, HashSet<String>>,
    subscribers: HashMap<String, HashSet<String>>,
}

/// Directory kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, DirectoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, player: Player) {
        self.write().players.insert(player.id.clone(), player);
    }

    /// Register a session token for a player
    pub fn issue_token(&self, token: &str, player_id: &str) {
        self.write()
            .tokens
            .insert(token.to_string(), player_id.to_string());
    }

    pub fn add_group_member(&self, group: &str, player_id: &str) {
        self.write()
            .steam_groups
            .entry(group.to_string())
            .or_default()
            .insert(player_id.to_string());
    }

    pub fn add_follower(&self, channel: &str, twitch_name: &str) {
        self.write()
            .followers
            .entry(channel.to_string())
            .or_default()
            .insert(twitch_name.to_string());
    }

    pub fn add_subscriber(&self, channel: &str, twitch_name: &str) {
        self.write()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .insert(twitch_name.to_string());
    }
}

#[async_trait]
impl PlayerDirectory for InMemoryPlayerDirectory {
    async fn player_by_token(&self, token: &str) -> Result<Player> {
        let state = self.read();
        let player_id = state
            .tokens
            .get(token)
            .ok_or_else(|| anyhow::Error::from(LobbyError::unauthorized("Invalid session token")))?;
        state.players.get(player_id).cloned().ok_or_else(|| {
            LobbyError::PlayerNotFound {
                player_id: player_id.clone(),
            }
            .into()
        })
    }

    async fn player(&self, player_id: &str) -> Result<Player> {
        self.read().players.get(player_id).cloned().ok_or_else(|| {
            LobbyError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into()
        })
    }

    async fn save_player(&self, player: Player) -> Result<()> {
        self.insert(player);
        Ok(())
    }

    async fn in_steam_group(&self, player_id: &str, group: &str) -> Result<bool> {
        Ok(self
            .read()
            .steam_groups
            .get(group)
            .is_some_and(|members| members.contains(player_id)))
    }

    async fn twitch_allowed(
        &self,
        player: &Player,
        channel: &str,
        restriction: TwitchRestriction,
    ) -> Result<bool> {
        let Some(name) = player.twitch_name.as_deref() else {
            return Ok(restriction == TwitchRestriction::None);
        };
        // The channel owner always passes
        if name == channel {
            return Ok(true);
        }

        let state = self.read();
        let table = match restriction {
            TwitchRestriction::None => return Ok(true),
            TwitchRestriction::Followers => &state.followers,
            TwitchRestriction::Subscribers => &state.subscribers,
        };
        Ok(table.get(channel).is_some_and(|names| names.contains(name)))
    }

    async fn record_lobby_played(&self, player_id: &str) -> Result<()> {
        let mut state = self.write();
        let player = state.players.get_mut(player_id).ok_or_else(|| {
            anyhow::Error::from(LobbyError::PlayerNotFound {
                player_id: player_id.to_string(),
            })
        })?;
        player.stats.lobbies += 1;
        Ok(())
    }
}
