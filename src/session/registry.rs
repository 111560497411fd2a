//! Per-player socket registry with disconnect debouncing
//!
//! A player may hold several sockets at once (one per open tab). The
//! registry tracks them, answers "is this player connected", and can arm a
//! one-shot watcher that runs a callback only if the player is still
//! disconnected when the timer expires.

use crate::transport::Socket;
use crate::types::PlayerId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Pending disconnect watcher for one player
struct Watcher {
    generation: u64,
    stop: oneshot::Sender<()>,
}

#[derive(Default)]
struct RegistryState {
    sockets: HashMap<PlayerId, Vec<Arc<dyn Socket>>>,
    watchers: HashMap<PlayerId, Watcher>,
    next_generation: u64,
}

/// Tracks which live sockets belong to which player
///
/// All state sits behind one read/write lock; every operation is O(1) in the
/// number of players and linear only in a single player's socket count.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a socket for a player
    ///
    /// On the player's first connection any pending disconnect watcher is
    /// signalled to stop without running its callback.
    pub fn add(&self, player_id: &str, socket: Arc<dyn Socket>) {
        let mut state = self.write();
        let sockets = state.sockets.entry(player_id.to_string()).or_default();
        sockets.push(socket);

        if sockets.len() == 1 {
            if let Some(watcher) = state.watchers.remove(player_id) {
                debug!("Player {} reconnected, cancelling disconnect watcher", player_id);
                let _ = watcher.stop.send(());
            }
        }
    }

    /// Remove the socket with `session_id` from a player's set
    ///
    /// Order of the remaining sockets is not preserved. The player's entry is
    /// dropped entirely once the set is empty.
    pub fn remove(&self, session_id: &str, player_id: &str) {
        let mut state = self.write();
        let Some(sockets) = state.sockets.get_mut(player_id) else {
            return;
        };

        if let Some(index) = sockets.iter().position(|s| s.id() == session_id) {
            sockets.swap_remove(index);
        }

        if sockets.is_empty() {
            state.sockets.remove(player_id);
        }
    }

    /// The player's live sockets; `None` when the player has no connection
    pub fn sockets(&self, player_id: &str) -> Option<Vec<Arc<dyn Socket>>> {
        self.read().sockets.get(player_id).cloned()
    }

    pub fn is_connected(&self, player_id: &str) -> bool {
        self.read().sockets.contains_key(player_id)
    }

    pub fn connection_count(&self, player_id: &str) -> usize {
        self.read()
            .sockets
            .get(player_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of players with at least one socket
    pub fn connected_players(&self) -> usize {
        self.read().sockets.len()
    }

    /// Total sockets across all players
    pub fn total_sockets(&self) -> usize {
        self.read().sockets.values().map(Vec::len).sum()
    }

    /// Whether a disconnect watcher is armed for the player
    pub fn has_pending_watcher(&self, player_id: &str) -> bool {
        self.read().watchers.contains_key(player_id)
    }

    /// Run `callback` after `duration` if the player is still disconnected
    ///
    /// Arming a new watcher for the same player replaces the previous one,
    /// which then exits without firing. A reconnect via [`add`](Self::add)
    /// cancels the watcher.
    pub fn after_disconnected<F, Fut>(&self, player_id: &str, duration: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let generation = {
            let mut state = self.write();
            state.next_generation += 1;
            let generation = state.next_generation;
            state.watchers.insert(
                player_id.to_string(),
                Watcher {
                    generation,
                    stop: stop_tx,
                },
            );
            generation
        };

        let registry = self.clone();
        let player_id = player_id.to_string();

        tokio::spawn(async move {
            let expired = tokio::select! {
                _ = tokio::time::sleep(duration) => true,
                _ = stop_rx => false,
            };

            {
                let mut state = registry.write();
                if state
                    .watchers
                    .get(&player_id)
                    .is_some_and(|w| w.generation == generation)
                {
                    state.watchers.remove(&player_id);
                }
            }

            if expired && !registry.is_connected(&player_id) {
                debug!("Player {} still disconnected after {:?}", player_id, duration);
                callback().await;
            }
        });
    }
}
