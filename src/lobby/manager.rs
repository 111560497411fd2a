//! Lobby manager: the state machine behind every lobby action
//!
//! All lobby mutation goes through [`LobbyManager`]. Each read-modify-write
//! of a lobby happens under that lobby's exclusive lock, and the lock is
//! never held across reservation polling or server provisioning.

use crate::broadcast::messages::{
    GLOBAL_ROOM, LOBBY_DATA, LOBBY_LIST_DATA, LOBBY_READY_UP, LOBBY_START, SUB_LIST_DATA,
};
use crate::broadcast::{Broadcaster, ReadyUpNotice};
use crate::config::LobbySettings;
use crate::error::{LobbyError, Result};
use crate::geo::RegionResolver;
use crate::lobby::hooks::LobbyHooks;
use crate::lobby::instance::{Lobby, LobbyListData, LobbyOptions};
use crate::lobby::slots;
use crate::lobby::store::LobbyStore;
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::players::PlayerDirectory;
use crate::provision::ServerProvisioner;
use crate::reservation::{ReservationClient, ReservationRef, ReservationRequest};
use crate::transport::Socket;
use crate::types::{
    BanKind, LobbyId, LobbyState, LobbyType, Player, PlayerId, Requirement, ServerRecord, Team,
    TwitchRestriction,
};
use crate::utils::{
    current_timestamp, generate_password, is_valid_server_address, private_room, public_room,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Statistics about lobby manager operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct LobbyManagerStats {
    /// Lobbies that finished setup
    pub lobbies_created: u64,
    pub lobbies_closed: u64,
    pub ready_ups_started: u64,
    /// Players moved to spectators when a ready-up expired
    pub ready_up_evictions: u64,
    pub games_started: u64,
    pub substitutions: u64,
}

/// Where the server behind a new lobby comes from
#[derive(Debug, Clone)]
pub enum ServerSource {
    /// Address and RCON password supplied by the creator
    Direct {
        address: String,
        rcon_password: String,
    },
    /// A server saved earlier, by id
    Stored { id: u64 },
    /// A fresh booking from the reservation service
    Reservation {
        server_id: u64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },
}

/// Requirement for one class, applied per team
#[derive(Debug, Clone)]
pub struct ClassRequirement {
    pub class: String,
    pub red: bool,
    pub blu: bool,
    pub requirement: Requirement,
}

/// Validated arguments of a lobby creation
#[derive(Debug, Clone)]
pub struct CreateLobby {
    pub lobby_type: LobbyType,
    pub map_name: String,
    pub league: String,
    pub server: ServerSource,
    pub whitelist_id: String,
    pub mumble_required: bool,
    pub password: String,
    pub steam_group: Option<String>,
    pub twitch_restriction: TwitchRestriction,
    pub class_requirements: Vec<ClassRequirement>,
    /// Applied to every slot before the class requirements
    pub general_requirement: Option<Requirement>,
}

/// Field changed by a requirement update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    Hours,
    Lobbies,
    Reliability,
}

impl RequirementKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hours" => Some(RequirementKind::Hours),
            "lobbies" => Some(RequirementKind::Lobbies),
            "reliability" => Some(RequirementKind::Reliability),
            _ => None,
        }
    }
}

/// An open seat in a running lobby, advertised to substitutes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstituteSlot {
    pub lobby_id: LobbyId,
    pub slot: usize,
    pub team: Team,
    pub class: String,
    pub map_name: String,
    #[serde(rename = "type")]
    pub lobby_type: String,
}

/// Payload of `subListData`
#[derive(Debug, Clone, Serialize)]
pub struct SubstituteList {
    pub slots: Vec<SubstituteSlot>,
}

/// Collaborators the manager talks to
#[derive(Clone)]
pub struct LobbyCollaborators {
    pub store: Arc<dyn LobbyStore>,
    pub players: Arc<dyn PlayerDirectory>,
    pub reservations: ReservationClient,
    pub resolver: Arc<dyn RegionResolver>,
    pub provisioner: Arc<dyn ServerProvisioner>,
    pub notifier: Arc<dyn Notifier>,
}

/// How far a creation got before failing
#[derive(Default)]
struct CreationProgress {
    lobby_id: Option<LobbyId>,
}

type LockTable<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// Clears the in-flight creation marker for a player when dropped
struct CreationGuard {
    creating: Arc<Mutex<HashSet<PlayerId>>>,
    player_id: PlayerId,
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        self.creating
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.player_id);
    }
}

/// Holds a player's seat lock; the table entry goes once nobody waits on it
struct SeatGuard {
    guard: Option<OwnedMutexGuard<()>>,
    seats: LockTable<PlayerId>,
    player_id: PlayerId,
}

impl Drop for SeatGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut seats = self.seats.lock().unwrap_or_else(PoisonError::into_inner);
        if seats
            .get(&self.player_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            seats.remove(&self.player_id);
        }
    }
}

/// The main lobby manager
#[derive(Clone)]
pub struct LobbyManager {
    store: Arc<dyn LobbyStore>,
    players: Arc<dyn PlayerDirectory>,
    reservations: ReservationClient,
    resolver: Arc<dyn RegionResolver>,
    provisioner: Arc<dyn ServerProvisioner>,
    notifier: Arc<dyn Notifier>,
    broadcaster: Broadcaster,
    hooks: LobbyHooks,
    settings: LobbySettings,
    /// One exclusive lock per lobby
    locks: LockTable<LobbyId>,
    /// Serializes slot changes of one player across lobbies
    seats: LockTable<PlayerId>,
    /// Players with a creation in flight
    creating: Arc<Mutex<HashSet<PlayerId>>>,
    stats: Arc<RwLock<LobbyManagerStats>>,
    metrics_collector: Arc<MetricsCollector>,
}

impl LobbyManager {
    /// Create a new lobby manager
    pub fn new(
        collaborators: LobbyCollaborators,
        broadcaster: Broadcaster,
        hooks: LobbyHooks,
        settings: LobbySettings,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(collaborators, broadcaster, hooks, settings, metrics_collector)
    }

    /// Create a new lobby manager with metrics collector
    pub fn with_metrics(
        collaborators: LobbyCollaborators,
        broadcaster: Broadcaster,
        hooks: LobbyHooks,
        settings: LobbySettings,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store: collaborators.store,
            players: collaborators.players,
            reservations: collaborators.reservations,
            resolver: collaborators.resolver,
            provisioner: collaborators.provisioner,
            notifier: collaborators.notifier,
            broadcaster,
            hooks,
            settings,
            locks: Arc::new(Mutex::new(HashMap::new())),
            seats: Arc::new(Mutex::new(HashMap::new())),
            creating: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(RwLock::new(LobbyManagerStats::default())),
            metrics_collector,
        }
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn players(&self) -> &Arc<dyn PlayerDirectory> {
        &self.players
    }

    pub async fn get_lobby(&self, lobby_id: LobbyId) -> Result<Lobby> {
        self.store.load(lobby_id).await
    }

    pub async fn get_stats(&self) -> Result<LobbyManagerStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| LobbyError::internal("Failed to acquire stats lock"))?;
        Ok(stats.clone())
    }

    fn update_stats(&self, update: impl FnOnce(&mut LobbyManagerStats)) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut stats);
    }

    async fn lock_lobby(&self, lobby_id: LobbyId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(lobby_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Lock two lobbies, lower id first
    async fn lock_pair(
        &self,
        first: LobbyId,
        second: LobbyId,
    ) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        if first < second {
            let low = self.lock_lobby(first).await;
            (low, self.lock_lobby(second).await)
        } else {
            let low = self.lock_lobby(second).await;
            (self.lock_lobby(first).await, low)
        }
    }

    async fn lock_seat(&self, player_id: &str) -> SeatGuard {
        let lock = self
            .seats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player_id.to_string())
            .or_default()
            .clone();
        SeatGuard {
            guard: Some(lock.lock_owned().await),
            seats: self.seats.clone(),
            player_id: player_id.to_string(),
        }
    }

    fn forget_lock(&self, lobby_id: LobbyId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lobby_id);
    }

    fn begin_creation(&self, player_id: &str) -> Result<CreationGuard> {
        let mut creating = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
        if !creating.insert(player_id.to_string()) {
            return Err(LobbyError::conflict("You are already creating a lobby.").into());
        }
        Ok(CreationGuard {
            creating: self.creating.clone(),
            player_id: player_id.to_string(),
        })
    }

    // ---- Creation ----

    /// Create a lobby and bring it to `Waiting`
    ///
    /// Blocks while a reserved server becomes ready and while the server is
    /// provisioned. Any failure after the server is resolved undoes the host
    /// claim, the stored lobby and the reservation before returning.
    pub async fn create_lobby(
        &self,
        creator: &Player,
        requester_address: &str,
        request: CreateLobby,
    ) -> Result<LobbyId> {
        let timer = self.metrics_collector.start_timer();
        info!(
            "Player {} creating {} lobby on {}",
            creator.id,
            request.lobby_type.name(),
            request.map_name
        );

        if let Some(ban) = creator.active_ban(BanKind::CreateLobby, current_timestamp()) {
            return Err(LobbyError::Banned {
                reason: format!(
                    "You've been banned from creating lobbies till {} ({})",
                    ban.until.to_rfc2822(),
                    ban.reason
                ),
            }
            .into());
        }

        let requirements = build_requirements(&request)?;
        if request.twitch_restriction != TwitchRestriction::None && creator.twitch_name.is_none() {
            return Err(LobbyError::invalid("Please connect your twitch account first.").into());
        }

        let may_hold_several = creator.is_privileged() && self.settings.privileged_multi_create;
        if !may_hold_several
            && self
                .store
                .active_lobby_created_by(&creator.id)
                .await?
                .is_some()
        {
            return Err(LobbyError::conflict("You have already created a lobby.").into());
        }
        let _creation = self.begin_creation(&creator.id)?;

        let (server, reservation) = self
            .resolve_server(creator, requester_address, &request)
            .await?;

        if let Err(e) = self.store.claim_host(&server.host).await {
            if let Some(reference) = reservation {
                self.reservations.rollback(reference).await;
            }
            return Err(e);
        }

        let host = server.host.clone();
        let mut progress = CreationProgress::default();
        let result = self
            .finish_creation(
                creator,
                request,
                requirements,
                server,
                reservation.clone(),
                &mut progress,
            )
            .await;

        match result {
            Ok(lobby) => {
                self.metrics_collector
                    .record_lobby_created(lobby.lobby_type());
                self.metrics_collector
                    .record_lobby_operation("create", timer.stop());
                self.update_stats(|s| s.lobbies_created += 1);
                info!("Lobby {} created by {}", lobby.id(), creator.id);
                self.broadcast_lobby_list().await;
                Ok(lobby.id())
            }
            Err(e) => {
                warn!("Lobby creation by {} failed: {}", creator.id, e);
                self.abort_creation(progress.lobby_id, &host, reservation)
                    .await;
                Err(e)
            }
        }
    }

    async fn resolve_server(
        &self,
        creator: &Player,
        requester_address: &str,
        request: &CreateLobby,
    ) -> Result<(ServerRecord, Option<ReservationRef>)> {
        match &request.server {
            ServerSource::Direct {
                address,
                rcon_password,
            } => Ok((
                ServerRecord {
                    host: address.clone(),
                    rcon_password: rcon_password.clone(),
                    server_password: generate_password(),
                },
                None,
            )),
            ServerSource::Stored { id } => {
                let stored = self.store.stored_server(*id).await?;
                Ok((
                    ServerRecord {
                        host: stored.address,
                        rcon_password: stored.rcon_password,
                        server_password: generate_password(),
                    },
                    None,
                ))
            }
            ServerSource::Reservation {
                server_id,
                starts_at,
                ends_at,
            } => {
                let whitelist_id = if request.whitelist_id.is_empty() {
                    0
                } else {
                    request
                        .whitelist_id
                        .parse()
                        .map_err(|_| LobbyError::invalid("Invalid whitelist id"))?
                };
                let booking = ReservationRequest {
                    starts_at: *starts_at,
                    ends_at: *ends_at,
                    server_id: *server_id,
                    whitelist_id,
                    rcon: generate_password(),
                    password: generate_password(),
                };
                let (reference, reservation) = self
                    .reservations
                    .create(requester_address, &booking, &creator.id)
                    .await?;
                Ok((
                    ServerRecord {
                        host: reservation.server_address,
                        rcon_password: booking.rcon,
                        server_password: booking.password,
                    },
                    Some(reference),
                ))
            }
        }
    }

    async fn finish_creation(
        &self,
        creator: &Player,
        request: CreateLobby,
        requirements: BTreeMap<usize, Requirement>,
        server: ServerRecord,
        reservation: Option<ReservationRef>,
        progress: &mut CreationProgress,
    ) -> Result<Lobby> {
        let region = self.resolver.region(&server.host);
        if region.is_none() && self.settings.enforce_region {
            return Err(LobbyError::invalid("Couldn't find the region for this server.").into());
        }

        let region_code = region.as_ref().map(|r| r.code.as_str());
        if self
            .store
            .map_region_format_exists(&request.map_name, region_code, request.lobby_type)
            .await?
        {
            return Err(LobbyError::conflict(
                "Your region already has a lobby with this map and format.",
            )
            .into());
        }

        let options = LobbyOptions {
            mumble_required: request.mumble_required,
            whitelist_id: request.whitelist_id,
            password: request.password,
            steam_group: request.steam_group,
            twitch_channel: match request.twitch_restriction {
                TwitchRestriction::None => None,
                _ => creator.twitch_name.clone(),
            },
            twitch_restriction: request.twitch_restriction,
        };

        let lobby_id = self.store.next_id().await?;
        let mut lobby = Lobby::new(
            lobby_id,
            request.lobby_type,
            request.map_name,
            request.league,
            server,
            creator.id.clone(),
            options,
        );
        lobby.set_region(region);
        lobby.set_reservation(reservation.clone());
        for (slot, requirement) in requirements {
            lobby.set_requirement(slot, requirement);
        }

        self.store.save(&lobby).await?;
        progress.lobby_id = Some(lobby_id);
        debug!("Lobby {} stored in {} state", lobby_id, lobby.state());

        if let Some(reference) = &reservation {
            self.reservations.wait_until_ready(reference).await?;
        }

        self.provisioner
            .setup_server(&lobby)
            .await
            .map_err(|e| match e.downcast::<LobbyError>() {
                Ok(known) => anyhow::Error::from(known),
                Err(other) => LobbyError::ProvisioningFailed {
                    message: other.to_string(),
                }
                .into(),
            })?;

        let _lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() != LobbyState::Initializing {
            return Err(LobbyError::conflict("Lobby was closed during setup.").into());
        }
        lobby.set_state(LobbyState::Waiting)?;
        self.store.save(&lobby).await?;
        Ok(lobby)
    }

    async fn abort_creation(
        &self,
        lobby_id: Option<LobbyId>,
        host: &str,
        reservation: Option<ReservationRef>,
    ) {
        if let Some(lobby_id) = lobby_id {
            let lock = self.lock_lobby(lobby_id).await;
            // A close during setup already gave back the host and reservation,
            // and the host may belong to another lobby by now
            let closed = matches!(
                self.store.load(lobby_id).await,
                Ok(lobby) if lobby.state() == LobbyState::Ended
            );
            if closed {
                drop(lock);
                self.forget_lock(lobby_id);
                debug!("Lobby {} was closed during setup", lobby_id);
                return;
            }
            if let Err(e) = self.store.delete(lobby_id).await {
                error!("Failed to delete aborted lobby {}: {}", lobby_id, e);
            }
            drop(lock);
            self.forget_lock(lobby_id);
        }
        if let Err(e) = self.store.release_host(host).await {
            error!("Failed to release host {}: {}", host, e);
        }
        if let Some(reference) = reservation {
            self.reservations.rollback(reference).await;
        }
    }

    // ---- Membership ----

    /// Seat a player in the slot for `team`/`class`
    ///
    /// A slot held in another lobby is given up in the same step, and only
    /// once the new slot is secured. Joining a running lobby is only possible
    /// into a vacated slot, and the joining socket then receives `lobbyStart`
    /// directly.
    pub async fn join_lobby(
        &self,
        player: &Player,
        socket: &dyn Socket,
        lobby_id: LobbyId,
        team: &str,
        class: &str,
        password: &str,
    ) -> Result<()> {
        let timer = self.metrics_collector.start_timer();
        let now = current_timestamp();

        if let Some(ban) = player.active_ban(BanKind::JoinLobby, now) {
            return Err(LobbyError::Banned {
                reason: format!(
                    "You have been banned from joining lobbies till {} ({})",
                    ban.until.to_rfc2822(),
                    ban.reason
                ),
            }
            .into());
        }

        let snapshot = self.store.load(lobby_id).await?;
        if snapshot.options().mumble_required {
            if let Some(ban) = player.active_ban(BanKind::JoinMumbleLobby, now) {
                return Err(LobbyError::Banned {
                    reason: format!(
                        "You have been banned from joining Mumble lobbies till {} ({})",
                        ban.until.to_rfc2822(),
                        ban.reason
                    ),
                }
                .into());
            }
        }
        ensure_joinable(&snapshot)?;
        let slot = slots::slot_index(snapshot.lobby_type(), team, class)?;
        self.check_restrictions(player, &snapshot, slot, password)
            .await?;

        let _seat = self.lock_seat(&player.id).await;
        let previous = self
            .store
            .playing_lobby_of(&player.id)
            .await?
            .filter(|id| *id != lobby_id);
        let (lock, previous_lock) = match previous {
            Some(previous) => {
                let (lock, previous_lock) = self.lock_pair(lobby_id, previous).await;
                (lock, Some(previous_lock))
            }
            None => (self.lock_lobby(lobby_id).await, None),
        };

        let mut lobby = self.store.load(lobby_id).await?;
        ensure_joinable(&lobby)?;

        let substitution = lobby.state() == LobbyState::InProgress;
        if substitution && !lobby.is_vacated(slot) {
            return Err(LobbyError::SlotOccupied { slot }.into());
        }
        slots::check_eligibility(&player.stats, lobby.requirement(slot))?;

        let rejoin = lobby.slot_of(&player.id).is_some();
        lobby.assign_slot(&player.id, slot)?;

        // Nothing is saved until the target slot and the old lobby both allow the move
        let mut left = None;
        if let Some(previous) = previous {
            let original = self.store.load(previous).await?;
            if original.state() == LobbyState::InProgress {
                return Err(
                    LobbyError::conflict("You're already playing in a running lobby.").into(),
                );
            }
            if original.slot_of(&player.id).is_some() {
                let mut updated = original.clone();
                release_slot(&mut updated, &player.id)?;
                left = Some((original, updated));
            }
        }

        let ready_up = lobby.state() == LobbyState::Waiting && lobby.is_full();
        let deadline = if ready_up {
            let deadline = now
                + chrono::Duration::from_std(self.settings.ready_up_timeout())
                    .map_err(|e| LobbyError::internal(e.to_string()))?;
            lobby.start_ready_up(deadline)?;
            Some(deadline)
        } else {
            None
        };

        if let Some((_, updated)) = &left {
            self.store.save(updated).await?;
        }
        if let Err(e) = self.store.save(&lobby).await {
            if let Some((original, _)) = &left {
                if let Err(restore) = self.store.save(original).await {
                    error!(
                        "Failed to restore {} in lobby {}: {}",
                        player.id,
                        original.id(),
                        restore
                    );
                }
            }
            return Err(e);
        }
        if let Some(deadline) = deadline {
            self.arm_ready_up_timer(lobby_id, deadline);
        }
        drop(previous_lock);
        drop(lock);

        if let Some((_, updated)) = &left {
            debug!("Player {} left lobby {} to join {}", player.id, updated.id(), lobby_id);
            self.hooks.after_leave(updated.id(), &player.id);
            self.broadcast_lobby(updated);
        }

        info!("Player {} joined lobby {} in slot {}", player.id, lobby_id, slot);
        if !rejoin {
            self.hooks.after_join(&lobby, &player.id);
        }
        self.broadcast_lobby(&lobby);

        if ready_up {
            info!("Lobby {} is full, readying up", lobby_id);
            self.broadcaster.send_to_room(
                &private_room(lobby_id),
                LOBBY_READY_UP,
                ReadyUpNotice {
                    timeout: self.settings.ready_up_timeout_seconds,
                },
            );
            self.metrics_collector.record_ready_up_started();
            self.update_stats(|s| s.ready_ups_started += 1);
        }

        if substitution {
            info!("Player {} substituted into lobby {}", player.id, lobby_id);
            if let Some(connect) = lobby.connect_info(&player.id) {
                let payload = serde_json::to_value(connect)?;
                if let Err(e) = socket.emit(LOBBY_START, &payload) {
                    warn!("Failed to send lobbyStart to {}: {}", socket.id(), e);
                }
            }
            self.metrics_collector.record_substitution();
            self.update_stats(|s| s.substitutions += 1);
            self.broadcast_sub_list().await;
        }

        self.broadcast_lobby_list().await;
        self.metrics_collector
            .record_lobby_operation("join", timer.stop());
        Ok(())
    }

    async fn check_restrictions(
        &self,
        player: &Player,
        lobby: &Lobby,
        slot: usize,
        password: &str,
    ) -> Result<()> {
        if lobby.is_banned(&player.id) {
            return Err(LobbyError::Banned {
                reason: "You have been banned from this lobby.".to_string(),
            }
            .into());
        }

        let options = lobby.options();
        if !options.password.is_empty() && options.password != password {
            return Err(LobbyError::unauthorized("Invalid password.").into());
        }

        slots::check_eligibility(&player.stats, lobby.requirement(slot))?;

        if let Some(group) = &options.steam_group {
            if !self.players.in_steam_group(&player.id, group).await? {
                return Err(LobbyError::NotEligible {
                    reason: "You aren't a member of the lobby's Steam group.".to_string(),
                }
                .into());
            }
        }

        if let Some(channel) = &options.twitch_channel {
            let restriction = options.twitch_restriction;
            if !self
                .players
                .twitch_allowed(player, channel, restriction)
                .await?
            {
                let reason = match restriction {
                    TwitchRestriction::Subscribers => {
                        "You aren't subscribed to the lobby's Twitch channel."
                    }
                    _ => "You aren't following the lobby's Twitch channel.",
                };
                return Err(LobbyError::NotEligible {
                    reason: reason.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn leave_lobby(&self, player: &Player, lobby_id: LobbyId) -> Result<()> {
        self.remove_to_spectator(lobby_id, &player.id, false).await
    }

    pub async fn kick_player(
        &self,
        actor: &Player,
        lobby_id: LobbyId,
        target_id: &str,
    ) -> Result<()> {
        if actor.id == target_id {
            return Err(LobbyError::SelfTarget {
                action: "kick".to_string(),
            }
            .into());
        }
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id && !actor.is_admin() {
            return Err(LobbyError::unauthorized("Player not authorized to kick players.").into());
        }
        let target = self.players.player(target_id).await?;
        self.remove_to_spectator(lobby_id, &target.id, false).await?;
        info!("{} kicked {} from lobby {}", actor.id, target.id, lobby_id);
        Ok(())
    }

    pub async fn ban_player(
        &self,
        actor: &Player,
        lobby_id: LobbyId,
        target_id: &str,
    ) -> Result<()> {
        if actor.id == target_id {
            return Err(LobbyError::SelfTarget {
                action: "ban".to_string(),
            }
            .into());
        }
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id && !actor.is_privileged() {
            return Err(LobbyError::unauthorized("Player not authorized to ban players.").into());
        }
        let target = self.players.player(target_id).await?;
        self.remove_to_spectator(lobby_id, &target.id, true).await?;
        info!("{} banned {} from lobby {}", actor.id, target.id, lobby_id);
        Ok(())
    }

    async fn remove_to_spectator(&self, lobby_id: LobbyId, player_id: &str, ban: bool) -> Result<()> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        match lobby.state() {
            LobbyState::InProgress => {
                return Err(LobbyError::conflict("Lobby is in progress.").into())
            }
            LobbyState::Ended => return Err(LobbyError::conflict("Lobby has closed.").into()),
            _ => {}
        }

        release_slot(&mut lobby, player_id)?;
        lobby.add_spectator(player_id);
        if ban {
            lobby.ban(player_id);
        }
        self.store.save(&lobby).await?;
        drop(lock);

        self.hooks.after_leave(lobby_id, player_id);
        self.broadcast_lobby(&lobby);
        self.broadcast_lobby_list().await;
        Ok(())
    }

    /// Watch a lobby from `socket`
    ///
    /// Rooms of other lobbies the player spectates are left first. Spectating
    /// the same lobby twice only resends its state.
    pub async fn spectator_join(
        &self,
        player: &Player,
        socket: &dyn Socket,
        lobby_id: LobbyId,
    ) -> Result<()> {
        let mut lobby = self.store.load(lobby_id).await?;

        let mut already_spectating = false;
        for spectating in self.store.spectating_lobbies_of(&player.id).await? {
            if spectating == lobby_id {
                already_spectating = true;
            } else {
                self.hooks.after_spectator_leave(spectating, socket.id());
            }
        }

        let added = !already_spectating && lobby.slot_of(&player.id).is_none();
        if added {
            let _lock = self.lock_lobby(lobby_id).await;
            lobby = self.store.load(lobby_id).await?;
            lobby.add_spectator(&player.id);
            self.store.save(&lobby).await?;
        }

        self.hooks.after_spectate(lobby_id, socket.id());
        self.broadcaster
            .send_to_player(&player.id, LOBBY_DATA, lobby.view());
        if added {
            debug!("Player {} spectating lobby {}", player.id, lobby_id);
            self.broadcast_lobby(&lobby);
        }
        Ok(())
    }

    pub async fn spectator_leave(
        &self,
        player: &Player,
        socket: &dyn Socket,
        lobby_id: LobbyId,
    ) -> Result<()> {
        let lobby = self.store.load(lobby_id).await?;
        if lobby.is_spectator(&player.id) {
            let lock = self.lock_lobby(lobby_id).await;
            let mut lobby = self.store.load(lobby_id).await?;
            lobby.remove_spectator(&player.id);
            self.store.save(&lobby).await?;
            drop(lock);
            self.broadcast_lobby(&lobby);
        }

        // Occupants keep following their own lobby
        if lobby.slot_of(&player.id).is_none() {
            self.hooks.after_spectator_leave(lobby_id, socket.id());
        }
        Ok(())
    }

    /// Drop a player who stayed offline from every lobby they spectate
    pub async fn player_offline(&self, player_id: &str) -> Result<()> {
        for lobby_id in self.store.spectating_lobbies_of(player_id).await? {
            let lock = self.lock_lobby(lobby_id).await;
            let mut lobby = self.store.load(lobby_id).await?;
            let removed = lobby.remove_spectator(player_id);
            if removed {
                self.store.save(&lobby).await?;
            }
            drop(lock);
            if removed {
                debug!("Removed offline spectator {} from lobby {}", player_id, lobby_id);
                self.broadcast_lobby(&lobby);
            }
        }
        Ok(())
    }

    // ---- Ready-up ----

    fn arm_ready_up_timer(&self, lobby_id: LobbyId, deadline: DateTime<Utc>) {
        let manager = self.clone();
        let timeout = self.settings.ready_up_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = manager.ready_up_expired(lobby_id, deadline).await {
                error!("Ready-up check for lobby {} failed: {}", lobby_id, e);
            }
        });
    }

    /// Evict unready players if the ready-up armed at `deadline` is still running
    async fn ready_up_expired(&self, lobby_id: LobbyId, deadline: DateTime<Utc>) -> Result<()> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;

        let same_ready_up = lobby.ready_up_deadline().map(|d| d.timestamp_millis())
            == Some(deadline.timestamp_millis());
        if lobby.state() != LobbyState::ReadyingUp || !same_ready_up {
            debug!(
                "Ready-up of lobby {} already resolved ({})",
                lobby_id,
                lobby.state()
            );
            return Ok(());
        }

        let evicted = lobby.remove_unready_players();
        lobby.set_state(LobbyState::Waiting)?;
        lobby.unready_all();
        self.store.save(&lobby).await?;
        drop(lock);

        info!(
            "Ready-up of lobby {} expired, {} players moved to spectators",
            lobby_id,
            evicted.len()
        );
        for player_id in &evicted {
            self.hooks.after_leave(lobby_id, player_id);
        }
        self.metrics_collector
            .record_ready_up_evictions(evicted.len());
        self.update_stats(|s| s.ready_up_evictions += evicted.len() as u64);

        self.broadcast_lobby(&lobby);
        self.broadcast_lobby_list().await;
        Ok(())
    }

    /// Mark a player ready; the game starts once everyone is
    pub async fn player_ready(&self, player: &Player, lobby_id: LobbyId) -> Result<()> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() != LobbyState::ReadyingUp {
            return Err(LobbyError::conflict("Lobby hasn't been filled up yet.").into());
        }

        lobby.set_ready(&player.id, true)?;
        let starting = lobby.all_ready();
        if starting {
            lobby.set_state(LobbyState::InProgress)?;
        }
        self.store.save(&lobby).await?;
        drop(lock);

        self.broadcast_lobby(&lobby);
        if starting {
            info!("Everyone in lobby {} is ready, starting", lobby_id);
            for player_id in lobby.players() {
                if let Some(connect) = lobby.connect_info(&player_id) {
                    self.broadcaster
                        .send_to_player(&player_id, LOBBY_START, connect);
                }
            }
            self.metrics_collector
                .record_game_started(lobby.lobby_type());
            self.update_stats(|s| s.games_started += 1);
            self.broadcast_lobby_list().await;
        }
        Ok(())
    }

    /// Cancel the ready-up; everyone has to ready again
    pub async fn player_not_ready(&self, player: &Player, lobby_id: LobbyId) -> Result<()> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() != LobbyState::ReadyingUp {
            return Err(LobbyError::conflict("Lobby hasn't been filled up yet.").into());
        }

        lobby.set_ready(&player.id, false)?;
        lobby.set_state(LobbyState::Waiting)?;
        lobby.unready_all();
        self.store.save(&lobby).await?;
        drop(lock);

        debug!("Player {} unreadied lobby {}", player.id, lobby_id);
        self.broadcast_lobby(&lobby);
        self.broadcast_lobby_list().await;
        Ok(())
    }

    // ---- Owner and restriction changes ----

    /// Apply `change` under the lobby lock, persist and rebroadcast
    async fn mutate<F>(&self, lobby_id: LobbyId, change: F) -> Result<Lobby>
    where
        F: FnOnce(&mut Lobby) -> Result<()>,
    {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() == LobbyState::Ended {
            return Err(LobbyError::conflict("Lobby has closed.").into());
        }
        change(&mut lobby)?;
        self.store.save(&lobby).await?;
        drop(lock);

        self.broadcast_lobby(&lobby);
        self.broadcast_lobby_list().await;
        Ok(lobby)
    }

    pub async fn change_owner(
        &self,
        actor: &Player,
        lobby_id: LobbyId,
        new_owner_id: &str,
    ) -> Result<()> {
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id {
            return Err(
                LobbyError::unauthorized("You aren't authorized to change lobby owner.").into(),
            );
        }
        let new_owner = self.players.player(new_owner_id).await?;

        self.mutate(lobby_id, |lobby| {
            lobby.set_owner(new_owner.id.clone());
            Ok(())
        })
        .await?;

        info!("Lobby {} now owned by {}", lobby_id, new_owner.id);
        self.notifier.notify(
            lobby_id,
            &format!("Lobby leader changed to {}", new_owner.alias()),
        );
        Ok(())
    }

    pub async fn set_requirement(
        &self,
        actor: &Player,
        lobby_id: LobbyId,
        slot: i64,
        kind: RequirementKind,
        value: f64,
    ) -> Result<()> {
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id {
            return Err(
                LobbyError::unauthorized("Only lobby owners can change requirements.").into(),
            );
        }
        let slot = usize::try_from(slot)
            .ok()
            .filter(|s| *s < lobby.capacity())
            .ok_or_else(|| anyhow::Error::from(LobbyError::invalid("Invalid slot.")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(LobbyError::invalid("Invalid requirement value.").into());
        }
        if kind != RequirementKind::Reliability && value.fract() != 0.0 {
            return Err(LobbyError::invalid("Invalid requirement value.").into());
        }

        self.mutate(lobby_id, |lobby| {
            let requirement = lobby.requirement_mut(slot);
            match kind {
                RequirementKind::Hours => requirement.hours = value as u32,
                RequirementKind::Lobbies => requirement.lobbies = value as u32,
                RequirementKind::Reliability => requirement.reliability = value,
            }
            Ok(())
        })
        .await?;
        debug!("Lobby {} slot {} requirement updated", lobby_id, slot);
        Ok(())
    }

    pub async fn remove_twitch_restriction(&self, actor: &Player, lobby_id: LobbyId) -> Result<()> {
        self.ensure_owner_or_staff(actor, lobby_id, "You aren't authorized to do this.")
            .await?;
        self.mutate(lobby_id, |lobby| {
            lobby.clear_twitch_restriction();
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn remove_steam_restriction(&self, actor: &Player, lobby_id: LobbyId) -> Result<()> {
        self.ensure_owner_or_staff(actor, lobby_id, "You aren't authorized to do this.")
            .await?;
        self.mutate(lobby_id, |lobby| {
            lobby.clear_steam_restriction();
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn ensure_owner_or_staff(
        &self,
        actor: &Player,
        lobby_id: LobbyId,
        denied: &str,
    ) -> Result<Lobby> {
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id && !actor.is_privileged() {
            return Err(LobbyError::unauthorized(denied).into());
        }
        Ok(lobby)
    }

    // ---- Server ----

    /// Re-execute the lobby config on its server
    pub async fn server_reset(&self, actor: &Player, lobby_id: LobbyId) -> Result<()> {
        let lobby = self
            .ensure_owner_or_staff(actor, lobby_id, "You are not authorized to reset server.")
            .await?;
        if lobby.state() == LobbyState::Ended {
            return Err(LobbyError::conflict("Lobby has ended").into());
        }
        self.provisioner.reexec_config(&lobby).await
    }

    /// Check RCON credentials for a server not used by any lobby
    pub async fn server_verify(&self, address: &str, rcon_password: &str) -> Result<()> {
        if !is_valid_server_address(address) {
            return Err(LobbyError::invalid("Invalid Server Address").into());
        }
        self.store.claim_host(address).await?;
        let record = ServerRecord {
            host: address.to_string(),
            rcon_password: rcon_password.to_string(),
            server_password: String::new(),
        };
        let result = self.provisioner.verify(&record).await;
        if let Err(e) = self.store.release_host(address).await {
            error!("Failed to release host {} after verify: {}", address, e);
        }
        result
    }

    // ---- Closing ----

    /// Close a lobby on behalf of its creator or an admin
    pub async fn close_lobby(&self, actor: &Player, lobby_id: LobbyId) -> Result<()> {
        let lobby = self.store.load(lobby_id).await?;
        if lobby.created_by() != actor.id && !actor.is_admin() {
            return Err(LobbyError::unauthorized("Player not authorized to close lobby.").into());
        }
        self.close(lobby_id, true, false, "closed").await?;
        self.notifier
            .notify(lobby_id, &format!("Lobby closed by {}", actor.alias()));
        Ok(())
    }

    /// Move a lobby to `Ended` and release everything behind it
    ///
    /// Fails only when the lobby is missing or already ended.
    pub async fn close(
        &self,
        lobby_id: LobbyId,
        notify_players: bool,
        graceful: bool,
        reason: &str,
    ) -> Result<()> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() == LobbyState::Ended {
            return Err(LobbyError::conflict("Lobby already closed.").into());
        }
        let was_setup = lobby.state() != LobbyState::Initializing;
        lobby.set_state(LobbyState::Ended)?;
        self.store.save(&lobby).await?;
        drop(lock);
        self.forget_lock(lobby_id);

        info!("Lobby {} closed ({})", lobby_id, reason);
        if let Err(e) = self.store.release_host(&lobby.server().host).await {
            error!("Failed to release host of lobby {}: {}", lobby_id, e);
        }
        if let Err(e) = self.provisioner.end(lobby_id).await {
            warn!("Failed to end server of lobby {}: {}", lobby_id, e);
        }
        if let Some(reference) = lobby.reservation().cloned() {
            let reservations = self.reservations.clone();
            tokio::spawn(async move {
                reservations.rollback(reference).await;
            });
        }

        let occupants = lobby.players();
        if graceful {
            for player_id in &occupants {
                if let Err(e) = self.players.record_lobby_played(player_id).await {
                    warn!("Failed to update stats of {}: {}", player_id, e);
                }
            }
        }
        if notify_players {
            for player_id in &occupants {
                self.hooks.after_leave(lobby_id, player_id);
            }
        }

        if was_setup {
            self.metrics_collector
                .record_lobby_closed(lobby.lobby_type(), reason);
        }
        self.update_stats(|s| s.lobbies_closed += 1);
        self.broadcast_lobby(&lobby);
        self.broadcast_lobby_list().await;
        if lobby.vacated_slots().next().is_some() {
            self.broadcast_sub_list().await;
        }
        Ok(())
    }

    // ---- Game server events ----

    /// A player dropped off the game server
    ///
    /// If they are still absent after the substitute grace period their slot
    /// is opened to substitutes.
    pub async fn player_left_server(&self, lobby_id: LobbyId, player_id: &str) -> Result<()> {
        let Some(lobby) = self.set_in_game(lobby_id, player_id, false).await? else {
            return Ok(());
        };
        let name = self.display_name(player_id).await;
        self.notifier
            .notify(lobby_id, &format!("{} has disconnected from the server.", name));

        if lobby.state() == LobbyState::InProgress {
            let manager = self.clone();
            let grace = self.settings.substitute_grace();
            let player_id = player_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Err(e) = manager.substitute(lobby_id, &player_id, true).await {
                    error!(
                        "Substitute check for {} in lobby {} failed: {}",
                        player_id, lobby_id, e
                    );
                }
            });
        }
        Ok(())
    }

    pub async fn player_joined_server(&self, lobby_id: LobbyId, player_id: &str) -> Result<()> {
        if self.set_in_game(lobby_id, player_id, true).await?.is_some() {
            let name = self.display_name(player_id).await;
            self.notifier
                .notify(lobby_id, &format!("{} has connected to the server.", name));
        }
        Ok(())
    }

    /// The game server asked for a substitute for `player_id`
    pub async fn player_reported(&self, lobby_id: LobbyId, player_id: &str) -> Result<()> {
        if self.substitute(lobby_id, player_id, false).await? {
            let name = self.display_name(player_id).await;
            self.notifier
                .notify(lobby_id, &format!("{} has been reported.", name));
        }
        Ok(())
    }

    pub async fn server_lost(&self, lobby_id: LobbyId) -> Result<()> {
        self.notifier
            .notify(lobby_id, "Lobby Closed (Connection to server lost)");
        self.close(lobby_id, true, false, "server_lost").await
    }

    pub async fn match_ended(&self, lobby_id: LobbyId) -> Result<()> {
        self.notifier.notify(lobby_id, "Lobby Ended.");
        self.close(lobby_id, true, true, "match_ended").await
    }

    async fn set_in_game(
        &self,
        lobby_id: LobbyId,
        player_id: &str,
        in_game: bool,
    ) -> Result<Option<Lobby>> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if !lobby.set_in_game(player_id, in_game) {
            debug!("{} is not playing in lobby {}", player_id, lobby_id);
            return Ok(None);
        }
        self.store.save(&lobby).await?;
        drop(lock);

        self.broadcast_lobby(&lobby);
        Ok(Some(lobby))
    }

    /// Open the player's slot in a running lobby to substitutes
    ///
    /// With `only_if_absent` nothing happens once the player is back on the
    /// server. Returns whether the slot was vacated.
    async fn substitute(
        &self,
        lobby_id: LobbyId,
        player_id: &str,
        only_if_absent: bool,
    ) -> Result<bool> {
        let lock = self.lock_lobby(lobby_id).await;
        let mut lobby = self.store.load(lobby_id).await?;
        if lobby.state() != LobbyState::InProgress || lobby.slot_of(player_id).is_none() {
            return Ok(false);
        }
        if only_if_absent && lobby.is_player_in_game(player_id) {
            debug!("{} returned to lobby {} in time", player_id, lobby_id);
            return Ok(false);
        }

        let slot = lobby.vacate(player_id)?;
        self.store.save(&lobby).await?;
        drop(lock);

        info!(
            "Slot {} of lobby {} opened for a substitute of {}",
            slot, lobby_id, player_id
        );
        self.hooks.after_leave(lobby_id, player_id);
        self.broadcast_lobby(&lobby);
        self.broadcast_sub_list().await;
        Ok(true)
    }

    async fn display_name(&self, player_id: &str) -> String {
        match self.players.player(player_id).await {
            Ok(player) => player.alias().to_string(),
            Err(_) => player_id.to_string(),
        }
    }

    // ---- Broadcasting ----

    fn broadcast_lobby(&self, lobby: &Lobby) {
        self.broadcaster
            .send_to_room(&public_room(lobby.id()), LOBBY_DATA, lobby.view());
    }

    /// Lobbies currently open for joining
    pub async fn lobby_list(&self) -> Result<LobbyListData> {
        let lobbies = self.store.waiting_lobbies().await?;
        Ok(LobbyListData::from_lobbies(&lobbies))
    }

    async fn broadcast_lobby_list(&self) {
        match self.lobby_list().await {
            Ok(list) => self
                .broadcaster
                .send_to_room(GLOBAL_ROOM, LOBBY_LIST_DATA, list),
            Err(e) => error!("Failed to load lobby list: {}", e),
        }
    }

    /// Send the public lobby list to one socket
    pub async fn send_lobby_list(&self, socket: &dyn Socket) -> Result<()> {
        let list = serde_json::to_value(self.lobby_list().await?)?;
        socket.emit(LOBBY_LIST_DATA, &list)
    }

    pub async fn substitute_slots(&self) -> Result<Vec<SubstituteSlot>> {
        let mut open = Vec::new();
        for lobby in self.store.lobbies_in_progress().await? {
            for slot in lobby.vacated_slots() {
                if let Some((team, class)) = slots::slot_info(lobby.lobby_type(), slot) {
                    open.push(SubstituteSlot {
                        lobby_id: lobby.id(),
                        slot,
                        team,
                        class: class.to_string(),
                        map_name: lobby.map_name().to_string(),
                        lobby_type: lobby.lobby_type().name().to_string(),
                    });
                }
            }
        }
        Ok(open)
    }

    async fn broadcast_sub_list(&self) {
        match self.substitute_slots().await {
            Ok(slots) => self.broadcaster.send_to_room(
                GLOBAL_ROOM,
                SUB_LIST_DATA,
                SubstituteList { slots },
            ),
            Err(e) => error!("Failed to load substitute list: {}", e),
        }
    }
}

fn ensure_joinable(lobby: &Lobby) -> Result<()> {
    match lobby.state() {
        LobbyState::Ended => Err(LobbyError::conflict("Cannot join a closed lobby.").into()),
        LobbyState::Initializing => {
            Err(LobbyError::conflict("Lobby is being set up right now.").into())
        }
        _ => Ok(()),
    }
}

/// Free the player's slot, cancelling a running ready-up
fn release_slot(lobby: &mut Lobby, player_id: &str) -> Result<usize> {
    let slot = lobby.remove_player(player_id)?;
    if lobby.state() == LobbyState::ReadyingUp {
        lobby.set_state(LobbyState::Waiting)?;
        lobby.unready_all();
    }
    Ok(slot)
}

/// Per-slot requirements from the general and per-class entries
///
/// A class entry replaces the general one for its slot. An all-zero general
/// entry restricts nothing and is dropped.
fn build_requirements(request: &CreateLobby) -> Result<BTreeMap<usize, Requirement>> {
    let mut requirements = BTreeMap::new();
    let general = request
        .general_requirement
        .as_ref()
        .filter(|general| **general != Requirement::default());
    if let Some(general) = general {
        for slot in 0..slots::slot_count(request.lobby_type) {
            requirements.insert(slot, general.clone());
        }
    }
    for entry in &request.class_requirements {
        for (team, enabled) in [("red", entry.red), ("blu", entry.blu)] {
            if enabled {
                let slot = slots::slot_index(request.lobby_type, team, &entry.class)?;
                requirements.insert(slot, entry.requirement.clone());
            }
        }
    }
    Ok(requirements)
}
