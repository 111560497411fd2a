//! Lobby record and its occupancy rules
//!
//! [`Lobby`] is the persisted state of one match. Its fields are readable
//! by anyone but only the lobby manager mutates them, always while holding
//! the lobby's lock.

use crate::error::{LobbyError, Result};
use crate::lobby::slots;
use crate::reservation::ReservationRef;
use crate::types::{
    LobbyId, LobbyState, LobbyType, PlayerId, Region, Requirement, ServerRecord, Team,
    TwitchRestriction,
};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Occupant of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub player_id: PlayerId,
    pub ready: bool,
    /// Player is connected to the game server
    pub in_game: bool,
}

impl SlotEntry {
    fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            ready: false,
            in_game: false,
        }
    }
}

/// Join restrictions and extras chosen at creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LobbyOptions {
    pub mumble_required: bool,
    pub whitelist_id: String,
    /// Empty means no password
    pub password: String,
    pub steam_group: Option<String>,
    pub twitch_channel: Option<String>,
    pub twitch_restriction: TwitchRestriction,
}

/// A single match and everything attached to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    id: LobbyId,
    lobby_type: LobbyType,
    map_name: String,
    league: String,
    state: LobbyState,
    created_by: PlayerId,
    region: Option<Region>,
    server: ServerRecord,
    reservation: Option<ReservationRef>,
    options: LobbyOptions,
    ready_up_deadline: Option<DateTime<Utc>>,
    slots: BTreeMap<usize, SlotEntry>,
    requirements: BTreeMap<usize, Requirement>,
    spectators: BTreeSet<PlayerId>,
    banned: BTreeSet<PlayerId>,
    /// Slots freed during a running game, open to substitutes
    vacated: BTreeSet<usize>,
    created_at: DateTime<Utc>,
}

impl Lobby {
    pub fn new(
        id: LobbyId,
        lobby_type: LobbyType,
        map_name: impl Into<String>,
        league: impl Into<String>,
        server: ServerRecord,
        created_by: impl Into<PlayerId>,
        options: LobbyOptions,
    ) -> Self {
        Self {
            id,
            lobby_type,
            map_name: map_name.into(),
            league: league.into(),
            state: LobbyState::Initializing,
            created_by: created_by.into(),
            region: None,
            server,
            reservation: None,
            options,
            ready_up_deadline: None,
            slots: BTreeMap::new(),
            requirements: BTreeMap::new(),
            spectators: BTreeSet::new(),
            banned: BTreeSet::new(),
            vacated: BTreeSet::new(),
            created_at: current_timestamp(),
        }
    }

    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn lobby_type(&self) -> LobbyType {
        self.lobby_type
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn league(&self) -> &str {
        &self.league
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    pub fn server(&self) -> &ServerRecord {
        &self.server
    }

    pub fn reservation(&self) -> Option<&ReservationRef> {
        self.reservation.as_ref()
    }

    pub fn options(&self) -> &LobbyOptions {
        &self.options
    }

    pub fn ready_up_deadline(&self) -> Option<DateTime<Utc>> {
        self.ready_up_deadline
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        slots::slot_count(self.lobby_type)
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity()
    }

    pub fn occupant(&self, slot: usize) -> Option<&SlotEntry> {
        self.slots.get(&slot)
    }

    /// Slot held by `player_id`, if any
    pub fn slot_of(&self, player_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|(_, entry)| entry.player_id == player_id)
            .map(|(slot, _)| *slot)
    }

    /// Players occupying a slot, in slot order
    pub fn players(&self) -> Vec<PlayerId> {
        self.slots.values().map(|e| e.player_id.clone()).collect()
    }

    pub fn unready_players(&self) -> Vec<PlayerId> {
        self.slots
            .values()
            .filter(|e| !e.ready)
            .map(|e| e.player_id.clone())
            .collect()
    }

    pub fn all_ready(&self) -> bool {
        self.is_full() && self.slots.values().all(|e| e.ready)
    }

    pub fn requirement(&self, slot: usize) -> Option<&Requirement> {
        self.requirements.get(&slot)
    }

    pub fn is_spectator(&self, player_id: &str) -> bool {
        self.spectators.contains(player_id)
    }

    pub fn spectators(&self) -> impl Iterator<Item = &PlayerId> {
        self.spectators.iter()
    }

    pub fn is_banned(&self, player_id: &str) -> bool {
        self.banned.contains(player_id)
    }

    pub fn is_vacated(&self, slot: usize) -> bool {
        self.vacated.contains(&slot)
    }

    pub fn vacated_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.vacated.iter().copied()
    }

    pub fn is_player_in_game(&self, player_id: &str) -> bool {
        self.slots
            .values()
            .any(|e| e.player_id == player_id && e.in_game)
    }

    // Mutators below are only called by the lobby manager under the lobby lock.

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub(crate) fn set_state(&mut self, next: LobbyState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(LobbyError::conflict(format!(
                "Lobby {} cannot move from {} to {}",
                self.id, self.state, next
            ))
            .into());
        }
        self.state = next;
        if next != LobbyState::ReadyingUp {
            self.ready_up_deadline = None;
        }
        Ok(())
    }

    pub(crate) fn start_ready_up(&mut self, deadline: DateTime<Utc>) -> Result<()> {
        self.set_state(LobbyState::ReadyingUp)?;
        self.ready_up_deadline = Some(deadline);
        Ok(())
    }

    pub(crate) fn set_region(&mut self, region: Option<Region>) {
        self.region = region;
    }

    pub(crate) fn set_reservation(&mut self, reservation: Option<ReservationRef>) {
        self.reservation = reservation;
    }

    pub(crate) fn set_owner(&mut self, player_id: impl Into<PlayerId>) {
        self.created_by = player_id.into();
    }

    /// Seat a player in `slot`
    ///
    /// A player already seated elsewhere in this lobby switches slots. A
    /// spectator entry for the player is dropped. Reserved and vacated slot
    /// checks are the caller's job.
    pub(crate) fn assign_slot(&mut self, player_id: &str, slot: usize) -> Result<()> {
        if slot >= self.capacity() {
            return Err(LobbyError::invalid(format!("Invalid slot {}", slot)).into());
        }
        match self.slots.get(&slot) {
            Some(entry) if entry.player_id == player_id => return Ok(()),
            Some(_) => return Err(LobbyError::SlotOccupied { slot }.into()),
            None => {}
        }

        if let Some(previous) = self.slot_of(player_id) {
            self.slots.remove(&previous);
        }
        self.slots
            .insert(slot, SlotEntry::new(player_id.to_string()));
        self.spectators.remove(player_id);
        self.vacated.remove(&slot);
        Ok(())
    }

    /// Free the player's slot and return its index
    pub(crate) fn remove_player(&mut self, player_id: &str) -> Result<usize> {
        let slot = self.slot_of(player_id).ok_or_else(|| {
            anyhow::Error::from(LobbyError::conflict("Player not playing"))
        })?;
        self.slots.remove(&slot);
        Ok(slot)
    }

    /// Free the slot of a player leaving a running game and open it to subs
    pub(crate) fn vacate(&mut self, player_id: &str) -> Result<usize> {
        let slot = self.remove_player(player_id)?;
        self.vacated.insert(slot);
        Ok(slot)
    }

    pub(crate) fn add_spectator(&mut self, player_id: &str) {
        self.spectators.insert(player_id.to_string());
    }

    pub(crate) fn remove_spectator(&mut self, player_id: &str) -> bool {
        self.spectators.remove(player_id)
    }

    pub(crate) fn ban(&mut self, player_id: &str) {
        self.banned.insert(player_id.to_string());
    }

    pub(crate) fn set_ready(&mut self, player_id: &str, ready: bool) -> Result<()> {
        let entry = self
            .slots
            .values_mut()
            .find(|e| e.player_id == player_id)
            .ok_or_else(|| anyhow::Error::from(LobbyError::conflict("Player not playing")))?;
        entry.ready = ready;
        Ok(())
    }

    pub(crate) fn unready_all(&mut self) {
        for entry in self.slots.values_mut() {
            entry.ready = false;
        }
    }

    /// Move every unready occupant to the spectators and return them
    pub(crate) fn remove_unready_players(&mut self) -> Vec<PlayerId> {
        let unready = self.unready_players();
        self.slots.retain(|_, e| e.ready);
        for player_id in &unready {
            self.spectators.insert(player_id.clone());
        }
        unready
    }

    pub(crate) fn set_in_game(&mut self, player_id: &str, in_game: bool) -> bool {
        match self.slots.values_mut().find(|e| e.player_id == player_id) {
            Some(entry) => {
                entry.in_game = in_game;
                true
            }
            None => false,
        }
    }

    pub(crate) fn requirement_mut(&mut self, slot: usize) -> &mut Requirement {
        self.requirements.entry(slot).or_default()
    }

    pub(crate) fn set_requirement(&mut self, slot: usize, requirement: Requirement) {
        self.requirements.insert(slot, requirement);
    }

    pub(crate) fn clear_twitch_restriction(&mut self) {
        self.options.twitch_channel = None;
        self.options.twitch_restriction = TwitchRestriction::None;
    }

    pub(crate) fn clear_steam_restriction(&mut self) {
        self.options.steam_group = None;
    }

    /// Client-facing snapshot of the lobby
    pub fn view(&self) -> LobbyView {
        let classes = (0..self.capacity())
            .filter_map(|slot| {
                let (team, class) = slots::slot_info(self.lobby_type, slot)?;
                let entry = self.slots.get(&slot);
                Some(SlotView {
                    slot,
                    team,
                    class: class.to_string(),
                    player: entry.map(|e| e.player_id.clone()),
                    ready: entry.is_some_and(|e| e.ready),
                    in_game: entry.is_some_and(|e| e.in_game),
                    requirement: self.requirements.get(&slot).cloned(),
                })
            })
            .collect();

        LobbyView {
            id: self.id,
            lobby_type: self.lobby_type.name().to_string(),
            map_name: self.map_name.clone(),
            league: self.league.clone(),
            state: self.state.to_string(),
            created_by: self.created_by.clone(),
            region: self.region.clone(),
            mumble_required: self.options.mumble_required,
            password_required: !self.options.password.is_empty(),
            steam_group: self.options.steam_group.clone(),
            twitch_channel: self.options.twitch_channel.clone(),
            ready_up_deadline: self.ready_up_deadline.map(|d| d.timestamp()),
            players: self.slots.len(),
            max_players: self.capacity(),
            classes,
            spectators: self.spectators.iter().cloned().collect(),
        }
    }

    /// Connection details sent with `lobbyStart`
    pub fn connect_info(&self, player_id: &str) -> Option<ConnectInfo> {
        let slot = self.slot_of(player_id)?;
        let (team, class) = slots::slot_info(self.lobby_type, slot)?;
        Some(ConnectInfo {
            id: self.id,
            host: self.server.host.clone(),
            password: self.server.server_password.clone(),
            map_name: self.map_name.clone(),
            team,
            class: class.to_string(),
        })
    }
}

/// One slot as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub slot: usize,
    pub team: Team,
    pub class: String,
    pub player: Option<PlayerId>,
    pub ready: bool,
    pub in_game: bool,
    pub requirement: Option<Requirement>,
}

/// Payload of `lobbyData`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub id: LobbyId,
    #[serde(rename = "type")]
    pub lobby_type: String,
    pub map_name: String,
    pub league: String,
    pub state: String,
    pub created_by: PlayerId,
    pub region: Option<Region>,
    pub mumble_required: bool,
    pub password_required: bool,
    pub steam_group: Option<String>,
    pub twitch_channel: Option<String>,
    /// Unix seconds
    pub ready_up_deadline: Option<i64>,
    pub players: usize,
    pub max_players: usize,
    pub classes: Vec<SlotView>,
    pub spectators: Vec<PlayerId>,
}

/// Payload of `lobbyListData`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyListData {
    pub lobbies: Vec<LobbyView>,
}

impl LobbyListData {
    pub fn from_lobbies(lobbies: &[Lobby]) -> Self {
        Self {
            lobbies: lobbies.iter().map(Lobby::view).collect(),
        }
    }
}

/// Payload of `lobbyStart`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub id: LobbyId,
    pub host: String,
    pub password: String,
    pub map_name: String,
    pub team: Team,
    pub class: String,
}
