//! Inbound lobby requests
//!
//! Each client action arrives as a [`LobbyRequest`] with a typed argument
//! record. Arguments are validated here, before the lobby manager sees them,
//! and every outcome is folded into a [`Response`].

use crate::error::{LobbyError, Result};
use crate::lobby::{ClassRequirement, CreateLobby, LobbyManager, RequirementKind, ServerSource};
use crate::metrics::MetricsCollector;
use crate::players::PlayerDirectory;
use crate::transport::Socket;
use crate::types::{LobbyId, LobbyType, Player, PlayerId, Requirement, Team, TwitchRestriction};
use crate::utils::{is_valid_server_address, parse_steam_group};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Leagues a lobby may be played under
pub const LEAGUES: [&str; 6] = ["ugc", "etf2l", "esea", "asiafortress", "ozfortress", "bballtf"];

/// One client action with its arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "request", content = "data", rename_all = "camelCase")]
pub enum LobbyRequest {
    LobbyCreate(CreateArgs),
    LobbyClose(LobbyArgs),
    LobbyJoin(JoinArgs),
    LobbySpectatorJoin(LobbyArgs),
    LobbySpectatorLeave(LobbyArgs),
    LobbyLeave(LobbyArgs),
    LobbyKick(TargetArgs),
    LobbyBan(TargetArgs),
    LobbyChangeOwner(TargetArgs),
    LobbySetRequirement(SetRequirementArgs),
    LobbyRemoveTwitchRestriction(LobbyArgs),
    LobbyRemoveSteamRestriction(LobbyArgs),
    LobbyServerReset(LobbyArgs),
    ServerVerify(ServerVerifyArgs),
    RequestLobbyListData,
    PlayerReady(LobbyArgs),
    PlayerNotReady(LobbyArgs),
}

impl LobbyRequest {
    /// Wire name, also used as the metrics label
    pub fn name(&self) -> &'static str {
        match self {
            LobbyRequest::LobbyCreate(_) => "lobbyCreate",
            LobbyRequest::LobbyClose(_) => "lobbyClose",
            LobbyRequest::LobbyJoin(_) => "lobbyJoin",
            LobbyRequest::LobbySpectatorJoin(_) => "lobbySpectatorJoin",
            LobbyRequest::LobbySpectatorLeave(_) => "lobbySpectatorLeave",
            LobbyRequest::LobbyLeave(_) => "lobbyLeave",
            LobbyRequest::LobbyKick(_) => "lobbyKick",
            LobbyRequest::LobbyBan(_) => "lobbyBan",
            LobbyRequest::LobbyChangeOwner(_) => "lobbyChangeOwner",
            LobbyRequest::LobbySetRequirement(_) => "lobbySetRequirement",
            LobbyRequest::LobbyRemoveTwitchRestriction(_) => "lobbyRemoveTwitchRestriction",
            LobbyRequest::LobbyRemoveSteamRestriction(_) => "lobbyRemoveSteamRestriction",
            LobbyRequest::LobbyServerReset(_) => "lobbyServerReset",
            LobbyRequest::ServerVerify(_) => "serverVerify",
            LobbyRequest::RequestLobbyListData => "requestLobbyListData",
            LobbyRequest::PlayerReady(_) => "playerReady",
            LobbyRequest::PlayerNotReady(_) => "playerNotReady",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LobbyArgs {
    pub id: LobbyId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinArgs {
    pub id: LobbyId,
    pub team: String,
    pub class: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetArgs {
    pub id: LobbyId,
    #[serde(rename = "steamid")]
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRequirementArgs {
    pub id: LobbyId,
    /// Negative values are rejected by the manager
    pub slot: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerVerifyArgs {
    pub server: String,
    pub rcon: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServemeArgs {
    pub id: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestrictedTeams {
    #[serde(default)]
    pub red: bool,
    #[serde(default)]
    pub blu: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequirementArgs {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub lobbies: u32,
    #[serde(default)]
    pub reliability: f64,
    #[serde(default)]
    pub restricted: RestrictedTeams,
}

impl RequirementArgs {
    fn requirement(&self) -> Requirement {
        Requirement {
            hours: self.hours,
            lobbies: self.lobbies,
            reliability: self.reliability,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequirementsArgs {
    /// Keyed by class name
    #[serde(default)]
    pub classes: BTreeMap<String, RequirementArgs>,
    pub general: Option<RequirementArgs>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
    pub map_name: String,
    #[serde(rename = "type")]
    pub lobby_type: String,
    pub league: String,
    pub server_type: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub rcon: String,
    pub stored_server_id: Option<u64>,
    pub serveme: Option<ServemeArgs>,
    #[serde(default)]
    pub whitelist_id: String,
    #[serde(default)]
    pub mumble_required: bool,
    #[serde(default)]
    pub password: String,
    pub steam_group_whitelist: Option<String>,
    #[serde(default)]
    pub twitch_whitelist_subscribers: bool,
    #[serde(default)]
    pub twitch_whitelist_followers: bool,
    pub requirements: Option<RequirementsArgs>,
}

impl CreateArgs {
    /// Check every string argument and build the manager's request
    pub fn validate(self) -> Result<CreateLobby> {
        let lobby_type = LobbyType::from_name(&self.lobby_type)
            .ok_or_else(|| LobbyError::invalid(format!("Invalid lobby type: {}", self.lobby_type)))?;

        if self.map_name.trim().is_empty() {
            return Err(LobbyError::invalid("Map name cannot be empty").into());
        }
        if !LEAGUES.contains(&self.league.as_str()) {
            return Err(LobbyError::invalid(format!("Invalid league: {}", self.league)).into());
        }

        let server = match self.server_type.as_str() {
            "server" => {
                if !is_valid_server_address(&self.server) {
                    return Err(LobbyError::invalid("Invalid Server Address").into());
                }
                if self.rcon.is_empty() {
                    return Err(LobbyError::invalid("RCON password cannot be empty").into());
                }
                ServerSource::Direct {
                    address: self.server,
                    rcon_password: self.rcon,
                }
            }
            "storedServer" => ServerSource::Stored {
                id: self
                    .stored_server_id
                    .ok_or_else(|| LobbyError::invalid("Missing stored server id"))?,
            },
            "serveme" => {
                let serveme = self
                    .serveme
                    .ok_or_else(|| LobbyError::invalid("Missing serveme reservation details"))?;
                if serveme.end_date <= serveme.start_date {
                    return Err(LobbyError::invalid("Reservation must end after it starts").into());
                }
                ServerSource::Reservation {
                    server_id: serveme.id,
                    starts_at: serveme.start_date,
                    ends_at: serveme.end_date,
                }
            }
            other => {
                return Err(LobbyError::invalid(format!("Invalid server type: {}", other)).into())
            }
        };

        let steam_group = match self.steam_group_whitelist.as_deref() {
            None | Some("") => None,
            Some(url) => Some(
                parse_steam_group(url)
                    .ok_or_else(|| LobbyError::invalid("Invalid Steam group URL"))?,
            ),
        };

        let twitch_restriction = if self.twitch_whitelist_subscribers {
            TwitchRestriction::Subscribers
        } else if self.twitch_whitelist_followers {
            TwitchRestriction::Followers
        } else {
            TwitchRestriction::None
        };

        let requirements = self.requirements.unwrap_or_default();
        let class_requirements = requirements
            .classes
            .iter()
            .map(|(class, args)| ClassRequirement {
                class: class.clone(),
                red: args.restricted.red,
                blu: args.restricted.blu,
                requirement: args.requirement(),
            })
            .collect();

        Ok(CreateLobby {
            lobby_type,
            map_name: self.map_name,
            league: self.league,
            server,
            whitelist_id: self.whitelist_id,
            mumble_required: self.mumble_required,
            password: self.password,
            steam_group,
            twitch_restriction,
            class_requirements,
            general_requirement: requirements.general.as_ref().map(RequirementArgs::requirement),
        })
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// The connection a request arrived on
pub struct RequestContext {
    pub player_id: PlayerId,
    pub socket: Arc<dyn Socket>,
    /// Remote IP of the client, used to pick a reservation region
    pub remote_addr: String,
}

/// Validates requests and hands them to the lobby manager
#[derive(Clone)]
pub struct RequestHandler {
    manager: LobbyManager,
    players: Arc<dyn PlayerDirectory>,
    metrics: Arc<MetricsCollector>,
}

impl RequestHandler {
    pub fn new(
        manager: LobbyManager,
        players: Arc<dyn PlayerDirectory>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            manager,
            players,
            metrics,
        }
    }

    /// Parse a raw JSON request and handle it
    pub async fn handle_json(&self, ctx: &RequestContext, raw: &str) -> Response {
        match serde_json::from_str::<LobbyRequest>(raw) {
            Ok(request) => self.handle(ctx, request).await,
            Err(e) => {
                debug!("Malformed request from {}: {}", ctx.player_id, e);
                self.metrics.record_request("malformed", false);
                Response::error(format!("Invalid request: {}", e))
            }
        }
    }

    pub async fn handle(&self, ctx: &RequestContext, request: LobbyRequest) -> Response {
        let name = request.name();
        let result = self.dispatch(ctx, request).await;
        self.metrics.record_request(name, result.is_ok());

        match result {
            Ok(data) => Response::ok(data),
            Err(e) => {
                debug!("{} from {} rejected: {}", name, ctx.player_id, e);
                Response::error(e.to_string())
            }
        }
    }

    async fn dispatch(&self, ctx: &RequestContext, request: LobbyRequest) -> Result<Option<Value>> {
        let player: Player = self.players.player(&ctx.player_id).await?;
        let manager = &self.manager;

        match request {
            LobbyRequest::LobbyCreate(args) => {
                let create = args.validate()?;
                let id = manager
                    .create_lobby(&player, &ctx.remote_addr, create)
                    .await?;
                info!("Lobby {} created by {}", id, player.id);
                return Ok(Some(json!({ "id": id })));
            }
            LobbyRequest::LobbyClose(args) => manager.close_lobby(&player, args.id).await?,
            LobbyRequest::LobbyJoin(args) => {
                if Team::from_name(&args.team).is_none() {
                    return Err(LobbyError::invalid(format!("Invalid team: {}", args.team)).into());
                }
                manager
                    .join_lobby(
                        &player,
                        ctx.socket.as_ref(),
                        args.id,
                        &args.team,
                        &args.class,
                        &args.password,
                    )
                    .await?
            }
            LobbyRequest::LobbySpectatorJoin(args) => {
                manager
                    .spectator_join(&player, ctx.socket.as_ref(), args.id)
                    .await?
            }
            LobbyRequest::LobbySpectatorLeave(args) => {
                manager
                    .spectator_leave(&player, ctx.socket.as_ref(), args.id)
                    .await?
            }
            LobbyRequest::LobbyLeave(args) => manager.leave_lobby(&player, args.id).await?,
            LobbyRequest::LobbyKick(args) => {
                manager.kick_player(&player, args.id, &args.player_id).await?
            }
            LobbyRequest::LobbyBan(args) => {
                manager.ban_player(&player, args.id, &args.player_id).await?
            }
            LobbyRequest::LobbyChangeOwner(args) => {
                manager
                    .change_owner(&player, args.id, &args.player_id)
                    .await?
            }
            LobbyRequest::LobbySetRequirement(args) => {
                let kind = RequirementKind::from_name(&args.kind).ok_or_else(|| {
                    LobbyError::invalid(format!("Invalid requirement type: {}", args.kind))
                })?;
                manager
                    .set_requirement(&player, args.id, args.slot, kind, args.value)
                    .await?
            }
            LobbyRequest::LobbyRemoveTwitchRestriction(args) => {
                manager.remove_twitch_restriction(&player, args.id).await?
            }
            LobbyRequest::LobbyRemoveSteamRestriction(args) => {
                manager.remove_steam_restriction(&player, args.id).await?
            }
            LobbyRequest::LobbyServerReset(args) => manager.server_reset(&player, args.id).await?,
            LobbyRequest::ServerVerify(args) => {
                manager.server_verify(&args.server, &args.rcon).await?
            }
            LobbyRequest::RequestLobbyListData => {
                manager.send_lobby_list(ctx.socket.as_ref()).await?
            }
            LobbyRequest::PlayerReady(args) => manager.player_ready(&player, args.id).await?,
            LobbyRequest::PlayerNotReady(args) => {
                manager.player_not_ready(&player, args.id).await?
            }
        }
        Ok(None)
    }
}
