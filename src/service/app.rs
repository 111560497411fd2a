//! Main application state and service coordination
//!
//! [`AppState`] wires the lobby manager to its collaborators, owns the
//! background tasks (broadcaster, reservation cleanup, health metrics,
//! server event listener) and exposes the socket lifecycle hooks used by
//! the transport server.

use crate::broadcast::messages::GLOBAL_ROOM;
use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::feed::{spawn_listener, EventFeed};
use crate::geo::{RegionResolver, StaticRegionResolver};
use crate::lobby::{
    InMemoryLobbyStore, LobbyCollaborators, LobbyHooks, LobbyManager, LobbyStore,
};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::notify::ChatNotifier;
use crate::players::{InMemoryPlayerDirectory, PlayerDirectory};
use crate::provision::{MockProvisioner, ServerProvisioner};
use crate::reservation::{
    CleanupQueue, HttpReservationProvider, ReservationClient, ReservationProvider,
};
use crate::service::handlers::RequestHandler;
use crate::service::health::HealthCheck;
use crate::session::SessionRegistry;
use crate::transport::{MockTransport, Socket, Transport};
use crate::types::Player;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// External systems the service talks to
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn LobbyStore>,
    pub players: Arc<dyn PlayerDirectory>,
    pub resolver: Arc<dyn RegionResolver>,
    pub provisioner: Arc<dyn ServerProvisioner>,
    pub reservations: Arc<dyn ReservationProvider>,
    pub transport: Arc<dyn Transport>,
}

impl Backends {
    /// In-process backends for running without a database or socket server
    ///
    /// Reservations still go to the configured booking service.
    pub fn standalone(config: &AppConfig) -> Result<Self, ServiceError> {
        let reservations = HttpReservationProvider::new(config.reservation.clone()).map_err(
            |e| ServiceError::Initialization {
                message: format!("Failed to create reservation client: {}", e),
            },
        )?;

        Ok(Self {
            store: Arc::new(InMemoryLobbyStore::new()),
            players: Arc::new(InMemoryPlayerDirectory::new()),
            resolver: Arc::new(StaticRegionResolver::new()),
            provisioner: Arc::new(MockProvisioner::new()),
            reservations: Arc::new(reservations),
            transport: Arc::new(MockTransport::new()),
        })
    }
}

/// Production application state
pub struct AppState {
    config: AppConfig,
    metrics: Arc<MetricsCollector>,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    broadcaster: Broadcaster,
    cleanup: CleanupQueue,
    players: Arc<dyn PlayerDirectory>,
    lobby_manager: LobbyManager,
    handler: RequestHandler,

    /// Created on start, dropped on shutdown
    metrics_service: Mutex<Option<Arc<MetricsService>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Build every component; background consumers start immediately
    pub async fn new(config: AppConfig, backends: Backends) -> Result<Self, ServiceError> {
        info!("Initializing {} lobby service", config.service.name);
        info!(
            "Configuration: ready_up={}s, substitute_grace={}s, enforce_region={}",
            config.lobby.ready_up_timeout_seconds,
            config.lobby.substitute_grace_seconds,
            config.lobby.enforce_region
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let registry = SessionRegistry::new();
        let (broadcaster, broadcaster_task) = Broadcaster::start(
            registry.clone(),
            backends.transport.clone(),
            config.broadcast_tick(),
            Some(metrics.clone()),
        );
        let (cleanup, cleanup_task) = CleanupQueue::start(
            backends.reservations.clone(),
            config.reservation.cleanup_interval(),
            Some(metrics.clone()),
        );
        let reservations = ReservationClient::new(
            backends.reservations,
            backends.resolver.clone(),
            config.reservation.clone(),
            cleanup.clone(),
            Some(metrics.clone()),
        );

        let collaborators = LobbyCollaborators {
            store: backends.store,
            players: backends.players.clone(),
            reservations,
            resolver: backends.resolver,
            provisioner: backends.provisioner,
            notifier: Arc::new(ChatNotifier::new(broadcaster.clone())),
        };
        let hooks = LobbyHooks::new(
            registry.clone(),
            backends.transport.clone(),
            broadcaster.clone(),
        );
        let lobby_manager = LobbyManager::with_metrics(
            collaborators,
            broadcaster.clone(),
            hooks,
            config.lobby.clone(),
            metrics.clone(),
        );
        let handler = RequestHandler::new(
            lobby_manager.clone(),
            backends.players.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config,
            metrics,
            registry,
            transport: backends.transport,
            broadcaster,
            cleanup,
            players: backends.players,
            lobby_manager,
            handler,
            metrics_service: Mutex::new(None),
            background_tasks: Mutex::new(vec![broadcaster_task, cleanup_task]),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the health endpoints and maintenance tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} lobby service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_background_tasks();

        info!("Lobby service started successfully");
        Ok(())
    }

    /// Stop everything; queued broadcasts are not delivered
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        self.broadcaster.shutdown();
        self.stop_background_tasks().await;

        let metrics_service = self
            .metrics_service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(metrics_service) = metrics_service {
            info!("Stopping metrics service...");
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            }
        }

        let final_stats = self.lobby_manager.get_stats().await.map_err(|e| {
            ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            }
        })?;
        info!("Final service statistics: {:?}", final_stats);
        if self.cleanup.pending() > 0 {
            warn!(
                "{} reservation(s) were still awaiting cleanup at shutdown",
                self.cleanup.pending()
            );
        }

        info!("Lobby service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn lobby_manager(&self) -> &LobbyManager {
        &self.lobby_manager
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Authenticate a new socket and register it
    ///
    /// The socket joins the global room and receives the current lobby list.
    pub async fn on_connect(&self, token: &str, socket: Arc<dyn Socket>) -> crate::Result<Player> {
        let player = self.players.player_by_token(token).await?;

        self.registry.add(&player.id, socket.clone());
        self.transport.join_room(socket.id(), GLOBAL_ROOM);
        self.update_session_metrics();
        debug!("Socket {} connected for player {}", socket.id(), player.id);

        if let Err(e) = self.lobby_manager.send_lobby_list(socket.as_ref()).await {
            warn!("Failed to send lobby list to {}: {}", player.id, e);
        }
        Ok(player)
    }

    /// Forget a closed socket
    ///
    /// Once the player's last socket is gone a watcher is armed; if they are
    /// still offline after the disconnect grace period they stop spectating.
    pub fn on_disconnect(&self, player_id: &str, socket_id: &str) {
        self.transport.leave_room(socket_id, GLOBAL_ROOM);
        self.registry.remove(socket_id, player_id);
        self.update_session_metrics();

        if self.registry.is_connected(player_id) {
            return;
        }

        let manager = self.lobby_manager.clone();
        let metrics = self.metrics.clone();
        let id = player_id.to_string();
        self.registry.after_disconnected(
            player_id,
            self.config.lobby.disconnect_grace(),
            move || async move {
                metrics.record_disconnect_callback();
                if let Err(e) = manager.player_offline(&id).await {
                    error!("Failed to drop offline player {}: {}", id, e);
                }
            },
        );
    }

    /// Feed game server events into the lobby manager until the feed closes
    pub fn attach_event_feed<F>(&self, feed: F)
    where
        F: EventFeed + 'static,
    {
        let handle = spawn_listener(self.lobby_manager.clone(), feed);
        self.background_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn update_session_metrics(&self) {
        self.metrics.update_sessions(
            self.registry.connected_players(),
            self.registry.total_sockets(),
        );
    }

    async fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.health_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig::new("0.0.0.0", port);
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(self.metrics.clone(), health_server));

        let server = metrics_service.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        *self
            .metrics_service
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics_service);
        self.background_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        Ok(())
    }

    fn start_background_tasks(self: &Arc<Self>) {
        info!("Starting health metrics task (15s interval)...");

        // Holds a weak reference so shutdown is not blocked by the task
        let app_state = Arc::downgrade(self);
        let is_running = self.is_running.clone();
        let metrics = self.metrics.clone();

        let health_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            let start_time = tokio::time::Instant::now();
            info!("Health metrics task started");

            while *is_running.read().await {
                interval.tick().await;

                let uptime_seconds = start_time.elapsed().as_secs() as i64;
                metrics.service().uptime_seconds.set(uptime_seconds);

                let Some(app_state) = app_state.upgrade() else {
                    break;
                };
                app_state.update_session_metrics();
                match HealthCheck::check(app_state).await {
                    Ok(health) => debug!(
                        "Health: {} - {} lobbies created, {} players connected",
                        health.status, health.stats.lobbies_created, health.stats.connected_players
                    ),
                    Err(e) => warn!("Health check failed: {}", e),
                }
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(health_task);
    }

    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .background_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if tasks.is_empty() {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", tasks.len());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks resolve with a cancellation error
            let _ = task.await;
        }
        info!("All background tasks stopped");
    }
}
