//! Single-consumer fan-out of outbound events
//!
//! Producers submit messages through a cheap cloneable [`Broadcaster`]
//! handle. One background task drains the queue in submission order and
//! delivers each message either to all of a player's sockets or to a room.

use crate::broadcast::messages::BroadcastMessage;
use crate::metrics::MetricsCollector;
use crate::session::SessionRegistry;
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle used to enqueue outbound events
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<BroadcastMessage>,
    stop: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    closed: Arc<AtomicBool>,
}

/// State owned by the consumer task
struct Consumer {
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Broadcaster {
    /// Spawn the consumer task and return the producer handle
    ///
    /// `tick` is the interval of the idle wake-up; it has no observable
    /// effect other than keeping the loop responsive to the stop signal.
    pub fn start(
        registry: SessionRegistry,
        transport: Arc<dyn Transport>,
        tick: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let consumer = Consumer {
            registry,
            transport,
            metrics,
        };
        let handle = tokio::spawn(consumer.run(rx, stop_rx, tick));

        info!("Broadcaster started (tick: {:?})", tick);

        (
            Self {
                tx,
                stop: Arc::new(Mutex::new(Some(stop_tx))),
                closed: Arc::new(AtomicBool::new(false)),
            },
            handle,
        )
    }

    /// Queue an event for every socket of `player_id`
    pub fn send_to_player<T: Serialize>(&self, player_id: &str, event: &str, payload: T) {
        let Some(payload) = encode(event, payload) else {
            return;
        };
        self.submit(BroadcastMessage::Direct {
            player_id: player_id.to_string(),
            event: event.to_string(),
            payload,
        });
    }

    /// Queue an event for every socket subscribed to `room`
    pub fn send_to_room<T: Serialize>(&self, room: &str, event: &str, payload: T) {
        let Some(payload) = encode(event, payload) else {
            return;
        };
        self.submit(BroadcastMessage::Room {
            room: room.to_string(),
            event: event.to_string(),
            payload,
        });
    }

    fn submit(&self, message: BroadcastMessage) {
        if self.closed.load(Ordering::Acquire) {
            debug!("Broadcaster stopped, dropping {} event", message.event());
            return;
        }
        if self.tx.send(message).is_err() {
            warn!("Broadcaster consumer has exited, message dropped");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the consumer; later submissions are dropped
    ///
    /// Messages still queued when the stop signal is observed are not
    /// delivered.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
        info!("Broadcaster shutdown requested");
    }
}

fn encode<T: Serialize>(event: &str, payload: T) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to serialize {} payload: {}", event, e);
            None
        }
    }
}

impl Consumer {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<BroadcastMessage>,
        mut stop: oneshot::Receiver<()>,
        tick: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => {
                    debug!("Broadcaster received stop signal");
                    break;
                }
                message = rx.recv() => match message {
                    Some(message) => self.deliver(message),
                    None => break,
                },
                _ = ticker.tick() => {}
            }
        }

        info!("Broadcaster stopped");
    }

    fn deliver(&self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::Direct {
                player_id,
                event,
                payload,
            } => {
                let Some(sockets) = self.registry.sockets(&player_id) else {
                    warn!("No sockets for player {}, dropping {}", player_id, event);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_dropped_delivery();
                    }
                    return;
                };

                for socket in sockets {
                    if let Err(e) = socket.emit(&event, &payload) {
                        warn!(
                            "Failed to emit {} to socket {} of player {}: {}",
                            event,
                            socket.id(),
                            player_id,
                            e
                        );
                    }
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivery("direct");
                }
            }
            BroadcastMessage::Room {
                room,
                event,
                payload,
            } => {
                self.transport.broadcast_to_room(&room, &event, &payload);
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivery("room");
                }
            }
        }
    }
}
