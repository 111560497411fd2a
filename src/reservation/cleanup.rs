//! Background retry of reservation deletes that failed during rollback

use crate::metrics::MetricsCollector;
use crate::reservation::provider::ReservationProvider;
use crate::reservation::ReservationRef;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to the cleanup task
///
/// Reservations handed over here are retried once per interval until the
/// provider accepts the delete. The task exits once every handle is
/// dropped and the backlog is empty.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<ReservationRef>,
    pending: Arc<AtomicUsize>,
}

impl CleanupQueue {
    pub fn start(
        provider: Arc<dyn ReservationProvider>,
        interval: Duration,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run(provider, rx, interval, pending.clone(), metrics));
        (Self { tx, pending }, handle)
    }

    /// Queue a reservation for deletion
    pub fn enqueue(&self, reservation: ReservationRef) {
        warn!(
            "Reservation {} on {} handed to cleanup queue",
            reservation.id, reservation.endpoint
        );
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(reservation).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Cleanup task has exited, reservation left behind");
        }
    }

    /// Reservations queued but not yet deleted
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run(
    provider: Arc<dyn ReservationProvider>,
    mut rx: mpsc::UnboundedReceiver<ReservationRef>,
    interval: Duration,
    pending: Arc<AtomicUsize>,
    metrics: Option<Arc<MetricsCollector>>,
) {
    let mut backlog: Vec<ReservationRef> = Vec::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut open = true;

    loop {
        tokio::select! {
            received = rx.recv(), if open => match received {
                Some(reservation) => backlog.push(reservation),
                None => open = false,
            },
            _ = ticker.tick() => {
                if backlog.is_empty() {
                    if !open {
                        break;
                    }
                    continue;
                }

                debug!("Retrying {} queued reservation deletes", backlog.len());
                let mut remaining = Vec::with_capacity(backlog.len());
                for reservation in backlog.drain(..) {
                    let result = provider
                        .delete(reservation.endpoint, reservation.id, &reservation.owner)
                        .await;
                    if let Some(metrics) = &metrics {
                        metrics.record_reservation_request("cleanup_delete", result.is_ok());
                    }
                    match result {
                        Ok(()) => {
                            pending.fetch_sub(1, Ordering::SeqCst);
                            info!("Reservation {} deleted by cleanup queue", reservation.id);
                        }
                        Err(e) => {
                            debug!("Reservation {} still not deleted: {}", reservation.id, e);
                            remaining.push(reservation);
                        }
                    }
                }
                backlog = remaining;
            }
        }
    }

    debug!("Cleanup queue stopped");
}
