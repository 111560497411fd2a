//! Reservation client: region routing, readiness polling, bounded rollback

use crate::config::ReservationSettings;
use crate::error::{LobbyError, Result};
use crate::geo::RegionResolver;
use crate::metrics::MetricsCollector;
use crate::reservation::cleanup::CleanupQueue;
use crate::reservation::provider::ReservationProvider;
use crate::reservation::{
    Endpoint, Reservation, ReservationRef, ReservationRequest, ReservationStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// How a rollback delete ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Deleted,
    /// Retries ran out; the cleanup queue owns the reservation now
    Escalated,
}

#[derive(Clone)]
pub struct ReservationClient {
    provider: Arc<dyn ReservationProvider>,
    resolver: Arc<dyn RegionResolver>,
    settings: ReservationSettings,
    cleanup: CleanupQueue,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ReservationClient {
    pub fn new(
        provider: Arc<dyn ReservationProvider>,
        resolver: Arc<dyn RegionResolver>,
        settings: ReservationSettings,
        cleanup: CleanupQueue,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            provider,
            resolver,
            settings,
            cleanup,
            metrics,
        }
    }

    pub fn settings(&self) -> &ReservationSettings {
        &self.settings
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// Deployment serving a requester connecting from `address`
    pub fn endpoint_for(&self, address: &str) -> Endpoint {
        let region = self.resolver.region(address);
        Endpoint::for_continent(region.as_ref().map(|r| r.code.as_str()))
    }

    fn record(&self, operation: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reservation_request(operation, success);
        }
    }

    /// Book a server on the deployment closest to the requester
    pub async fn create(
        &self,
        requester_address: &str,
        request: &ReservationRequest,
        owner: &str,
    ) -> Result<(ReservationRef, Reservation)> {
        let endpoint = self.endpoint_for(requester_address);
        let result = self.provider.create(endpoint, request, owner).await;
        self.record("create", result.is_ok());

        let reservation = result.map_err(|e| {
            error!("Reservation on {} failed: {}", endpoint, e);
            anyhow::Error::from(LobbyError::ReservationFailed {
                message: "Couldn't get serveme reservation".to_string(),
            })
        })?;

        info!(
            "Reservation {} created on {} for {}",
            reservation.id, endpoint, owner
        );
        let reference = ReservationRef {
            id: reservation.id,
            endpoint,
            owner: owner.to_string(),
        };
        Ok((reference, reservation))
    }

    pub async fn status(&self, reservation: &ReservationRef) -> Result<ReservationStatus> {
        let result = self
            .provider
            .status(reservation.endpoint, reservation.id, &reservation.owner)
            .await;
        self.record("status", result.is_ok());
        result
    }

    pub async fn delete(&self, reservation: &ReservationRef) -> Result<()> {
        let result = self
            .provider
            .delete(reservation.endpoint, reservation.id, &reservation.owner)
            .await;
        self.record("delete", result.is_ok());
        result
    }

    /// Poll until the reservation is ready or the ceiling elapses
    ///
    /// Status errors are logged and polling continues. Returns an error only
    /// when the ceiling is hit.
    pub async fn wait_until_ready(&self, reservation: &ReservationRef) -> Result<()> {
        let started = Instant::now();
        let interval = self.settings.poll_interval();
        let ceiling = self.settings.poll_ceiling();

        loop {
            match self.status(reservation).await {
                Ok(ReservationStatus::Ready) => {
                    let waited = started.elapsed();
                    debug!("Reservation {} ready after {:?}", reservation.id, waited);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reservation_ready(waited);
                    }
                    return Ok(());
                }
                Ok(ReservationStatus::Pending) => {}
                Err(e) => warn!("Status of reservation {} failed: {}", reservation.id, e),
            }

            sleep(interval).await;
            if started.elapsed() >= ceiling {
                warn!(
                    "Reservation {} not ready after {:?}",
                    reservation.id, ceiling
                );
                return Err(LobbyError::ReservationFailed {
                    message: "Couldn't get Serveme reservation, try another server.".to_string(),
                }
                .into());
            }
        }
    }

    /// Delete a reservation with bounded exponential backoff
    ///
    /// After the last failed attempt the reservation goes to the cleanup
    /// queue and the caller continues.
    pub async fn rollback(&self, reservation: ReservationRef) -> RollbackOutcome {
        let max_attempts = self.settings.rollback_max_attempts.max(1);
        let max_backoff = self.settings.rollback_max_backoff();
        let mut delay = self.settings.rollback_initial_backoff();

        for attempt in 1..=max_attempts {
            match self.delete(&reservation).await {
                Ok(()) => {
                    info!("Rolled back reservation {}", reservation.id);
                    return RollbackOutcome::Deleted;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Rollback attempt {} for reservation {} failed: {}. Retrying in {:?}",
                        attempt, reservation.id, e, delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(max_backoff);
                }
                Err(e) => {
                    error!(
                        "Rollback of reservation {} failed after {} attempts: {}",
                        reservation.id, max_attempts, e
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_rollback_escalation();
        }
        self.cleanup.enqueue(reservation);
        RollbackOutcome::Escalated
    }

    /// Total time a rollback may spend before escalating
    pub fn rollback_budget(&self) -> Duration {
        let mut delay = self.settings.rollback_initial_backoff();
        let mut total = Duration::ZERO;
        for _ in 1..self.settings.rollback_max_attempts.max(1) {
            total += delay;
            delay = (delay * 2).min(self.settings.rollback_max_backoff());
        }
        total
    }
}
