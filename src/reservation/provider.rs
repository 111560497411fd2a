//! Reservation provider interface and its in-memory mock

use crate::error::{LobbyError, Result};
use crate::reservation::{Endpoint, Reservation, ReservationRequest, ReservationStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Raw calls to the external booking service
///
/// Every call is a single network request; retry policy belongs to the
/// caller.
#[async_trait]
pub trait ReservationProvider: Send + Sync {
    /// Book a server for the requested window
    async fn create(
        &self,
        endpoint: Endpoint,
        request: &ReservationRequest,
        owner: &str,
    ) -> Result<Reservation>;

    /// Current readiness of a booking
    async fn status(&self, endpoint: Endpoint, id: u64, owner: &str)
        -> Result<ReservationStatus>;

    /// Cancel a booking
    async fn delete(&self, endpoint: Endpoint, id: u64, owner: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct MockState {
    reject_create: bool,
    /// Status calls per id before it reports ready; `None` never becomes ready
    ready_after: Option<u32>,
    status_calls: HashMap<u64, u32>,
    /// Delete calls that fail before one succeeds
    failing_deletes: u32,
    delete_calls: u32,
    created: Vec<(Endpoint, Reservation)>,
    deleted: Vec<u64>,
}

/// Scriptable provider for tests
#[derive(Debug)]
pub struct MockReservationProvider {
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

impl MockReservationProvider {
    /// A provider whose reservations are ready on the first status call
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(MockState {
                ready_after: Some(0),
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report pending for `polls` status calls, then ready
    pub fn ready_after(self, polls: u32) -> Self {
        self.state().ready_after = Some(polls);
        self
    }

    /// Never report ready
    pub fn never_ready(self) -> Self {
        self.state().ready_after = None;
        self
    }

    /// Reject every create call
    pub fn rejecting(self) -> Self {
        self.state().reject_create = true;
        self
    }

    /// Fail the next `count` delete calls
    pub fn failing_deletes(&self, count: u32) {
        self.state().failing_deletes = count;
    }

    pub fn created(&self) -> Vec<(Endpoint, Reservation)> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.state().deleted.clone()
    }

    pub fn delete_calls(&self) -> u32 {
        self.state().delete_calls
    }

    pub fn status_calls(&self, id: u64) -> u32 {
        self.state().status_calls.get(&id).copied().unwrap_or(0)
    }
}

impl Default for MockReservationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReservationProvider for MockReservationProvider {
    async fn create(
        &self,
        endpoint: Endpoint,
        request: &ReservationRequest,
        _owner: &str,
    ) -> Result<Reservation> {
        let mut state = self.state();
        if state.reject_create {
            return Err(LobbyError::ReservationFailed {
                message: "provider rejected reservation".to_string(),
            }
            .into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let reservation = Reservation {
            id,
            server_address: format!("172.16.0.{}:27015", id),
            rcon: request.rcon.clone(),
            password: request.password.clone(),
            starts_at: request.starts_at,
            ends_at: request.ends_at,
        };
        state.created.push((endpoint, reservation.clone()));
        Ok(reservation)
    }

    async fn status(
        &self,
        _endpoint: Endpoint,
        id: u64,
        _owner: &str,
    ) -> Result<ReservationStatus> {
        let mut state = self.state();
        let ready_after = state.ready_after;
        let calls = state.status_calls.entry(id).or_insert(0);
        let seen = *calls;
        *calls += 1;

        match ready_after {
            Some(polls) if seen >= polls => Ok(ReservationStatus::Ready),
            _ => Ok(ReservationStatus::Pending),
        }
    }

    async fn delete(&self, _endpoint: Endpoint, id: u64, _owner: &str) -> Result<()> {
        let mut state = self.state();
        state.delete_calls += 1;
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(LobbyError::ReservationFailed {
                message: format!("delete of reservation {} failed", id),
            }
            .into());
        }
        state.deleted.push(id);
        Ok(())
    }
}
