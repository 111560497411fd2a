//! HTTP implementation of the reservation provider

use crate::config::ReservationSettings;
use crate::error::{LobbyError, Result};
use crate::reservation::provider::ReservationProvider;
use crate::reservation::{Endpoint, Reservation, ReservationRequest, ReservationStatus};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

/// Talks to the booking service's JSON API
pub struct HttpReservationProvider {
    client: reqwest::Client,
    settings: ReservationSettings,
}

#[derive(Serialize)]
struct CreateBody<'a> {
    reservation: &'a ReservationRequest,
}

#[derive(Debug, Deserialize)]
struct ReservationEnvelope {
    reservation: ApiReservation,
}

#[derive(Debug, Deserialize)]
struct ApiReservation {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    rcon: String,
    #[serde(default)]
    password: String,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    server: Option<ApiServer>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiServer {
    ip_and_port: String,
}

impl HttpReservationProvider {
    pub fn new(settings: ReservationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stadium-lobby/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to create reservation HTTP client")?;
        Ok(Self { client, settings })
    }

    fn url(&self, endpoint: Endpoint, path: &str) -> String {
        format!("{}/api/reservations{}", endpoint.base_url(&self.settings), path)
    }

    fn auth<'a>(&'a self, owner: &'a str) -> [(&'static str, &'a str); 2] {
        [("api_key", self.settings.api_key.as_str()), ("steam_uid", owner)]
    }
}

fn failed(message: impl Into<String>) -> anyhow::Error {
    LobbyError::ReservationFailed {
        message: message.into(),
    }
    .into()
}

#[async_trait]
impl ReservationProvider for HttpReservationProvider {
    async fn create(
        &self,
        endpoint: Endpoint,
        request: &ReservationRequest,
        owner: &str,
    ) -> Result<Reservation> {
        let resp = self
            .client
            .post(self.url(endpoint, ""))
            .query(&self.auth(owner))
            .json(&CreateBody {
                reservation: request,
            })
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(failed(format!("provider returned {}", resp.status())));
        }

        let body: ReservationEnvelope = resp.json().await.map_err(|e| failed(e.to_string()))?;
        let api = body.reservation;
        if let Some(errors) = api.errors.filter(|e| !e.is_null()) {
            error!("Reservation rejected on {}: {}", endpoint, errors);
            return Err(failed("provider rejected reservation"));
        }

        let server = api
            .server
            .ok_or_else(|| failed("reservation has no server"))?;
        debug!("Reservation {} created on {}", api.id, endpoint);

        Ok(Reservation {
            id: api.id,
            server_address: server.ip_and_port,
            rcon: api.rcon,
            password: api.password,
            starts_at: api.starts_at.unwrap_or(request.starts_at),
            ends_at: api.ends_at.unwrap_or(request.ends_at),
        })
    }

    async fn status(
        &self,
        endpoint: Endpoint,
        id: u64,
        owner: &str,
    ) -> Result<ReservationStatus> {
        let resp = self
            .client
            .get(self.url(endpoint, &format!("/{}", id)))
            .query(&self.auth(owner))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(failed(format!("provider returned {}", resp.status())));
        }

        let body: ReservationEnvelope = resp.json().await.map_err(|e| failed(e.to_string()))?;
        let ready = body
            .reservation
            .status
            .is_some_and(|s| s.eq_ignore_ascii_case("ready"));

        Ok(if ready {
            ReservationStatus::Ready
        } else {
            ReservationStatus::Pending
        })
    }

    async fn delete(&self, endpoint: Endpoint, id: u64, owner: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(endpoint, &format!("/{}", id)))
            .query(&self.auth(owner))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(failed(format!(
                "delete of reservation {} returned {}",
                id,
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_follow_endpoint() {
        let provider = HttpReservationProvider::new(ReservationSettings::default()).unwrap();
        assert_eq!(
            provider.url(Endpoint::NorthAmerica, "/12"),
            "https://na.serveme.tf/api/reservations/12"
        );
        assert_eq!(
            provider.url(Endpoint::Europe, ""),
            "https://serveme.tf/api/reservations"
        );
    }

    #[test]
    fn test_reservation_envelope_parsing() {
        let body: ReservationEnvelope = serde_json::from_str(
            r#"{"reservation": {"id": 5, "status": "Ready", "rcon": "r", "password": "p",
                "starts_at": "2024-01-01T10:00:00Z", "ends_at": "2024-01-01T12:00:00Z",
                "server": {"ip_and_port": "1.2.3.4:27015"}, "errors": null}}"#,
        )
        .unwrap();
        assert_eq!(body.reservation.id, 5);
        assert_eq!(body.reservation.server.unwrap().ip_and_port, "1.2.3.4:27015");
        assert!(body.reservation.errors.is_none());
    }
}
