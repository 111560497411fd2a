//! Service layer for the lobby service
//!
//! Application state and background tasks live in [`app`], health probes in
//! [`health`], and the inbound request layer in [`handlers`].

pub mod app;
pub mod handlers;
pub mod health;

pub use app::{AppState, Backends, ServiceError};
pub use handlers::{LobbyRequest, RequestContext, RequestHandler, Response};
pub use health::{HealthCheck, HealthStatus, ServiceStats};
