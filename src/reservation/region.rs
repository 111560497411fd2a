//! Routing of reservation calls to the provider's regional deployments

use crate::config::ReservationSettings;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the provider's three regional deployments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    NorthAmerica,
    Europe,
    Australia,
}

impl Endpoint {
    /// Pick the deployment serving a continent code
    ///
    /// North and South America share the NA deployment, Asia and Europe the
    /// EU one, Oceania goes to AU. Anything else falls back to EU.
    pub fn for_continent(code: Option<&str>) -> Self {
        match code {
            Some("NA") | Some("SA") => Endpoint::NorthAmerica,
            Some("AS") | Some("EU") => Endpoint::Europe,
            Some("OC") => Endpoint::Australia,
            _ => Endpoint::Europe,
        }
    }

    pub fn base_url<'a>(&self, settings: &'a ReservationSettings) -> &'a str {
        let url = match self {
            Endpoint::NorthAmerica => &settings.na_endpoint,
            Endpoint::Europe => &settings.eu_endpoint,
            Endpoint::Australia => &settings.au_endpoint,
        };
        url.trim_end_matches('/')
    }

    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::NorthAmerica => "na",
            Endpoint::Europe => "eu",
            Endpoint::Australia => "au",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
