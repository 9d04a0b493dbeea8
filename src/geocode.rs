//! Free-text address lookup against a Nominatim-compatible search endpoint.
//!
//! The provider is best effort: every failure (timeout, connection error,
//! non-success status, unreadable body) is logged and turned into an empty
//! candidate list.

use crate::config::GeocoderConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Shorter queries are not worth a round trip.
const MIN_QUERY_LEN: usize = 3;

#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("geocoder request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("geocoder returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("geocoder response could not be parsed: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeCandidate {
    pub display_label: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Place {
    display_name: String,
    lat: serde_json::Value,
    lon: serde_json::Value,
}

fn coordinate(value: &serde_json::Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parses a search response body. Places without usable coordinates are
/// skipped.
pub fn parse_candidates(body: &str) -> Result<Vec<GeocodeCandidate>, serde_json::Error> {
    let places: Vec<Place> = serde_json::from_str(body)?;
    Ok(places
        .into_iter()
        .filter_map(|place| {
            Some(GeocodeCandidate {
                latitude: coordinate(&place.lat)?,
                longitude: coordinate(&place.lon)?,
                display_label: place.display_name,
            })
        })
        .collect())
}

pub struct Geocoder {
    client: reqwest::Client,
    config: GeocoderConfig,
}

impl Geocoder {
    pub fn new(config: GeocoderConfig) -> Result<Self, ExternalServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    /// Candidate locations for `query`, at most `limit` of them. Never fails.
    pub async fn search(&self, query: &str) -> Vec<GeocodeCandidate> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }

        match self.try_search(query).await {
            Ok(candidates) => {
                debug!("Geocoder returned {} candidates for '{}'", candidates.len(), query);
                candidates
            }
            Err(e) => {
                warn!("Geocoding '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str) -> Result<Vec<GeocodeCandidate>, ExternalServiceError> {
        let limit = self.config.limit.to_string();
        let mut params = vec![("q", query), ("format", "json"), ("limit", limit.as_str())];
        if let Some(codes) = &self.config.country_codes {
            params.push(("countrycodes", codes.as_str()));
        }

        let response = self.client.get(&self.config.url).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(ExternalServiceError::Status(response.status()));
        }

        let body = response.text().await?;
        let mut candidates = parse_candidates(&body)?;
        candidates.truncate(self.config.limit as usize);
        Ok(candidates)
    }
}
