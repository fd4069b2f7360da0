//! Reverse-geocoding enrichment
//!
//! Backfills municipality/province/road/postcode/highway for facilities the
//! sources left bare, via a Nominatim-compatible endpoint. Requests are
//! serialized to one per second behind a rate limiter, and a pass is
//! resumable: every enriched facility is written to the store immediately,
//! so an interrupted pass resumes where it left off and may simply leave
//! records unenriched. Enrichment never overwrites a source-provided field.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tpnl_common::events::{EventBus, TpnlEvent};
use tpnl_common::model::{FacilityLocation, SourceKind};

use crate::config::EnrichmentConfig;
use crate::store::FacilityStore;

static HIGHWAY_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[AN]\d+").unwrap());

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: NominatimAddress,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NominatimAddress {
    municipality: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    road: Option<String>,
    postcode: Option<String>,
}

/// Nominatim-style reverse geocoding client, rate limited to 1 request per
/// second per the service's usage policy.
pub struct NominatimClient {
    client: reqwest::Client,
    endpoint: String,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl NominatimClient {
    /// # Panics
    /// Panics only if the TLS backend cannot be initialized.
    pub fn new(endpoint: impl Into<String>) -> Self {
        // Safe: 1 is always non-zero
        let quota = governor::Quota::per_second(std::num::NonZeroU32::new(1).unwrap());
        let rate_limiter = governor::RateLimiter::direct(quota);

        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("tpnl-fd/", env!("CARGO_PKG_VERSION"), " (facility directory)"))
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to build HTTP client (system error)"),
            endpoint: endpoint.into(),
            rate_limiter,
        }
    }

    /// Reverse geocode one point into administrative location fields.
    pub async fn reverse(&self, lat: f64, lon: f64) -> anyhow::Result<FacilityLocation> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}?format=json&lat={}&lon={}&zoom=18&addressdetails=1",
            self.endpoint, lat, lon
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("reverse geocoding returned {}", response.status());
        }

        let body: NominatimResponse = response.json().await?;
        Ok(location_from_address(body.address))
    }
}

fn location_from_address(address: NominatimAddress) -> FacilityLocation {
    let municipality = address
        .municipality
        .or(address.city)
        .or(address.town)
        .or(address.village);

    // A-roads and N-roads carry the highway ref in the road name
    let highway = address
        .road
        .as_deref()
        .and_then(|road| HIGHWAY_REF_RE.find(road))
        .map(|m| m.as_str().to_string());

    FacilityLocation {
        municipality,
        province: address.state,
        road: address.road,
        postcode: address.postcode,
        highway,
    }
}

/// Spawn the enrichment task: after each successful OSM merge it runs one
/// bounded, cancellable pass over facilities with no municipality yet.
pub fn spawn(
    config: &EnrichmentConfig,
    store: Arc<FacilityStore>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    if !config.enabled {
        debug!("Enrichment disabled");
        return;
    }

    let client = NominatimClient::new(config.endpoint.clone());
    let batch_limit = config.batch_limit;

    tokio::spawn(async move {
        let mut events = bus.subscribe();
        info!("Enrichment task started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(TpnlEvent::RefreshCompleted {
                    source: SourceKind::Osm,
                    ..
                }) => {
                    run_pass(&client, &store, &bus, &cancel, batch_limit).await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Enrichment task stopped");
    });
}

async fn run_pass(
    client: &NominatimClient,
    store: &FacilityStore,
    bus: &EventBus,
    cancel: &CancellationToken,
    batch_limit: usize,
) {
    let targets = store.unenriched(batch_limit).await;
    if targets.is_empty() {
        return;
    }
    info!(count = targets.len(), "Enrichment pass starting");

    let mut enriched = 0usize;
    for (facility_id, lat, lon) in targets {
        if cancel.is_cancelled() {
            break;
        }
        match client.reverse(lat, lon).await {
            Ok(location) if !location.is_empty() => {
                if store.apply_enrichment(facility_id, location).await {
                    enriched += 1;
                }
            }
            Ok(_) => {
                debug!(facility = %facility_id, "Reverse geocoding returned no address");
            }
            Err(e) => {
                // Left unenriched; the next pass retries
                warn!(facility = %facility_id, "Enrichment failed: {}", e);
            }
        }
    }

    let remaining = store.unenriched(usize::MAX).await.len();
    info!(enriched, remaining, "Enrichment pass finished");
    bus.emit_lossy(TpnlEvent::EnrichmentProgress {
        enriched,
        remaining,
        timestamp: chrono::Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_mapping_prefers_municipality() {
        let address: NominatimAddress = serde_json::from_str(
            r#"{
                "municipality": "Rotterdam",
                "city": "Rotterdam-Zuid",
                "state": "Zuid-Holland",
                "road": "Rijksweg A15",
                "postcode": "3199 LA"
            }"#,
        )
        .unwrap();

        let location = location_from_address(address);
        assert_eq!(location.municipality.as_deref(), Some("Rotterdam"));
        assert_eq!(location.province.as_deref(), Some("Zuid-Holland"));
        assert_eq!(location.road.as_deref(), Some("Rijksweg A15"));
        assert_eq!(location.highway.as_deref(), Some("A15"));
        assert_eq!(location.postcode.as_deref(), Some("3199 LA"));
    }

    #[test]
    fn test_city_fallback_chain() {
        let address: NominatimAddress =
            serde_json::from_str(r#"{"village": "Nuland", "road": "Dorpsstraat"}"#).unwrap();
        let location = location_from_address(address);
        assert_eq!(location.municipality.as_deref(), Some("Nuland"));
        // An ordinary street is not a highway ref
        assert!(location.highway.is_none());
    }

    #[test]
    fn test_n_road_ref_extracted() {
        let address: NominatimAddress =
            serde_json::from_str(r#"{"road": "N279 Veghel-Asten"}"#).unwrap();
        let location = location_from_address(address);
        assert_eq!(location.highway.as_deref(), Some("N279"));
    }

    #[test]
    fn test_empty_address_maps_to_empty_location() {
        let location = location_from_address(NominatimAddress::default());
        assert!(location.is_empty());
    }
}
