//! Integration tests for tpnl-fd API endpoints
//!
//! Covers the viewport query contract (bounds, types, search, pagination),
//! the live sub-resource, GeoJSON export, per-source status, manual refresh
//! triggers, and the health endpoint. The store is seeded through the real
//! adapter → normalizer → merge pipeline; no scheduler tasks run.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt; // for `oneshot` method

use tpnl_common::events::EventBus;
use tpnl_common::model::SourceKind;
use tpnl_fd::config::{FdConfig, GeoScope};
use tpnl_fd::store::FacilityStore;
use tpnl_fd::{adapters, build_router, normalize, AppState};

/// Test helper: state with an in-memory store and no running source tasks
fn setup_state() -> (AppState, Arc<FacilityStore>) {
    let config = FdConfig {
        sources: tpnl_fd::config::SourcesConfig {
            osm: tpnl_fd::config::OsmSourceConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };
    let store = Arc::new(FacilityStore::new(&config.matching));
    let bus = EventBus::new(64);
    let scheduler = tpnl_fd::scheduler::spawn(&config, store.clone(), bus.clone(), CancellationToken::new());
    (AppState::new(store.clone(), bus, scheduler), store)
}

/// Seed the store through the real OSM adapter + normalizer
async fn seed_osm(store: &FacilityStore, json: &[u8]) {
    let fetched_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
    let outcome = adapters::osm::parse(json, fetched_at).expect("valid snapshot");
    let records: Vec<_> = outcome
        .records
        .iter()
        .map(|r| normalize::normalize(r, GeoScope::Netherlands).expect("in bounds"))
        .collect();
    store.merge_records(SourceKind::Osm, records).await;
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

const SNAPSHOT: &[u8] = br#"[
    {"id": "osm_way_1", "name": "Maasvlakte Plaza", "latitude": 51.929, "longitude": 4.022,
     "capacity": {"truck_spots": 357}, "tags": {"hgv": "designated"},
     "location": {"municipality": "Rotterdam", "province": "Zuid-Holland", "highway": "N15"}},
    {"id": "osm_way_2", "name": "De Lucht", "latitude": 52.1, "longitude": 4.7,
     "classification": {"is_rest_area": true}},
    {"id": "osm_way_3", "name": "Truckstop Venlo", "latitude": 51.3704, "longitude": 6.1723,
     "capacity": {"capacity:hgv": "74"}}
]"#;

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (state, _) = setup_state();
    let app = build_router(state);

    let response = app.oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tpnl-fd");
    assert!(body["version"].is_string());
    assert_eq!(body["facilities"], 0);
}

// =============================================================================
// Viewport query
// =============================================================================

#[tokio::test]
async fn test_facilities_cold_start_is_empty_not_error() {
    let (state, _) = setup_state();
    let app = build_router(state);

    let response = app.oneshot(test_request("GET", "/facilities")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 0);
    assert_eq!(body["facilities"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_facilities_bounds_filter_and_total() {
    let (state, store) = setup_state();
    seed_osm(&store, SNAPSHOT).await;
    let app = build_router(state);

    // Bounds around Rotterdam + De Lucht, excluding Venlo; limit of 1
    let response = app
        .oneshot(test_request(
            "GET",
            "/facilities?bounds=51.8,3.9,52.2,4.8&limit=1",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 2, "total is the filtered count, not the page");
    assert_eq!(body["facilities"].as_array().unwrap().len(), 1);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["offset"], 0);

    // Stats cover the whole filtered set even though limit truncated
    assert_eq!(body["stats"]["truck_parking"], 1);
    assert_eq!(body["stats"]["rest_area"], 1);

    let facility = &body["facilities"][0];
    let lat = facility["latitude"].as_f64().unwrap();
    let lon = facility["longitude"].as_f64().unwrap();
    assert!((51.8..=52.2).contains(&lat));
    assert!((3.9..=4.8).contains(&lon));
}

#[tokio::test]
async fn test_facilities_type_and_search_filters() {
    let (state, store) = setup_state();
    seed_osm(&store, SNAPSHOT).await;
    let app = build_router(state.clone());

    let response = app
        .oneshot(test_request("GET", "/facilities?types=rest_area"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["facilities"][0]["name"], "De Lucht");

    // Search matches municipality, case-insensitively
    let response = build_router(state)
        .oneshot(test_request("GET", "/facilities?search=rotterdam"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["facilities"][0]["name"], "Maasvlakte Plaza");
}

#[tokio::test]
async fn test_facilities_rejects_bad_parameters() {
    let (state, _) = setup_state();

    let response = build_router(state.clone())
        .oneshot(test_request("GET", "/facilities?bounds=not-coordinates"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let response = build_router(state)
        .oneshot(test_request("GET", "/facilities?types=parking_garage"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_facilities_wire_form_uses_canonical_vocabulary() {
    let (state, store) = setup_state();
    seed_osm(&store, SNAPSHOT).await;
    let app = build_router(state);

    let response = app
        .oneshot(test_request("GET", "/facilities?search=venlo"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    let facility = &body["facilities"][0];

    // Canonical vehicle enum keys, never source tag strings
    assert_eq!(facility["capacity"]["truck"], 74);
    assert!(facility["capacity"].get("capacity:hgv").is_none());
    assert_eq!(facility["facilityType"], "truck_parking");
    assert!(facility["confidenceScore"].as_f64().unwrap() >= 0.6);
    assert!(facility["contributingSources"][0]["kind"].is_string());
}

// =============================================================================
// Live sub-resource
// =============================================================================

#[tokio::test]
async fn test_facilities_live_shape() {
    let (state, store) = setup_state();

    // A static facility joined with a live status
    let fetched_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
    let outcome = adapters::datex_static::parse(
        br#"<parkingTable>
          <parkingRecord id="NL-12_421">
            <parkingName><values><value>De Lucht</value></values></parkingName>
            <parkingLocation><pointByCoordinates><pointCoordinates>
              <latitude>51.8232</latitude><longitude>5.1121</longitude>
            </pointCoordinates></pointByCoordinates></parkingLocation>
          </parkingRecord>
        </parkingTable>"#,
        fetched_at,
    )
    .unwrap();
    let records: Vec<_> = outcome
        .records
        .iter()
        .map(|r| normalize::normalize(r, GeoScope::Netherlands).unwrap())
        .collect();
    store.merge_records(SourceKind::DatexStatic, records).await;

    let dynamic = adapters::datex_dynamic::parse(
        br#"<parkingStatusPublication>
          <parkingRecordStatus>
            <parkingRecordReference id="NL-12_421"/>
            <parkingOccupancy>
              <parkingNumberOfVacantSpaces>12</parkingNumberOfVacantSpaces>
              <parkingNumberOfOccupiedSpaces>38</parkingNumberOfOccupiedSpaces>
              <parkingOccupancy>76</parkingOccupancy>
            </parkingOccupancy>
            <parkingSiteStatus>spacesAvailable</parkingSiteStatus>
            <parkingStatusOriginTime>2026-03-14T08:59:30Z</parkingStatusOriginTime>
          </parkingRecordStatus>
        </parkingStatusPublication>"#,
        fetched_at,
    )
    .unwrap();
    store.merge_live(dynamic.statuses).await;

    let app = build_router(state);
    let response = app
        .oneshot(test_request("GET", "/facilities/live"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["totalFacilities"], 1);
    assert!(body["lastUpdated"].is_string());

    let facility = &body["facilities"][0];
    assert_eq!(facility["liveStatus"]["vacantSpaces"], 12);
    assert_eq!(facility["liveStatus"]["occupancyPercent"], 76.0);
    assert_eq!(facility["liveStatus"]["status"], "spaces_available");
}

#[tokio::test]
async fn test_stale_live_status_absent_from_responses() {
    let (state, store) = setup_state();

    let fetched_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
    let outcome = adapters::datex_static::parse(
        br#"<parkingTable><parkingRecord id="NL-7_002">
            <parkingLocation><pointByCoordinates><pointCoordinates>
              <latitude>51.9</latitude><longitude>4.4</longitude>
            </pointCoordinates></pointByCoordinates></parkingLocation>
        </parkingRecord></parkingTable>"#,
        fetched_at,
    )
    .unwrap();
    let records: Vec<_> = outcome
        .records
        .iter()
        .map(|r| normalize::normalize(r, GeoScope::Netherlands).unwrap())
        .collect();
    store.merge_records(SourceKind::DatexStatic, records).await;

    let dynamic = adapters::datex_dynamic::parse(
        br#"<parkingStatusPublication><parkingRecordStatus>
            <parkingRecordReference id="NL-7_002"/>
            <parkingOccupancy><parkingNumberOfVacantSpaces>4</parkingNumberOfVacantSpaces></parkingOccupancy>
        </parkingRecordStatus></parkingStatusPublication>"#,
        fetched_at,
    )
    .unwrap();
    store.merge_live(dynamic.statuses).await;

    // Miss three dynamic cycles (staleness window is two)
    for _ in 0..3 {
        store.merge_live(Vec::new()).await;
    }

    let app = build_router(state);
    let response = app
        .oneshot(test_request("GET", "/facilities/live"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert!(body["facilities"][0].get("liveStatus").is_none());
}

// =============================================================================
// GeoJSON export
// =============================================================================

#[tokio::test]
async fn test_geojson_feature_collection() {
    let (state, store) = setup_state();
    seed_osm(&store, SNAPSHOT).await;
    let app = build_router(state);

    let response = app
        .oneshot(test_request("GET", "/facilities.geojson"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["type"], "FeatureCollection");
    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);
    for feature in features {
        assert_eq!(feature["type"], "Feature");
        assert!(feature["geometry"]["type"].is_string());
        assert!(feature["properties"]["facilityId"].is_string());
    }
}

// =============================================================================
// Stats and status
// =============================================================================

#[tokio::test]
async fn test_stats_endpoint() {
    let (state, store) = setup_state();
    seed_osm(&store, SNAPSHOT).await;
    let app = build_router(state);

    let response = app.oneshot(test_request("GET", "/stats")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    assert_eq!(body["totalFacilities"], 3);
    assert_eq!(body["byType"]["truck_parking"], 2);
    assert_eq!(body["byType"]["rest_area"], 1);
    assert_eq!(body["byProvince"]["Zuid-Holland"], 1);
    assert_eq!(body["byHighway"]["N15"], 1);
    assert_eq!(body["totalTruckCapacity"], 357 + 74);
    assert_eq!(body["withCapacity"], 2);
}

#[tokio::test]
async fn test_status_lists_all_sources() {
    let (state, _) = setup_state();
    let app = build_router(state);

    let response = app.oneshot(test_request("GET", "/status")).await.unwrap();
    let body = extract_json(response.into_body()).await;

    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 4);
    for source in sources {
        assert_eq!(source["enabled"], false);
        assert_eq!(source["phase"], "idle");
        assert!(source.get("lastSuccess").is_none());
    }
    assert_eq!(body["totalFacilities"], 0);
}

#[tokio::test]
async fn test_refresh_trigger_errors() {
    let (state, _) = setup_state();

    // Disabled source
    let response = build_router(state.clone())
        .oneshot(test_request("POST", "/refresh/osm"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown source name
    let response = build_router(state)
        .oneshot(test_request("POST", "/refresh/overpass"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
