//! Facility query endpoints
//!
//! `GET /facilities` is the viewport query: rectangular bounds, type filter,
//! text search, pagination. `total` always reflects the filtered count before
//! pagination so clients can render "N of M". `GET /facilities/live` returns
//! the full set with live occupancy where fresh, and `GET /facilities.geojson`
//! renders the current set as a FeatureCollection for map overlays.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use tpnl_common::model::{Facility, FacilityType};

use crate::error::{ApiError, ApiResult};
use crate::store::QueryParams;
use crate::AppState;

const DEFAULT_LIMIT: usize = 500;
const MAX_LIMIT: usize = 2000;

pub fn facility_routes() -> Router<AppState> {
    Router::new()
        .route("/facilities", get(get_facilities))
        .route("/facilities/live", get(get_facilities_live))
        .route("/facilities.geojson", get(get_facilities_geojson))
}

#[derive(Debug, Deserialize)]
pub struct FacilitiesQuery {
    /// `minLat,minLng,maxLat,maxLng`
    bounds: Option<String>,
    /// Comma-separated facility types; absent or empty means all types
    types: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitiesResponse {
    facilities: Vec<Facility>,
    stats: BTreeMap<String, usize>,
    total: usize,
    offset: usize,
    limit: usize,
}

async fn get_facilities(
    State(state): State<AppState>,
    Query(query): Query<FacilitiesQuery>,
) -> ApiResult<Json<FacilitiesResponse>> {
    let params = parse_params(&query)?;
    let result = state.store.query(&params).await;

    let stats = result
        .stats
        .into_iter()
        .map(|(facility_type, count)| (facility_type.as_str().to_string(), count))
        .collect();

    Ok(Json(FacilitiesResponse {
        facilities: result.facilities,
        stats,
        total: result.total,
        offset: params.offset,
        limit: params.limit,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiveResponse {
    facilities: Vec<Facility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<chrono::DateTime<chrono::Utc>>,
    total_facilities: usize,
}

async fn get_facilities_live(State(state): State<AppState>) -> ApiResult<Json<LiveResponse>> {
    let facilities = state.store.all_facilities().await;
    let total_facilities = facilities.len();
    Ok(Json(LiveResponse {
        facilities,
        last_updated: state.store.last_live_update().await,
        total_facilities,
    }))
}

async fn get_facilities_geojson(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let facilities = state.store.all_facilities().await;
    let features: Vec<Value> = facilities.iter().map(feature_of).collect();

    Ok(Json(json!({
        "type": "FeatureCollection",
        "features": features,
    })))
}

/// One facility as a GeoJSON feature: the mapped polygon when known,
/// otherwise the representative point
fn feature_of(facility: &Facility) -> Value {
    let geometry = match &facility.polygon {
        Some(ring) => json!({
            "type": "Polygon",
            "coordinates": [ring],
        }),
        None => json!({
            "type": "Point",
            "coordinates": [facility.longitude, facility.latitude],
        }),
    };

    let mut properties = json!({
        "facilityId": facility.facility_id,
        "name": facility.name,
        "facilityType": facility.facility_type,
        "hgvDesignated": facility.hgv_designated,
        "capacity": facility.capacity,
        "confidenceScore": facility.confidence_score,
    });
    if let Some(live) = &facility.live_status {
        properties["liveStatus"] = serde_json::to_value(live).unwrap_or(Value::Null);
    }
    if let Some(operator) = &facility.operator {
        properties["operator"] = json!(operator);
    }
    if let Some(highway) = &facility.location.highway {
        properties["highway"] = json!(highway);
    }

    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    })
}

fn parse_params(query: &FacilitiesQuery) -> Result<QueryParams, ApiError> {
    let bounds = query
        .bounds
        .as_deref()
        .filter(|b| !b.is_empty())
        .map(|b| {
            b.parse()
                .map_err(|e| ApiError::BadRequest(format!("invalid bounds: {}", e)))
        })
        .transpose()?;

    let mut types = Vec::new();
    if let Some(raw) = query.types.as_deref().filter(|t| !t.is_empty()) {
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let facility_type = match part {
                "truck_parking" => FacilityType::TruckParking,
                "service_area" => FacilityType::ServiceArea,
                "rest_area" => FacilityType::RestArea,
                other => {
                    return Err(ApiError::BadRequest(format!(
                        "unknown facility type: {}",
                        other
                    )))
                }
            };
            if !types.contains(&facility_type) {
                types.push(facility_type);
            }
        }
    }

    Ok(QueryParams {
        bounds,
        types,
        search: query.search.clone().filter(|s| !s.is_empty()),
        limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: query.offset.unwrap_or(0),
    })
}
