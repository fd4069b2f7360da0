//! OSM snapshot adapter
//!
//! Input is the pre-enriched JSON array produced by the collection pipeline:
//! one object per facility with optional `capacity`, `location.*`,
//! `classification.*`, amenity and tag sub-objects. Every field except the
//! identifier may be missing; classification booleans default to false and
//! capacity to unknown.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use tpnl_common::geo;
use tpnl_common::model::{Classification, GeoPoint, SourceKind, SourceRecord};

use super::{AdapterError, DocumentError, ParseOutcome};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OsmFeature {
    id: Option<Value>,
    osm_id: Option<i64>,
    osm_type: Option<String>,
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    geometry: Option<OsmGeometry>,
    area_m2: Option<f64>,
    capacity: BTreeMap<String, Value>,
    tags: BTreeMap<String, Value>,
    amenities: BTreeMap<String, Value>,
    location: BTreeMap<String, Value>,
    operator: Option<String>,
    hgv: Option<String>,
    surface: Option<String>,
    opening_hours: Option<String>,
    classification: Option<OsmClassification>,
}

#[derive(Debug, Deserialize)]
struct OsmGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OsmClassification {
    is_truck_parking: bool,
    is_rest_area: bool,
    is_service_area: bool,
}

/// Parse the snapshot array. One malformed element is skipped and reported;
/// a document that is not a JSON array fails outright.
pub fn parse(raw: &[u8], fetched_at: DateTime<Utc>) -> Result<ParseOutcome, DocumentError> {
    let elements: Vec<Value> =
        serde_json::from_slice(raw).map_err(|e| DocumentError::Json(e.to_string()))?;

    let mut outcome = ParseOutcome::default();

    for (index, element) in elements.into_iter().enumerate() {
        let feature: OsmFeature = match serde_json::from_value(element) {
            Ok(f) => f,
            Err(e) => {
                outcome.errors.push(AdapterError::MalformedRow {
                    row_id: format!("element {}", index),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match feature_to_record(feature, index, fetched_at) {
            Ok(record) => outcome.records.push(record),
            Err(err) => outcome.errors.push(err),
        }
    }

    Ok(outcome)
}

fn feature_to_record(
    feature: OsmFeature,
    index: usize,
    fetched_at: DateTime<Utc>,
) -> Result<SourceRecord, AdapterError> {
    let source_id = source_id_of(&feature).ok_or_else(|| AdapterError::MalformedRow {
        row_id: format!("element {}", index),
        reason: "no id or osm_id field".to_string(),
    })?;

    // Polygon geometry yields a ring + representative point; explicit
    // latitude/longitude fields win when both are present.
    let ring = feature.geometry.as_ref().and_then(polygon_ring);
    let point = match (feature.latitude, feature.longitude) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
        _ => ring
            .as_deref()
            .and_then(geo::ring_centroid)
            .or_else(|| point_geometry(feature.geometry.as_ref())),
    };

    let area_m2 = feature
        .area_m2
        .or_else(|| ring.as_deref().map(geo::polygon_area_m2).filter(|a| *a > 0.0));

    let mut raw_capacity = BTreeMap::new();
    for (key, value) in &feature.capacity {
        if let Some(text) = value_to_string(value) {
            raw_capacity.insert(key.clone(), text);
        }
    }

    // Tags carry everything the normalizer and scorer need; top-level
    // extracted fields are folded back in when the snapshot dropped the tag.
    let mut raw_tags = BTreeMap::new();
    for (key, value) in &feature.tags {
        if let Some(text) = value_to_string(value) {
            raw_tags.insert(key.clone(), text);
        }
    }
    for (key, value) in &feature.amenities {
        if let Some(text) = value_to_string(value) {
            raw_tags.entry(key.clone()).or_insert(text);
        }
    }
    if let Some(operator) = &feature.operator {
        raw_tags.entry("operator".to_string()).or_insert_with(|| operator.clone());
    }
    if let Some(hgv) = &feature.hgv {
        raw_tags.entry("hgv".to_string()).or_insert_with(|| hgv.clone());
    }
    if let Some(surface) = &feature.surface {
        raw_tags.entry("surface".to_string()).or_insert_with(|| surface.clone());
    }
    if let Some(hours) = &feature.opening_hours {
        raw_tags
            .entry("opening_hours".to_string())
            .or_insert_with(|| hours.clone());
    }
    for (key, value) in &feature.location {
        if let Some(text) = value_to_string(value) {
            raw_tags.insert(format!("location:{}", key), text);
        }
    }

    let classification = feature
        .classification
        .map(|c| Classification {
            is_truck_parking: c.is_truck_parking,
            is_rest_area: c.is_rest_area,
            is_service_area: c.is_service_area,
        })
        .unwrap_or_default();

    Ok(SourceRecord {
        source_id,
        source_kind: SourceKind::Osm,
        point,
        polygon: ring,
        area_m2,
        raw_name: feature.name.filter(|n| !n.trim().is_empty()),
        raw_capacity,
        raw_tags,
        classification,
        fetched_at,
    })
}

fn source_id_of(feature: &OsmFeature) -> Option<String> {
    if let Some(id) = &feature.id {
        match id {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Number(n) => return Some(n.to_string()),
            _ => {}
        }
    }
    feature.osm_id.map(|osm_id| {
        let osm_type = feature.osm_type.as_deref().unwrap_or("node");
        format!("osm_{}_{}", osm_type, osm_id)
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Outer ring of a Polygon geometry as `[lon, lat]` pairs
fn polygon_ring(geometry: &OsmGeometry) -> Option<Vec<[f64; 2]>> {
    if geometry.kind != "Polygon" {
        return None;
    }
    let rings: Vec<Vec<[f64; 2]>> = serde_json::from_value(geometry.coordinates.clone()).ok()?;
    rings.into_iter().next().filter(|ring| ring.len() >= 3)
}

fn point_geometry(geometry: Option<&OsmGeometry>) -> Option<GeoPoint> {
    let geometry = geometry?;
    if geometry.kind != "Point" {
        return None;
    }
    let coords: [f64; 2] = serde_json::from_value(geometry.coordinates.clone()).ok()?;
    Some(GeoPoint::new(coords[1], coords[0]))
}
