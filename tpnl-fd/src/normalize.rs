//! Normalizer: source vocabulary → canonical vocabulary
//!
//! Maps every `SourceRecord` into the shapes used by `Facility` (vehicle-type
//! enum, facility-type enum, square meters, administrative location fields)
//! without merging across sources. Geolocation is validated here: a record
//! that cannot be placed, or that falls outside its source's sanity envelope,
//! is rejected with a typed error and never reaches the deduplicator.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

use tpnl_common::model::{
    CapacityMap, FacilityLocation, FacilityType, GeoPoint, SourceKind, SourceRecord, SourceRef,
    VehicleType,
};

use crate::config::GeoScope;

/// Amenity tag keys carried through to the facility, as collected upstream
const AMENITY_TAGS: [&str; 9] = [
    "fuel",
    "restaurant",
    "cafe",
    "toilets",
    "shower",
    "drinking_water",
    "wifi",
    "atm",
    "shop",
];

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// A record rejected during geolocation validation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoValidationError {
    #[error("record {source_ref} has no coordinates")]
    MissingCoordinates { source_ref: String },

    #[error("record {source_ref} has out-of-range coordinates ({lat}, {lon})")]
    OutOfRange {
        source_ref: String,
        lat: f64,
        lon: f64,
    },

    #[error("record {source_ref} at ({lat}, {lon}) is outside the {scope:?} envelope")]
    OutsideScope {
        source_ref: String,
        lat: f64,
        lon: f64,
        scope: GeoScope,
    },
}

/// A source record in canonical vocabulary, ready for deduplication
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub source_ref: SourceRef,
    pub point: GeoPoint,
    pub polygon: Option<Vec<[f64; 2]>>,
    pub area_m2: Option<f64>,
    pub name: Option<String>,
    pub capacity: CapacityMap,
    pub facility_type: FacilityType,
    pub hgv_designated: bool,
    pub operator: Option<String>,
    pub amenities: BTreeMap<String, String>,
    pub surface: Option<String>,
    pub opening_hours: Option<String>,
    pub location: FacilityLocation,
    pub fetched_at: DateTime<Utc>,
}

/// Normalize one record, validating its geolocation against the source's
/// sanity envelope.
pub fn normalize(
    record: &SourceRecord,
    scope: GeoScope,
) -> Result<NormalizedRecord, GeoValidationError> {
    let source_ref = record.source_ref();

    let point = record
        .point
        .ok_or_else(|| GeoValidationError::MissingCoordinates {
            source_ref: source_ref.to_string(),
        })?;

    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lon) {
        return Err(GeoValidationError::OutOfRange {
            source_ref: source_ref.to_string(),
            lat: point.lat,
            lon: point.lon,
        });
    }

    if !scope.envelope().contains(point) {
        return Err(GeoValidationError::OutsideScope {
            source_ref: source_ref.to_string(),
            lat: point.lat,
            lon: point.lon,
            scope,
        });
    }

    let capacity = normalize_capacity(record.source_kind, &record.raw_capacity);
    let hgv_designated = is_hgv_designated(record, &capacity);

    let mut amenities = BTreeMap::new();
    for key in AMENITY_TAGS {
        if let Some(value) = record.raw_tags.get(key) {
            amenities.insert(key.to_string(), value.clone());
        }
    }

    Ok(NormalizedRecord {
        point,
        polygon: record.polygon.clone(),
        area_m2: normalize_area(record),
        name: record
            .raw_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        capacity,
        facility_type: facility_type_of(record),
        hgv_designated,
        operator: record.raw_tags.get("operator").cloned(),
        amenities,
        surface: record.raw_tags.get("surface").cloned(),
        opening_hours: record.raw_tags.get("opening_hours").cloned(),
        location: FacilityLocation {
            municipality: record.raw_tags.get("location:municipality").cloned(),
            province: record.raw_tags.get("location:province").cloned(),
            road: record.raw_tags.get("location:road").cloned(),
            postcode: record.raw_tags.get("location:postcode").cloned(),
            highway: record.raw_tags.get("location:highway").cloned(),
        },
        fetched_at: record.fetched_at,
        source_ref,
    })
}

/// Canonicalize a raw capacity mapping.
///
/// The vehicle type comes from the key when it carries a hint, otherwise from
/// free text in the value ("74 hgv" → truck: 74). DATEX-II space groups are
/// distinct physical groups, so multiple codes landing in one bucket are
/// summed; other sources repeat the same figure under alias keys, where the
/// largest value wins.
pub fn normalize_capacity(
    kind: SourceKind,
    raw_capacity: &BTreeMap<String, String>,
) -> CapacityMap {
    let mut capacity = CapacityMap::new();

    for (key, value) in raw_capacity {
        let Some(count) = extract_count(value) else {
            continue;
        };
        let vehicle = vehicle_hint(key)
            .or_else(|| vehicle_hint(value))
            .unwrap_or(VehicleType::Unknown);

        let entry = capacity.entry(vehicle).or_insert(0);
        if kind == SourceKind::DatexStatic {
            *entry += count;
        } else {
            *entry = (*entry).max(count);
        }
    }

    capacity
}

/// First integer embedded in the value, if any
fn extract_count(value: &str) -> Option<u32> {
    NUMBER_RE.find(value).and_then(|m| m.as_str().parse().ok())
}

/// Vehicle-type hint in a key or free-text value
fn vehicle_hint(text: &str) -> Option<VehicleType> {
    let text = text.to_lowercase();
    if text.contains("lzv") || text.contains("heavyhaul") || text.contains("heavy_haul") {
        Some(VehicleType::Lzv)
    } else if text.contains("hgv")
        || text.contains("truck")
        || text.contains("lorry")
        || text.contains("vrachtwagen")
        || text.contains("refrigeratedgoods")
        || text.contains("unrecognized")
    {
        Some(VehicleType::Truck)
    } else if text.contains("van") || text.contains("bus") {
        Some(VehicleType::Van)
    } else if text.contains("car") || text.contains("auto") {
        Some(VehicleType::Car)
    } else if text.contains("total") {
        Some(VehicleType::Unknown)
    } else {
        None
    }
}

/// Area in m²: an explicit figure wins; length × width is the fallback
fn normalize_area(record: &SourceRecord) -> Option<f64> {
    if let Some(area) = record.area_m2 {
        return (area > 0.0).then_some(area);
    }
    if let Some(area) = record.raw_tags.get("area").and_then(|a| a.parse::<f64>().ok()) {
        return (area > 0.0).then_some(area);
    }
    let length: f64 = record.raw_tags.get("length")?.parse().ok()?;
    let width: f64 = record.raw_tags.get("width")?.parse().ok()?;
    (length > 0.0 && width > 0.0).then_some(length * width)
}

/// Facility type from classification flags, falling back to the highway tag
fn facility_type_of(record: &SourceRecord) -> FacilityType {
    let classification = record.classification;
    if classification.is_rest_area || classification.is_service_area {
        return classification.facility_type();
    }
    match record.raw_tags.get("highway").map(String::as_str) {
        Some("rest_area") => FacilityType::RestArea,
        Some("services") => FacilityType::ServiceArea,
        _ => classification.facility_type(),
    }
}

/// Explicit HGV/truck designation by this source
fn is_hgv_designated(record: &SourceRecord, capacity: &CapacityMap) -> bool {
    if let Some(hgv) = record.raw_tags.get("hgv") {
        let hgv = hgv.to_lowercase();
        if hgv == "yes" || hgv == "designated" {
            return true;
        }
    }
    if capacity.contains_key(&VehicleType::Truck) || capacity.contains_key(&VehicleType::Lzv) {
        return true;
    }
    record
        .raw_name
        .as_deref()
        .map(|name| {
            let name = name.to_lowercase();
            name.contains("truck") || name.contains("hgv") || name.contains("vrachtwagen")
        })
        .unwrap_or(false)
}
