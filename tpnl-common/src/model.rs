//! Canonical data model for truck-parking facilities
//!
//! Two shapes matter here: `SourceRecord` is one source's view of a facility
//! before any cross-source merging, `Facility` is the canonical deduplicated
//! entity served to map clients. Conversion between the two is the job of the
//! normalizer and deduplicator in tpnl-fd; nothing source-specific may leak
//! into `Facility`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// External data source identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Pre-enriched OpenStreetMap snapshot (static artifact, manual refresh)
    Osm,
    /// DATEX-II static facility table (NDW)
    DatexStatic,
    /// DATEX-II dynamic occupancy feed (NDW)
    DatexDynamic,
    /// Pan-European truck parking research CSV
    PanEuCsv,
}

impl SourceKind {
    /// Stable lowercase name used in URLs and config sections
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Osm => "osm",
            SourceKind::DatexStatic => "datex_static",
            SourceKind::DatexDynamic => "datex_dynamic",
            SourceKind::PanEuCsv => "pan_eu_csv",
        }
    }

    /// Merge priority for name/capacity fields: higher outranks lower.
    /// DatexStatic and Osm outrank PanEuCsv (more structured, curated).
    pub fn priority(&self) -> u8 {
        match self {
            SourceKind::DatexStatic => 3,
            SourceKind::Osm => 2,
            SourceKind::PanEuCsv => 1,
            SourceKind::DatexDynamic => 0,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "osm" => Ok(SourceKind::Osm),
            "datex_static" => Ok(SourceKind::DatexStatic),
            "datex_dynamic" => Ok(SourceKind::DatexDynamic),
            "pan_eu_csv" => Ok(SourceKind::PanEuCsv),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

/// Vehicle type buckets for capacity figures
///
/// Absent entries in a capacity map mean "unknown", never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Van,
    Truck,
    /// Dutch extra-long truck combination (up to 25.25 m)
    Lzv,
    Unknown,
}

/// Canonical capacity mapping: spaces per vehicle type
pub type CapacityMap = BTreeMap<VehicleType, u32>;

/// Facility classification, derived from source flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityType {
    TruckParking,
    ServiceArea,
    RestArea,
}

impl FacilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::TruckParking => "truck_parking",
            FacilityType::ServiceArea => "service_area",
            FacilityType::RestArea => "rest_area",
        }
    }
}

impl fmt::Display for FacilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification flags as reported by a single source.
///
/// `FacilityType` is derived from these at normalization time; the booleans
/// themselves are never stored on `Facility`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub is_truck_parking: bool,
    #[serde(default)]
    pub is_rest_area: bool,
    #[serde(default)]
    pub is_service_area: bool,
}

impl Classification {
    /// Derive the canonical facility type. Rest area wins over service area;
    /// anything else in this dataset is truck parking.
    pub fn facility_type(&self) -> FacilityType {
        if self.is_rest_area {
            FacilityType::RestArea
        } else if self.is_service_area {
            FacilityType::ServiceArea
        } else {
            FacilityType::TruckParking
        }
    }
}

/// A WGS84 point, decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// `(source_kind, source_id)` pair identifying one contributing record.
///
/// `source_id` is unique only within its kind; cross-source identity is
/// established by the deduplicator, never assumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

impl SourceRef {
    pub fn new(kind: SourceKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One row as seen from a single source, pre-merge.
///
/// Polygons are already reduced to a representative point plus an optional
/// ring and area; capacity and tags are kept raw (source vocabulary) until
/// the normalizer canonicalizes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub source_kind: SourceKind,
    /// Representative point; absent means the record cannot be geolocated
    /// and will be rejected by the normalizer.
    pub point: Option<GeoPoint>,
    /// Outer ring as `[lon, lat]` pairs, when the source mapped a boundary
    pub polygon: Option<Vec<[f64; 2]>>,
    pub area_m2: Option<f64>,
    pub raw_name: Option<String>,
    /// Vehicle-type-keyed capacity strings in source vocabulary
    /// (e.g. `"hgv" -> "74"`, `"total" -> "74 hgv"`)
    #[serde(default)]
    pub raw_capacity: BTreeMap<String, String>,
    /// Opaque source tags, preserved for normalization and scoring
    #[serde(default)]
    pub raw_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub classification: Classification,
    pub fetched_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn source_ref(&self) -> SourceRef {
        SourceRef::new(self.source_kind, self.source_id.clone())
    }
}

/// Live occupancy state enum from the dynamic feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyStatus {
    SpacesAvailable,
    Full,
    Unknown,
}

/// Real-time occupancy, always sourced from the DATEX-II dynamic feed.
///
/// Replaced wholesale on every successful dynamic refresh; treated as absent
/// by the query layer once it has missed two refresh cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub vacant_spaces: u32,
    pub occupied_spaces: u32,
    /// 0–100
    pub occupancy_percent: f64,
    pub status: OccupancyStatus,
    pub observed_at: DateTime<Utc>,
}

/// Administrative location context, backfilled by the enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    /// Highway ref in `[AN]\d+` form, e.g. "A15"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highway: Option<String>,
}

impl FacilityLocation {
    pub fn is_empty(&self) -> bool {
        self.municipality.is_none()
            && self.province.is_none()
            && self.road.is_none()
            && self.postcode.is_none()
            && self.highway.is_none()
    }
}

/// The canonical, deduplicated entity exposed to consumers.
///
/// `facility_id` is minted once at creation and never reassigned, even when
/// the set of contributing sources changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub facility_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_m2: Option<f64>,
    /// Spaces per vehicle type; absent entries mean "unknown", never zero
    pub capacity: CapacityMap,
    pub facility_type: FacilityType,
    /// Explicitly HGV/truck designated by at least one source
    pub hgv_designated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub amenities: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    #[serde(default, skip_serializing_if = "FacilityLocation::is_empty")]
    pub location: FacilityLocation,
    /// Ordered set of contributing records, insertion order, no duplicates
    pub contributing_sources: Vec<SourceRef>,
    /// Completeness/trust estimate in [0, 1]
    pub confidence_score: f64,
    /// Present only while a dynamic record is actively joined and fresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_status: Option<LiveStatus>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Facility {
    /// Capacity for one vehicle type, `None` when unknown
    pub fn capacity_for(&self, vehicle: VehicleType) -> Option<u32> {
        self.capacity.get(&vehicle).copied()
    }

    /// True when the facility has any contributing record of `kind`
    pub fn has_source_kind(&self, kind: SourceKind) -> bool {
        self.contributing_sources.iter().any(|s| s.kind == kind)
    }
}
