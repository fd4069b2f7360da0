//! Canonical facility store
//!
//! The single shared mutable resource of the service: a `tokio::sync::RwLock`
//! over the merged facility set. Queries take read locks and may run
//! concurrently; all writes funnel through the scheduler's merge task, one
//! merge pass at a time, so a query never observes a facility mid-merge.
//!
//! Facility lifecycle: created when a record cannot be matched, mutated in
//! place on later refreshes, and removed only once every contributing source
//! has missed a configured number of consecutive refresh cycles. Cycle
//! bookkeeping is per source kind ("generations"): a generation only advances
//! when that source merges successfully, so fetch failures never age
//! facilities out.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tpnl_common::geo::BoundingBox;
use tpnl_common::model::{
    CapacityMap, Facility, FacilityType, LiveStatus, SourceKind, SourceRef, VehicleType,
};

use crate::config::MatchingConfig;
use crate::fusion::confidence;
use crate::fusion::live_status::LiveStatusMerger;
use crate::fusion::matcher::{self, MatchPolicy};
use crate::normalize::NormalizedRecord;

/// One stored facility plus merge bookkeeping that never leaves the store
struct FacilityEntry {
    facility: Facility,
    /// Generation at which each contributing source kind last reported this
    /// facility
    last_seen: HashMap<SourceKind, u64>,
    /// Per-record capacity contributions; the merged map and the conflict
    /// penalty are derived from these on every pass, which keeps re-merging
    /// the same record idempotent
    source_capacity: HashMap<SourceRef, CapacityMap>,
    /// Priority of the source that set the current name
    name_rank: u8,
    /// Priority of the source that set the current coordinates
    position_rank: u8,
    /// Dynamic-feed cycle of the stored live status
    live_cycle: Option<u64>,
}

/// Result of one static-source merge pass
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    pub records: usize,
    pub merged: usize,
    pub created: usize,
    pub removed: usize,
    pub ambiguities: usize,
}

/// Result of one dynamic-feed pass
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveMergeStats {
    pub updated: usize,
    pub pending: usize,
    pub dropped: usize,
}

/// Viewport query parameters
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    pub bounds: Option<BoundingBox>,
    /// Empty means "all types", never "none"
    pub types: Vec<FacilityType>,
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Query result: one page plus whole-result-set figures
#[derive(Debug)]
pub struct QueryResult {
    pub facilities: Vec<Facility>,
    /// Per-type counts over the filtered set, computed before pagination
    pub stats: BTreeMap<FacilityType, usize>,
    /// Filtered count before pagination
    pub total: usize,
}

/// Dataset-wide summary for the stats endpoint
#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub total_facilities: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_province: BTreeMap<String, usize>,
    pub by_highway: BTreeMap<String, usize>,
    pub total_truck_capacity: u64,
    pub with_capacity: usize,
    pub with_polygon: usize,
    pub with_amenities: usize,
    pub with_live_status: usize,
    pub high_confidence: usize,
}

struct StoreInner {
    facilities: HashMap<Uuid, FacilityEntry>,
    by_source: HashMap<SourceRef, Uuid>,
    generations: HashMap<SourceKind, u64>,
    live: LiveStatusMerger,
    last_live_update: Option<DateTime<Utc>>,
}

/// The canonical facility store; cheap to clone handles are not provided,
/// share it behind an `Arc`.
pub struct FacilityStore {
    inner: RwLock<StoreInner>,
    match_policy: MatchPolicy,
    removal_cycles: u64,
}

impl FacilityStore {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                facilities: HashMap::new(),
                by_source: HashMap::new(),
                generations: HashMap::new(),
                live: LiveStatusMerger::new(config.pending_live_cycles, config.live_stale_cycles),
                last_live_update: None,
            }),
            match_policy: MatchPolicy {
                radius_m: config.radius_m,
                reject_factor: config.reject_factor,
            },
            removal_cycles: config.removal_cycles,
        }
    }

    /// Merge one static source's records, in adapter order. Serialized by
    /// the caller (the scheduler's single merge task).
    pub async fn merge_records(
        &self,
        kind: SourceKind,
        records: Vec<NormalizedRecord>,
    ) -> MergeStats {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let generation = {
            let g = inner.generations.entry(kind).or_insert(0);
            *g += 1;
            *g
        };

        let mut stats = MergeStats {
            records: records.len(),
            ..Default::default()
        };

        for record in records {
            self.merge_one(inner, record, generation, &mut stats);
        }

        stats.removed = self.sweep_departed(inner);

        debug!(
            source = %kind,
            generation,
            merged = stats.merged,
            created = stats.created,
            removed = stats.removed,
            "Merge pass complete"
        );

        stats
    }

    fn merge_one(
        &self,
        inner: &mut StoreInner,
        record: NormalizedRecord,
        generation: u64,
        stats: &mut MergeStats,
    ) {
        // Fast path: a record we have merged before updates its facility in
        // place, which also makes re-merging idempotent.
        if let Some(&facility_id) = inner.by_source.get(&record.source_ref) {
            if let Some(entry) = inner.facilities.get_mut(&facility_id) {
                apply_record(entry, &record, generation);
                stats.merged += 1;
                return;
            }
        }

        let result = matcher::find_match(
            &record,
            inner.facilities.iter().map(|(id, e)| (id, &e.facility)),
            &self.match_policy,
        );

        if let Some(ambiguity) = &result.ambiguity {
            stats.ambiguities += 1;
            warn!(
                record = %record.source_ref,
                facility = %ambiguity.facility_id,
                distance_m = ambiguity.distance_m as u64,
                similarity = ambiguity.name_similarity,
                "Merge ambiguity: name collision with distant facility, keeping separate"
            );
        }

        match result.matched {
            Some(facility_id) => {
                inner
                    .by_source
                    .insert(record.source_ref.clone(), facility_id);
                if let Some(entry) = inner.facilities.get_mut(&facility_id) {
                    apply_record(entry, &record, generation);
                    stats.merged += 1;
                }
            }
            None => {
                let entry = new_entry(&record, generation);
                let facility_id = entry.facility.facility_id;
                inner.by_source.insert(record.source_ref.clone(), facility_id);
                inner.facilities.insert(facility_id, entry);
                stats.created += 1;
            }
        }
    }

    /// Remove facilities whose every contributing source has missed at least
    /// `removal_cycles` consecutive cycles.
    fn sweep_departed(&self, inner: &mut StoreInner) -> usize {
        let generations = inner.generations.clone();
        let removal_cycles = self.removal_cycles;

        let departed: Vec<Uuid> = inner
            .facilities
            .iter()
            .filter(|(_, entry)| {
                entry.last_seen.iter().all(|(kind, seen_at)| {
                    let current = generations.get(kind).copied().unwrap_or(0);
                    current.saturating_sub(*seen_at) >= removal_cycles
                })
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &departed {
            if let Some(entry) = inner.facilities.remove(id) {
                info!(
                    facility = %id,
                    name = entry.facility.name.as_deref().unwrap_or("-"),
                    "Removing facility: all sources stopped reporting it"
                );
                inner
                    .by_source
                    .retain(|_, facility_id| facility_id != id);
            }
        }

        departed.len()
    }

    /// Join a dynamic-feed pass onto the stored facilities.
    pub async fn merge_live(&self, statuses: Vec<(String, LiveStatus)>) -> LiveMergeStats {
        let mut inner = self.inner.write().await;
        let StoreInner {
            by_source,
            live,
            facilities,
            last_live_update,
            ..
        } = &mut *inner;

        let outcome = live.apply(statuses, |source_id| {
            by_source
                .get(&SourceRef::new(SourceKind::DatexStatic, source_id))
                .copied()
        });

        let mut newest: Option<DateTime<Utc>> = *last_live_update;
        let updated = outcome.joined.len();
        for joined in outcome.joined {
            if let Some(entry) = facilities.get_mut(&joined.facility_id) {
                newest = Some(newest.map_or(joined.status.observed_at, |t| {
                    t.max(joined.status.observed_at)
                }));
                entry.facility.live_status = Some(joined.status);
                entry.live_cycle = Some(joined.cycle);
            }
        }
        *last_live_update = newest;

        LiveMergeStats {
            updated,
            pending: outcome.pending,
            dropped: outcome.dropped,
        }
    }

    /// Backfill administrative location fields from the enrichment pass.
    /// Only absent fields are filled; enrichment never overwrites a source.
    pub async fn apply_enrichment(
        &self,
        facility_id: Uuid,
        location: tpnl_common::model::FacilityLocation,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.facilities.get_mut(&facility_id) else {
            return false;
        };
        let target = &mut entry.facility.location;
        if target.municipality.is_none() {
            target.municipality = location.municipality;
        }
        if target.province.is_none() {
            target.province = location.province;
        }
        if target.road.is_none() {
            target.road = location.road;
        }
        if target.postcode.is_none() {
            target.postcode = location.postcode;
        }
        if target.highway.is_none() {
            target.highway = location.highway;
        }
        true
    }

    /// Viewport query: filter, count, paginate. Live statuses past the
    /// staleness window are stripped from the returned copies.
    pub async fn query(&self, params: &QueryParams) -> QueryResult {
        let inner = self.inner.read().await;

        let mut filtered: Vec<&FacilityEntry> = inner
            .facilities
            .values()
            .filter(|entry| {
                let f = &entry.facility;
                if let Some(bounds) = &params.bounds {
                    if !bounds.contains(tpnl_common::model::GeoPoint::new(f.latitude, f.longitude))
                    {
                        return false;
                    }
                }
                if !params.types.is_empty() && !params.types.contains(&f.facility_type) {
                    return false;
                }
                if let Some(search) = params.search.as_deref().filter(|s| !s.is_empty()) {
                    if !matches_search(f, search) {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Stable order for pagination: by name, unnamed last, id as tie-break
        filtered.sort_by(|a, b| {
            let name_a = a.facility.name.as_deref().map(str::to_lowercase);
            let name_b = b.facility.name.as_deref().map(str::to_lowercase);
            match (name_a, name_b) {
                (Some(a_name), Some(b_name)) => a_name
                    .cmp(&b_name)
                    .then_with(|| a.facility.facility_id.cmp(&b.facility.facility_id)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.facility.facility_id.cmp(&b.facility.facility_id),
            }
        });

        let total = filtered.len();
        let mut stats: BTreeMap<FacilityType, usize> = BTreeMap::new();
        for entry in &filtered {
            *stats.entry(entry.facility.facility_type).or_insert(0) += 1;
        }

        let facilities = filtered
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .map(|entry| materialize(entry, &inner.live))
            .collect();

        QueryResult {
            facilities,
            stats,
            total,
        }
    }

    /// Every facility, freshness-filtered, in stable id order
    pub async fn all_facilities(&self) -> Vec<Facility> {
        let inner = self.inner.read().await;
        let mut facilities: Vec<Facility> = inner
            .facilities
            .values()
            .map(|entry| materialize(entry, &inner.live))
            .collect();
        facilities.sort_by(|a, b| a.facility_id.cmp(&b.facility_id));
        facilities
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.facilities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.facilities.is_empty()
    }

    pub async fn last_live_update(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_live_update
    }

    /// Facilities missing administrative location context, for enrichment
    pub async fn unenriched(&self, limit: usize) -> Vec<(Uuid, f64, f64)> {
        let inner = self.inner.read().await;
        let mut missing: Vec<(Uuid, f64, f64)> = inner
            .facilities
            .values()
            .filter(|e| e.facility.location.municipality.is_none())
            .map(|e| (e.facility.facility_id, e.facility.latitude, e.facility.longitude))
            .collect();
        missing.sort_by(|a, b| a.0.cmp(&b.0));
        missing.truncate(limit);
        missing
    }

    /// Dataset summary for the stats endpoint
    pub async fn dataset_stats(&self) -> DatasetStats {
        let inner = self.inner.read().await;
        let mut stats = DatasetStats {
            total_facilities: inner.facilities.len(),
            ..Default::default()
        };

        for entry in inner.facilities.values() {
            let f = &entry.facility;
            *stats
                .by_type
                .entry(f.facility_type.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(province) = &f.location.province {
                *stats.by_province.entry(province.clone()).or_insert(0) += 1;
            }
            if let Some(highway) = &f.location.highway {
                *stats.by_highway.entry(highway.clone()).or_insert(0) += 1;
            }
            stats.total_truck_capacity += u64::from(
                f.capacity_for(VehicleType::Truck).unwrap_or(0)
                    + f.capacity_for(VehicleType::Lzv).unwrap_or(0),
            );
            if !f.capacity.is_empty() {
                stats.with_capacity += 1;
            }
            if f.polygon.is_some() {
                stats.with_polygon += 1;
            }
            if !f.amenities.is_empty() {
                stats.with_amenities += 1;
            }
            if entry
                .live_cycle
                .map(|c| inner.live.is_fresh(c))
                .unwrap_or(false)
            {
                stats.with_live_status += 1;
            }
            if f.confidence_score >= 0.7 {
                stats.high_confidence += 1;
            }
        }

        stats
    }
}

/// Copy a facility for output, stripping a live status that has gone stale
fn materialize(entry: &FacilityEntry, live: &LiveStatusMerger) -> Facility {
    let mut facility = entry.facility.clone();
    let fresh = entry.live_cycle.map(|c| live.is_fresh(c)).unwrap_or(false);
    if !fresh {
        facility.live_status = None;
    }
    facility
}

fn matches_search(facility: &Facility, search: &str) -> bool {
    let needle = search.to_lowercase();
    let mut haystacks: Vec<&str> = Vec::with_capacity(4);
    if let Some(name) = facility.name.as_deref() {
        haystacks.push(name);
    }
    if let Some(municipality) = facility.location.municipality.as_deref() {
        haystacks.push(municipality);
    }
    if let Some(province) = facility.location.province.as_deref() {
        haystacks.push(province);
    }
    if let Some(highway) = facility.location.highway.as_deref() {
        haystacks.push(highway);
    }
    haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(&needle))
}

fn new_entry(record: &NormalizedRecord, generation: u64) -> FacilityEntry {
    let rank = record.source_ref.kind.priority();
    let facility = Facility {
        facility_id: Uuid::new_v4(),
        name: record.name.clone(),
        latitude: record.point.lat,
        longitude: record.point.lon,
        polygon: record.polygon.clone(),
        area_m2: record.area_m2,
        capacity: record.capacity.clone(),
        facility_type: record.facility_type,
        hgv_designated: record.hgv_designated,
        operator: record.operator.clone(),
        amenities: record.amenities.clone(),
        surface: record.surface.clone(),
        opening_hours: record.opening_hours.clone(),
        location: record.location.clone(),
        contributing_sources: vec![record.source_ref.clone()],
        confidence_score: 0.0,
        live_status: None,
        first_seen: record.fetched_at,
        last_updated: record.fetched_at,
    };

    let mut entry = FacilityEntry {
        facility,
        last_seen: HashMap::from([(record.source_ref.kind, generation)]),
        source_capacity: HashMap::from([(record.source_ref.clone(), record.capacity.clone())]),
        name_rank: if record.name.is_some() { rank } else { 0 },
        position_rank: rank,
        live_cycle: None,
    };
    refresh_derived(&mut entry);
    entry
}

/// Merge a record's attributes into an existing entry by source priority.
///
/// Name and coordinates follow the priority order (a same-or-higher-ranked
/// source replaces, a lower-ranked source only fills gaps); capacity is
/// derived per vehicle type from all per-record contributions, keeping the
/// higher value on disagreement with a confidence penalty; everything else
/// follows "new overwrites, absent preserves".
fn apply_record(entry: &mut FacilityEntry, record: &NormalizedRecord, generation: u64) {
    let rank = record.source_ref.kind.priority();
    let facility = &mut entry.facility;

    if !facility
        .contributing_sources
        .contains(&record.source_ref)
    {
        facility.contributing_sources.push(record.source_ref.clone());
    }
    entry.last_seen.insert(record.source_ref.kind, generation);

    if let Some(name) = &record.name {
        if facility.name.is_none() || rank >= entry.name_rank {
            facility.name = Some(name.clone());
            entry.name_rank = rank;
        }
    }

    if rank >= entry.position_rank {
        facility.latitude = record.point.lat;
        facility.longitude = record.point.lon;
        entry.position_rank = rank;
    }

    if record.polygon.is_some() {
        facility.polygon = record.polygon.clone();
    }
    if record.area_m2.is_some() {
        facility.area_m2 = record.area_m2;
    }
    if record.operator.is_some() {
        facility.operator = record.operator.clone();
    }
    if record.surface.is_some() {
        facility.surface = record.surface.clone();
    }
    if record.opening_hours.is_some() {
        facility.opening_hours = record.opening_hours.clone();
    }
    for (key, value) in &record.amenities {
        facility
            .amenities
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    if record.location.municipality.is_some() && facility.location.municipality.is_none() {
        facility.location.municipality = record.location.municipality.clone();
    }
    if record.location.province.is_some() && facility.location.province.is_none() {
        facility.location.province = record.location.province.clone();
    }
    if record.location.road.is_some() && facility.location.road.is_none() {
        facility.location.road = record.location.road.clone();
    }
    if record.location.postcode.is_some() && facility.location.postcode.is_none() {
        facility.location.postcode = record.location.postcode.clone();
    }
    if record.location.highway.is_some() && facility.location.highway.is_none() {
        facility.location.highway = record.location.highway.clone();
    }

    facility.hgv_designated |= record.hgv_designated;

    // Rest/service classification is more specific than the truck-parking
    // default and survives later generic records
    if record.facility_type != FacilityType::TruckParking
        || facility.facility_type == FacilityType::TruckParking
    {
        facility.facility_type = record.facility_type;
    }

    entry
        .source_capacity
        .insert(record.source_ref.clone(), record.capacity.clone());

    facility.last_updated = record.fetched_at;

    refresh_derived(entry);
}

/// Recompute merged capacity, the conflict penalty, and the confidence score
/// from the per-record contributions. Deterministic and idempotent.
fn refresh_derived(entry: &mut FacilityEntry) {
    let mut merged = CapacityMap::new();
    let mut values_per_type: BTreeMap<VehicleType, Vec<u32>> = BTreeMap::new();

    for contribution in entry.source_capacity.values() {
        for (vehicle, count) in contribution {
            values_per_type.entry(*vehicle).or_default().push(*count);
        }
    }

    let mut conflicts = 0usize;
    for (vehicle, mut values) in values_per_type {
        values.sort_unstable();
        values.dedup();
        if values.len() > 1 {
            // Undercounting is the more common failure mode across these
            // sources: keep the higher figure, take the trust hit
            conflicts += 1;
        }
        if let Some(max) = values.last() {
            merged.insert(vehicle, *max);
        }
    }

    entry.facility.capacity = merged;
    let penalty = conflicts as f64 * 0.05;
    entry.facility.confidence_score = confidence::score(&entry.facility, penalty);
}
