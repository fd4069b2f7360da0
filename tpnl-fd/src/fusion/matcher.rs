//! Deduplicator/matcher: record → existing facility, or a new one
//!
//! Candidate search is geographic (fixed radius, haversine). Among
//! candidates, a name match after trimming generic tokens wins; otherwise
//! the nearest candidate is taken. A name collision with wildly different
//! coordinates (beyond `reject_factor` × radius) is never merged — it is
//! reported as an ambiguity and kept as two facilities.

use strsim::jaro_winkler;
use uuid::Uuid;

use tpnl_common::geo::haversine_distance;
use tpnl_common::model::{Facility, GeoPoint};

use crate::normalize::NormalizedRecord;

/// Tokens that carry no identity ("Unnamed", "Parking", …)
const GENERIC_TOKENS: [&str; 4] = ["unnamed", "parking", "parkplatz", "parkeerplaats"];

/// Matching policy knobs; see the `[matching]` config section
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub radius_m: f64,
    pub reject_factor: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            radius_m: 150.0,
            reject_factor: 5.0,
        }
    }
}

/// A matched-name-but-not-location (or vice versa) observation, logged for
/// manual review; the tie-break policy has already been applied.
#[derive(Debug, Clone)]
pub struct MergeAmbiguity {
    pub record_name: String,
    pub facility_id: Uuid,
    pub distance_m: f64,
    pub name_similarity: f64,
}

/// Outcome of candidate selection
#[derive(Debug)]
pub struct MatchResult {
    /// Facility to merge into; `None` means create a new facility
    pub matched: Option<Uuid>,
    pub ambiguity: Option<MergeAmbiguity>,
}

/// Lowercased name with generic tokens removed and whitespace collapsed.
/// Two facilities "match by name" when their canonical names are equal and
/// non-empty.
pub fn canonical_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .filter(|token| !GENERIC_TOKENS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the name carries no identity at all ("Unnamed", "Parking")
pub fn is_placeholder_name(name: &str) -> bool {
    canonical_name(name).is_empty()
}

/// Select the facility a record should merge into, if any.
///
/// `facilities` is the current canonical set; the caller holds the store
/// write lock, so the view is consistent for the whole merge pass.
pub fn find_match<'a, I>(record: &NormalizedRecord, facilities: I, policy: &MatchPolicy) -> MatchResult
where
    I: IntoIterator<Item = (&'a Uuid, &'a Facility)>,
{
    let record_name = record.name.as_deref().map(canonical_name).filter(|n| !n.is_empty());

    // One scan collects both radius candidates and far name collisions
    let mut candidates: Vec<(Uuid, f64, bool)> = Vec::new();
    let mut far_collision: Option<MergeAmbiguity> = None;

    for (id, facility) in facilities {
        let distance = haversine_distance(
            record.point,
            GeoPoint::new(facility.latitude, facility.longitude),
        );

        let facility_name = facility
            .name
            .as_deref()
            .map(canonical_name)
            .filter(|n| !n.is_empty());
        let names_equal = match (&record_name, &facility_name) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };

        if distance <= policy.radius_m {
            candidates.push((*id, distance, names_equal));
        } else if names_equal && distance > policy.radius_m * policy.reject_factor {
            // Identical names, wildly different coordinates: never merged
            let similarity = match (&record_name, &facility_name) {
                (Some(a), Some(b)) => jaro_winkler(a, b),
                _ => 0.0,
            };
            let collision = MergeAmbiguity {
                record_name: record.name.clone().unwrap_or_default(),
                facility_id: *id,
                distance_m: distance,
                name_similarity: similarity,
            };
            match &far_collision {
                Some(existing) if existing.distance_m <= distance => {}
                _ => far_collision = Some(collision),
            }
        }
    }

    // Prefer the nearest name match, then the nearest candidate outright
    let nearest = |items: &[(Uuid, f64, bool)], name_only: bool| -> Option<Uuid> {
        items
            .iter()
            .filter(|(_, _, names_equal)| !name_only || *names_equal)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _, _)| *id)
    };

    let matched = nearest(&candidates, true).or_else(|| nearest(&candidates, false));

    MatchResult {
        matched,
        ambiguity: if matched.is_none() { far_collision } else { None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tpnl_common::model::{
        CapacityMap, FacilityLocation, FacilityType, SourceKind, SourceRef,
    };

    fn facility(name: Option<&str>, lat: f64, lon: f64) -> Facility {
        Facility {
            facility_id: Uuid::new_v4(),
            name: name.map(str::to_string),
            latitude: lat,
            longitude: lon,
            polygon: None,
            area_m2: None,
            capacity: CapacityMap::new(),
            facility_type: FacilityType::TruckParking,
            hgv_designated: false,
            operator: None,
            amenities: BTreeMap::new(),
            surface: None,
            opening_hours: None,
            location: FacilityLocation::default(),
            contributing_sources: vec![SourceRef::new(SourceKind::Osm, "way/1")],
            confidence_score: 0.5,
            live_status: None,
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    fn record(name: Option<&str>, lat: f64, lon: f64) -> NormalizedRecord {
        NormalizedRecord {
            source_ref: SourceRef::new(SourceKind::DatexStatic, "NL-12_421"),
            point: GeoPoint::new(lat, lon),
            polygon: None,
            area_m2: None,
            name: name.map(str::to_string),
            capacity: CapacityMap::new(),
            facility_type: FacilityType::TruckParking,
            hgv_designated: true,
            operator: None,
            amenities: BTreeMap::new(),
            surface: None,
            opening_hours: None,
            location: FacilityLocation::default(),
            fetched_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_canonical_name_trims_generic_tokens() {
        assert_eq!(canonical_name("Unnamed Parking"), "");
        assert_eq!(canonical_name("Parking De Lucht"), "de lucht");
        assert_eq!(canonical_name("  DE   LUCHT "), "de lucht");
        assert!(is_placeholder_name("Unnamed"));
        assert!(!is_placeholder_name("De Lucht"));
    }

    #[test]
    fn test_name_match_beats_nearer_stranger() {
        let near_stranger = facility(Some("Wegrestaurant Nuland"), 52.0, 4.5);
        let named_match = facility(Some("Parking De Lucht"), 52.0008, 4.5); // ~90m away

        let map: Vec<(Uuid, Facility)> = vec![
            (near_stranger.facility_id, near_stranger),
            (named_match.facility_id, named_match),
        ];
        let rec = record(Some("De Lucht"), 52.0, 4.5);

        let result = find_match(
            &rec,
            map.iter().map(|(id, f)| (id, f)),
            &MatchPolicy::default(),
        );
        assert_eq!(result.matched, Some(map[1].0));
    }

    #[test]
    fn test_fallback_to_nearest_without_name_agreement() {
        let nearer = facility(Some("Alpha"), 52.0002, 4.5); // ~22m
        let farther = facility(Some("Beta"), 52.001, 4.5); // ~110m

        let map: Vec<(Uuid, Facility)> = vec![
            (farther.facility_id, farther),
            (nearer.facility_id, nearer),
        ];
        let rec = record(Some("Gamma"), 52.0, 4.5);

        let result = find_match(
            &rec,
            map.iter().map(|(id, f)| (id, f)),
            &MatchPolicy::default(),
        );
        assert_eq!(result.matched, Some(map[1].0));
    }

    #[test]
    fn test_no_candidate_within_radius_creates_new() {
        let distant = facility(Some("Delta"), 52.1, 4.5); // ~11km

        let map: Vec<(Uuid, Facility)> = vec![(distant.facility_id, distant)];
        let rec = record(Some("Epsilon"), 52.0, 4.5);

        let result = find_match(
            &rec,
            map.iter().map(|(id, f)| (id, f)),
            &MatchPolicy::default(),
        );
        assert!(result.matched.is_none());
        assert!(result.ambiguity.is_none());
    }

    #[test]
    fn test_identical_name_far_away_is_ambiguity_not_merge() {
        // Same name, 11km apart: beyond 5 x 150m
        let twin = facility(Some("De Lucht"), 52.1, 4.5);

        let map: Vec<(Uuid, Facility)> = vec![(twin.facility_id, twin)];
        let rec = record(Some("De Lucht"), 52.0, 4.5);

        let result = find_match(
            &rec,
            map.iter().map(|(id, f)| (id, f)),
            &MatchPolicy::default(),
        );
        assert!(result.matched.is_none());
        let ambiguity = result.ambiguity.expect("collision should be reported");
        assert_eq!(ambiguity.facility_id, map[0].0);
        assert!(ambiguity.distance_m > 10_000.0);
        assert!(ambiguity.name_similarity > 0.99);
    }

    #[test]
    fn test_unnamed_records_match_by_distance_only() {
        let anonymous = facility(None, 52.0005, 4.5); // ~55m

        let map: Vec<(Uuid, Facility)> = vec![(anonymous.facility_id, anonymous)];
        let rec = record(None, 52.0, 4.5);

        let result = find_match(
            &rec,
            map.iter().map(|(id, f)| (id, f)),
            &MatchPolicy::default(),
        );
        assert_eq!(result.matched, Some(map[0].0));
    }
}
