//! Confidence scoring: data completeness → trust estimate
//!
//! Deterministic, source-agnostic function over a facility's merged
//! attributes. Intentionally cheap (O(1) per facility) so it runs on every
//! merge; the score is never cached across attribute changes.

use tpnl_common::model::Facility;

use super::matcher::is_placeholder_name;

/// Base score before completeness bonuses
pub const BASE_SCORE: f64 = 0.5;

/// Compute the confidence score for a facility's current attributes.
///
/// `penalty` is the accumulated merge penalty (−0.05 per capacity conflict),
/// applied after the 1.0 cap; the result is clamped to [0, 1].
pub fn score(facility: &Facility, penalty: f64) -> f64 {
    let mut score = BASE_SCORE;

    if facility
        .name
        .as_deref()
        .map(|n| !is_placeholder_name(n))
        .unwrap_or(false)
    {
        score += 0.10;
    }
    if !facility.capacity.is_empty() {
        score += 0.15;
    }
    if facility.polygon.is_some() {
        score += 0.10;
    }
    if !facility.amenities.is_empty() {
        score += 0.05;
    }
    if facility.operator.is_some() {
        score += 0.05;
    }
    if facility.hgv_designated {
        score += 0.05;
    }

    (score.min(1.0) - penalty).clamp(0.0, 1.0)
}
