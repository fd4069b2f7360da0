//! Live-status merger: dynamic occupancy → static facilities
//!
//! The join key is the DATEX-II record id, exact and source-scoped: a status
//! attaches to the facility whose contributing sources include the
//! DatexStatic entry with the same id. No geographic matching happens here.
//! Statuses with no matching facility yet (dynamic record ahead of the static
//! table, or not merged yet) wait in a FIFO pending queue and are retried on
//! later passes, up to a bounded number of cycles.

use std::collections::VecDeque;
use uuid::Uuid;

use tpnl_common::model::LiveStatus;

#[derive(Debug, Clone)]
struct PendingStatus {
    source_id: String,
    status: LiveStatus,
    enqueued_cycle: u64,
}

/// One successfully joined status, stamped with the cycle it landed in
#[derive(Debug)]
pub struct JoinedStatus {
    pub facility_id: Uuid,
    pub status: LiveStatus,
    pub cycle: u64,
}

/// Result of one dynamic-feed pass
#[derive(Debug)]
pub struct LiveJoinOutcome {
    pub joined: Vec<JoinedStatus>,
    pub pending: usize,
    pub dropped: usize,
}

/// Tracks dynamic-feed cycles, the pending-join queue, and staleness.
pub struct LiveStatusMerger {
    pending: VecDeque<PendingStatus>,
    cycle: u64,
    pending_cycles: u64,
    stale_cycles: u64,
}

impl LiveStatusMerger {
    pub fn new(pending_cycles: u64, stale_cycles: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            cycle: 0,
            pending_cycles,
            stale_cycles,
        }
    }

    /// Current dynamic-feed cycle counter
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// A status joined at `live_cycle` is fresh while it has missed at most
    /// `stale_cycles` refresh cycles; older values are treated as absent by
    /// the query layer even though the store still holds them.
    pub fn is_fresh(&self, live_cycle: u64) -> bool {
        self.cycle.saturating_sub(live_cycle) <= self.stale_cycles
    }

    /// Run one pass: retry the pending queue FIFO, then process the fresh
    /// statuses. `resolve` maps a DatexStatic source id to a facility.
    pub fn apply<F>(
        &mut self,
        statuses: Vec<(String, LiveStatus)>,
        mut resolve: F,
    ) -> LiveJoinOutcome
    where
        F: FnMut(&str) -> Option<Uuid>,
    {
        self.cycle += 1;
        let mut joined = Vec::new();
        let mut dropped = 0usize;

        // Retry earlier arrivals first
        let retries: Vec<PendingStatus> = self.pending.drain(..).collect();
        for entry in retries {
            match resolve(&entry.source_id) {
                Some(facility_id) => joined.push(JoinedStatus {
                    facility_id,
                    status: entry.status,
                    cycle: self.cycle,
                }),
                None if self.cycle - entry.enqueued_cycle >= self.pending_cycles => {
                    tracing::debug!(
                        source_id = %entry.source_id,
                        "Dropping unjoinable live status after {} cycles",
                        self.pending_cycles
                    );
                    dropped += 1;
                }
                None => self.pending.push_back(entry),
            }
        }

        for (source_id, status) in statuses {
            match resolve(&source_id) {
                Some(facility_id) => joined.push(JoinedStatus {
                    facility_id,
                    status,
                    cycle: self.cycle,
                }),
                None => self.pending.push_back(PendingStatus {
                    source_id,
                    status,
                    enqueued_cycle: self.cycle,
                }),
            }
        }

        LiveJoinOutcome {
            joined,
            pending: self.pending.len(),
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tpnl_common::model::OccupancyStatus;

    fn status(vacant: u32) -> LiveStatus {
        LiveStatus {
            vacant_spaces: vacant,
            occupied_spaces: 10,
            occupancy_percent: 50.0,
            status: OccupancyStatus::SpacesAvailable,
            observed_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_exact_join() {
        let mut merger = LiveStatusMerger::new(5, 2);
        let target = Uuid::new_v4();

        let outcome = merger.apply(vec![("NL-12_421".to_string(), status(12))], |id| {
            (id == "NL-12_421").then_some(target)
        });

        assert_eq!(outcome.joined.len(), 1);
        assert_eq!(outcome.joined[0].facility_id, target);
        assert_eq!(outcome.joined[0].cycle, 1);
        assert_eq!(outcome.pending, 0);
    }

    #[test]
    fn test_unmatched_status_held_and_retried() {
        let mut merger = LiveStatusMerger::new(5, 2);
        let target = Uuid::new_v4();

        // First pass: no facility for the id yet
        let outcome = merger.apply(vec![("NL-9_014".to_string(), status(3))], |_| None);
        assert!(outcome.joined.is_empty());
        assert_eq!(outcome.pending, 1);

        // Second pass: the static table has caught up
        let outcome = merger.apply(Vec::new(), |id| (id == "NL-9_014").then_some(target));
        assert_eq!(outcome.joined.len(), 1);
        assert_eq!(outcome.pending, 0);
    }

    #[test]
    fn test_pending_dropped_after_bound() {
        let mut merger = LiveStatusMerger::new(3, 2);

        merger.apply(vec![("ghost".to_string(), status(1))], |_| None);
        let mut dropped = 0;
        for _ in 0..3 {
            dropped += merger.apply(Vec::new(), |_| None).dropped;
        }
        assert_eq!(dropped, 1);
        assert_eq!(merger.pending.len(), 0);
    }

    #[test]
    fn test_pending_queue_is_fifo() {
        let mut merger = LiveStatusMerger::new(10, 2);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        merger.apply(
            vec![
                ("a".to_string(), status(1)),
                ("b".to_string(), status(2)),
            ],
            |_| None,
        );

        let outcome = merger.apply(Vec::new(), |id| match id {
            "a" => Some(first),
            "b" => Some(second),
            _ => None,
        });
        assert_eq!(outcome.joined[0].facility_id, first);
        assert_eq!(outcome.joined[1].facility_id, second);
    }

    #[test]
    fn test_freshness_window() {
        let mut merger = LiveStatusMerger::new(5, 2);
        let target = Uuid::new_v4();

        let outcome = merger.apply(vec![("NL-12_421".to_string(), status(12))], |_| Some(target));
        let live_cycle = outcome.joined[0].cycle;
        assert!(merger.is_fresh(live_cycle));

        // Two missed cycles: still within the window
        merger.apply(Vec::new(), |_| None);
        merger.apply(Vec::new(), |_| None);
        assert!(merger.is_fresh(live_cycle));

        // Third miss: treated as absent
        merger.apply(Vec::new(), |_| None);
        assert!(!merger.is_fresh(live_cycle));
    }
}
