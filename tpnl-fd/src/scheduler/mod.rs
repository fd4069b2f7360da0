//! Refresh scheduler: per-source polling with independent cadences
//!
//! One tokio task per source walks the cycle
//! `Idle → Fetching → Parsing → Merging → Idle`, with `Failed` reachable from
//! fetching or parsing and returning to `Idle` after a backoff delay. Merge
//! results travel over an mpsc channel to a single merge task that owns all
//! store writes, so merge passes are serialized even across sources while
//! fetches run in parallel.
//!
//! A failure in one source never touches another source's data: the store
//! keeps serving the last successfully merged state per source.

pub mod fetcher;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tpnl_common::events::{EventBus, TpnlEvent};
use tpnl_common::model::{LiveStatus, SourceKind};

use crate::adapters::{self, AdapterError};
use crate::config::{FdConfig, FetchConfig, GeoScope};
use crate::normalize::{self, NormalizedRecord};
use crate::store::{FacilityStore, LiveMergeStats, MergeStats};

use fetcher::SourceFetcher;

/// Refresh cycle phase, per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePhase {
    Idle,
    Fetching,
    Parsing,
    Merging,
    Failed,
}

/// Operator-visible refresh state for one source
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source: SourceKind,
    pub enabled: bool,
    pub phase: SourcePhase,
    /// Completed successful cycles
    pub cycles: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

impl SourceStatus {
    fn disabled(source: SourceKind) -> Self {
        Self {
            source,
            enabled: false,
            phase: SourcePhase::Idle,
            cycles: 0,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
            last_error_at: None,
        }
    }
}

type SharedStatus = Arc<RwLock<HashMap<SourceKind, SourceStatus>>>;

/// Work handed to the single merge task
enum MergeJob {
    Static {
        kind: SourceKind,
        records: Vec<NormalizedRecord>,
        parse_errors: usize,
        rejected: usize,
        ack: oneshot::Sender<MergeStats>,
    },
    Live {
        statuses: Vec<(String, LiveStatus)>,
        ack: oneshot::Sender<LiveMergeStats>,
    },
}

/// Manual-trigger failure modes
#[derive(Debug, PartialEq, Eq)]
pub enum TriggerError {
    UnknownSource,
    Disabled,
    Busy,
}

/// Cheap-to-clone handle for the API layer
#[derive(Clone)]
pub struct SchedulerHandle {
    triggers: Arc<HashMap<SourceKind, mpsc::Sender<()>>>,
    status: SharedStatus,
}

impl SchedulerHandle {
    /// All source statuses in stable kind order
    pub async fn statuses(&self) -> Vec<SourceStatus> {
        let map = self.status.read().await;
        let mut statuses: Vec<SourceStatus> = map.values().cloned().collect();
        statuses.sort_by_key(|s| s.source);
        statuses
    }

    /// Request an out-of-band refresh cycle for one source.
    pub async fn trigger(&self, kind: SourceKind) -> Result<(), TriggerError> {
        let sender = self.triggers.get(&kind).ok_or(TriggerError::Disabled)?;

        {
            let map = self.status.read().await;
            let status = map.get(&kind).ok_or(TriggerError::UnknownSource)?;
            if matches!(
                status.phase,
                SourcePhase::Fetching | SourcePhase::Parsing | SourcePhase::Merging
            ) {
                return Err(TriggerError::Busy);
            }
        }

        sender.try_send(()).map_err(|_| TriggerError::Busy)
    }
}

/// Spawn the merge task and one polling task per enabled source.
pub fn spawn(
    config: &FdConfig,
    store: Arc<FacilityStore>,
    bus: EventBus,
    cancel: CancellationToken,
) -> SchedulerHandle {
    let specs = source_specs(config);

    let status: SharedStatus = Arc::new(RwLock::new(
        [
            SourceKind::Osm,
            SourceKind::DatexStatic,
            SourceKind::DatexDynamic,
            SourceKind::PanEuCsv,
        ]
        .into_iter()
        .map(|kind| {
            let mut s = SourceStatus::disabled(kind);
            s.enabled = specs.iter().any(|spec| spec.kind == kind);
            (kind, s)
        })
        .collect(),
    ));

    let (job_tx, job_rx) = mpsc::channel::<MergeJob>(8);
    spawn_merge_task(job_rx, store, bus.clone(), cancel.clone());

    let mut triggers = HashMap::new();
    for spec in specs {
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        triggers.insert(spec.kind, trigger_tx);

        let runner = SourceRunner {
            spec,
            fetcher: SourceFetcher::new(Duration::from_secs(config.fetch.timeout_secs)),
            backoff: config.fetch.clone(),
            failures: 0,
            job_tx: job_tx.clone(),
            trigger_rx,
            status: status.clone(),
            bus: bus.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(runner.run());
    }

    SchedulerHandle {
        triggers: Arc::new(triggers),
        status,
    }
}

struct SourceSpec {
    kind: SourceKind,
    location: String,
    /// `None` means manual trigger only (the OSM snapshot)
    cadence: Option<Duration>,
    scope: GeoScope,
}

fn source_specs(config: &FdConfig) -> Vec<SourceSpec> {
    let mut specs = Vec::new();
    let sources = &config.sources;

    if sources.osm.enabled {
        specs.push(SourceSpec {
            kind: SourceKind::Osm,
            location: sources.osm.snapshot_path.display().to_string(),
            cadence: None,
            scope: config.geo_scope(SourceKind::Osm),
        });
    }
    for (kind, feed) in [
        (SourceKind::DatexStatic, &sources.datex_static),
        (SourceKind::DatexDynamic, &sources.datex_dynamic),
        (SourceKind::PanEuCsv, &sources.pan_eu_csv),
    ] {
        if feed.enabled && !feed.url.is_empty() {
            specs.push(SourceSpec {
                kind,
                location: feed.url.clone(),
                cadence: Some(Duration::from_secs(feed.cadence_secs)),
                scope: config.geo_scope(kind),
            });
        }
    }
    specs
}

fn spawn_merge_task(
    mut job_rx: mpsc::Receiver<MergeJob>,
    store: Arc<FacilityStore>,
    bus: EventBus,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            match job {
                MergeJob::Static {
                    kind,
                    records,
                    parse_errors,
                    rejected,
                    ack,
                } => {
                    let stats = store.merge_records(kind, records).await;
                    bus.emit_lossy(TpnlEvent::RefreshCompleted {
                        source: kind,
                        records: stats.records,
                        parse_errors,
                        rejected,
                        merged: stats.merged,
                        created: stats.created,
                        timestamp: Utc::now(),
                    });
                    if stats.created > 0 || stats.removed > 0 {
                        bus.emit_lossy(TpnlEvent::FacilityCountChanged {
                            total: store.len().await,
                            timestamp: Utc::now(),
                        });
                    }
                    let _ = ack.send(stats);
                }
                MergeJob::Live { statuses, ack } => {
                    let stats = store.merge_live(statuses).await;
                    bus.emit_lossy(TpnlEvent::LiveStatusUpdated {
                        updated: stats.updated,
                        pending: stats.pending,
                        timestamp: Utc::now(),
                    });
                    let _ = ack.send(stats);
                }
            }
        }
        debug!("Merge task stopped");
    });
}

struct SourceRunner {
    spec: SourceSpec,
    fetcher: SourceFetcher,
    backoff: FetchConfig,
    /// Consecutive failed cycles, mirrored into the shared status
    failures: u32,
    job_tx: mpsc::Sender<MergeJob>,
    trigger_rx: mpsc::Receiver<()>,
    status: SharedStatus,
    bus: EventBus,
    cancel: CancellationToken,
}

impl SourceRunner {
    async fn run(mut self) {
        info!(
            source = %self.spec.kind,
            location = %self.spec.location,
            cadence_secs = self.spec.cadence.map(|c| c.as_secs()),
            "Source refresh task started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let ok = self.run_cycle().await;

            // Cadence wait on success; backoff before retry on failure.
            // Manual-only sources go back to waiting for a trigger either way.
            let delay = if ok {
                self.spec.cadence
            } else {
                self.spec.cadence.map(|_| self.backoff_delay())
            };

            let triggered = match delay {
                Some(delay) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        received = self.trigger_rx.recv() => received.is_some(),
                        _ = tokio::time::sleep(delay) => true,
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        received = self.trigger_rx.recv() => received.is_some(),
                    }
                }
            };
            if !triggered {
                break;
            }

            if !ok {
                // Failed → Idle once the backoff delay has passed
                self.update(|s| s.phase = SourcePhase::Idle).await;
            }
        }

        info!(source = %self.spec.kind, "Source refresh task stopped");
    }

    /// One full refresh cycle. Returns false on failure, leaving the source
    /// in the `Failed` phase.
    async fn run_cycle(&mut self) -> bool {
        let kind = self.spec.kind;
        self.update(|s| s.phase = SourcePhase::Fetching).await;
        self.bus.emit_lossy(TpnlEvent::RefreshStarted {
            source: kind,
            timestamp: Utc::now(),
        });

        let bytes = match self.fetcher.fetch(&self.spec.location).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(format!("fetch failed: {}", e)).await;
                return false;
            }
        };

        self.update(|s| s.phase = SourcePhase::Parsing).await;
        let fetched_at = Utc::now();

        let job = match self.parse(&bytes, fetched_at) {
            Ok(job) => job,
            Err(reason) => {
                self.fail(reason).await;
                return false;
            }
        };

        self.update(|s| s.phase = SourcePhase::Merging).await;
        match job {
            ParsedCycle::Static {
                records,
                parse_errors,
                rejected,
            } => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let sent = self
                    .job_tx
                    .send(MergeJob::Static {
                        kind,
                        records,
                        parse_errors,
                        rejected,
                        ack: ack_tx,
                    })
                    .await;
                if sent.is_err() || ack_rx.await.is_err() {
                    // Merge task gone: shutting down
                    return false;
                }
            }
            ParsedCycle::Live { statuses } => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let sent = self
                    .job_tx
                    .send(MergeJob::Live {
                        statuses,
                        ack: ack_tx,
                    })
                    .await;
                if sent.is_err() || ack_rx.await.is_err() {
                    return false;
                }
            }
        }

        self.failures = 0;
        self.update(|s| {
            s.phase = SourcePhase::Idle;
            s.cycles += 1;
            s.consecutive_failures = 0;
            s.last_success = Some(Utc::now());
        })
        .await;
        true
    }

    /// Parse + normalize, synchronously; the CPU cost is modest at these
    /// feed sizes.
    fn parse(&self, bytes: &[u8], fetched_at: DateTime<Utc>) -> Result<ParsedCycle, String> {
        let kind = self.spec.kind;

        if kind == SourceKind::DatexDynamic {
            let outcome = adapters::datex_dynamic::parse(bytes, fetched_at)
                .map_err(|e| format!("parse failed: {}", e))?;
            log_row_errors(kind, &outcome.errors);
            return Ok(ParsedCycle::Live {
                statuses: outcome.statuses,
            });
        }

        let outcome = match kind {
            SourceKind::Osm => adapters::osm::parse(bytes, fetched_at),
            SourceKind::DatexStatic => adapters::datex_static::parse(bytes, fetched_at),
            SourceKind::PanEuCsv => adapters::pan_eu_csv::parse(bytes, fetched_at),
            SourceKind::DatexDynamic => unreachable!("handled above"),
        }
        .map_err(|e| format!("parse failed: {}", e))?;

        log_row_errors(kind, &outcome.errors);
        let parse_errors = outcome.errors.len();

        let mut records = Vec::with_capacity(outcome.records.len());
        let mut rejected = 0usize;
        for record in &outcome.records {
            match normalize::normalize(record, self.spec.scope) {
                Ok(normalized) => records.push(normalized),
                Err(e) => {
                    rejected += 1;
                    warn!(source = %kind, "Record rejected: {}", e);
                }
            }
        }

        Ok(ParsedCycle::Static {
            records,
            parse_errors,
            rejected,
        })
    }

    async fn fail(&mut self, reason: String) {
        warn!(source = %self.spec.kind, "Refresh cycle failed: {}", reason);
        self.failures = self.failures.saturating_add(1);
        let failures = self.failures;
        self.update(|s| {
            s.phase = SourcePhase::Failed;
            s.consecutive_failures = failures;
            s.last_error = Some(reason.clone());
            s.last_error_at = Some(Utc::now());
        })
        .await;
        self.bus.emit_lossy(TpnlEvent::RefreshFailed {
            source: self.spec.kind,
            error: reason,
            timestamp: Utc::now(),
        });
    }

    /// Exponential backoff with jitter, capped by config
    fn backoff_delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(6);
        let base = self.backoff.backoff_base_secs.max(1);
        let delay = base
            .saturating_mul(1 << exponent)
            .min(self.backoff.backoff_max_secs);
        let jitter_ms: u64 = rand::thread_rng().gen_range(0..=500);
        Duration::from_secs(delay) + Duration::from_millis(jitter_ms)
    }

    async fn update(&self, f: impl FnOnce(&mut SourceStatus)) {
        let mut map = self.status.write().await;
        if let Some(status) = map.get_mut(&self.spec.kind) {
            f(status);
        }
    }
}

enum ParsedCycle {
    Static {
        records: Vec<NormalizedRecord>,
        parse_errors: usize,
        rejected: usize,
    },
    Live {
        statuses: Vec<(String, LiveStatus)>,
    },
}

fn log_row_errors(kind: SourceKind, errors: &[AdapterError]) {
    for error in errors {
        debug!(source = %kind, "Skipped row: {}", error);
    }
    if !errors.is_empty() {
        warn!(
            source = %kind,
            skipped = errors.len(),
            "Refresh cycle skipped malformed rows"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchingConfig;
    use std::io::Write;

    fn test_config(osm_path: &std::path::Path) -> FdConfig {
        let mut config = FdConfig::default();
        config.sources.osm.enabled = true;
        config.sources.osm.snapshot_path = osm_path.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_osm_snapshot_loads_on_startup_and_manual_trigger() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"[{"id": "osm_way_1", "name": "De Lucht", "latitude": 51.82, "longitude": 5.11}]"#,
        )
        .unwrap();

        let config = test_config(file.path());
        let store = Arc::new(FacilityStore::new(&MatchingConfig::default()));
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let cancel = CancellationToken::new();

        let handle = spawn(&config, store.clone(), bus, cancel.clone());

        // Startup cycle populates the store
        let mut completed = false;
        for _ in 0..10 {
            if let Ok(Ok(event)) = tokio::time::timeout(
                Duration::from_secs(2),
                events.recv(),
            )
            .await
            {
                if matches!(event, TpnlEvent::RefreshCompleted { .. }) {
                    completed = true;
                    break;
                }
            } else {
                break;
            }
        }
        assert!(completed, "startup refresh should complete");
        assert_eq!(store.len().await, 1);

        // Manual trigger runs another cycle
        // (may race the idle transition, so retry briefly)
        let mut triggered = false;
        for _ in 0..50 {
            match handle.trigger(SourceKind::Osm).await {
                Ok(()) => {
                    triggered = true;
                    break;
                }
                Err(TriggerError::Busy) => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(other) => panic!("unexpected trigger error: {:?}", other),
            }
        }
        assert!(triggered);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_failed_source_does_not_block_others() {
        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(
            br#"[{"id": "osm_way_1", "name": "Good", "latitude": 51.9, "longitude": 4.4}]"#,
        )
        .unwrap();

        let mut config = test_config(good.path());
        // A static feed pointing nowhere: every cycle fails
        config.sources.datex_static.enabled = true;
        config.sources.datex_static.url = "/nonexistent/datex.xml".to_string();

        let store = Arc::new(FacilityStore::new(&MatchingConfig::default()));
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let cancel = CancellationToken::new();

        let handle = spawn(&config, store.clone(), bus, cancel.clone());

        let mut saw_failure = false;
        let mut saw_success = false;
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(TpnlEvent::RefreshFailed { source, .. })) => {
                    assert_eq!(source, SourceKind::DatexStatic);
                    saw_failure = true;
                }
                Ok(Ok(TpnlEvent::RefreshCompleted { source, .. })) => {
                    assert_eq!(source, SourceKind::Osm);
                    saw_success = true;
                }
                Ok(Ok(_)) => {}
                _ => break,
            }
            if saw_failure && saw_success {
                break;
            }
        }
        assert!(saw_failure && saw_success);

        // The good source's data is served despite the failing one
        assert_eq!(store.len().await, 1);

        let statuses = handle.statuses().await;
        let datex = statuses
            .iter()
            .find(|s| s.source == SourceKind::DatexStatic)
            .unwrap();
        assert!(datex.last_error.is_some());
        assert!(datex.last_success.is_none());

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_trigger_unknown_and_disabled() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = test_config(file.path());
        let store = Arc::new(FacilityStore::new(&MatchingConfig::default()));
        let cancel = CancellationToken::new();
        let handle = spawn(&config, store, EventBus::new(16), cancel.clone());

        // pan_eu_csv is not enabled: no task, no trigger channel
        assert_eq!(
            handle.trigger(SourceKind::PanEuCsv).await,
            Err(TriggerError::Disabled)
        );

        cancel.cancel();
    }
}
