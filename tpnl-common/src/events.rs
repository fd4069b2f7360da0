//! Event types and event bus for the TPNL services
//!
//! Events describe refresh lifecycle and dataset changes; they are broadcast
//! on a tokio `broadcast` channel and bridged to SSE by the service's API
//! layer. Events are notifications, not commands — slow subscribers may miss
//! events when the channel buffer wraps, and every consumer must tolerate
//! that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::SourceKind;

/// TPNL event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TpnlEvent {
    /// A source refresh cycle began fetching
    RefreshStarted {
        source: SourceKind,
        timestamp: DateTime<Utc>,
    },

    /// A source refresh cycle merged successfully
    RefreshCompleted {
        source: SourceKind,
        records: usize,
        parse_errors: usize,
        rejected: usize,
        merged: usize,
        created: usize,
        timestamp: DateTime<Utc>,
    },

    /// A source refresh cycle failed (fetch or parse); the store keeps the
    /// last successfully merged state for that source
    RefreshFailed {
        source: SourceKind,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Total facility count changed after a merge pass
    FacilityCountChanged {
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// A dynamic-feed pass updated live statuses
    LiveStatusUpdated {
        updated: usize,
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    /// The enrichment pass made progress
    EnrichmentProgress {
        enriched: usize,
        remaining: usize,
        timestamp: DateTime<Utc>,
    },
}

impl TpnlEvent {
    /// Event type name as used in the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            TpnlEvent::RefreshStarted { .. } => "RefreshStarted",
            TpnlEvent::RefreshCompleted { .. } => "RefreshCompleted",
            TpnlEvent::RefreshFailed { .. } => "RefreshFailed",
            TpnlEvent::FacilityCountChanged { .. } => "FacilityCountChanged",
            TpnlEvent::LiveStatusUpdated { .. } => "LiveStatusUpdated",
            TpnlEvent::EnrichmentProgress { .. } => "EnrichmentProgress",
        }
    }
}

/// Broadcast event bus shared across the service
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TpnlEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity (events
    /// buffered before old ones are dropped for lagging subscribers)
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Events emitted before subscription
    /// are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TpnlEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers; returns the subscriber count
    pub fn emit(
        &self,
        event: TpnlEvent,
    ) -> Result<usize, broadcast::error::SendError<TpnlEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case. Refresh lifecycle
    /// events are advisory; nothing listening is a normal state.
    pub fn emit_lossy(&self, event: TpnlEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {}", e.0.event_type());
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TpnlEvent::RefreshCompleted {
            source: SourceKind::DatexStatic,
            records: 120,
            parse_errors: 2,
            rejected: 1,
            merged: 115,
            created: 4,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"RefreshCompleted\""));
        assert!(json.contains("\"source\":\"datex_static\""));
        assert_eq!(event.event_type(), "RefreshCompleted");
    }

    #[tokio::test]
    async fn test_event_bus_delivery() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(TpnlEvent::FacilityCountChanged {
            total: 42,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            TpnlEvent::FacilityCountChanged { total, .. } => assert_eq!(total, 42),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_lossy() {
        let bus = EventBus::new(4);
        // No subscriber: emit() errors, emit_lossy() does not panic
        assert!(bus
            .emit(TpnlEvent::RefreshStarted {
                source: SourceKind::Osm,
                timestamp: Utc::now(),
            })
            .is_err());
        bus.emit_lossy(TpnlEvent::RefreshStarted {
            source: SourceKind::Osm,
            timestamp: Utc::now(),
        });
    }
}
