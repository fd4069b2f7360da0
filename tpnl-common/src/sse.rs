//! Server-Sent Events (SSE) utilities
//!
//! Bridges the broadcast `EventBus` onto an axum SSE response with periodic
//! heartbeats so proxies keep the connection open.

use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::events::EventBus;

/// Create an SSE stream of all bus events.
///
/// A lagging client that misses events (broadcast buffer wrapped) gets a
/// `Lagged` comment and the stream continues from the current position;
/// clients are expected to re-sync via the regular query API.
pub fn event_bus_sse_stream(
    bus: &EventBus,
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        // Initial connected status, mirrors what the map client expects
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            yield Ok(Event::default().event(event.event_type()).data(json));
                        }
                        Err(e) => {
                            warn!("Failed to serialize event for SSE: {}", e);
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("SSE client lagged, {} events dropped", missed);
                    yield Ok(Event::default().comment(format!("lagged {}", missed)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, ending SSE stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
