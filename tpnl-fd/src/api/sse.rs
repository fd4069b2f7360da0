//! SSE bridge for refresh lifecycle events

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// `GET /events` — refresh lifecycle and dataset-change events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tpnl_common::sse::event_bus_sse_stream(&state.event_bus, "tpnl-fd")
}
