//! Source refresh status and manual triggers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use tpnl_common::model::SourceKind;

use crate::error::{ApiError, ApiResult};
use crate::scheduler::{SourceStatus, TriggerError};
use crate::AppState;

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/refresh/:source", post(trigger_refresh))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    sources: Vec<SourceStatus>,
    total_facilities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_live_update: Option<chrono::DateTime<chrono::Utc>>,
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(StatusResponse {
        sources: state.scheduler.statuses().await,
        total_facilities: state.store.len().await,
        last_live_update: state.store.last_live_update().await,
    }))
}

/// Kick off an out-of-band refresh cycle. Required for the OSM snapshot,
/// which is never polled; allowed for any enabled source.
async fn trigger_refresh(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let kind: SourceKind = source
        .parse()
        .map_err(|e: String| ApiError::NotFound(e))?;

    match state.scheduler.trigger(kind).await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted", "source": kind })),
        )),
        Err(TriggerError::Busy) => Err(ApiError::Conflict(format!(
            "refresh already running for {}",
            kind
        ))),
        Err(TriggerError::Disabled) => Err(ApiError::BadRequest(format!(
            "source {} is not enabled",
            kind
        ))),
        Err(TriggerError::UnknownSource) => {
            Err(ApiError::NotFound(format!("unknown source: {}", kind)))
        }
    }
}
