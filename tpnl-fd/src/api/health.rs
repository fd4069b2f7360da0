//! Health endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_seconds = (chrono::Utc::now() - state.startup_time).num_seconds();
    let facilities = state.store.len().await;

    Json(json!({
        "status": "ok",
        "module": "tpnl-fd",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": uptime_seconds,
        "facilities": facilities,
    }))
}
