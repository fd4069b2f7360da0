//! Dataset summary endpoint

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::store::DatasetStats;
use crate::AppState;

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}

async fn get_stats(State(state): State<AppState>) -> Json<DatasetStats> {
    Json(state.store.dataset_stats().await)
}
