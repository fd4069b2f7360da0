//! tpnl-fd library interface
//!
//! Exposes the adapters, fusion pipeline, store, scheduler, and HTTP router
//! for integration testing.

pub mod adapters;
pub mod api;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fusion;
pub mod normalize;
pub mod scheduler;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tpnl_common::events::EventBus;

use crate::scheduler::SchedulerHandle;
use crate::store::FacilityStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Canonical facility store
    pub store: Arc<FacilityStore>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Handle to the per-source refresh tasks
    pub scheduler: SchedulerHandle,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<FacilityStore>, event_bus: EventBus, scheduler: SchedulerHandle) -> Self {
        Self {
            store,
            event_bus,
            scheduler,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::facility_routes())
        .merge(api::stats_routes())
        .merge(api::status_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        // The map client is served from another origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
