//! HTTP API for the facility directory
//!
//! Read-only query surface for the map client plus the operator endpoints
//! (per-source refresh status, manual triggers, SSE events, health).

pub mod facilities;
pub mod health;
pub mod sse;
pub mod stats;
pub mod status;

pub use facilities::facility_routes;
pub use health::health_routes;
pub use sse::event_stream;
pub use stats::stats_routes;
pub use status::status_routes;
