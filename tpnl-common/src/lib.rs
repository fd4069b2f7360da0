//! # TPNL Common Library
//!
//! Shared code for the TPNL services including:
//! - Canonical facility data model
//! - Event types (TpnlEvent enum) and event bus
//! - Geodesy helpers (distance, envelopes, areas)
//! - Configuration loading
//! - Error types

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod model;
pub mod sse;

pub use error::{Error, Result};
