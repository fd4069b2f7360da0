//! Fusion layer: cross-source reconciliation
//!
//! - `matcher`: decides whether a normalized record refers to an existing
//!   facility or creates a new one
//! - `confidence`: deterministic completeness/trust score per facility
//! - `live_status`: joins dynamic occupancy onto static facilities by exact
//!   source-scoped id

pub mod confidence;
pub mod live_status;
pub mod matcher;
