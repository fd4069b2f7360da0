//! Source adapters: raw feed bytes → `SourceRecord` lists
//!
//! Each adapter is pure with respect to its input: no I/O (fetching belongs
//! to the refresh scheduler) and no clock access (`fetched_at` is passed in).
//! A malformed individual row becomes one `AdapterError` entry and parsing
//! continues with the remaining rows — skip-and-report, never
//! abort-on-first-error. Only a document that cannot be read at all (invalid
//! XML framing, non-array JSON) fails the parse as a whole.

pub mod datex_dynamic;
pub mod datex_static;
pub mod osm;
pub mod pan_eu_csv;

use thiserror::Error;
use tpnl_common::model::{LiveStatus, SourceRecord};

/// One recoverable parse failure, scoped to a single input row
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// A row that could not be interpreted; excluded from output
    #[error("malformed row {row_id}: {reason}")]
    MalformedRow { row_id: String, reason: String },

    /// A row with an unusable coordinate pair
    #[error("unparseable coordinates in row {row_id}: {reason}")]
    BadCoordinates { row_id: String, reason: String },
}

/// Document-level parse failure; the whole refresh cycle fails
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("invalid CSV: {0}")]
    Csv(String),

    #[error("document is not UTF-8: {0}")]
    Encoding(String),
}

/// Result of parsing a static-facility feed
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<SourceRecord>,
    pub errors: Vec<AdapterError>,
}

/// Result of parsing the dynamic occupancy feed. Statuses are keyed by the
/// source-scoped record id; the dynamic feed never creates facilities.
#[derive(Debug, Default)]
pub struct StatusOutcome {
    pub statuses: Vec<(String, LiveStatus)>,
    pub errors: Vec<AdapterError>,
}
