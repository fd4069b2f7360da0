//! Configuration for tpnl-fd
//!
//! Settings resolve with the priority CLI argument → environment variable →
//! TOML config file → compiled default. The TOML file lives at the platform
//! config location (`~/.config/tpnl/tpnl-fd.toml` on Linux) unless an
//! explicit path is given.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use tpnl_common::geo::{BoundingBox, EUROPE, NETHERLANDS};
use tpnl_common::model::SourceKind;
use tpnl_common::Result;

/// Geographic sanity envelope applied during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoScope {
    Netherlands,
    Europe,
}

impl GeoScope {
    pub fn envelope(&self) -> BoundingBox {
        match self {
            GeoScope::Netherlands => NETHERLANDS,
            GeoScope::Europe => EUROPE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5731,
        }
    }
}

/// A polled feed (DATEX-II static/dynamic, pan-European CSV)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    /// `http(s)://` URL, or a filesystem path for pre-fetched artifacts
    pub url: String,
    pub cadence_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            cadence_secs: 3600,
        }
    }
}

/// The OSM snapshot is a static artifact: loaded at startup and on manual
/// trigger, never polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsmSourceConfig {
    pub enabled: bool,
    pub snapshot_path: PathBuf,
}

impl Default for OsmSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snapshot_path: PathBuf::from("data/osm_truck_parking_enriched.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub osm: OsmSourceConfig,
    pub datex_static: FeedConfig,
    pub datex_dynamic: FeedConfig,
    pub pan_eu_csv: FeedConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            osm: OsmSourceConfig::default(),
            datex_static: FeedConfig {
                enabled: false,
                url: String::new(),
                cadence_secs: 3600,
            },
            datex_dynamic: FeedConfig {
                enabled: false,
                url: String::new(),
                cadence_secs: 60,
            },
            pan_eu_csv: FeedConfig {
                enabled: false,
                url: String::new(),
                cadence_secs: 86_400,
            },
        }
    }
}

/// Deduplication and lifecycle policy knobs.
///
/// The 150 m radius and keep-higher capacity tie-break are policy defaults
/// inferred from source behavior, kept configurable so a deployment can
/// validate them against ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Candidate search radius in meters
    pub radius_m: f64,
    /// Never merge on name alone past `reject_factor * radius_m`
    pub reject_factor: f64,
    /// Remove a facility after this many consecutive missed cycles
    /// across every contributing source
    pub removal_cycles: u64,
    /// Unjoined live statuses are retried for this many dynamic cycles
    pub pending_live_cycles: u64,
    /// Live status is treated as absent after this many missed dynamic cycles
    pub live_stale_cycles: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            radius_m: 150.0,
            reject_factor: 5.0,
            removal_cycles: 3,
            pending_live_cycles: 5,
            live_stale_cycles: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Hard timeout per network fetch
    pub timeout_secs: u64,
    /// Base delay for exponential backoff after a failed cycle
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// Nominatim-compatible reverse geocoding endpoint
    pub endpoint: String,
    /// Facilities enriched per pass; the pass is resumable, so a small
    /// batch just spreads the work over more cycles
    pub batch_limit: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://nominatim.openstreetmap.org/reverse".to_string(),
            batch_limit: 200,
        }
    }
}

/// Full service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FdConfig {
    pub server: ServerConfig,
    pub sources: SourcesConfig,
    pub matching: MatchingConfig,
    pub fetch: FetchConfig,
    pub enrichment: EnrichmentConfig,
}

impl FdConfig {
    /// Load configuration: explicit path if given, otherwise the platform
    /// config location, otherwise compiled defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| tpnl_common::config::config_file_path("tpnl-fd"));

        match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                tpnl_common::config::read_toml_config(&path)
            }
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Geographic sanity envelope per source. NL-scoped sources use the
    /// Netherlands bound, the pan-European table uses the continent envelope.
    pub fn geo_scope(&self, kind: SourceKind) -> GeoScope {
        match kind {
            SourceKind::PanEuCsv => GeoScope::Europe,
            _ => GeoScope::Netherlands,
        }
    }
}
