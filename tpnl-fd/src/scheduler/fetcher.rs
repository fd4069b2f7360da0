//! Source fetching
//!
//! Fetching is the only suspension point in a refresh cycle: adapters are
//! synchronous CPU-bound parsers, so everything network-shaped lives here.
//! Feed locations are URLs for the polled sources and filesystem paths for
//! pre-fetched artifacts (the OSM snapshot); both resolve through the same
//! `fetch` call so the scheduler does not care which it is talking to.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Network or artifact fetch failure; recovered at the scheduler by
/// retry-with-backoff, never fatal to the process
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP + filesystem fetcher with a hard per-request timeout
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    /// # Panics
    /// Panics only if the TLS backend cannot be initialized, which is a
    /// broken build environment rather than a runtime condition.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tpnl-fd/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client (system error)");
        Self { client }
    }

    /// Fetch raw bytes from a URL or a local path.
    pub async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            self.fetch_http(location).await
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            Ok(tokio::fs::read(Path::new(path)).await?)
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(err.to_string())
    }
}
