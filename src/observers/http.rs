//! HTTP reachability probe.
//!
//! A single-shot `HEAD` request against an externally resolved endpoint. The
//! probe does not retry; callers that want retries wrap it in the poller.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

/// Default per-request timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from an HTTP probe.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Issues `HEAD` requests and returns the raw status code.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe with the default request timeout.
    pub fn new() -> Result<Self, ProbeError> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self { client })
    }

    /// Send `HEAD url` once and return the numeric status.
    #[instrument(skip(self))]
    pub async fn head(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|source| ProbeError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status().as_u16();
        debug!(status, "HEAD probe completed");
        Ok(status)
    }
}

/// URL of the ingress endpoint serving `path` on `host`.
pub fn ingress_url(host: &str, path: &str) -> String {
    format!("http://{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
}
