//! Crate-level error type.
//!
//! Each module has its own error enum; this one wraps them so callers that
//! drive several components can use a single `Result`.

use thiserror::Error;

use crate::cluster::{ClusterError, StreamError};
use crate::config::ConfigError;
use crate::exec::{ExecError, ParseError};
use crate::observers::{LookupError, ProbeError};
use crate::poll::PollError;
use crate::scenario::ScenarioError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

impl Error {
    /// Check if this error is a poll deadline expiring
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Poll(e) => e.is_timeout(),
            Error::Scenario(ScenarioError::Gate { source, .. }) => source.is_timeout(),
            Error::Stream(StreamError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Check if re-running the failed call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => is_retryable_kube(e),
            Error::Cluster(ClusterError::Kube(e)) => is_retryable_kube(e),
            Error::Cluster(ClusterError::Unavailable(_)) => true,
            Error::Cluster(ClusterError::Serialization(_)) => false,
            Error::Poll(e) => e.is_timeout(),
            Error::Stream(_) | Error::Exec(ExecError::Exhausted { .. }) => true,
            Error::Probe(_) => true,
            Error::Lookup(LookupError::Cluster(_)) => true,
            Error::Scenario(e) => !e.is_cancelled() && !matches!(e, ScenarioError::UnexpectedStatus { .. }),
            Error::Parse(_)
            | Error::Exec(_)
            | Error::Lookup(_)
            | Error::Config(_) => false,
        }
    }
}

/// Retry on network errors, rate limiting, and server errors
fn is_retryable_kube(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429)
        || matches!(e, kube::Error::Service(_))
}

/// Result type alias for verifier operations
pub type Result<T> = std::result::Result<T, Error>;
