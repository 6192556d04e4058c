//! Remote command execution.
//!
//! Runs a command inside a pod container, captures stdout and stderr, and
//! optionally decodes the output as an HTTP response preamble. Failed attempts
//! are retried with a fixed backoff under a bounded attempt budget.
//!
//! ## Architecture
//!
//! - `state_machine`: pure attempt lifecycle table
//! - `executor`: drives the table against a [`ClusterClient`](crate::cluster::ClusterClient)
//! - `response`: HTTP status line and header parsing

pub mod executor;
pub mod response;
pub mod state_machine;

pub use executor::RemoteExecutor;
pub use response::{ParseError, ResponseHeaders, ResponsePreamble, parse_preamble};
pub use state_machine::{ExecEvent, ExecPhase, ExecStateMachine};

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::{ExecTarget, StreamError};

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between attempts.
pub const DEFAULT_ATTEMPT_BACKOFF: Duration = Duration::from_secs(2);
/// Default bound on a single attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// How captured stdout is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Return stdout as-is.
    #[default]
    Raw,
    /// Decode stdout as an HTTP status line and headers.
    Http,
}

/// A remote command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub target: ExecTarget,
    pub command: Vec<String>,
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    pub attempt_backoff: Duration,
    /// Bound on opening, draining and completing one attempt.
    pub attempt_timeout: Duration,
    pub response: ResponseMode,
}

impl ExecRequest {
    pub fn new<I, S>(target: ExecTarget, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target,
            command: command.into_iter().map(Into::into).collect(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_backoff: DEFAULT_ATTEMPT_BACKOFF,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            response: ResponseMode::Raw,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_attempt_backoff(mut self, backoff: Duration) -> Self {
        self.attempt_backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Decode stdout as an HTTP response preamble.
    pub fn decode_http(mut self) -> Self {
        self.response = ResponseMode::Http;
        self
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.max_attempts == 0 {
            return Err(ExecError::InvalidRequest(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.command.is_empty() {
            return Err(ExecError::InvalidRequest("command must not be empty".into()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ExecError::InvalidRequest(
                "attempt_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Output of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set only when HTTP decoding was requested.
    pub status_code: Option<u16>,
    pub headers: ResponseHeaders,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

impl ExecResult {
    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Why a single attempt failed.
#[derive(Error, Debug)]
pub enum AttemptError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Response parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Errors returned by the executor.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid exec request: {0}")]
    InvalidRequest(String),

    #[error("Exec in {target} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        target: String,
        attempts: u32,
        #[source]
        last: AttemptError,
        /// Output captured by the final attempt.
        stdout: String,
        stderr: String,
    },

    #[error("Exec in {target} cancelled during attempt {attempts}")]
    Cancelled { target: String, attempts: u32 },

    #[error("Invalid exec transition: {event} in {phase}")]
    InvalidTransition { phase: ExecPhase, event: ExecEvent },
}

impl ExecError {
    /// Stderr captured by the final failed attempt, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            ExecError::Exhausted { stderr, .. } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
