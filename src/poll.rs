//! Condition poller.
//!
//! [`poll_until`] evaluates a [`Condition`] on a fixed cadence until it is
//! satisfied, reports a fatal error, the timeout elapses, or the caller
//! cancels. It knows nothing about what it polls.
//!
//! Time is read from `tokio::time`, so tests drive the poller with a paused
//! clock instead of real delays.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error reported by a single condition evaluation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    /// Observation failed this tick; the poller treats it as not-yet.
    #[error("Transient observation error: {0}")]
    Transient(String),

    /// The condition can never become true; polling stops.
    #[error("Fatal condition error: {0}")]
    Fatal(String),
}

impl ConditionError {
    pub fn transient(err: impl fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn fatal(err: impl fmt::Display) -> Self {
        Self::Fatal(err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A re-evaluatable predicate over live external state.
///
/// `Ok(true)` means satisfied, `Ok(false)` means not yet.
pub trait Condition: Send + Sync {
    fn evaluate(&self) -> impl Future<Output = Result<bool, ConditionError>> + Send;

    /// Short human-readable description used in logs and errors.
    fn describe(&self) -> String;
}

/// Adapter turning a closure into a [`Condition`].
pub struct FnCondition<F> {
    description: String,
    check: F,
}

impl<F, Fut> FnCondition<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, ConditionError>> + Send,
{
    pub fn new(description: impl Into<String>, check: F) -> Self {
        Self {
            description: description.into(),
            check,
        }
    }
}

impl<F, Fut> Condition for FnCondition<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, ConditionError>> + Send,
{
    fn evaluate(&self) -> impl Future<Output = Result<bool, ConditionError>> + Send {
        (self.check)()
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Polling cadence and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    /// Time between the start of consecutive ticks.
    pub interval: Duration,
    /// Overall deadline, measured from poll start.
    pub timeout: Duration,
    /// Evaluate at t=0 instead of waiting one interval first.
    pub immediate: bool,
}

impl PollSpec {
    /// Create a validated spec. Requires `timeout > interval > 0`.
    pub fn new(interval: Duration, timeout: Duration, immediate: bool) -> Result<Self, PollError> {
        let spec = Self {
            interval,
            timeout,
            immediate,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the `timeout > interval > 0` invariant.
    pub fn validate(&self) -> Result<(), PollError> {
        if self.interval.is_zero() {
            return Err(PollError::InvalidSpec("interval must be greater than zero".into()));
        }
        if self.timeout <= self.interval {
            return Err(PollError::InvalidSpec(format!(
                "timeout {:?} must be greater than interval {:?}",
                self.timeout, self.interval
            )));
        }
        Ok(())
    }
}

/// Successful poll summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Number of times the condition was evaluated.
    pub ticks: u32,
    /// Time from poll start until the satisfying tick returned.
    pub elapsed: Duration,
}

/// Terminal poll failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Timed out after {timeout:?} ({ticks} ticks) waiting for {condition}{}", last_error_suffix(.last_error))]
    Timeout {
        condition: String,
        timeout: Duration,
        ticks: u32,
        /// Most recent transient error, if the last ticks were failing.
        last_error: Option<String>,
    },

    #[error("Condition {condition} failed on tick {tick}: {source}")]
    Condition {
        condition: String,
        tick: u32,
        #[source]
        source: ConditionError,
    },

    #[error("Polling for {condition} cancelled after {ticks} ticks")]
    Cancelled { condition: String, ticks: u32 },

    #[error("Invalid poll spec: {0}")]
    InvalidSpec(String),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!("; last error: {}", e))
        .unwrap_or_default()
}

impl PollError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled { .. })
    }

    /// Ticks evaluated before the poll stopped.
    pub fn ticks(&self) -> u32 {
        match self {
            PollError::Timeout { ticks, .. } | PollError::Cancelled { ticks, .. } => *ticks,
            PollError::Condition { tick, .. } => *tick,
            PollError::InvalidSpec(_) => 0,
        }
    }
}

/// Poll `condition` until it is satisfied.
///
/// Ticks are scheduled at `start + n * interval` (`n` starting at 0 when
/// `immediate`, at 1 otherwise). A tick scheduled at or before the deadline
/// is evaluated; a tick still running when the deadline passes is allowed to
/// complete. Slots missed because an evaluation overran are skipped.
///
/// Only `interval == 0` is rejected here. A `PollSpec` whose timeout is shorter than
/// its interval still gets its immediate first tick before timing out.
pub async fn poll_until<C>(
    spec: &PollSpec,
    condition: &C,
    cancel: &CancellationToken,
) -> Result<PollOutcome, PollError>
where
    C: Condition,
{
    if spec.interval.is_zero() {
        return Err(PollError::InvalidSpec("interval must be greater than zero".into()));
    }

    let description = condition.describe();
    let start = Instant::now();
    let deadline = start + spec.timeout;
    let mut next_tick = if spec.immediate {
        start
    } else {
        start + spec.interval
    };
    let mut ticks = 0u32;
    let mut last_error: Option<String> = None;

    info!(condition = %description, interval = ?spec.interval, timeout = ?spec.timeout, "Polling condition");

    loop {
        if next_tick > deadline {
            // No tick fits before the deadline; wait it out so the reported
            // elapsed time matches the configured timeout.
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(PollError::Cancelled { condition: description, ticks });
                }
                _ = sleep_until(deadline) => {}
            }
            warn!(condition = %description, ticks, "Condition not satisfied before timeout");
            return Err(PollError::Timeout {
                condition: description,
                timeout: spec.timeout,
                ticks,
                last_error,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { condition: description, ticks });
            }
            _ = sleep_until(next_tick) => {}
        }

        ticks += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { condition: description, ticks });
            }
            result = condition.evaluate() => result,
        };

        match result {
            Ok(true) => {
                let elapsed = start.elapsed();
                info!(condition = %description, ticks, elapsed = ?elapsed, "Condition satisfied");
                return Ok(PollOutcome { ticks, elapsed });
            }
            Ok(false) => {
                debug!(condition = %description, tick = ticks, "Condition not yet satisfied");
                last_error = None;
            }
            Err(ConditionError::Transient(e)) => {
                debug!(condition = %description, tick = ticks, error = %e, "Transient observation error");
                last_error = Some(e);
            }
            Err(source @ ConditionError::Fatal(_)) => {
                warn!(condition = %description, tick = ticks, error = %source, "Condition failed");
                return Err(PollError::Condition {
                    condition: description,
                    tick: ticks,
                    source,
                });
            }
        }

        let now = Instant::now();
        if now > deadline {
            warn!(condition = %description, ticks, "Condition not satisfied before timeout");
            return Err(PollError::Timeout {
                condition: description,
                timeout: spec.timeout,
                ticks,
                last_error,
            });
        }

        next_tick += spec.interval;
        while next_tick < now {
            next_tick += spec.interval;
        }
    }
}
