//! Remote command executor.
//!
//! Drives [`ExecStateMachine`] against a live exec channel. The executor owns
//! all I/O: it opens the stream, drains stdout and stderr concurrently with
//! the remote completion status, decodes the output when asked, and sleeps
//! between attempts.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::response::parse_preamble_bytes;
use super::state_machine::{AttemptContext, ExecEvent, ExecPhase, ExecStateMachine, TransitionResult};
use super::{AttemptError, ExecError, ExecRequest, ExecResult, ResponseHeaders, ResponseMode};
use crate::cluster::{BoxedReader, ClusterClient, ExecStream, StreamError};
use crate::metrics::Metrics;

/// Output captured by one attempt.
#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Runs commands in pod containers with bounded retries.
pub struct RemoteExecutor<'a, C> {
    client: &'a C,
    machine: ExecStateMachine,
    metrics: Option<Arc<Metrics>>,
}

impl<'a, C: ClusterClient> RemoteExecutor<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            machine: ExecStateMachine::new(),
            metrics: None,
        }
    }

    /// Record attempt outcomes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `request` until an attempt succeeds, the attempt budget is spent,
    /// or `cancel` fires.
    ///
    /// Transport failures, a failing remote status, attempt timeouts and
    /// undecodable HTTP output all count as failed attempts.
    #[instrument(skip(self, request, cancel), fields(target = %request.target))]
    pub async fn exec(
        &self,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ExecError> {
        request.validate()?;

        let mut phase = ExecPhase::Attempting;
        let mut attempt: u32 = 1;
        let mut captured = Captured::default();
        let mut status_code = None;
        let mut headers = ResponseHeaders::new();
        let mut last_error: Option<AttemptError> = None;

        loop {
            let event = match phase {
                ExecPhase::Attempting => {
                    debug!(attempt, max_attempts = request.max_attempts, "Starting exec attempt");
                    let (output, result) = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(self.cancelled(request, attempt));
                        }
                        run = self.run_attempt(request) => run,
                    };
                    captured = output;
                    match result {
                        Ok(()) => ExecEvent::StreamCompleted,
                        Err(e) => {
                            self.record_attempt("stream_failed");
                            warn!(attempt, error = %e, "Exec attempt failed");
                            last_error = Some(AttemptError::Stream(e));
                            ExecEvent::StreamFailed
                        }
                    }
                }
                ExecPhase::Parsing => match request.response {
                    ResponseMode::Raw => ExecEvent::ParseSucceeded,
                    ResponseMode::Http => match parse_preamble_bytes(&captured.stdout) {
                        Ok(preamble) => {
                            status_code = Some(preamble.status_code);
                            headers = preamble.headers;
                            ExecEvent::ParseSucceeded
                        }
                        Err(e) => {
                            self.record_attempt("parse_failed");
                            warn!(attempt, error = %e, "Exec output is not an HTTP response");
                            last_error = Some(AttemptError::Parse(e));
                            ExecEvent::ParseFailed
                        }
                    },
                },
                ExecPhase::BackingOff => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(self.cancelled(request, attempt));
                        }
                        _ = tokio::time::sleep(request.attempt_backoff) => ExecEvent::BackoffElapsed,
                    }
                }
                ExecPhase::Done => {
                    self.record_attempt("success");
                    info!(attempts = attempt, status_code = ?status_code, "Exec succeeded");
                    return Ok(ExecResult {
                        stdout: captured.stdout,
                        stderr: captured.stderr,
                        status_code,
                        headers,
                        attempts: attempt,
                    });
                }
                ExecPhase::Failed => {
                    let last = last_error.unwrap_or_else(|| {
                        AttemptError::Stream(StreamError::Closed("no attempt recorded".into()))
                    });
                    return Err(ExecError::Exhausted {
                        target: request.target.to_string(),
                        attempts: attempt,
                        last,
                        stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
                    });
                }
            };

            let ctx = AttemptContext::new(attempt, request.max_attempts);
            match self.machine.transition(phase, event, &ctx) {
                TransitionResult::Success { to, description, .. } => {
                    debug!(from = %phase, to = %to, event = %event, description, "Exec transition");
                    if phase == ExecPhase::BackingOff && to == ExecPhase::Attempting {
                        attempt += 1;
                    }
                    phase = to;
                }
                TransitionResult::InvalidTransition { current, event }
                | TransitionResult::GuardFailed {
                    from: current,
                    event,
                    ..
                } => {
                    return Err(ExecError::InvalidTransition {
                        phase: current,
                        event,
                    });
                }
            }
        }
    }

    /// One bounded attempt. Output is kept even when the attempt fails so the
    /// final error can report it.
    async fn run_attempt(&self, request: &ExecRequest) -> (Captured, Result<(), StreamError>) {
        let attempt = async {
            let stream = match self.client.open_exec(&request.target, &request.command).await {
                Ok(stream) => stream,
                Err(e) => return (Captured::default(), Err(e)),
            };
            drain(stream).await
        };

        match tokio::time::timeout(request.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => (
                Captured::default(),
                Err(StreamError::Timeout(request.attempt_timeout)),
            ),
        }
    }

    fn cancelled(&self, request: &ExecRequest, attempt: u32) -> ExecError {
        self.record_attempt("cancelled");
        info!(attempt, "Exec cancelled");
        ExecError::Cancelled {
            target: request.target.to_string(),
            attempts: attempt,
        }
    }

    fn record_attempt(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_exec_attempt(outcome);
        }
    }
}

/// Read both output streams to EOF while awaiting the remote status.
async fn drain(stream: ExecStream) -> (Captured, Result<(), StreamError>) {
    let ExecStream {
        stdout,
        stderr,
        completion,
    } = stream;

    let (stdout, stderr, status) = tokio::join!(read_all(stdout), read_all(stderr), completion);

    let mut captured = Captured::default();
    let mut result = status;
    match stdout {
        Ok(buf) => captured.stdout = buf,
        Err(e) => result = result.and(Err(StreamError::Io(e))),
    }
    match stderr {
        Ok(buf) => captured.stderr = buf,
        Err(e) => result = result.and(Err(StreamError::Io(e))),
    }
    (captured, result)
}

async fn read_all(reader: Option<BoxedReader>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}
