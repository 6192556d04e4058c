//! Finite state machine for remote command attempts.
//!
//! Every exec request walks this table: an attempt either completes its
//! stream and moves on to decoding, or fails and either backs off for another
//! attempt or gives up. The table is pure; the executor owns the I/O and
//! feeds events into it.
//!
//! ```text
//! Attempting --StreamCompleted--> Parsing --ParseSucceeded--> Done
//!     |                              |
//!     +--StreamFailed--+   +--ParseFailed
//!                      v   v
//!           attempts remaining? --yes--> BackingOff --BackoffElapsed--> Attempting
//!                      |
//!                      no --> Failed
//! ```

use std::fmt;

/// Where a request is in its attempt lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecPhase {
    /// Command stream is open and output is being captured
    Attempting,
    /// Captured output is being decoded
    Parsing,
    /// Waiting before the next attempt
    BackingOff,
    /// Terminal: the attempt succeeded
    Done,
    /// Terminal: every attempt failed
    Failed,
}

impl ExecPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecPhase::Done | ExecPhase::Failed)
    }
}

impl fmt::Display for ExecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecPhase::Attempting => write!(f, "Attempting"),
            ExecPhase::Parsing => write!(f, "Parsing"),
            ExecPhase::BackingOff => write!(f, "BackingOff"),
            ExecPhase::Done => write!(f, "Done"),
            ExecPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events produced by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecEvent {
    /// Stdout, stderr and the remote status all finished without error
    StreamCompleted,
    /// Opening, reading or completing the stream failed
    StreamFailed,
    /// Output decoded (or no decoding was requested)
    ParseSucceeded,
    /// Output could not be decoded
    ParseFailed,
    /// The backoff delay has passed
    BackoffElapsed,
}

impl fmt::Display for ExecEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecEvent::StreamCompleted => write!(f, "StreamCompleted"),
            ExecEvent::StreamFailed => write!(f, "StreamFailed"),
            ExecEvent::ParseSucceeded => write!(f, "ParseSucceeded"),
            ExecEvent::ParseFailed => write!(f, "ParseFailed"),
            ExecEvent::BackoffElapsed => write!(f, "BackoffElapsed"),
        }
    }
}

/// Attempt counters consulted by transition guards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based number of the current attempt
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptContext {
    pub fn new(attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
        }
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    AttemptsRemaining,
    AttemptsExhausted,
}

impl Guard {
    fn check(&self, ctx: &AttemptContext) -> Option<String> {
        match self {
            Guard::Always => None,
            Guard::AttemptsRemaining if !ctx.attempts_remaining() => Some(format!(
                "No attempts remaining: {}/{}",
                ctx.attempt, ctx.max_attempts
            )),
            Guard::AttemptsExhausted if ctx.attempts_remaining() => Some(format!(
                "Attempts remaining: {}/{}",
                ctx.attempt, ctx.max_attempts
            )),
            Guard::AttemptsRemaining | Guard::AttemptsExhausted => None,
        }
    }
}

/// A state transition definition with its guard
#[derive(Debug)]
struct Transition {
    from: ExecPhase,
    to: ExecPhase,
    event: ExecEvent,
    guard: Guard,
    description: &'static str,
}

impl Transition {
    const fn new(
        from: ExecPhase,
        to: ExecPhase,
        event: ExecEvent,
        guard: Guard,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            guard,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: ExecPhase,
        to: ExecPhase,
        event: ExecEvent,
        description: &'static str,
    },
    /// No transition is defined for this phase and event
    InvalidTransition { current: ExecPhase, event: ExecEvent },
    /// Transitions exist but every guard rejected the context
    GuardFailed {
        from: ExecPhase,
        event: ExecEvent,
        reason: String,
    },
}

/// Transition table for exec attempts
pub struct ExecStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ExecStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecStateMachine {
    pub fn new() -> Self {
        use ExecEvent::*;
        use ExecPhase::*;
        use Guard::*;

        Self {
            transitions: vec![
                // === Attempting ===
                Transition::new(
                    Attempting,
                    Parsing,
                    StreamCompleted,
                    Always,
                    "Stream completed, decoding output",
                ),
                Transition::new(
                    Attempting,
                    BackingOff,
                    StreamFailed,
                    AttemptsRemaining,
                    "Stream failed, backing off before retry",
                ),
                Transition::new(
                    Attempting,
                    Failed,
                    StreamFailed,
                    AttemptsExhausted,
                    "Stream failed on final attempt",
                ),
                // === Parsing ===
                Transition::new(Parsing, Done, ParseSucceeded, Always, "Output decoded"),
                Transition::new(
                    Parsing,
                    BackingOff,
                    ParseFailed,
                    AttemptsRemaining,
                    "Output malformed, backing off before retry",
                ),
                Transition::new(
                    Parsing,
                    Failed,
                    ParseFailed,
                    AttemptsExhausted,
                    "Output malformed on final attempt",
                ),
                // === BackingOff ===
                Transition::new(
                    BackingOff,
                    Attempting,
                    BackoffElapsed,
                    Always,
                    "Starting next attempt",
                ),
            ],
        }
    }

    /// Apply `event` in phase `current`.
    ///
    /// When several transitions share a phase and event, the first one whose
    /// guard accepts `ctx` wins.
    pub fn transition(
        &self,
        current: ExecPhase,
        event: ExecEvent,
        ctx: &AttemptContext,
    ) -> TransitionResult {
        let mut rejection = None;
        for t in self
            .transitions
            .iter()
            .filter(|t| t.from == current && t.event == event)
        {
            match t.guard.check(ctx) {
                None => {
                    return TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    };
                }
                Some(reason) => rejection = Some(reason),
            }
        }

        match rejection {
            Some(reason) => TransitionResult::GuardFailed {
                from: current,
                event,
                reason,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is defined (ignoring guards)
    pub fn can_transition(&self, from: ExecPhase, event: ExecEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Events accepted in `state`, without duplicates
    pub fn valid_events(&self, state: ExecPhase) -> Vec<ExecEvent> {
        let mut events: Vec<ExecEvent> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == state) {
            if !events.contains(&t.event) {
                events.push(t.event);
            }
        }
        events
    }
}
