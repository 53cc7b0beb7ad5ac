//! Pure state machine for the attempt loop
//!
//! No async, no I/O. The runtime performs whatever the current state calls
//! for, reports what happened as an [`Event`], and asks [`transition`] where
//! to go next. Invalid transitions land in `Failed`; this module never panics.

use kiln_core::RunOutcome;

/// Loop limits the transition function enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    /// Hard ceiling on attempts
    pub max_attempts: usize,
    /// Critique runs that the sandbox reported as successful
    pub critique_on_success: bool,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            critique_on_success: false,
        }
    }
}

/// Where a run is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing started yet
    Init,
    /// Asking the generator for attempt `attempt`
    Generate { attempt: usize },
    /// Running attempt `attempt` in the sandbox
    Execute { attempt: usize },
    /// Diagnosing attempt `attempt`
    Critique { attempt: usize },
    /// Run finished normally
    Done { outcome: RunOutcome },
    /// A collaborator failed or the machine was misused
    Failed { error: String },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done { .. } | State::Failed { .. })
    }

    /// Attempt the state belongs to, if any
    pub fn attempt(&self) -> Option<usize> {
        match self {
            State::Generate { attempt }
            | State::Execute { attempt }
            | State::Critique { attempt } => Some(*attempt),
            _ => None,
        }
    }
}

/// What the runtime observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Trace opened and lessons fetched
    Started,
    /// Code extracted; `low_confidence` when it fell below the floor
    Generated { low_confidence: bool },
    /// The reply held no usable code
    GenerationEmpty,
    /// Sandbox finished, successfully or not
    Executed { succeeded: bool },
    /// Critic verdict
    Judged { pass: bool },
    /// External cancellation
    Cancelled,
    /// Provider or sandbox unreachable
    Fatal { message: String },
}

/// Next state for `state` after `event`
///
/// Deterministic and side-effect free.
pub fn transition(state: State, event: Event, policy: &LoopPolicy) -> State {
    let max_attempts = policy.max_attempts.max(1);

    match (state, event) {
        (State::Init, Event::Started) => State::Generate { attempt: 1 },

        // Below the confidence floor or nothing extracted: skip the sandbox
        (State::Generate { attempt }, Event::Generated { low_confidence: true })
        | (State::Generate { attempt }, Event::GenerationEmpty) => State::Critique { attempt },

        (State::Generate { attempt }, Event::Generated { low_confidence: false }) => {
            State::Execute { attempt }
        }

        (State::Execute { attempt }, Event::Executed { succeeded: true }) => {
            if policy.critique_on_success {
                State::Critique { attempt }
            } else {
                State::Done {
                    outcome: RunOutcome::Success,
                }
            }
        }

        (State::Execute { attempt }, Event::Executed { succeeded: false }) => {
            State::Critique { attempt }
        }

        (State::Critique { .. }, Event::Judged { pass: true }) => State::Done {
            outcome: RunOutcome::Success,
        },

        (State::Critique { attempt }, Event::Judged { pass: false }) => {
            if attempt < max_attempts {
                State::Generate {
                    attempt: attempt + 1,
                }
            } else {
                State::Done {
                    outcome: RunOutcome::Exhausted,
                }
            }
        }

        // Cancellation and fatal errors from any non-terminal state
        (state, Event::Cancelled) if !state.is_terminal() => State::Done {
            outcome: RunOutcome::Cancelled,
        },

        (state, Event::Fatal { message }) if !state.is_terminal() => {
            State::Failed { error: message }
        }

        (state, event) => State::Failed {
            error: format!(
                "Invalid state transition: {:?} cannot handle event {:?}",
                state, event
            ),
        },
    }
}
