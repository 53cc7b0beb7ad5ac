//! # kiln-core
//!
//! Core types for the Kiln self-correcting code agent.
//!
//! Kiln fires code until it holds: a task is turned into source by a model,
//! run inside a sandbox, diagnosed on failure, and regenerated with the
//! diagnosis folded back in, until it succeeds or the attempt budget runs out.
//!
//! ## Core Paradigm
//!
//! - A task's identity IS its text (it doubles as the memory lookup key)
//! - Attempts are append-only and owned by a single run
//! - Program failure is a normal outcome, not an error
//! - Observability side effects fail open, collaborator outages fail closed

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::KilnConfig;
pub use error::{KilnError, Result};
pub use types::*;
