//! Self-correcting generation loop
//!
//! [`AgentRuntime`] drives each task through generate, execute and critique
//! until an attempt passes or the attempt budget is spent. Control flow lives
//! in the pure [`state_machine`]; the runtime only performs the I/O each state
//! asks for.

pub mod critic;
pub mod extract;
pub mod generator;
pub mod prompt;
pub mod runtime;
pub mod state_machine;

pub use critic::{Critic, CriticNode, ModelCritic};
pub use extract::{extract_code, parse_confidence, CodeBlock};
pub use generator::{Generation, GeneratorNode};
pub use runtime::{AgentRuntime, RuntimeSettings};
pub use state_machine::{transition, Event, LoopPolicy, State};
