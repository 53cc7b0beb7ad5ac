//! Sandboxed execution for generated code
//!
//! Every backend implements [`Sandbox`]. [`ProcessSandbox`] runs code in a
//! throwaway directory under a local interpreter, [`SandboxPool`] bounds how
//! many executions run at once, and [`ScriptedSandbox`] replays canned results.

mod pool;
mod process;
mod sandbox;
mod scripted;

pub use pool::SandboxPool;
pub use process::ProcessSandbox;
pub use sandbox::Sandbox;
pub use scripted::{ScriptedExecution, ScriptedSandbox};
