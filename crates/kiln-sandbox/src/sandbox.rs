//! Sandbox execution abstraction

use async_trait::async_trait;
use kiln_core::{Result, SandboxResult};
use std::time::Duration;

/// Runs a code string in isolation (allows scripting in tests)
///
/// Program failures, timeouts and crashes come back as a [`SandboxResult`].
/// `Err` is reserved for a backend that cannot run anything at all, which
/// the caller treats as fatal.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `code`, killing it once `timeout` has elapsed
    async fn execute(&self, code: &str, timeout: Duration) -> Result<SandboxResult>;

    /// Backend name for logs and traces
    fn name(&self) -> &str;
}
