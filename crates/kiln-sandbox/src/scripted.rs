//! Sandbox that replays canned results

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{KilnError, Result, SandboxResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One canned execution
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedExecution {
    /// Report this result immediately
    Result(SandboxResult),
    /// Run until the deadline, then report a timeout
    Hang,
    /// Fail as if the backend were gone
    Unavailable,
}

impl From<SandboxResult> for ScriptedExecution {
    fn from(result: SandboxResult) -> Self {
        Self::Result(result)
    }
}

/// Sandbox for tests: queued executions in order, then the fallback
#[derive(Debug)]
pub struct ScriptedSandbox {
    queue: Mutex<VecDeque<ScriptedExecution>>,
    fallback: ScriptedExecution,
    codes: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count however the execution ends
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: ScriptedExecution::Result(SandboxResult::success("")),
            codes: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_execution(self, execution: impl Into<ScriptedExecution>) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(execution.into());
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<ScriptedExecution>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Code strings received, oldest first
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn executions(&self) -> usize {
        self.codes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Executions started and not yet finished or dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(&self, code: &str, timeout: Duration) -> Result<SandboxResult> {
        self.codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(code.to_string());

        let next = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        match next {
            ScriptedExecution::Result(result) => Ok(result),
            ScriptedExecution::Hang => {
                let started = Instant::now();
                tokio::time::sleep(timeout).await;
                Ok(SandboxResult::timeout(started.elapsed().as_millis() as u64))
            }
            ScriptedExecution::Unavailable => Err(KilnError::SandboxUnavailable(
                "scripted sandbox is offline".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ExitStatus;

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let sandbox = ScriptedSandbox::new()
            .with_execution(SandboxResult::error("ModuleNotFoundError: No module named 'numpy'"))
            .with_fallback(SandboxResult::success("5"));

        let first = sandbox.execute("a", Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.exit_status, ExitStatus::Error);
        let second = sandbox.execute("b", Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.stdout, "5");
        assert_eq!(sandbox.codes(), vec!["a", "b"]);
        assert_eq!(sandbox.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_hang_reports_timeout_at_deadline() {
        let sandbox = ScriptedSandbox::new().with_execution(ScriptedExecution::Hang);
        let result = sandbox
            .execute("loop", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(result.exit_status, ExitStatus::Timeout);
    }

    #[tokio::test]
    async fn test_dropped_execution_leaves_nothing_in_flight() {
        let sandbox = ScriptedSandbox::new().with_execution(ScriptedExecution::Hang);
        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            sandbox.execute("loop", Duration::from_secs(60)),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(sandbox.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let sandbox = ScriptedSandbox::new().with_fallback(ScriptedExecution::Unavailable);
        let err = sandbox.execute("x", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, KilnError::SandboxUnavailable(_)));
    }
}
