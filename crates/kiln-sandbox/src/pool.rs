//! Bounded access to a shared sandbox

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use kiln_core::{KilnError, Result, SandboxResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Caps concurrent executions across every run sharing the pool
///
/// Callers past the cap wait for a free slot. The wait is not counted
/// against the execution timeout.
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<dyn Sandbox>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl SandboxPool {
    pub fn new(inner: Arc<dyn Sandbox>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Sandbox for SandboxPool {
    async fn execute(&self, code: &str, timeout: Duration) -> Result<SandboxResult> {
        if self.permits.available_permits() == 0 {
            debug!("All {} sandbox slots busy, waiting", self.size);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| KilnError::SandboxUnavailable("Sandbox pool closed".to_string()))?;

        self.inner.execute(code, timeout).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tracks how many executions overlap
    #[derive(Default)]
    struct ProbeSandbox {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Sandbox for ProbeSandbox {
        async fn execute(&self, _code: &str, _timeout: Duration) -> Result<SandboxResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(SandboxResult::success("ok"))
        }

        fn name(&self) -> &str {
            "probe"
        }
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let probe = Arc::new(ProbeSandbox::default());
        let pool = SandboxPool::new(probe.clone(), 2);

        let runs = (0..8).map(|_| pool.execute("x", Duration::from_secs(1)));
        let results = futures::future::join_all(runs).await;

        assert!(results.iter().all(|r| r.as_ref().unwrap().succeeded()));
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_is_clamped() {
        let pool = SandboxPool::new(Arc::new(ProbeSandbox::default()), 0);
        assert_eq!(pool.size(), 1);
        assert!(pool
            .execute("x", Duration::from_secs(1))
            .await
            .unwrap()
            .succeeded());
    }
}
