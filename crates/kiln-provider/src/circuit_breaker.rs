//! Circuit breaker for provider outages
//!
//! After `threshold` consecutive hard failures the breaker opens and calls are
//! rejected without touching the network. Once `cooldown` has passed a probe
//! call is let through; a success closes the breaker again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls allowed
    Closed,
    /// Too many failures, calls rejected
    Open,
    /// Cooldown elapsed, a probe call is allowed
    HalfOpen,
}

/// Circuit breaker shared by every call a provider makes
///
/// ```
/// use kiln_provider::CircuitBreaker;
///
/// let breaker = CircuitBreaker::new(2, 60);
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(!breaker.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    /// Millis since `origin` of the latest failure
    last_failure_ms: AtomicU64,
    origin: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the breaker for `cooldown_secs`
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            origin: Instant::now(),
            threshold: threshold.max(1),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn since_last_failure_ms(&self) -> u64 {
        self.now_ms()
            .saturating_sub(self.last_failure_ms.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> CircuitState {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            CircuitState::Closed
        } else if self.since_last_failure_ms() >= self.cooldown.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Millis until a probe is allowed, 0 unless open
    pub fn time_until_retry(&self) -> u64 {
        match self.state() {
            CircuitState::Open => {
                (self.cooldown.as_millis() as u64).saturating_sub(self.since_last_failure_ms())
            }
            CircuitState::Closed | CircuitState::HalfOpen => 0,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert_eq!(breaker.time_until_retry(), 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, 60);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
        assert!(breaker.time_until_retry() > 0);
    }

    #[test]
    fn test_success_resets() {
        let breaker = CircuitBreaker::new(2, 60);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(1, 1);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        sleep(Duration::from_millis(1100));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let breaker = CircuitBreaker::new(0, 60);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
