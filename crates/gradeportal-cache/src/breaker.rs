//! Lock-free circuit breaker guarding the cache backend.
//!
//! ```text
//! CLOSED --(threshold consecutive failures)--> OPEN
//! OPEN --(cool-down elapsed since last failure)--> CLOSED (probing, counter reset)
//! ```
//!
//! The breaker is process-local and never persisted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Observable breaker state, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    open: AtomicBool,
    failures: AtomicU32,
    /// Milliseconds since `epoch` of the most recent failure.
    last_failure_ms: AtomicU64,
    epoch: Instant,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            open: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns `true` while the breaker is open.
    ///
    /// Once the cool-down has elapsed since the last failure, the first caller
    /// flips the breaker back to closed and resets the failure counter so the
    /// next backend call acts as a probe.
    pub fn is_open(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }

        let since_failure = self
            .now_ms()
            .saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
        if u128::from(since_failure) < self.cooldown.as_millis() {
            return true;
        }

        if self
            .open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.failures.store(0, Ordering::Release);
            tracing::info!(breaker = %self.name, "circuit breaker half-open, probing cache backend");
        }
        false
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!(breaker = %self.name, "circuit breaker closed after successful operation");
        }
    }

    pub fn record_failure(&self) {
        self.last_failure_ms.store(self.now_ms(), Ordering::Release);
        let count = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if count >= self.failure_threshold
            && self
                .open
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::warn!(
                breaker = %self.name,
                failures = count,
                "circuit breaker opened, bypassing cache backend"
            );
        }
    }

    pub fn reset(&self) {
        self.open.store(false, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.last_failure_ms.store(0, Ordering::Release);
    }

    /// Current state without triggering the half-open transition.
    pub fn state(&self) -> BreakerState {
        if self.open.load(Ordering::Acquire) {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new("summary", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 2);

        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = CircuitBreaker::new("summary", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_success_closes_open_breaker() {
        let breaker = CircuitBreaker::new("list", 1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new("release", 2, Duration::from_millis(30));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(50));
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);

        // A successful probe keeps it closed.
        breaker.record_success();
        assert!(!breaker.is_open());

        // Failures during probing count from zero again.
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_reset() {
        let breaker = CircuitBreaker::new("summary", 1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new("summary", 5, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(breaker.is_open());
        assert_eq!(breaker.failure_count(), 80);
    }
}
