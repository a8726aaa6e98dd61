use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Observable breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
    /// Calls flow normally; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// One probe call is allowed through; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-endpoint circuit breaker.
///
/// Trips open after `failure_threshold` consecutive failures, rejects calls
/// for `reset_timeout`, then lets a single probe through. Timeouts count as
/// failures; any success closes the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Whether a call may be attempted right now.
    ///
    /// Transitions `Open` to `HalfOpen` once the reset timeout has elapsed,
    /// so the caller that sees `true` is the probe.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call; closes the breaker.
    pub fn on_success(&self) {
        let mut inner = self.inner.write();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call; may trip the breaker open.
    pub fn on_failure(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            // A failed probe re-opens for a full timeout.
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    /// Current state, for metrics and logs.
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.can_execute());
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_decides() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.can_execute());
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
