//! Circuit breaker for the live market data poller.
//!
//! Counts consecutive failed gateway requests. Once the threshold is reached
//! the breaker opens and stays open; the feed treats that as fatal. A
//! successful request resets the count.

use std::time::Instant;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation: requests are allowed.
    Closed,
    /// Tripped: the feed must stop.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    failure_threshold: u32,
}

impl CircuitBreaker {
    /// A zero threshold is treated as one.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.state == BreakerState::Closed
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful request: resets the failure counter.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failure. Returns true when this failure tripped the breaker.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.is_allowed() && self.consecutive_failures >= self.failure_threshold {
            self.state = BreakerState::Open { tripped_at: Instant::now() };
            return true;
        }
        false
    }
}
