//! Per-breaker metrics.
//!
//! Counters are plain atomics so recording never contends with the breaker's
//! state lock; a serializable snapshot is available for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::state::CircuitState;

/// Request and transition counters for one circuit breaker
#[derive(Debug, Default)]
pub struct CircuitBreakerMetrics {
    /// Total number of successful calls
    total_successes: AtomicU64,
    /// Total number of failed calls
    total_failures: AtomicU64,
    /// Total number of calls rejected without reaching the dependency
    total_rejected: AtomicU64,
    /// Number of state transitions
    total_transitions: AtomicU64,
    /// Number of times the circuit tripped open
    times_opened: AtomicU64,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call
    pub(crate) fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed call
    pub(crate) fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a call rejected while the circuit was open
    pub(crate) fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a state transition
    pub(crate) fn record_transition(&self, _from: CircuitState, to: CircuitState) {
        self.total_transitions.fetch_add(1, Ordering::SeqCst);
        if to == CircuitState::Open {
            self.times_opened.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Get total successful calls
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::SeqCst)
    }

    /// Get total failed calls
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::SeqCst)
    }

    /// Get total rejected calls
    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::SeqCst)
    }

    /// Get total state transitions
    pub fn total_transitions(&self) -> u64 {
        self.total_transitions.load(Ordering::SeqCst)
    }

    /// Get the number of times the circuit tripped open
    pub fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::SeqCst)
    }

    /// Get total calls that reached the dependency (success + failure)
    pub fn total_requests(&self) -> u64 {
        self.total_successes() + self.total_failures()
    }

    /// Failure rate as a percentage (0-100) of calls that reached the dependency
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        (self.total_failures() as f64 / total as f64) * 100.0
    }

    /// Take a serializable snapshot of the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejected: self.total_rejected(),
            total_requests: self.total_requests(),
            total_transitions: self.total_transitions(),
            times_opened: self.times_opened(),
            failure_rate: self.failure_rate(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.total_successes.store(0, Ordering::SeqCst);
        self.total_failures.store(0, Ordering::SeqCst);
        self.total_rejected.store(0, Ordering::SeqCst);
        self.total_transitions.store(0, Ordering::SeqCst);
        self.times_opened.store(0, Ordering::SeqCst);
    }
}

/// Serializable counter snapshot for monitoring/display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
    pub total_requests: u64,
    pub total_transitions: u64,
    pub times_opened: u64,
    pub failure_rate: f64,
}
