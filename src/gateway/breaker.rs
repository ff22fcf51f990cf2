//! Per-provider circuit breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    /// Calls flow; counts consecutive transient failures
    Closed { consecutive_failures: u32 },
    /// Calls fail fast until the cooldown expires
    Open { until: Instant },
    /// One trial call is in flight; others fail fast
    HalfOpen,
}

/// Opens after N consecutive transient failures, fails fast for a
/// cooldown, then admits a single trial call. Trial success closes the
/// breaker; trial failure reopens it.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Whether a call may proceed. On cooldown expiry exactly one caller
    /// is admitted as the half-open trial.
    pub fn admit(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { until } => {
                if Instant::now() >= until {
                    info!(provider = %self.name, "Circuit breaker half-open, admitting trial call");
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, BreakerState::HalfOpen) {
            info!(provider = %self.name, "Circuit breaker closed after successful trial");
        }
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a transient failure (5xx or timeout). Rate-limit and
    /// permanent responses never move the breaker.
    pub fn record_transient_failure(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            BreakerState::Closed { consecutive_failures } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    warn!(
                        provider = %self.name,
                        failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                    *state = BreakerState::Open {
                        until: Instant::now() + self.cooldown,
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen => {
                warn!(provider = %self.name, "Trial call failed, circuit breaker reopened");
                *state = BreakerState::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// A non-transient failure (429, permanent) still concludes a
    /// half-open trial: the breaker reopens rather than hanging half-open.
    pub fn reopen_if_half_open(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, BreakerState::HalfOpen) {
            warn!(provider = %self.name, "Trial call inconclusive, circuit breaker reopened");
            *state = BreakerState::Open {
                until: Instant::now() + self.cooldown,
            };
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), BreakerState::Open { until } if Instant::now() < until)
    }
}
