// Per-service circuit breaker with dual trip conditions

//! # Circuit Breaker
//!
//! Three states per service:
//!
//! ```text
//! closed    --failures >= F  OR  window error-rate >= R-->  open
//! open      --timeout elapsed on next allow/state-->        half-open
//! half-open --any single failure-->                         open
//! half-open --success_threshold consecutive successes-->    closed
//! ```
//!
//! Two independent trip conditions while closed: a consecutive-failure
//! counter, and a tumbling-window error rate that only fires once the window
//! holds at least `min_samples` outcomes. The window fully resets when its
//! duration elapses (checked lazily on the next recorded outcome).
//!
//! All mutations serialize on one mutex per breaker; `state()` takes the
//! same mutex and performs a single time comparison to promote an expired
//! open state to half-open.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::{Result, SwitchboardError};

/// Breaker tuning. Zero values fall back to the documented defaults.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker (default 5)
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again (default 2)
    pub success_threshold: u32,
    /// How long an open breaker rejects before probing (default 30s)
    pub timeout: Duration,
    /// Window error-rate in (0, 1] that trips the breaker; 0 disables
    pub error_rate_threshold: f64,
    /// Tumbling window duration (default 60s)
    pub window: Duration,
    /// Minimum samples before the error-rate condition may fire (default 10)
    pub min_samples: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            error_rate_threshold: 0.0,
            window: Duration::from_secs(60),
            min_samples: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Replace zero fields with their defaults.
    fn normalized(mut self) -> Self {
        let defaults = CircuitBreakerConfig::default();
        if self.failure_threshold == 0 {
            self.failure_threshold = defaults.failure_threshold;
        }
        if self.success_threshold == 0 {
            self.success_threshold = defaults.success_threshold;
        }
        if self.timeout.is_zero() {
            self.timeout = defaults.timeout;
        }
        if self.window.is_zero() {
            self.window = defaults.window;
        }
        if self.min_samples == 0 {
            self.min_samples = defaults.min_samples;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    window_start: Instant,
    window_total: u64,
    window_failures: u64,
}

/// One breaker, guarding one backend service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            service: service.into(),
            config: config.normalized(),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                window_start: Instant::now(),
                window_total: 0,
                window_failures: 0,
            }),
        }
    }

    /// Admit or reject a request.
    ///
    /// An open breaker whose timeout has elapsed transitions to half-open
    /// and admits the probe in the same call.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() > self.config.timeout)
                    .unwrap_or(true);
                if expired {
                    debug!(service = %self.service, "breaker open timeout elapsed, probing");
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    Ok(())
                } else {
                    Err(SwitchboardError::CircuitOpen {
                        service: self.service.clone(),
                    })
                }
            }
        }
    }

    /// Current state; promotes an expired open state to half-open.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .map(|at| at.elapsed() > self.config.timeout)
                .unwrap_or(true);
            if expired {
                inner.state = BreakerState::HalfOpen;
                inner.consecutive_successes = 0;
            }
        }
        inner.state
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.roll_window(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                inner.window_total += 1;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    debug!(service = %self.service, "breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    inner.window_start = Instant::now();
                    inner.window_total = 0;
                    inner.window_failures = 0;
                }
            }
            // success arriving after the trip (request already in flight)
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.roll_window(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                inner.window_total += 1;
                inner.window_failures += 1;

                let consecutive_trip = inner.consecutive_failures >= self.config.failure_threshold;
                let rate_trip = self.config.error_rate_threshold > 0.0
                    && inner.window_total >= self.config.min_samples
                    && (inner.window_failures as f64 / inner.window_total as f64)
                        >= self.config.error_rate_threshold;

                if consecutive_trip || rate_trip {
                    warn!(
                        service = %self.service,
                        consecutive = inner.consecutive_failures,
                        window_failures = inner.window_failures,
                        window_total = inner.window_total,
                        "circuit breaker tripped"
                    );
                    Self::trip(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                warn!(service = %self.service, "probe failed, breaker re-opened");
                Self::trip(&mut inner);
            }
            BreakerState::Open => {}
        }
    }

    fn trip(inner: &mut Inner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_successes = 0;
    }

    /// Tumbling window: fully reset once the duration has elapsed.
    fn roll_window(&self, inner: &mut Inner) {
        if inner.window_start.elapsed() > self.config.window {
            inner.window_start = Instant::now();
            inner.window_total = 0;
            inner.window_failures = 0;
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "billing",
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: successes,
                timeout,
                error_rate_threshold: 0.0,
                window: Duration::ZERO,
                min_samples: 0,
            },
        )
    }

    #[test]
    fn test_trip_then_recover() {
        let b = breaker(3, 2, Duration::from_millis(50));

        for _ in 0..3 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow().is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow().is_ok());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let b = breaker(3, 2, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let b = breaker(1, 2, Duration::from_millis(10));
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(b.allow().is_ok()); // probe admitted
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow().is_err());
    }

    #[test]
    fn test_error_rate_trip_requires_min_samples() {
        let b = CircuitBreaker::new(
            "billing",
            CircuitBreakerConfig {
                failure_threshold: 1000,
                success_threshold: 2,
                timeout: Duration::from_secs(30),
                error_rate_threshold: 0.5,
                window: Duration::from_secs(60),
                min_samples: 10,
            },
        );

        // 5 failures, 4 successes: only 9 samples, below the floor
        for _ in 0..5 {
            b.record_failure();
            b.record_success();
        }
        // 10th sample arrives as a failure: 6/10 >= 0.5
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_error_rate_disabled_when_zero() {
        let b = CircuitBreaker::new(
            "billing",
            CircuitBreakerConfig {
                failure_threshold: 1000,
                ..CircuitBreakerConfig::default()
            },
        );
        for _ in 0..50 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_zero_config_gets_defaults() {
        let b = CircuitBreaker::new(
            "billing",
            CircuitBreakerConfig {
                failure_threshold: 0,
                success_threshold: 0,
                timeout: Duration::ZERO,
                error_rate_threshold: 0.0,
                window: Duration::ZERO,
                min_samples: 0,
            },
        );
        for _ in 0..4 {
            b.record_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure(); // fifth consecutive failure
        assert_eq!(b.state(), BreakerState::Open);
    }
}
