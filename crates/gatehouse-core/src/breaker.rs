//! Per-service circuit breaker.
//!
//! Each logical service owns one breaker shared by the proxy path and the
//! health checker. Failures push the breaker toward `Open`; once open, the
//! gateway fails fast instead of stacking requests onto a struggling
//! upstream. After `recovery_timeout` the next state query moves the breaker
//! to `HalfOpen`, where a single trial request decides between closing and
//! reopening.
//!
//! The transition out of `Open` is lazy: there is no background timer, the
//! elapsed check happens inside [`CircuitBreaker::is_open`]. Callers that
//! gate traffic on `is_open()` therefore drive recovery themselves.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Breaker tuning knobs, one set per service.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive-ish failure budget before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial request.
    pub recovery_timeout: Duration,
    /// Nominal observation window for the failure budget. The count decays
    /// by one per recorded success rather than by wall-clock expiry, so this
    /// is advisory and surfaced for operators only.
    pub monitoring_period: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(10),
        }
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests flow.
    Closed,
    /// Failing fast, upstream is not called.
    Open,
    /// One trial request decides the next state.
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
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Thread-safe circuit breaker.
///
/// All three mutating paths (proxy outcomes, health probe outcomes, the lazy
/// recovery check) run under one mutex, so concurrent `is_open()` calls
/// around the recovery deadline produce exactly one `Open -> HalfOpen`
/// transition.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: &'static str,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &'static str, config: BreakerConfig) -> Self {
        Self {
            service,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn with_defaults(service: &'static str) -> Self {
        Self::new(service, BreakerConfig::default())
    }

    /// Record a failed upstream interaction.
    ///
    /// Always bumps the failure count and the failure timestamp, so failures
    /// observed while already `Open` push the recovery deadline out. A single
    /// failure during `HalfOpen` reopens immediately regardless of the count.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!(
                    service = self.service,
                    "trial request failed, circuit reopened"
                );
            }
            BreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    warn!(
                        service = self.service,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a successful upstream interaction.
    ///
    /// In `HalfOpen` one success closes the circuit and zeroes the count.
    /// In `Closed` the count decays by one, so sporadic failures under
    /// healthy traffic never accumulate to the threshold. A success observed
    /// while `Open` (a late response from before the circuit tripped) is
    /// ignored.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                info!(service = self.service, "trial request ok, circuit closed");
            }
            BreakerState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            BreakerState::Open => {}
        }
    }

    /// Whether the breaker currently blocks traffic.
    ///
    /// Performs the lazy `Open -> HalfOpen` transition when the recovery
    /// timeout has elapsed, in which case the caller is the trial request and
    /// `false` is returned.
    pub fn is_open(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Open {
            return false;
        }
        let elapsed = inner
            .last_failure_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.recovery_timeout {
            inner.state = BreakerState::HalfOpen;
            info!(
                service = self.service,
                "recovery timeout elapsed, circuit half-open"
            );
            return false;
        }
        true
    }

    /// Administrative reset back to `Closed`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        info!(service = self.service, "circuit breaker reset");
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-service",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
                ..BreakerConfig::default()
            },
        )
    }

    #[test]
    fn starts_closed_with_zero_failures() {
        let cb = CircuitBreaker::with_defaults("test-service");
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn opens_exactly_at_threshold() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(!cb.is_open());

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn success_decays_failure_count_to_floor() {
        let cb = breaker(5, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 1);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn interleaved_failures_below_threshold_never_open() {
        let cb = breaker(3, Duration::from_secs(60));
        for _ in 0..10 {
            cb.record_failure();
            cb.record_success();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let cb = breaker(1, Duration::from_millis(50));
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(80));
        // The query itself performs the transition.
        assert!(!cb.is_open());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn trial_success_closes_and_zeroes_count() {
        let cb = breaker(2, Duration::from_millis(50));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(80));
        assert!(!cb.is_open());

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn trial_failure_reopens_immediately() {
        let cb = breaker(5, Duration::from_millis(50));
        for _ in 0..5 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(80));
        assert!(!cb.is_open());
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // One failure reopens even though a fresh threshold was not reached.
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn success_while_open_is_ignored() {
        let cb = breaker(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);

        // A straggler success from before the trip neither closes the
        // circuit nor touches the count.
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.failure_count(), 2);
        assert!(cb.is_open());
    }

    #[test]
    fn failure_while_open_extends_recovery_window() {
        let cb = breaker(1, Duration::from_millis(100));
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(60));
        cb.record_failure();

        // Without the extension the original deadline would have passed.
        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!cb.is_open());
    }

    #[test]
    fn reset_returns_to_closed() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        assert!(cb.is_open());

        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[test]
    fn concurrent_recovery_checks_transition_once() {
        use std::sync::Arc;

        let cb = Arc::new(breaker(1, Duration::from_millis(30)));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(60));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || cb.is_open())
            })
            .collect();
        for handle in handles {
            assert!(!handle.join().unwrap());
        }
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }
}
