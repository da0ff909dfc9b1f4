//! # Circuit Breaker Implementation
//!
//! Fail-fast guard placed in front of every database call. Three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (admitting a
//! bounded number of trial calls to test recovery).

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to test dependency health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Errors surfaced by a guarded call
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call was rejected without touching the dependency
    #[error("Circuit breaker is open for {component}, retry after {}ms", retry_after.as_millis())]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },

    /// Operation ran and failed; the failure was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug)]
struct BreakerInner {
    metrics: CircuitBreakerMetrics,
    opened_at: Option<Instant>,
}

/// Core circuit breaker with an atomic state flag and mutex-protected counters
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic so `state()` never waits on the lock)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_seconds = config.timeout.as_secs(),
            half_open_max_calls = config.half_open_max_calls,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner {
                metrics: CircuitBreakerMetrics::new(),
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Rejected calls return [`CircuitBreakerError::CircuitOpen`] immediately and the
    /// operation future is never created.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_after) = self.admit(operation_name).await {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_after,
            });
        }

        let start_time = Instant::now();
        let result = operation().await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => self.record_success(operation_name, duration).await,
            Err(_) => self.record_failure(operation_name, duration).await,
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed; `Err` carries the retry-after hint
    async fn admit(&self, operation_name: &str) -> Result<(), Duration> {
        let mut inner = self.inner.lock().await;

        if self.state() == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|opened| opened.elapsed())
                .unwrap_or(self.config.timeout);

            if elapsed < self.config.timeout {
                inner.metrics.rejected_count += 1;
                debug!(
                    component = %self.name,
                    operation = operation_name,
                    "⛔ Call rejected, circuit open"
                );
                return Err(self.config.timeout - elapsed);
            }

            self.transition_to_half_open(&mut inner);
        }

        if self.state() == CircuitState::HalfOpen {
            if inner.metrics.half_open_calls >= u64::from(self.config.half_open_max_calls) {
                inner.metrics.rejected_count += 1;
                return Err(self.config.timeout);
            }
            inner.metrics.half_open_calls += 1;
        }

        Ok(())
    }

    async fn record_success(&self, operation_name: &str, duration: Duration) {
        let mut inner = self.inner.lock().await;
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;
        inner.metrics.total_duration += duration;
        inner.metrics.consecutive_failures = 0;

        debug!(
            component = %self.name,
            operation = operation_name,
            duration_ms = duration.as_millis(),
            "🟢 Operation succeeded"
        );

        match self.state() {
            CircuitState::HalfOpen => {
                inner.metrics.half_open_successes += 1;
                if inner.metrics.half_open_successes
                    >= u64::from(self.config.half_open_max_calls)
                {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {}
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    async fn record_failure(&self, operation_name: &str, duration: Duration) {
        let mut inner = self.inner.lock().await;
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.metrics.total_duration += duration;
        inner.metrics.consecutive_failures += 1;

        warn!(
            component = %self.name,
            operation = operation_name,
            duration_ms = duration.as_millis(),
            consecutive_failures = inner.metrics.consecutive_failures,
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if inner.metrics.consecutive_failures
                    >= u64::from(self.config.failure_threshold)
                {
                    self.transition_to_open(&mut inner);
                }
            }
            // Any failed trial call re-opens the circuit
            CircuitState::HalfOpen => self.transition_to_open(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        inner.metrics.consecutive_failures = 0;
        inner.metrics.half_open_calls = 0;
        inner.metrics.half_open_successes = 0;
        inner.opened_at = None;

        info!(
            component = %self.name,
            total_calls = inner.metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        inner.opened_at = Some(Instant::now());
        inner.metrics.half_open_calls = 0;
        inner.metrics.half_open_successes = 0;

        error!(
            component = %self.name,
            consecutive_failures = inner.metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            timeout_seconds = self.config.timeout.as_secs(),
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Release);
        inner.metrics.half_open_calls = 0;
        inner.metrics.half_open_successes = 0;

        info!(
            component = %self.name,
            half_open_max_calls = self.config.half_open_max_calls,
            "🟡 Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub async fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock().await;
        self.transition_to_open(&mut inner);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub async fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock().await;
        self.transition_to_closed(&mut inner);
    }

    /// Get current metrics snapshot
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().await;
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = self.state();
        if snapshot.total_calls > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / snapshot.total_calls as f64;
        }
        snapshot
    }
}
