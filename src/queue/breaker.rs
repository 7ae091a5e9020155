//! Circuit breaker for failure isolation
//!
//! Classic three-state breaker: closed until the failure count reaches the
//! threshold, open until the timeout elapses since the last failure, then
//! half-open probing. Enough successes in half-open close the breaker;
//! any half-open failure reopens it. Callers ask `can_request()` before
//! each attempt; the `Guarded` combinator wraps an async operation with
//! the whole protocol.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, QueueError, Result};

// ============================================================================
// State and Configuration
// ============================================================================

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow; failures are counted
    Closed,
    /// Requests are refused until the timeout elapses
    Open,
    /// Limited probe requests decide whether to close or reopen
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures in closed state before opening
    pub failure_threshold: u32,

    /// Time after the last failure before probing
    pub timeout: Duration,

    /// Successes in half-open before closing
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            half_open_requests: 2,
        }
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Named circuit breaker guarding one downstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, after applying the open→half-open timeout transition
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a request may proceed right now
    pub fn can_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh(&mut inner);
        matches!(inner.state, BreakerState::Closed | BreakerState::HalfOpen)
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_requests {
                    tracing::info!(breaker = %self.name, "circuit closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "probe failed, circuit reopened");
                inner.state = BreakerState::Open;
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// open → half-open when the timeout has elapsed since the last failure
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.timeout {
                tracing::info!(breaker = %self.name, "circuit half-open, probing");
                inner.state = BreakerState::HalfOpen;
                inner.success_count = 0;
            }
        }
    }
}

// ============================================================================
// Combinator
// ============================================================================

/// Explicit breaker combinator over an async operation
pub struct Guarded<'a> {
    breaker: &'a CircuitBreaker,
}

impl<'a> Guarded<'a> {
    pub fn new(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker }
    }

    /// Run the operation if the breaker admits it, recording the outcome
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.breaker.can_request() {
            return Err(Error::Queue(QueueError::CircuitOpen(
                self.breaker.name().to_string(),
            )));
        }

        match operation().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}
