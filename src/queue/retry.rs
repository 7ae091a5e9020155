//! Retry policies with configurable backoff and jitter
//!
//! A `RetryPolicy` is a plain value: maximum attempts, a backoff curve
//! (fixed, exponential, exponential-with-multiplier), a jitter mode (none,
//! equal, full, decorrelated), and an optional per-attempt timeout ceiling.
//! `Retrying` wraps an async operation with the policy; non-retryable
//! errors bypass the remaining attempts, and optional hooks observe each
//! retry, the final success, or the final failure.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result, RotaError};

// ============================================================================
// Backoff and Jitter
// ============================================================================

/// Backoff curve between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every attempt
    Fixed,
    /// Doubling delay
    Exponential,
    /// Exponential with a custom multiplier
    ExponentialWithMultiplier(f64),
}

/// Jitter applied to a computed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as-is
    None,
    /// Half fixed, half random: delay/2 + random(0, delay/2)
    Equal,
    /// Fully random in (0, delay)
    Full,
    /// Decorrelated: random(base, prev_delay * 3)
    Decorrelated,
}

// ============================================================================
// Policy
// ============================================================================

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,

    /// Base delay before the first retry
    pub base_delay: Duration,

    /// Ceiling on any single delay
    pub max_delay: Duration,

    /// Backoff curve
    pub backoff: Backoff,

    /// Jitter mode
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    /// Policy with custom attempt count and defaults elsewhere
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Raw backoff delay for a retry (attempt is 1-based, pre-jitter)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = match self.backoff {
            Backoff::Fixed => 1.0,
            Backoff::Exponential => 2f64.powi(attempt.saturating_sub(1) as i32),
            Backoff::ExponentialWithMultiplier(m) => m.powi(attempt.saturating_sub(1) as i32),
        };
        let delay_ms = (base_ms * multiplier).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Jittered delay for a retry; `prev` feeds the decorrelated mode
    pub fn jittered_delay(&self, attempt: u32, prev: Duration) -> Duration {
        let computed = self.backoff_delay(attempt);
        let mut rng = rand::thread_rng();

        let jittered = match self.jitter {
            Jitter::None => computed,
            Jitter::Equal => {
                let half = computed.as_millis() as u64 / 2;
                Duration::from_millis(half + rng.gen_range(0..=half.max(1)))
            }
            Jitter::Full => {
                Duration::from_millis(rng.gen_range(0..=computed.as_millis().max(1) as u64))
            }
            Jitter::Decorrelated => {
                let base = self.base_delay.as_millis() as u64;
                let upper = (prev.as_millis() as u64 * 3).max(base + 1);
                Duration::from_millis(rng.gen_range(base..=upper))
            }
        };

        jittered.min(self.max_delay)
    }
}

// ============================================================================
// Hooks
// ============================================================================

type HookFn = Box<dyn Fn(u32, &Error) + Send + Sync>;

/// Optional observers for retry lifecycle events
#[derive(Default)]
pub struct RetryHooks {
    on_retry: Option<HookFn>,
    on_failure: Option<HookFn>,
    on_success: Option<Box<dyn Fn(u32) + Send + Sync>>,
}

impl RetryHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_retry(mut self, hook: impl Fn(u32, &Error) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl Fn(u32, &Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn on_success(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }
}

// ============================================================================
// Combinator
// ============================================================================

/// Explicit retry combinator over an async operation
pub struct Retrying {
    policy: RetryPolicy,
    hooks: RetryHooks,
}

impl Retrying {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            hooks: RetryHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: RetryHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run the operation under the policy, retrying recoverable errors
    ///
    /// Non-retryable errors (per [`RotaError::is_recoverable`]) surface
    /// immediately without consuming further attempts.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(operation, |e| e.is_recoverable()).await
    }

    /// Run with a custom retryability predicate
    pub async fn run_if<T, F, Fut, P>(&self, operation: F, should_retry: P) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let mut prev_delay = self.policy.base_delay;
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.jittered_delay(attempt - 1, prev_delay);
                prev_delay = delay;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    if let Some(hook) = &self.hooks.on_success {
                        hook(attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        warn!(error = %e, "non-retryable error, giving up");
                        if let Some(hook) = &self.hooks.on_failure {
                            hook(attempt, &e);
                        }
                        return Err(e);
                    }

                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "operation failed"
                    );
                    if let Some(hook) = &self.hooks.on_retry {
                        hook(attempt, &e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| Error::context("operation failed with no error details"));
        if let Some(hook) = &self.hooks.on_failure {
            hook(self.policy.max_attempts, &error);
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, ValidationError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(Jitter::None)
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = RetryPolicy::new(5)
            .with_backoff(Backoff::Fixed)
            .with_delays(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RetryPolicy::new(10)
            .with_delays(Duration::from_millis(1000), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        // Capped
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(5000));
    }

    #[test]
    fn test_custom_multiplier() {
        let policy = RetryPolicy::new(5)
            .with_backoff(Backoff::ExponentialWithMultiplier(3.0))
            .with_delays(Duration::from_millis(100), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(900));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let policy = RetryPolicy::new(5)
            .with_jitter(Jitter::Full)
            .with_delays(Duration::from_millis(100), Duration::from_millis(200));
        for attempt in 1..8 {
            let delay = policy.jittered_delay(attempt, Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let retrying = Retrying::new(fast_policy(3));
        let result = retrying.run(|| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_success_after_recoverable_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let retrying = Retrying::new(fast_policy(4));
        let result = retrying
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Cache(CacheError::Timeout(5)))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_bypasses_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let retrying = Retrying::new(fast_policy(5));
        let result: Result<()> = retrying
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Validation(ValidationError::rule("bad input")))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let retrying = Retrying::new(fast_policy(2));
        let result: Result<()> = retrying
            .run(|| async { Err(Error::Cache(CacheError::Timeout(5))) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hooks_fire() {
        let retries = Arc::new(AtomicU32::new(0));
        let successes = Arc::new(AtomicU32::new(0));
        let retries_hook = Arc::clone(&retries);
        let successes_hook = Arc::clone(&successes);

        let hooks = RetryHooks::new()
            .on_retry(move |_, _| {
                retries_hook.fetch_add(1, Ordering::SeqCst);
            })
            .on_success(move |_| {
                successes_hook.fetch_add(1, Ordering::SeqCst);
            });

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let retrying = Retrying::new(fast_policy(3)).with_hooks(hooks);
        let _ = retrying
            .run(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Cache(CacheError::Timeout(5)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }
}
