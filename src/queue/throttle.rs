//! Throttling strategies for admission control
//!
//! When capacity tightens, each route picks a strategy value: simple
//! (reject above capacity), queued (bounded FIFO with an estimated wait),
//! priority (thresholds per priority band), or adaptive (a degradation
//! ladder across the 70/80/90/95% utilization bands). Strategies are plain
//! enum values dispatching one `decide` method; denied requests carry a
//! retry-after hint.

use serde::{Deserialize, Serialize};

use super::TaskPriority;

/// Estimated seconds one queued request takes to drain
const DRAIN_SECONDS_PER_REQUEST: f64 = 0.5;

// ============================================================================
// Decisions
// ============================================================================

/// What to do with an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleAction {
    /// Admit immediately
    Allow,
    /// Park in the bounded queue
    Queue,
    /// Refuse with a retry-after hint
    Reject,
    /// Admit but mark degraded (reduced work)
    Degrade,
}

/// Decision with context for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleDecision {
    pub action: ThrottleAction,
    pub reason: String,

    /// Estimated wait when queued, in seconds
    pub wait_time: f64,

    /// Retry-after hint when rejected or queued, in seconds
    pub retry_after: u64,
}

impl ThrottleDecision {
    fn allow(reason: &str) -> Self {
        Self {
            action: ThrottleAction::Allow,
            reason: reason.to_string(),
            wait_time: 0.0,
            retry_after: 0,
        }
    }

    fn degrade(reason: &str) -> Self {
        Self {
            action: ThrottleAction::Degrade,
            reason: reason.to_string(),
            wait_time: 0.0,
            retry_after: 0,
        }
    }

    fn queue(reason: &str, queued_requests: usize) -> Self {
        let wait_time = queued_requests as f64 * DRAIN_SECONDS_PER_REQUEST;
        Self {
            action: ThrottleAction::Queue,
            reason: reason.to_string(),
            wait_time,
            retry_after: wait_time as u64 + 1,
        }
    }

    fn reject(reason: &str, retry_after: u64) -> Self {
        Self {
            action: ThrottleAction::Reject,
            reason: reason.to_string(),
            wait_time: 0.0,
            retry_after,
        }
    }
}

/// Live capacity numbers a strategy decides against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleMetrics {
    /// in-flight / capacity
    pub utilization: f64,

    /// queued / queue capacity
    pub queue_utilization: f64,

    /// Requests currently queued
    pub queued_requests: usize,
}

// ============================================================================
// Strategies
// ============================================================================

/// Per-route throttling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleStrategy {
    /// Allow under capacity, reject at it
    Simple,
    /// Allow, then queue, then reject
    Queued,
    /// Per-priority utilization thresholds
    Priority,
    /// Degradation ladder across utilization bands
    Adaptive,
}

impl ThrottleStrategy {
    /// Decide what happens to a request under the current metrics
    pub fn decide(&self, metrics: ThrottleMetrics, priority: TaskPriority) -> ThrottleDecision {
        match self {
            Self::Simple => Self::decide_simple(metrics),
            Self::Queued => Self::decide_queued(metrics),
            Self::Priority => Self::decide_priority(metrics, priority),
            Self::Adaptive => Self::decide_adaptive(metrics, priority),
        }
    }

    fn decide_simple(metrics: ThrottleMetrics) -> ThrottleDecision {
        if metrics.utilization < 1.0 {
            ThrottleDecision::allow("capacity available")
        } else {
            ThrottleDecision::reject("maximum concurrent requests reached", 5)
        }
    }

    fn decide_queued(metrics: ThrottleMetrics) -> ThrottleDecision {
        if metrics.utilization < 1.0 {
            return ThrottleDecision::allow("capacity available");
        }
        if metrics.queue_utilization < 1.0 {
            return ThrottleDecision::queue("queued due to capacity limit", metrics.queued_requests);
        }
        ThrottleDecision::reject("capacity and queue are both full", 10)
    }

    fn decide_priority(metrics: ThrottleMetrics, priority: TaskPriority) -> ThrottleDecision {
        // Higher priorities tolerate deeper utilization before refusal
        let (admit_below, queue_below) = match priority {
            TaskPriority::Critical => (0.98, 0.9),
            TaskPriority::High => (0.95, 0.8),
            TaskPriority::Normal => (0.85, 0.7),
            TaskPriority::Low => (0.70, 0.5),
        };

        if metrics.utilization < admit_below {
            return ThrottleDecision::allow("within priority band");
        }
        if metrics.queue_utilization < queue_below {
            return ThrottleDecision::queue("queued within priority band", metrics.queued_requests);
        }
        ThrottleDecision::reject("priority band exhausted", 10)
    }

    /// Degradation ladder:
    /// - < 70%: normal operation
    /// - 70-80%: queue low priority
    /// - 80-90%: reject low, degrade normal
    /// - 90-95%: only high and critical admitted
    /// - ≥ 95%: emergency, critical only
    fn decide_adaptive(metrics: ThrottleMetrics, priority: TaskPriority) -> ThrottleDecision {
        let utilization = metrics.utilization;

        if utilization < 0.70 {
            return ThrottleDecision::allow("normal operation");
        }

        if utilization < 0.80 {
            return match priority {
                TaskPriority::Low => {
                    ThrottleDecision::queue("warning band, low priority queued", metrics.queued_requests)
                }
                _ => ThrottleDecision::allow("warning band"),
            };
        }

        if utilization < 0.90 {
            return match priority {
                TaskPriority::Low => ThrottleDecision::reject("throttle band, low priority shed", 30),
                TaskPriority::Normal => ThrottleDecision::degrade("throttle band, degraded service"),
                _ => ThrottleDecision::allow("throttle band"),
            };
        }

        if utilization < 0.95 {
            return match priority {
                TaskPriority::Critical | TaskPriority::High => {
                    ThrottleDecision::allow("critical band")
                }
                _ => ThrottleDecision::reject("critical band, high priority only", 60),
            };
        }

        match priority {
            TaskPriority::Critical => ThrottleDecision::allow("emergency band, critical only"),
            _ => ThrottleDecision::reject("emergency band", 120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(utilization: f64, queue_utilization: f64, queued: usize) -> ThrottleMetrics {
        ThrottleMetrics {
            utilization,
            queue_utilization,
            queued_requests: queued,
        }
    }

    #[test]
    fn test_simple_strategy() {
        let decision =
            ThrottleStrategy::Simple.decide(metrics(0.5, 0.0, 0), TaskPriority::Normal);
        assert_eq!(decision.action, ThrottleAction::Allow);

        let decision =
            ThrottleStrategy::Simple.decide(metrics(1.0, 0.0, 0), TaskPriority::Normal);
        assert_eq!(decision.action, ThrottleAction::Reject);
        assert!(decision.retry_after > 0);
    }

    #[test]
    fn test_queued_strategy_estimates_wait() {
        let decision =
            ThrottleStrategy::Queued.decide(metrics(1.0, 0.5, 8), TaskPriority::Normal);
        assert_eq!(decision.action, ThrottleAction::Queue);
        assert!((decision.wait_time - 4.0).abs() < 1e-9);
        assert_eq!(decision.retry_after, 5);
    }

    #[test]
    fn test_queued_strategy_rejects_when_both_full() {
        let decision =
            ThrottleStrategy::Queued.decide(metrics(1.0, 1.0, 100), TaskPriority::Normal);
        assert_eq!(decision.action, ThrottleAction::Reject);
    }

    #[test]
    fn test_priority_strategy_bands() {
        let hot = metrics(0.9, 0.6, 5);
        assert_eq!(
            ThrottleStrategy::Priority.decide(hot, TaskPriority::Critical).action,
            ThrottleAction::Allow
        );
        assert_eq!(
            ThrottleStrategy::Priority.decide(hot, TaskPriority::Normal).action,
            ThrottleAction::Queue
        );
        assert_eq!(
            ThrottleStrategy::Priority.decide(hot, TaskPriority::Low).action,
            ThrottleAction::Reject
        );
    }

    #[test]
    fn test_adaptive_normal_operation() {
        let decision =
            ThrottleStrategy::Adaptive.decide(metrics(0.5, 0.0, 0), TaskPriority::Low);
        assert_eq!(decision.action, ThrottleAction::Allow);
    }

    #[test]
    fn test_adaptive_warning_band_queues_low() {
        let band = metrics(0.75, 0.2, 2);
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Low).action,
            ThrottleAction::Queue
        );
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Normal).action,
            ThrottleAction::Allow
        );
    }

    #[test]
    fn test_adaptive_throttle_band() {
        let band = metrics(0.85, 0.2, 2);
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Low).action,
            ThrottleAction::Reject
        );
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Normal).action,
            ThrottleAction::Degrade
        );
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::High).action,
            ThrottleAction::Allow
        );
    }

    #[test]
    fn test_adaptive_critical_band() {
        let band = metrics(0.92, 0.5, 4);
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Normal).action,
            ThrottleAction::Reject
        );
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::High).action,
            ThrottleAction::Allow
        );
    }

    #[test]
    fn test_adaptive_emergency_band() {
        let band = metrics(0.97, 0.9, 20);
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::High).action,
            ThrottleAction::Reject
        );
        assert_eq!(
            ThrottleStrategy::Adaptive.decide(band, TaskPriority::Critical).action,
            ThrottleAction::Allow
        );
    }
}
