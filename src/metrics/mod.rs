//! Prometheus metrics for the scheduling core
//!
//! This module tracks the run loop (starts, terminal statuses, iteration
//! counts, best scores), the cache tiers, the task queue, and circuit
//! breaker state.
//!
//! Call `init_metrics()` once at application startup. If registration
//! fails, metric operations become no-ops; exposition transport is the
//! embedding application's concern (use [`gather`] for the text format).

use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all core metrics
struct CoreMetrics {
    runs_started: Counter,
    runs_finished: CounterVec,
    iterations: Counter,
    iteration_duration: Histogram,
    best_score: GaugeVec,
    cache_lookups: CounterVec,
    queue_depth: GaugeVec,
    breaker_state: GaugeVec,
    swaps_executed: Counter,
    swaps_rolled_back: Counter,
    fallback_activations: CounterVec,
}

/// Global storage for core metrics
static METRICS: OnceLock<CoreMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers. On
/// registration failure the error is returned and subsequent metric
/// operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    INIT_ATTEMPTED.set(true).ok();

    let metrics = CoreMetrics {
        runs_started: register_counter!(
            "rota_runs_started_total",
            "Autonomous runs started"
        )?,
        runs_finished: register_counter_vec!(
            "rota_runs_finished_total",
            "Runs reaching a terminal status",
            &["status"]
        )?,
        iterations: register_counter!(
            "rota_iterations_total",
            "Control-loop iterations executed"
        )?,
        iteration_duration: register_histogram!(
            "rota_iteration_duration_seconds",
            "Wall-clock time per iteration"
        )?,
        best_score: register_gauge_vec!(
            "rota_run_best_score",
            "Best score per run",
            &["run_id"]
        )?,
        cache_lookups: register_counter_vec!(
            "rota_cache_lookups_total",
            "Cache lookups by tier and outcome",
            &["tier", "outcome"]
        )?,
        queue_depth: register_gauge_vec!(
            "rota_queue_depth",
            "Queued tasks per priority band",
            &["priority"]
        )?,
        breaker_state: register_gauge_vec!(
            "rota_breaker_state",
            "Circuit breaker state (0 closed, 1 half-open, 2 open)",
            &["breaker"]
        )?,
        swaps_executed: register_counter!(
            "rota_swaps_executed_total",
            "Swaps executed"
        )?,
        swaps_rolled_back: register_counter!(
            "rota_swaps_rolled_back_total",
            "Swaps rolled back inside the window"
        )?,
        fallback_activations: register_counter_vec!(
            "rota_fallback_activations_total",
            "Static fallback activations by scenario",
            &["scenario"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

// ============================================================================
// Recording helpers (no-ops when uninitialized)
// ============================================================================

pub fn record_run_started() {
    if let Some(m) = METRICS.get() {
        m.runs_started.inc();
    }
}

pub fn record_run_finished(status: &str) {
    if let Some(m) = METRICS.get() {
        m.runs_finished.with_label_values(&[status]).inc();
    }
}

pub fn record_iteration(duration_seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.iterations.inc();
        m.iteration_duration.observe(duration_seconds);
    }
}

pub fn record_best_score(run_id: &str, score: f64) {
    if let Some(m) = METRICS.get() {
        m.best_score.with_label_values(&[run_id]).set(score);
    }
}

pub fn record_cache_lookup(tier: &str, hit: bool) {
    if let Some(m) = METRICS.get() {
        let outcome = if hit { "hit" } else { "miss" };
        m.cache_lookups.with_label_values(&[tier, outcome]).inc();
    }
}

pub fn record_queue_depth(priority: &str, depth: usize) {
    if let Some(m) = METRICS.get() {
        m.queue_depth
            .with_label_values(&[priority])
            .set(depth as f64);
    }
}

pub fn record_breaker_state(breaker: &str, state: u8) {
    if let Some(m) = METRICS.get() {
        m.breaker_state
            .with_label_values(&[breaker])
            .set(state as f64);
    }
}

pub fn record_swap_executed() {
    if let Some(m) = METRICS.get() {
        m.swaps_executed.inc();
    }
}

pub fn record_swap_rolled_back() {
    if let Some(m) = METRICS.get() {
        m.swaps_rolled_back.inc();
    }
}

pub fn record_fallback_activation(scenario: &str) {
    if let Some(m) = METRICS.get() {
        m.fallback_activations.with_label_values(&[scenario]).inc();
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_init_is_noop() {
        // Must not panic even when init never ran in this process order
        record_run_started();
        record_iteration(0.5);
        record_cache_lookup("l1", true);
    }

    #[test]
    fn test_init_and_gather() {
        let _ = init_metrics();
        // Second call is a no-op, not an error
        assert!(init_metrics().is_ok());

        record_run_started();
        record_run_finished("completed");
        record_best_score("run-1", 0.93);
        record_queue_depth("normal", 4);

        let text = gather();
        if METRICS.get().is_some() {
            assert!(text.contains("rota_runs_started_total"));
        }
    }
}
