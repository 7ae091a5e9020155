//! Run state and iteration records
//!
//! A `RunState` is the complete, resumable state of one autonomous run,
//! persisted as `state.json`. Each attempt appends an `IterationRecord` to
//! `history.ndjson`. Best-score tracking is monotone: the recorded best
//! never decreases over a run's lifetime.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::EvaluationResult;
use crate::generator::GeneratorParams;

// ============================================================================
// Run Status
// ============================================================================

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Exhausted,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further iterations
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

// ============================================================================
// Stop Reasons
// ============================================================================

/// Why `should_stop` answered yes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    MaxIterations,
    Stagnation,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetReached => "target_reached",
            Self::MaxIterations => "max_iterations",
            Self::Stagnation => "stagnation",
        }
    }

    /// Terminal status this reason maps to
    pub fn status(&self) -> RunStatus {
        match self {
            Self::TargetReached => RunStatus::Completed,
            Self::MaxIterations | Self::Stagnation => RunStatus::Exhausted,
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Complete state of an autonomous run, persisted as `state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier: `{scenario}_{YYYYMMDD_HHMMSS}_{rand8}`
    pub run_id: String,

    /// Scenario tag the run was created under
    pub scenario: String,

    /// Schedule period start
    pub start_date: NaiveDate,

    /// Schedule period end
    pub end_date: NaiveDate,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Iteration tracking
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub status: RunStatus,

    // Best result tracking
    pub best_score: f64,
    pub best_iteration: u32,
    pub best_params: Option<GeneratorParams>,

    // Stopping conditions
    pub target_score: f64,
    pub stagnation_limit: u32,
    pub iterations_since_improvement: u32,

    // RNG state for reproducibility
    pub rng_seed: u64,

    // Current parameters
    pub current_params: GeneratorParams,
}

impl RunState {
    /// Fresh state for a new run
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        scenario: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        max_iterations: u32,
        target_score: f64,
        stagnation_limit: u32,
        rng_seed: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            scenario,
            start_date,
            end_date,
            created_at: now,
            updated_at: now,
            current_iteration: 0,
            max_iterations,
            status: RunStatus::Running,
            best_score: 0.0,
            best_iteration: 0,
            best_params: None,
            target_score,
            stagnation_limit,
            iterations_since_improvement: 0,
            rng_seed,
            current_params: GeneratorParams::default(),
        }
    }

    /// Fold one evaluation into the state
    ///
    /// Advances the iteration counter, updates the monotone best tracker,
    /// and maintains the stagnation counter.
    pub fn update_with_result(&mut self, result: &EvaluationResult, params: &GeneratorParams) {
        self.current_iteration += 1;
        self.updated_at = Utc::now();
        self.current_params = params.clone();

        if result.score > self.best_score {
            self.best_score = result.score;
            self.best_iteration = self.current_iteration;
            self.best_params = Some(params.clone());
            self.iterations_since_improvement = 0;
        } else {
            self.iterations_since_improvement += 1;
        }
    }

    /// Record an iteration that produced nothing to evaluate
    pub fn update_with_failure(&mut self, params: &GeneratorParams) {
        self.current_iteration += 1;
        self.updated_at = Utc::now();
        self.current_params = params.clone();
        self.iterations_since_improvement += 1;
    }

    /// Stopping rules, in precedence order: target reached always wins,
    /// then the iteration cap, then stagnation
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.best_score >= self.target_score {
            return Some(StopReason::TargetReached);
        }
        if self.current_iteration >= self.max_iterations {
            return Some(StopReason::MaxIterations);
        }
        if self.iterations_since_improvement >= self.stagnation_limit {
            return Some(StopReason::Stagnation);
        }
        None
    }
}

// ============================================================================
// Iteration Record
// ============================================================================

/// One line in `history.ndjson`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number, contiguous within a run
    pub iteration: u32,

    pub timestamp: DateTime<Utc>,

    /// Parameters used for this attempt
    pub params: GeneratorParams,

    pub score: f64,
    pub valid: bool,
    pub critical_violations: usize,
    pub total_violations: usize,
    pub violation_types: Vec<String>,
    pub duration_seconds: f64,

    #[serde(default)]
    pub notes: String,
}

impl IterationRecord {
    /// Record a scored attempt
    pub fn from_result(
        iteration: u32,
        params: &GeneratorParams,
        result: &EvaluationResult,
        duration_seconds: f64,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            iteration,
            timestamp: Utc::now(),
            params: params.clone(),
            score: result.score,
            valid: result.valid,
            critical_violations: result.critical_violations,
            total_violations: result.total_violations(),
            violation_types: result.violation_types(),
            duration_seconds,
            notes: notes.into(),
        }
    }

    /// Record an attempt that produced no candidate
    pub fn from_failure(
        iteration: u32,
        params: &GeneratorParams,
        duration_seconds: f64,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            iteration,
            timestamp: Utc::now(),
            params: params.clone(),
            score: 0.0,
            valid: false,
            critical_violations: 0,
            total_violations: 0,
            violation_types: Vec::new(),
            duration_seconds,
            notes: notes.into(),
        }
    }

    /// NDJSON line, no trailing newline
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluationResult;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn state() -> RunState {
        RunState::new(
            "baseline_20250106_120000_abcd1234".to_string(),
            "baseline".to_string(),
            d("2025-01-06"),
            d("2025-02-02"),
            200,
            0.95,
            20,
            42,
        )
    }

    fn result_with_score(score: f64) -> EvaluationResult {
        EvaluationResult {
            score,
            ..EvaluationResult::perfect(10)
        }
    }

    #[test]
    fn test_new_state_is_running() {
        let state = state();
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.current_iteration, 0);
        assert_eq!(state.best_score, 0.0);
        assert!(state.should_stop().is_none());
    }

    #[test]
    fn test_best_score_is_monotone() {
        let mut state = state();
        let params = GeneratorParams::default();

        state.update_with_result(&result_with_score(0.5), &params);
        assert_eq!(state.best_score, 0.5);
        assert_eq!(state.best_iteration, 1);

        // A worse result does not lower the best
        state.update_with_result(&result_with_score(0.3), &params);
        assert_eq!(state.best_score, 0.5);
        assert_eq!(state.best_iteration, 1);
        assert_eq!(state.iterations_since_improvement, 1);

        state.update_with_result(&result_with_score(0.8), &params);
        assert_eq!(state.best_score, 0.8);
        assert_eq!(state.best_iteration, 3);
        assert_eq!(state.iterations_since_improvement, 0);
    }

    #[test]
    fn test_best_iteration_never_exceeds_current() {
        let mut state = state();
        let params = GeneratorParams::default();
        for score in [0.2, 0.4, 0.1, 0.9, 0.3] {
            state.update_with_result(&result_with_score(score), &params);
            assert!(state.best_iteration <= state.current_iteration);
        }
    }

    #[test]
    fn test_should_stop_target_reached_wins() {
        let mut state = state();
        state.best_score = 0.96;
        // Even with stagnation and the cap exceeded, target wins
        state.iterations_since_improvement = 100;
        state.current_iteration = 500;
        assert_eq!(state.should_stop(), Some(StopReason::TargetReached));
    }

    #[test]
    fn test_should_stop_max_iterations() {
        let mut state = state();
        state.current_iteration = 200;
        assert_eq!(state.should_stop(), Some(StopReason::MaxIterations));
    }

    #[test]
    fn test_should_stop_stagnation() {
        let mut state = state();
        state.iterations_since_improvement = 20;
        assert_eq!(state.should_stop(), Some(StopReason::Stagnation));
    }

    #[test]
    fn test_stop_reason_status_mapping() {
        assert_eq!(StopReason::TargetReached.status(), RunStatus::Completed);
        assert_eq!(StopReason::MaxIterations.status(), RunStatus::Exhausted);
        assert_eq!(StopReason::Stagnation.status(), RunStatus::Exhausted);
    }

    #[test]
    fn test_failure_advances_and_stagnates() {
        let mut state = state();
        let params = GeneratorParams::default();
        state.update_with_failure(&params);
        assert_eq!(state.current_iteration, 1);
        assert_eq!(state.iterations_since_improvement, 1);
        assert_eq!(state.best_score, 0.0);
    }

    #[test]
    fn test_iteration_record_roundtrip() {
        let params = GeneratorParams::default();
        let record = IterationRecord::from_result(
            3,
            &params,
            &result_with_score(0.7),
            1.25,
            "steady",
        );

        let line = record.to_ndjson_line().unwrap();
        assert!(!line.contains('\n'));

        let parsed: IterationRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.iteration, 3);
        assert_eq!(parsed.score, 0.7);
        assert_eq!(parsed.notes, "steady");
    }

    #[test]
    fn test_state_json_roundtrip() {
        let state = state();
        let json = serde_json::to_string_pretty(&state).unwrap();
        let parsed: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, state.run_id);
        assert_eq!(parsed.status, RunStatus::Running);
        assert_eq!(parsed.rng_seed, 42);
    }
}
