//! The autonomous control loop
//!
//! One run is one sequential loop: select parameters, generate a candidate,
//! evaluate it, persist the attempt, decide what to do next. The loop owns
//! no global state; everything it needs arrives by injection. Concurrency
//! with the outside world is limited to reading resilience recommendations
//! and writing its own run directory.
//!
//! Stopping rules live in `RunState::should_stop`; the loop maps them to
//! terminal statuses. Three consecutive iteration errors fail the run.
//! Cancellation is cooperative: the loop checks its token each iteration,
//! writes a final cancelled state, and flushes history.

use chrono::Utc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{ConstraintEngine, EvaluationPeriod, MoonlightingHours, ValidationContext};
use crate::evaluator::EvaluationResult;
use crate::generator::{Algorithm, Candidate, CandidateGenerator, GeneratorParams};
use crate::resilience::{EscapeStrategy, MetastabilityDetector, SolverState};
use crate::utils::CancelToken;

use super::state::{IterationRecord, RunState, RunStatus};
use super::store::RunStore;

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the control loop
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Consult the metastability detector every N iterations
    pub metastability_check_interval: u32,

    /// Diversify when stagnation hits a multiple of this
    pub diversify_interval: u32,

    /// Consecutive iteration errors before the run fails
    pub consecutive_error_limit: u32,

    /// Preferred algorithm order; the head seeds the first iteration
    pub preferred_algorithms: Vec<Algorithm>,

    /// Optional wall-clock ceiling for the whole run
    pub global_timeout: Option<Duration>,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            metastability_check_interval: crate::resilience::DEFAULT_CHECK_INTERVAL,
            diversify_interval: 5,
            consecutive_error_limit: 3,
            preferred_algorithms: Algorithm::all(),
            global_timeout: None,
        }
    }
}

// ============================================================================
// Control Loop
// ============================================================================

/// Iteration driver for one run
pub struct ControlLoop<'a> {
    store: &'a RunStore,
    generator: &'a CandidateGenerator,
    engine: ConstraintEngine,
    detector: MetastabilityDetector,
    config: ControlLoopConfig,
    moonlighting: MoonlightingHours,
    cancel: CancelToken,
}

impl<'a> ControlLoop<'a> {
    pub fn new(
        store: &'a RunStore,
        generator: &'a CandidateGenerator,
        config: ControlLoopConfig,
    ) -> Self {
        Self {
            store,
            generator,
            engine: ConstraintEngine::new(),
            detector: MetastabilityDetector::default(),
            config,
            moonlighting: MoonlightingHours::new(),
            cancel: CancelToken::never(),
        }
    }

    /// Supply externally reported moonlighting hours
    pub fn with_moonlighting(mut self, moonlighting: MoonlightingHours) -> Self {
        self.moonlighting = moonlighting;
        self
    }

    /// Propagate a cancellation token from the run root
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the metastability detector
    pub fn with_detector(mut self, detector: MetastabilityDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Drive the run to a terminal status
    pub fn run(&self, state: &mut RunState) -> crate::error::Result<RunStatus> {
        let period = EvaluationPeriod::new(state.start_date, state.end_date)?;
        let run_started = Instant::now();
        let mut trajectory: Vec<SolverState> = Vec::new();
        let mut recommendation: Option<EscapeStrategy> = None;
        let mut consecutive_errors = 0u32;

        self.store
            .log(&state.run_id, &format!("loop started (status {})", state.status.as_str()))?;

        while state.status == RunStatus::Running {
            if self.cancel.is_cancelled() {
                state.status = RunStatus::Cancelled;
                self.store.save_state(state)?;
                self.store.log(&state.run_id, "run cancelled")?;
                break;
            }

            if let Some(timeout) = self.config.global_timeout {
                if run_started.elapsed() >= timeout {
                    state.status = RunStatus::Exhausted;
                    self.store.save_state(state)?;
                    self.store.log(
                        &state.run_id,
                        &format!("global timeout after {:.1}s", timeout.as_secs_f64()),
                    )?;
                    break;
                }
            }

            if let Some(reason) = state.should_stop() {
                state.status = reason.status();
                self.store.save_state(state)?;
                self.store.log(
                    &state.run_id,
                    &format!("stopping: {} (best {:.4})", reason.as_str(), state.best_score),
                )?;
                break;
            }

            let params = self.select_params(state, recommendation.take());
            let started = Instant::now();

            match self.generator.generate_single(&params) {
                Err(e) => {
                    consecutive_errors += 1;
                    state.update_with_failure(&params);
                    let record = IterationRecord::from_failure(
                        state.current_iteration,
                        &params,
                        started.elapsed().as_secs_f64(),
                        format!("error: {e}"),
                    );
                    self.store.append_iteration(&state.run_id, &record)?;
                    self.store.save_state(state)?;
                    trajectory.push(SolverState::new(state.current_iteration, 0.0, 0));

                    tracing::warn!(
                        run_id = %state.run_id,
                        iteration = state.current_iteration,
                        consecutive = consecutive_errors,
                        error = %e,
                        "iteration error"
                    );

                    if consecutive_errors >= self.config.consecutive_error_limit {
                        state.status = RunStatus::Failed;
                        self.store.save_state(state)?;
                        self.store.log(
                            &state.run_id,
                            &format!("run failed after {consecutive_errors} consecutive errors"),
                        )?;
                        break;
                    }
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    state.update_with_failure(&params);
                    let record = IterationRecord::from_failure(
                        state.current_iteration,
                        &params,
                        started.elapsed().as_secs_f64(),
                        "generator_null",
                    );
                    self.store.append_iteration(&state.run_id, &record)?;
                    self.store.save_state(state)?;
                    trajectory.push(SolverState::new(state.current_iteration, 0.0, 0));
                }
                Ok(Some(candidate)) => {
                    consecutive_errors = 0;
                    let result = self.evaluate(&candidate, period);
                    let improved = result.score > state.best_score;
                    state.update_with_result(&result, &params);

                    let record = IterationRecord::from_result(
                        state.current_iteration,
                        &params,
                        &result,
                        started.elapsed().as_secs_f64(),
                        if improved { "improved" } else { "" },
                    );
                    self.store.append_iteration(&state.run_id, &record)?;

                    if improved {
                        self.store
                            .save_schedule(&state.run_id, &candidate.assignment_rows())?;
                        self.store.save_report(&state.run_id, &result)?;
                        self.store.log(
                            &state.run_id,
                            &format!(
                                "iteration {}: new best {:.4} ({})",
                                state.current_iteration,
                                result.score,
                                candidate.algorithm
                            ),
                        )?;
                    }

                    self.store.save_state(state)?;
                    trajectory.push(SolverState::new(
                        state.current_iteration,
                        result.score,
                        result.total_violations(),
                    ));
                }
            }

            // Periodic resilience consult
            if self.config.metastability_check_interval > 0
                && state.current_iteration > 0
                && state.current_iteration % self.config.metastability_check_interval == 0
            {
                let analysis = self.detector.analyze(&trajectory);
                if analysis.is_metastable {
                    self.store.log(
                        &state.run_id,
                        &format!(
                            "metastability detected (confidence {:.2}): {}",
                            analysis.confidence,
                            analysis.recommended_strategy.as_str()
                        ),
                    )?;
                    recommendation = Some(analysis.recommended_strategy);
                }
            }
        }

        Ok(state.status)
    }

    /// Parameter selection strategy
    ///
    /// First iteration takes defaults with the head of the preference list.
    /// Resilience recommendations take precedence; otherwise stagnation at a
    /// multiple of the diversify interval triggers a reseeded restart, and
    /// the steady path keeps the algorithm with an incremented seed.
    pub fn select_params(
        &self,
        state: &RunState,
        recommendation: Option<EscapeStrategy>,
    ) -> GeneratorParams {
        if state.current_iteration == 0 {
            let algorithm = self
                .config
                .preferred_algorithms
                .first()
                .copied()
                .unwrap_or(Algorithm::Greedy);
            let mut params = GeneratorParams::for_algorithm(algorithm);
            params.random_seed = Some(state.rng_seed);
            return params;
        }

        let current = &state.current_params;
        let diversified_seed =
            state.rng_seed + (state.current_iteration as u64 + 1) * 1009;

        match recommendation {
            Some(EscapeStrategy::IncreaseTemperature) => {
                let mut params = current.with_seed(diversified_seed);
                params.diversification_factor =
                    (current.diversification_factor + 0.2).min(1.0);
                params
            }
            Some(EscapeStrategy::RestartNewSeed) => current.with_seed(diversified_seed),
            Some(EscapeStrategy::BasinHopping) => {
                let mut params = current.with_seed(diversified_seed);
                params.diversification_factor = 1.0;
                params
            }
            Some(EscapeStrategy::AcceptLocalOptimum) | Some(EscapeStrategy::ContinueSearch) | None => {
                if state.iterations_since_improvement > 0
                    && state.iterations_since_improvement % self.config.diversify_interval == 0
                {
                    current.with_seed(diversified_seed)
                } else {
                    current.with_seed(current.effective_seed() + 1)
                }
            }
        }
    }

    /// Evaluate one candidate against the constraint engine
    pub fn evaluate(&self, candidate: &Candidate, period: EvaluationPeriod) -> EvaluationResult {
        let inputs = self.generator.inputs();
        let ctx = ValidationContext::new(
            &inputs.persons,
            &inputs.blocks,
            &inputs.templates,
            &candidate.assignments,
            &inputs.absences,
            &[],
            &self.moonlighting,
        );
        self.engine.validate(period, &ctx, Utc::now().date_naive())
    }

    /// Evaluate many candidates on a worker pool sized to
    /// `min(k, available_parallelism)`; results keep candidate order
    pub fn evaluate_candidates(
        &self,
        candidates: &[Candidate],
        period: EvaluationPeriod,
    ) -> Vec<EvaluationResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let workers = candidates
            .len()
            .min(thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        if workers <= 1 {
            return candidates
                .iter()
                .map(|c| self.evaluate(c, period))
                .collect();
        }

        let (tx, rx) = mpsc::channel::<(usize, EvaluationResult)>();
        thread::scope(|scope| {
            for worker in 0..workers {
                let tx = tx.clone();
                let this = &*self;
                scope.spawn(move || {
                    for (idx, candidate) in candidates
                        .iter()
                        .enumerate()
                        .skip(worker)
                        .step_by(workers)
                    {
                        let result = this.evaluate(candidate, period);
                        let _ = tx.send((idx, result));
                    }
                });
            }
        });
        drop(tx);

        let mut indexed: Vec<(usize, EvaluationResult)> = rx.iter().collect();
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
