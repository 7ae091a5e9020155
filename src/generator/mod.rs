//! Candidate generator: unified facade over the schedule-search strategies
//!
//! The control loop speaks to one interface regardless of which search
//! strategy runs underneath. Strategy selection happens on the closed
//! [`Algorithm`] enum; unknown names fail at the boundary, never at solve
//! time, and algorithm identity does not leak into downstream components.
//!
//! # Operations
//!
//! - [`CandidateGenerator::generate_single`] - one attempt at the requested
//!   algorithm, with greedy fallback inside the remaining budget
//! - [`CandidateGenerator::generate_k`] - distinct algorithms from the
//!   configured preference list
//! - [`CandidateGenerator::generate_with_restart`] - seeded restarts with a
//!   divided timeout
//! - [`CandidateGenerator::generate_with_perturbation`] - random person or
//!   block replacement on an existing candidate
//!
//! # Determinism
//!
//! Identical inputs and an identical RNG seed produce identical candidates.
//! The ChaCha8 RNG is created locally per call and never drawn from a
//! global source.

pub mod context;
pub mod roster;
pub mod strategies;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::GeneratorError;
use crate::models::{Absence, Assignment, Block, Person, RotationTemplate};
use crate::utils::CancelToken;

pub use context::{AssignmentFactory, SolveContext};
pub use strategies::{SolveOutcome, SolverStrategy};

use strategies::{CpSearchStrategy, GreedyStrategy, HybridStrategy, MilpStrategy};

/// Seed used when the caller does not pin one
pub const DEFAULT_SEED: u64 = 42;

// ============================================================================
// Algorithm
// ============================================================================

/// Closed set of schedule-search strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Greedy,
    CpSearch,
    Milp,
    Hybrid,
}

impl Algorithm {
    /// External names, in default preference order
    pub fn all() -> Vec<Self> {
        vec![Self::Greedy, Self::CpSearch, Self::Milp, Self::Hybrid]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::CpSearch => "cp_search",
            Self::Milp => "milp",
            Self::Hybrid => "hybrid",
        }
    }

    /// Dispatch table: every variant maps to a stateless strategy value
    fn strategy(&self) -> &'static dyn SolverStrategy {
        match self {
            Self::Greedy => &GreedyStrategy,
            Self::CpSearch => &CpSearchStrategy,
            Self::Milp => &MilpStrategy,
            Self::Hybrid => &HybridStrategy,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "greedy" => Ok(Self::Greedy),
            "cp_search" | "cp-search" | "cpsat" | "cp_sat" => Ok(Self::CpSearch),
            "milp" => Ok(Self::Milp),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(GeneratorError::UnknownAlgorithm(other.to_string())),
        }
    }
}

// ============================================================================
// Generator Parameters
// ============================================================================

/// Knobs the control loop can turn between iterations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorParams {
    /// Strategy to run
    pub algorithm: Algorithm,

    /// Solver timeout in seconds
    pub timeout_seconds: f64,

    /// RNG seed; `None` falls back to [`DEFAULT_SEED`]
    pub random_seed: Option<u64>,

    /// Strategy-specific numeric parameters
    #[serde(default)]
    pub solver_params: HashMap<String, f64>,

    /// Constraint weight overrides
    #[serde(default)]
    pub constraint_weights: HashMap<String, f64>,

    /// Restarts budgeted for this parameter set
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Neighborhood size for local-search moves
    #[serde(default = "default_neighborhood")]
    pub neighborhood_size: u32,

    /// Diversification pressure in [0, 1]
    #[serde(default)]
    pub diversification_factor: f64,
}

fn default_max_restarts() -> u32 {
    1
}

fn default_neighborhood() -> u32 {
    10
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Greedy,
            timeout_seconds: 60.0,
            random_seed: None,
            solver_params: HashMap::new(),
            constraint_weights: HashMap::new(),
            max_restarts: default_max_restarts(),
            neighborhood_size: default_neighborhood(),
            diversification_factor: 0.0,
        }
    }
}

impl GeneratorParams {
    /// Params for a specific algorithm with defaults elsewhere
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    /// The effective seed after defaulting
    pub fn effective_seed(&self) -> u64 {
        self.random_seed.unwrap_or(DEFAULT_SEED)
    }

    /// Copy with a different seed
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            random_seed: Some(seed),
            ..self.clone()
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// Statistics from one strategy invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    /// Search nodes / placements examined
    pub attempts: u64,

    /// Restart index this candidate came from, when applicable
    pub restart_index: Option<u32>,

    /// Whether the greedy fallback produced this candidate
    pub fallback_used: bool,

    /// Perturbation rate, when this candidate was perturbed from another
    pub perturbation_rate: Option<f64>,
}

/// One generated schedule attempt, ephemeral until persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Ordered assignment set
    pub assignments: Vec<Assignment>,

    /// Strategy that actually produced the assignments
    pub algorithm: Algorithm,

    /// Parameters used
    pub params: GeneratorParams,

    /// Solver statistics
    pub solver_stats: SolverStats,

    /// Wall-clock generation time in seconds
    pub generation_time: f64,

    /// Whether construction completed; a perturbed candidate is marked
    /// feasible even though it is not guaranteed constraint-clean
    pub feasible: bool,

    /// Objective value, when the strategy computed one
    pub objective_value: Option<f64>,
}

impl Candidate {
    /// Serializable (block, person, rotation, role) rows for schedule.json
    pub fn assignment_rows(&self) -> Vec<serde_json::Value> {
        self.assignments
            .iter()
            .map(|a| {
                serde_json::json!({
                    "block_id": a.block_id.as_str(),
                    "person_id": a.person_id.as_str(),
                    "rotation_template_id": a.rotation_template_id.as_ref().map(|id| id.as_str()),
                    "role": a.role.as_str(),
                })
            })
            .collect()
    }
}

// ============================================================================
// Generator Configuration
// ============================================================================

/// Configuration for the candidate generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Algorithms in preference order, used by `generate_k`
    pub algorithms: Vec<Algorithm>,

    /// Default solver timeout in seconds
    pub default_timeout: f64,

    /// Whether to fall back to greedy on failure
    pub allow_fallback: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            algorithms: Algorithm::all(),
            default_timeout: 60.0,
            allow_fallback: true,
        }
    }
}

/// Raw inputs for a generation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorInputs {
    pub persons: Vec<Person>,
    pub blocks: Vec<Block>,
    pub templates: Vec<RotationTemplate>,
    pub absences: Vec<Absence>,
}

// ============================================================================
// Candidate Generator
// ============================================================================

/// Unified interface to the strategy stack
pub struct CandidateGenerator {
    config: GeneratorConfig,
    inputs: GeneratorInputs,
    ctx: SolveContext,
    cancel: CancelToken,
}

impl CandidateGenerator {
    /// Build a generator over fixed inputs; the solve context is prepared
    /// once and shared across calls
    pub fn new(inputs: GeneratorInputs, config: GeneratorConfig) -> Self {
        let ctx = SolveContext::build(
            &inputs.persons,
            &inputs.blocks,
            &inputs.templates,
            &inputs.absences,
        );
        Self {
            config,
            inputs,
            ctx,
            cancel: CancelToken::never(),
        }
    }

    /// Propagate a cancellation token from the run root
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Generate a single candidate, or `None` when no strategy (including
    /// the greedy fallback) completes
    pub fn generate_single(
        &self,
        params: &GeneratorParams,
    ) -> Result<Option<Candidate>, GeneratorError> {
        self.check_inputs()?;

        let started = Instant::now();
        let deadline = started + Duration::from_secs_f64(params.timeout_seconds.max(0.0));
        let mut rng = ChaCha8Rng::seed_from_u64(params.effective_seed());

        let mut outcome =
            params
                .algorithm
                .strategy()
                .solve(&self.ctx, params, &mut rng, deadline, &self.cancel);
        let mut algorithm = params.algorithm;
        let mut fallback_used = false;

        if !outcome.success && self.config.allow_fallback && params.algorithm != Algorithm::Greedy
        {
            tracing::debug!(
                algorithm = %params.algorithm,
                "strategy failed, retrying with greedy fallback"
            );
            outcome = GreedyStrategy.solve(&self.ctx, params, &mut rng, deadline, &self.cancel);
            algorithm = Algorithm::Greedy;
            fallback_used = true;
        }

        if !outcome.success {
            tracing::warn!(
                algorithm = %params.algorithm,
                attempts = outcome.attempts,
                "candidate generation failed"
            );
            return Ok(None);
        }

        Ok(Some(Candidate {
            assignments: outcome.assignments,
            algorithm,
            params: params.clone(),
            solver_stats: SolverStats {
                attempts: outcome.attempts,
                restart_index: None,
                fallback_used,
                perturbation_rate: None,
            },
            generation_time: started.elapsed().as_secs_f64(),
            feasible: true,
            objective_value: outcome.objective,
        }))
    }

    /// Generate up to `k` candidates using distinct algorithms from the
    /// preference list; `k = 1` is a single attempt at the requested one
    pub fn generate_k(
        &self,
        params: &GeneratorParams,
        k: usize,
    ) -> Result<Vec<Candidate>, GeneratorError> {
        if k <= 1 {
            return Ok(self.generate_single(params)?.into_iter().collect());
        }

        let mut candidates = Vec::new();
        for algorithm in self.config.algorithms.iter().take(k) {
            let algo_params = GeneratorParams {
                algorithm: *algorithm,
                ..params.clone()
            };
            if let Some(candidate) = self.generate_single(&algo_params)? {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// Seeded restarts: seeds `base + 0..n`, each with `timeout / n`
    pub fn generate_with_restart(
        &self,
        base_params: &GeneratorParams,
        num_restarts: u32,
    ) -> Result<Vec<Candidate>, GeneratorError> {
        let num_restarts = num_restarts.max(1);
        let base_seed = base_params.effective_seed();
        let timeout = base_params.timeout_seconds / num_restarts as f64;

        let mut candidates = Vec::new();
        for i in 0..num_restarts {
            let params = GeneratorParams {
                timeout_seconds: timeout,
                random_seed: Some(base_seed + i as u64),
                ..base_params.clone()
            };
            if let Some(mut candidate) = self.generate_single(&params)? {
                candidate.solver_stats.restart_index = Some(i);
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// Perturb an existing candidate: replace ⌈rate·n⌉ assignments by
    /// swapping either the person or the block uniformly at random
    ///
    /// The result is not guaranteed constraint-clean; `feasible` here means
    /// construction completed.
    pub fn generate_with_perturbation(
        &self,
        base: &Candidate,
        perturbation_rate: f64,
    ) -> Result<Option<Candidate>, GeneratorError> {
        if !(0.0..=1.0).contains(&perturbation_rate) || perturbation_rate == 0.0 {
            return Err(GeneratorError::InvalidPerturbationRate(perturbation_rate));
        }
        if self.ctx.residents.is_empty() || self.ctx.blocks.is_empty() {
            return Ok(None);
        }

        let mut assignments = base.assignments.clone();
        if assignments.is_empty() {
            return Ok(None);
        }

        let num_to_perturb =
            ((assignments.len() as f64 * perturbation_rate).ceil() as usize).max(1);
        let mut rng = ChaCha8Rng::seed_from_u64(base.params.effective_seed().wrapping_add(1));

        for _ in 0..num_to_perturb {
            let idx = rng.gen_range(0..assignments.len());

            if rng.gen_bool(0.5) {
                let resident = &self.ctx.residents[rng.gen_range(0..self.ctx.residents.len())];
                assignments[idx].person_id = resident.id.clone();
            } else {
                let block = &self.ctx.blocks[rng.gen_range(0..self.ctx.blocks.len())];
                assignments[idx].block_id = block.id.clone();
            }
        }

        Ok(Some(Candidate {
            assignments,
            algorithm: base.algorithm,
            params: base.params.clone(),
            solver_stats: SolverStats {
                attempts: num_to_perturb as u64,
                restart_index: None,
                fallback_used: false,
                perturbation_rate: Some(perturbation_rate),
            },
            generation_time: 0.0,
            feasible: true,
            objective_value: None,
        }))
    }

    /// Borrow the prepared solve context
    pub fn context(&self) -> &SolveContext {
        &self.ctx
    }

    /// Borrow the raw inputs
    pub fn inputs(&self) -> &GeneratorInputs {
        &self.inputs
    }

    fn check_inputs(&self) -> Result<(), GeneratorError> {
        let (start, end) = self.period_bounds();
        if self.ctx.residents.is_empty() {
            return Err(GeneratorError::NoResidents { start, end });
        }
        if self.ctx.blocks.is_empty() {
            return Err(GeneratorError::NoBlocks { start, end });
        }
        Ok(())
    }

    fn period_bounds(&self) -> (String, String) {
        let start = self
            .ctx
            .blocks
            .first()
            .map(|b| b.date.to_string())
            .unwrap_or_else(|| "?".to_string());
        let end = self
            .ctx
            .blocks
            .last()
            .map(|b| b.date.to_string())
            .unwrap_or_else(|| "?".to_string());
        (start, end)
    }
}
