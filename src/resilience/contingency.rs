//! N−1 / N−2 contingency analysis and cascade simulation
//!
//! Simulates the loss of one person (N−1) or ordered pairs (N−2) and tests
//! whether a feasible schedule still exists for the window. Feasibility is
//! probed two ways: a structural pass over the availability matrix finds
//! blocks nobody could cover, and a short greedy solve confirms an actual
//! schedule can still be constructed. The optional cascade simulation
//! redistributes a failed person's load and reports whether follow-on
//! overloads become likely.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::generator::strategies::{GreedyStrategy, SolverStrategy};
use crate::generator::{GeneratorInputs, GeneratorParams, SolveContext};
use crate::models::{Id, PersonKind};
use crate::utils::CancelToken;

/// Overflow utilization at which a cascade propagates
pub const CASCADE_OVERFLOW_THRESHOLD: f64 = 0.95;

/// Per-probe solver budget
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Reports
// ============================================================================

/// Impact of losing a single person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonLossImpact {
    pub person_id: Id,

    /// Whether a feasible schedule still exists without them
    pub feasible: bool,

    /// Blocks with no remaining eligible resident
    pub uncoverable_blocks: Vec<Id>,

    /// Blocks where this person is the only eligible resident today
    pub unique_provider_blocks: Vec<Id>,
}

/// Full N−1 sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NMinusOneReport {
    pub impacts: Vec<PersonLossImpact>,

    /// Persons whose loss makes the window infeasible
    pub fatal_persons: Vec<Id>,
}

/// A pair whose joint loss makes the window infeasible
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatalPair {
    pub first: Id,
    pub second: Id,
    pub uncoverable_blocks: usize,
}

/// Full N−2 sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NMinusTwoReport {
    pub pairs_checked: usize,
    pub fatal_pairs: Vec<FatalPair>,
}

/// One propagation step of a cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStep {
    pub failed: Id,
    pub utilization_at_failure: f64,
}

/// Result of a cascade simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeReport {
    pub seed: Id,
    pub steps: Vec<CascadeStep>,
    pub cascade_occurred: bool,
    pub survivors: usize,
}

// ============================================================================
// Analyzer
// ============================================================================

/// Configuration for contingency sweeps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContingencyConfig {
    /// Restrict the N−2 pair search to faculty
    pub critical_faculty_only: bool,

    /// Safe blocks-per-person capacity used by the cascade model
    pub safe_blocks_per_person: usize,
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self {
            critical_faculty_only: true,
            safe_blocks_per_person: 40,
        }
    }
}

/// Runs contingency sweeps over a fixed input set
pub struct ContingencyAnalyzer {
    inputs: GeneratorInputs,
    config: ContingencyConfig,
}

impl ContingencyAnalyzer {
    pub fn new(inputs: GeneratorInputs, config: ContingencyConfig) -> Self {
        Self { inputs, config }
    }

    /// N−1: simulate each person's loss and probe feasibility
    pub fn n_minus_1(&self) -> NMinusOneReport {
        let base_ctx = self.context_without(&[]);
        let unique_by_person = self.unique_provider_blocks(&base_ctx);

        let mut impacts = Vec::new();
        let mut fatal_persons = Vec::new();

        for person in &self.inputs.persons {
            let ctx = self.context_without(&[person.id.clone()]);
            let uncoverable = self.uncoverable_blocks(&ctx);
            let feasible = uncoverable.is_empty() && self.probe_solve(&ctx);

            if !feasible {
                fatal_persons.push(person.id.clone());
            }

            impacts.push(PersonLossImpact {
                person_id: person.id.clone(),
                feasible,
                uncoverable_blocks: uncoverable,
                unique_provider_blocks: unique_by_person
                    .get(&person.id)
                    .cloned()
                    .unwrap_or_default(),
            });
        }

        tracing::info!(
            persons = impacts.len(),
            fatal = fatal_persons.len(),
            "N-1 contingency sweep complete"
        );

        NMinusOneReport {
            impacts,
            fatal_persons,
        }
    }

    /// N−2: ordered pairs whose joint loss is fatal
    pub fn n_minus_2(&self) -> NMinusTwoReport {
        let candidates: Vec<Id> = self
            .inputs
            .persons
            .iter()
            .filter(|p| !self.config.critical_faculty_only || p.kind == PersonKind::Faculty)
            .map(|p| p.id.clone())
            .collect();

        let mut pairs_checked = 0;
        let mut fatal_pairs = Vec::new();

        for (i, first) in candidates.iter().enumerate() {
            for second in candidates.iter().skip(i + 1) {
                pairs_checked += 1;
                let ctx = self.context_without(&[first.clone(), second.clone()]);
                let uncoverable = self.uncoverable_blocks(&ctx);

                if !uncoverable.is_empty() || !self.probe_solve(&ctx) {
                    fatal_pairs.push(FatalPair {
                        first: first.clone(),
                        second: second.clone(),
                        uncoverable_blocks: uncoverable.len(),
                    });
                }
            }
        }

        tracing::info!(
            pairs_checked,
            fatal = fatal_pairs.len(),
            "N-2 contingency sweep complete"
        );

        NMinusTwoReport {
            pairs_checked,
            fatal_pairs,
        }
    }

    /// Cascade simulation: fail the seed, redistribute load, and propagate
    /// while any survivor exceeds the overflow threshold
    pub fn simulate_cascade(&self, seed: &Id) -> CascadeReport {
        let mut load: HashMap<Id, f64> = self
            .inputs
            .persons
            .iter()
            .filter(|p| p.is_resident())
            .map(|p| (p.id.clone(), 0.0))
            .collect();

        // Base load: blocks spread across residents by the availability
        // each date offers
        let ctx = self.context_without(&[]);
        for block in &ctx.blocks {
            let available = ctx.available_residents(block.date);
            if available.is_empty() {
                continue;
            }
            let share = 1.0 / available.len() as f64;
            for idx in &available {
                *load.entry(ctx.residents[*idx].id.clone()).or_insert(0.0) += share;
            }
        }

        let capacity = self.config.safe_blocks_per_person as f64;
        let mut failed: HashSet<Id> = HashSet::new();
        let mut steps = Vec::new();
        let mut next_failure = Some(seed.clone());

        while let Some(failing) = next_failure.take() {
            if !load.contains_key(&failing) || failed.contains(&failing) {
                break;
            }

            let shed = load.get(&failing).copied().unwrap_or(0.0);
            failed.insert(failing.clone());
            steps.push(CascadeStep {
                failed: failing.clone(),
                utilization_at_failure: shed / capacity,
            });

            let survivors: Vec<Id> = load
                .keys()
                .filter(|p| !failed.contains(*p))
                .cloned()
                .collect();
            if survivors.is_empty() {
                break;
            }

            // Shed load spreads evenly over survivors
            let share = shed / survivors.len() as f64;
            for person in &survivors {
                *load.get_mut(person).expect("survivor tracked") += share;
            }

            // The most loaded survivor over the threshold fails next
            next_failure = survivors
                .into_iter()
                .max_by(|a, b| {
                    load[a]
                        .partial_cmp(&load[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .filter(|p| load[p] / capacity > CASCADE_OVERFLOW_THRESHOLD);
        }

        let survivors = load.len() - failed.len();
        CascadeReport {
            seed: seed.clone(),
            cascade_occurred: steps.len() > 1,
            steps,
            survivors,
        }
    }

    fn context_without(&self, removed: &[Id]) -> SolveContext {
        let persons: Vec<_> = self
            .inputs
            .persons
            .iter()
            .filter(|p| !removed.contains(&p.id))
            .cloned()
            .collect();
        SolveContext::build(
            &persons,
            &self.inputs.blocks,
            &self.inputs.templates,
            &self.inputs.absences,
        )
    }

    fn uncoverable_blocks(&self, ctx: &SolveContext) -> Vec<Id> {
        ctx.blocks
            .iter()
            .filter(|b| ctx.available_residents(b.date).is_empty())
            .map(|b| b.id.clone())
            .collect()
    }

    /// Blocks where exactly one resident is available, keyed by that
    /// resident
    fn unique_provider_blocks(&self, ctx: &SolveContext) -> HashMap<Id, Vec<Id>> {
        let mut by_person: HashMap<Id, Vec<Id>> = HashMap::new();
        for block in &ctx.blocks {
            let available = ctx.available_residents(block.date);
            if available.len() == 1 {
                by_person
                    .entry(ctx.residents[available[0]].id.clone())
                    .or_default()
                    .push(block.id.clone());
            }
        }
        by_person
    }

    /// Short greedy solve to confirm a schedule can still be constructed
    fn probe_solve(&self, ctx: &SolveContext) -> bool {
        if ctx.residents.is_empty() {
            return ctx.blocks.is_empty();
        }
        let params = GeneratorParams::default();
        let mut rng = ChaCha8Rng::seed_from_u64(params.effective_seed());
        let outcome = GreedyStrategy.solve(
            ctx,
            &params,
            &mut rng,
            Instant::now() + PROBE_TIMEOUT,
            &CancelToken::never(),
        );
        outcome.success
    }
}
