//! Schedule-search strategies behind the generator facade
//!
//! Four strategies share one contract: given a deterministic solve context,
//! parameters, and a seeded RNG, produce an assignment list and statistics.
//! Strategy identity never leaks downstream; the facade dispatches on the
//! closed [`Algorithm`](super::Algorithm) enum.
//!
//! - **Greedy** - least-loaded construction with seeded tie-breaking; also
//!   the fallback when any other strategy fails
//! - **CpSearch** - backtracking search with constraint propagation over
//!   availability, session exclusivity, and 1-in-7 streaks
//! - **Milp** - relaxation-and-rounding: most-constrained-first assignment
//!   on a load-based cost surface, then improvement rounds
//! - **Hybrid** - greedy construction followed by the improvement rounds

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use super::context::SolveContext;
use super::roster::RosterState;
use super::GeneratorParams;
use crate::models::{Assignment, Block, Id};
use crate::utils::CancelToken;

/// Result of one strategy invocation
pub struct SolveOutcome {
    /// Whether construction completed over every coverable block
    pub success: bool,

    /// Constructed assignments (may be partial on failure)
    pub assignments: Vec<Assignment>,

    /// Search nodes / placements examined
    pub attempts: u64,

    /// Objective value, when the strategy computes one
    pub objective: Option<f64>,
}

/// Common contract for all schedule-search strategies
pub trait SolverStrategy: Send + Sync {
    fn solve(
        &self,
        ctx: &SolveContext,
        params: &GeneratorParams,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SolveOutcome;
}

/// Tolerance, in hours, within which candidates count as equally loaded
const TIE_TOLERANCE_HOURS: f64 = 6.0;

/// Node budget for the backtracking search
const CP_MAX_NODES: u64 = 200_000;

/// Improvement rounds for the relaxation strategies
const IMPROVEMENT_ROUNDS: usize = 3;

// ============================================================================
// Template rotation bookkeeping
// ============================================================================

/// Tracks per-(template, date) usage so capacity limits hold
#[derive(Default)]
struct TemplateUsage {
    used: HashMap<(Id, NaiveDate), u32>,
}

impl TemplateUsage {
    /// Pick the least-used template with remaining capacity on `date`
    fn pick(&mut self, ctx: &SolveContext, date: NaiveDate) -> Option<Id> {
        let choice = ctx
            .templates
            .iter()
            .filter(|t| {
                let used = self
                    .used
                    .get(&(t.id.clone(), date))
                    .copied()
                    .unwrap_or(0);
                used < t.max_residents
            })
            .min_by_key(|t| {
                (
                    self.used.get(&(t.id.clone(), date)).copied().unwrap_or(0),
                    t.id.clone(),
                )
            })?;

        let id = choice.id.clone();
        *self.used.entry((id.clone(), date)).or_insert(0) += 1;
        Some(id)
    }
}

/// Hours one block contributes under the given template
fn block_hours(ctx: &SolveContext, template_id: &Option<Id>) -> f64 {
    template_id
        .as_ref()
        .and_then(|id| ctx.templates.iter().find(|t| &t.id == id))
        .map(|t| t.intensity.hours_per_block())
        .unwrap_or(crate::models::Intensity::Standard.hours_per_block())
}

/// Candidate residents for a block: available, not double-booked, streak-safe
fn eligible_residents(ctx: &SolveContext, roster: &RosterState, block: &Block) -> Vec<usize> {
    (0..ctx.residents.len())
        .filter(|idx| {
            ctx.is_available(*idx, block.date)
                && !roster.holds_session(*idx, block)
                && !roster.would_break_one_in_seven(*idx, block.date)
        })
        .collect()
}

/// Blocks that at least one resident could take, ignoring streak limits
fn coverable_blocks(ctx: &SolveContext) -> usize {
    ctx.blocks
        .iter()
        .filter(|b| !ctx.available_residents(b.date).is_empty())
        .count()
}

/// Seeded tie-breaking: choose among candidates within tolerance of the
/// lightest load
fn pick_least_loaded(
    candidates: &[usize],
    hours: &[f64],
    rng: &mut ChaCha8Rng,
) -> Option<usize> {
    let min_hours = candidates
        .iter()
        .map(|idx| hours[*idx])
        .fold(f64::INFINITY, f64::min);

    let tied: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|idx| hours[*idx] <= min_hours + TIE_TOLERANCE_HOURS)
        .collect();

    tied.choose(rng).copied()
}

// ============================================================================
// Greedy
// ============================================================================

/// Least-loaded greedy construction; the universal fallback
pub struct GreedyStrategy;

impl SolverStrategy for GreedyStrategy {
    fn solve(
        &self,
        ctx: &SolveContext,
        _params: &GeneratorParams,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SolveOutcome {
        let mut roster = RosterState::new(ctx);
        let mut templates = TemplateUsage::default();
        let mut attempts = 0u64;
        let mut covered = 0usize;

        for block in &ctx.blocks {
            if Instant::now() >= deadline || cancel.is_cancelled() {
                return SolveOutcome {
                    success: false,
                    assignments: roster.into_assignments(),
                    attempts,
                    objective: None,
                };
            }

            let candidates = eligible_residents(ctx, &roster, block);
            attempts += candidates.len() as u64;

            let Some(resident_idx) = pick_least_loaded(&candidates, &roster.hours, rng) else {
                continue;
            };

            let template_id = templates.pick(ctx, block.date);
            let hours = block_hours(ctx, &template_id);
            roster.record_primary(ctx, resident_idx, block, template_id, hours);
            roster.record_supervisor(ctx, block);
            covered += 1;
        }

        let objective = roster.objective(ctx);
        SolveOutcome {
            success: covered >= coverable_blocks(ctx),
            assignments: roster.into_assignments(),
            attempts,
            objective: Some(objective),
        }
    }
}

// ============================================================================
// CP search
// ============================================================================

/// Backtracking search with constraint propagation
pub struct CpSearchStrategy;

impl SolverStrategy for CpSearchStrategy {
    fn solve(
        &self,
        ctx: &SolveContext,
        _params: &GeneratorParams,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SolveOutcome {
        let mut roster = RosterState::new(ctx);
        let mut templates = TemplateUsage::default();
        let mut attempts = 0u64;

        let complete = Self::search(
            ctx,
            &ctx.blocks,
            0,
            &mut roster,
            &mut templates,
            rng,
            deadline,
            cancel,
            &mut attempts,
        );

        if complete {
            // Supervision is layered on after the primary search settles
            let covered: BTreeSet<Id> = roster
                .assignments
                .iter()
                .filter(|a| a.is_primary())
                .map(|a| a.block_id.clone())
                .collect();
            for block in ctx.blocks.iter().filter(|b| covered.contains(&b.id)) {
                roster.record_supervisor(ctx, block);
            }
        }

        let objective = roster.objective(ctx);
        SolveOutcome {
            success: complete,
            assignments: roster.into_assignments(),
            attempts,
            objective: Some(objective),
        }
    }
}

impl CpSearchStrategy {
    /// Depth-first assignment of blocks; true when every coverable block
    /// from `depth` onward is assigned
    #[allow(clippy::too_many_arguments)]
    fn search(
        ctx: &SolveContext,
        blocks: &[Block],
        depth: usize,
        roster: &mut RosterState,
        templates: &mut TemplateUsage,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
        attempts: &mut u64,
    ) -> bool {
        if depth == blocks.len() {
            return true;
        }
        if *attempts >= CP_MAX_NODES || Instant::now() >= deadline || cancel.is_cancelled() {
            return false;
        }

        let block = &blocks[depth];

        // A block nobody could ever take is skipped, not failed
        if ctx.available_residents(block.date).is_empty() {
            return Self::search(
                ctx, blocks, depth + 1, roster, templates, rng, deadline, cancel, attempts,
            );
        }

        let mut candidates = eligible_residents(ctx, roster, block);
        // Least-loaded first; seeded shuffle breaks ties between restarts
        candidates.shuffle(rng);
        candidates.sort_by(|a, b| {
            roster.hours[*a]
                .partial_cmp(&roster.hours[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for resident_idx in candidates {
            *attempts += 1;

            let template_id = templates.pick(ctx, block.date);
            let hours = block_hours(ctx, &template_id);
            roster.record_primary(ctx, resident_idx, block, template_id, hours);

            if Self::search(
                ctx, blocks, depth + 1, roster, templates, rng, deadline, cancel, attempts,
            ) {
                return true;
            }

            roster.unrecord_last_primary(ctx, block, hours);

            if *attempts >= CP_MAX_NODES || Instant::now() >= deadline {
                return false;
            }
        }

        false
    }
}

// ============================================================================
// MILP relaxation
// ============================================================================

/// Relaxation-and-rounding over a load-based cost surface
pub struct MilpStrategy;

impl SolverStrategy for MilpStrategy {
    fn solve(
        &self,
        ctx: &SolveContext,
        params: &GeneratorParams,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SolveOutcome {
        // Most-constrained blocks first approximates the LP's tight rows
        let mut order: Vec<Block> = ctx.blocks.clone();
        order.sort_by_key(|b| {
            (
                ctx.available_residents(b.date).len(),
                b.date,
                b.session,
                b.block_number,
            )
        });

        let mut roster = RosterState::new(ctx);
        let mut templates = TemplateUsage::default();
        let mut attempts = 0u64;
        let mut covered = 0usize;
        let weekend_penalty = params
            .solver_params
            .get("weekend_penalty")
            .copied()
            .unwrap_or(2.0);

        for block in &order {
            if Instant::now() >= deadline || cancel.is_cancelled() {
                return SolveOutcome {
                    success: false,
                    assignments: roster.into_assignments(),
                    attempts,
                    objective: None,
                };
            }

            let candidates = eligible_residents(ctx, &roster, block);
            attempts += candidates.len() as u64;

            // Reduced cost: accumulated hours plus a weekend surcharge,
            // with a seeded epsilon to vary rounding between restarts
            let chosen = candidates
                .iter()
                .map(|idx| {
                    let mut cost = roster.hours[*idx];
                    if block.is_weekend {
                        cost += weekend_penalty;
                    }
                    cost += rng.gen_range(0.0..0.001);
                    (*idx, cost)
                })
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(idx, _)| idx);

            let Some(resident_idx) = chosen else {
                continue;
            };

            let template_id = templates.pick(ctx, block.date);
            let hours = block_hours(ctx, &template_id);
            roster.record_primary(ctx, resident_idx, block, template_id, hours);
            roster.record_supervisor(ctx, block);
            covered += 1;
        }

        let mut assignments = roster.into_assignments();
        attempts += improve_balance(ctx, &mut assignments, deadline);

        let success = covered >= coverable_blocks(ctx);
        SolveOutcome {
            success,
            objective: Some(objective_of(ctx, &assignments)),
            assignments,
            attempts,
        }
    }
}

// ============================================================================
// Hybrid
// ============================================================================

/// Greedy construction refined by the improvement rounds
pub struct HybridStrategy;

impl SolverStrategy for HybridStrategy {
    fn solve(
        &self,
        ctx: &SolveContext,
        params: &GeneratorParams,
        rng: &mut ChaCha8Rng,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> SolveOutcome {
        let mut outcome = GreedyStrategy.solve(ctx, params, rng, deadline, cancel);
        if !outcome.success {
            return outcome;
        }

        outcome.attempts += improve_balance(ctx, &mut outcome.assignments, deadline);
        outcome.objective = Some(objective_of(ctx, &outcome.assignments));
        outcome
    }
}

// ============================================================================
// Improvement rounds
// ============================================================================

/// Move primary blocks from the most- to the least-loaded resident when the
/// move respects availability, sessions, and streaks. Returns placements
/// examined.
fn improve_balance(ctx: &SolveContext, assignments: &mut [Assignment], deadline: Instant) -> u64 {
    let mut attempts = 0u64;

    let resident_index: HashMap<&Id, usize> = ctx
        .residents
        .iter()
        .enumerate()
        .map(|(i, r)| (&r.id, i))
        .collect();
    let block_by_id: HashMap<&Id, &Block> = ctx.blocks.iter().map(|b| (&b.id, b)).collect();

    for _ in 0..IMPROVEMENT_ROUNDS {
        if Instant::now() >= deadline {
            break;
        }

        // Rebuild load and occupancy views
        let mut hours = vec![0.0f64; ctx.residents.len()];
        let mut sessions: Vec<BTreeSet<(NaiveDate, crate::models::Session)>> =
            vec![BTreeSet::new(); ctx.residents.len()];
        let mut dates: Vec<BTreeSet<NaiveDate>> = vec![BTreeSet::new(); ctx.residents.len()];

        for assignment in assignments.iter().filter(|a| a.is_primary()) {
            let (Some(r), Some(block)) = (
                resident_index.get(&assignment.person_id),
                block_by_id.get(&assignment.block_id),
            ) else {
                continue;
            };
            hours[*r] += block_hours(ctx, &assignment.rotation_template_id);
            sessions[*r].insert((block.date, block.session));
            dates[*r].insert(block.date);
        }

        let Some((max_idx, _)) = hours
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };
        let Some((min_idx, _)) = hours
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        else {
            break;
        };

        if max_idx == min_idx {
            break;
        }

        let mut moved = false;
        for assignment in assignments.iter_mut().filter(|a| a.is_primary()) {
            attempts += 1;
            if resident_index.get(&assignment.person_id) != Some(&max_idx) {
                continue;
            }
            let Some(block) = block_by_id.get(&assignment.block_id) else {
                continue;
            };
            let gain = hours[max_idx] - hours[min_idx];
            let move_hours = block_hours(ctx, &assignment.rotation_template_id);
            if gain <= move_hours {
                continue;
            }
            if !ctx.is_available(min_idx, block.date)
                || sessions[min_idx].contains(&(block.date, block.session))
                || streak_with(&dates[min_idx], block.date) >= 7
            {
                continue;
            }

            assignment.person_id = ctx.residents[min_idx].id.clone();
            moved = true;
            break;
        }

        if !moved {
            break;
        }
    }

    attempts
}

/// Contiguous streak length the date would join in the given date set
fn streak_with(dates: &BTreeSet<NaiveDate>, date: NaiveDate) -> i64 {
    let mut streak = 1;
    let mut cursor = date - chrono::Duration::days(1);
    while dates.contains(&cursor) {
        streak += 1;
        cursor -= chrono::Duration::days(1);
    }
    cursor = date + chrono::Duration::days(1);
    while dates.contains(&cursor) {
        streak += 1;
        cursor += chrono::Duration::days(1);
    }
    streak
}

/// Coverage-minus-imbalance objective over a finished assignment list
fn objective_of(ctx: &SolveContext, assignments: &[Assignment]) -> f64 {
    if ctx.blocks.is_empty() {
        return 1.0;
    }

    let covered: BTreeSet<&Id> = assignments
        .iter()
        .filter(|a| a.is_primary())
        .map(|a| &a.block_id)
        .collect();
    let coverage = covered.len() as f64 / ctx.blocks.len() as f64;

    let mut hours: HashMap<&Id, f64> = HashMap::new();
    for assignment in assignments.iter().filter(|a| a.is_primary()) {
        *hours.entry(&assignment.person_id).or_insert(0.0) +=
            block_hours(ctx, &assignment.rotation_template_id);
    }
    let imbalance = match (
        hours.values().cloned().fold(f64::INFINITY, f64::min),
        hours.values().cloned().fold(f64::NEG_INFINITY, f64::max),
    ) {
        (min, max) if min.is_finite() && max > 0.0 => (max - min) / max,
        _ => 0.0,
    };

    coverage - 0.1 * imbalance
}
