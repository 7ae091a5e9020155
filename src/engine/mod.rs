//! Constraint engine: pure, composable schedule validators
//!
//! The engine runs a fixed pipeline of stateless validators over a scored
//! assignment set and merges their findings. Validators never mutate state
//! and carry no interior mutability, so the engine is `Send + Sync` and may
//! be invoked in parallel across candidates.
//!
//! # Pipeline order
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  ConstraintEngine                    │
//! │  1. structural    duplicate primary (block, person)  │
//! │  2. duty hours    80h / 24+4 / rest / 1-in-7         │
//! │  3. supervision   PGY ratios per block               │
//! │  4. leave         blocking absences + recovery       │
//! └──────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//!                EvaluationResult (scored)
//! ```
//!
//! # Modules
//!
//! - [`violation`] - Violation, severity, and warning types
//! - [`duty_hours`] - Rolling-window and shift-length rules
//! - [`supervision`] - Per-block supervision ratios
//! - [`leave`] - Absence blocking and recovery windows
//! - [`swap_rules`] - Swap request, rollback, and equity rules
//!
//! The swap rule set is deliberately not part of the candidate pipeline:
//! its checks run when a swap is requested, executed, or rolled back, and
//! the mutation engine drives them at those points.

pub mod duty_hours;
pub mod leave;
pub mod supervision;
pub mod swap_rules;
pub mod violation;

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::evaluator::{EvaluationResult, Evaluator};
use crate::models::{Absence, Assignment, Block, Id, Person, RotationTemplate, Swap};

pub use duty_hours::DutyHourValidator;
pub use leave::LeaveValidator;
pub use supervision::SupervisionValidator;
pub use swap_rules::SwapValidator;
pub use violation::{EngineWarning, HourAlertLevel, RuleKind, Severity, Violation, WarningKind};

/// Externally supplied moonlighting hours: person → date → hours
pub type MoonlightingHours = HashMap<Id, HashMap<NaiveDate, f64>>;

// ============================================================================
// Evaluation Period
// ============================================================================

/// Inclusive date range being scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EvaluationPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl EvaluationPeriod {
    /// Create a period, rejecting inverted ranges
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, ValidationError> {
        if start_date > end_date {
            return Err(ValidationError::InvalidDateRange {
                start: start_date.to_string(),
                end: end_date.to_string(),
            });
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Inclusive length in days
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

// ============================================================================
// Validation Context
// ============================================================================

/// Borrowed view of everything the validators need, with index maps for
/// O(1) entity lookup
pub struct ValidationContext<'a> {
    pub persons: &'a [Person],
    pub blocks: &'a [Block],
    pub templates: &'a [RotationTemplate],
    pub assignments: &'a [Assignment],
    pub absences: &'a [Absence],

    /// Swaps visible to the scored period. Carried for swap-rule checks
    /// driven by the mutation engine at request/execution time; candidate
    /// scoring does not consult them.
    pub swaps: &'a [Swap],

    pub moonlighting: &'a MoonlightingHours,

    person_index: HashMap<&'a Id, usize>,
    block_index: HashMap<&'a Id, usize>,
    template_index: HashMap<&'a Id, usize>,
}

impl<'a> ValidationContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persons: &'a [Person],
        blocks: &'a [Block],
        templates: &'a [RotationTemplate],
        assignments: &'a [Assignment],
        absences: &'a [Absence],
        swaps: &'a [Swap],
        moonlighting: &'a MoonlightingHours,
    ) -> Self {
        let person_index = persons.iter().enumerate().map(|(i, p)| (&p.id, i)).collect();
        let block_index = blocks.iter().enumerate().map(|(i, b)| (&b.id, i)).collect();
        let template_index = templates
            .iter()
            .enumerate()
            .map(|(i, t)| (&t.id, i))
            .collect();

        Self {
            persons,
            blocks,
            templates,
            assignments,
            absences,
            swaps,
            moonlighting,
            person_index,
            block_index,
            template_index,
        }
    }

    pub fn person(&self, id: &Id) -> Option<&'a Person> {
        self.person_index.get(id).map(|i| &self.persons[*i])
    }

    pub fn block(&self, id: &Id) -> Option<&'a Block> {
        self.block_index.get(id).map(|i| &self.blocks[*i])
    }

    pub fn template(&self, id: &Id) -> Option<&'a RotationTemplate> {
        self.template_index.get(id).map(|i| &self.templates[*i])
    }

    /// Duty hours one assignment contributes, from rotation intensity.
    /// Assignments without a resolvable template count as standard sessions.
    pub fn assignment_hours(&self, assignment: &Assignment) -> f64 {
        assignment
            .rotation_template_id
            .as_ref()
            .and_then(|id| self.template(id))
            .map(|t| t.intensity.hours_per_block())
            .unwrap_or(crate::models::Intensity::Standard.hours_per_block())
    }

    /// Count of primary assignments in the context
    pub fn primary_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_primary()).count()
    }
}

// ============================================================================
// Constraint Engine
// ============================================================================

/// Composable validation pipeline over an assignment set
///
/// Validator order is fixed and declared here; see the module docs.
#[derive(Debug, Clone, Default)]
pub struct ConstraintEngine {
    duty_hours: DutyHourValidator,
    supervision: SupervisionValidator,
    leave: LeaveValidator,
    swap_rules: SwapValidator,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an assignment set and score it
    ///
    /// This is the engine's single public entry point: it runs every
    /// validator in declared order, merges violations and warnings, and
    /// hands them to the evaluator.
    pub fn validate(
        &self,
        period: EvaluationPeriod,
        ctx: &ValidationContext,
        today: NaiveDate,
    ) -> EvaluationResult {
        let (violations, warnings) = self.collect(ctx, today);
        // Every block in the period expects at least one primary assignment
        let blocks_in_period = ctx
            .blocks
            .iter()
            .filter(|b| period.contains(b.date))
            .count();
        let expected = ctx.primary_count().max(blocks_in_period);
        Evaluator::new().evaluate_with_expected(&violations, &warnings, ctx, expected)
    }

    /// Run the pipeline and return raw findings without scoring
    pub fn collect(
        &self,
        ctx: &ValidationContext,
        today: NaiveDate,
    ) -> (Vec<Violation>, Vec<EngineWarning>) {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        violations.extend(self.check_duplicate_primaries(ctx));

        let (mut v, mut w) = self.duty_hours.validate(ctx);
        violations.append(&mut v);
        warnings.append(&mut w);

        violations.extend(self.supervision.validate(ctx));

        let (mut v, mut w) = self.leave.validate(ctx, today);
        violations.append(&mut v);
        warnings.append(&mut w);

        (violations, warnings)
    }

    /// Structural invariant: at most one primary assignment per
    /// (block, person) pair
    fn check_duplicate_primaries(&self, ctx: &ValidationContext) -> Vec<Violation> {
        let mut seen: HashSet<(&Id, &Id)> = HashSet::new();
        let mut violations = Vec::new();

        for assignment in ctx.assignments.iter().filter(|a| a.is_primary()) {
            if !seen.insert((&assignment.block_id, &assignment.person_id)) {
                let date = ctx
                    .block(&assignment.block_id)
                    .map(|b| b.date)
                    .unwrap_or_default();
                violations.push(Violation::on_date(
                    RuleKind::DuplicateAssignment,
                    Severity::Critical,
                    Some(assignment.person_id.clone()),
                    date,
                    format!(
                        "duplicate primary assignment: person {} on block {}",
                        assignment.person_id, assignment.block_id
                    ),
                ));
            }
        }

        violations
    }

    /// Access the swap rule set directly (used by the mutation engine)
    pub fn swap_rules(&self) -> &SwapValidator {
        &self.swap_rules
    }

    /// Access the duty-hour rule set directly (used by post-swap re-checks)
    pub fn duty_hour_rules(&self) -> &DutyHourValidator {
        &self.duty_hours
    }

    /// Access the supervision rule set directly
    pub fn supervision_rules(&self) -> &SupervisionValidator {
        &self.supervision
    }

    /// Access the leave rule set directly
    pub fn leave_rules(&self) -> &LeaveValidator {
        &self.leave
    }
}
