//! Candidate evaluator: violations in, score out
//!
//! Converts the constraint engine's findings into an `EvaluationResult`:
//! a weighted-deficit score in [0, 1], a validity flag, per-rule counts,
//! the most severe violations verbatim, and workload-balance summary
//! metrics.
//!
//! Scoring: `score = clamp(1 − Σ w(severity)·count / max(1, expected), 0, 1)`
//! with weights CRITICAL 1.0, HIGH 0.5, MEDIUM 0.2, LOW 0.05. A result is
//! valid exactly when no CRITICAL and no HIGH violation is present.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::engine::{EngineWarning, Severity, ValidationContext, Violation};
use crate::models::RotationType;

/// How many of the most severe violations are carried verbatim
pub const TOP_VIOLATIONS: usize = 10;

// ============================================================================
// Evaluation Result
// ============================================================================

/// Workload-balance summary across persons
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceMetrics {
    /// Coefficient of variation of per-person duty hours (0 = perfectly even)
    pub hours_cv: f64,

    /// Difference between the most- and least-called person's call blocks
    pub call_count_gap: u32,

    /// Persons with at least one assignment
    pub persons_assigned: usize,
}

/// Scored outcome of validating one assignment set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Weighted-deficit score in [0, 1]
    pub score: f64,

    /// True iff no CRITICAL and no HIGH violation
    pub valid: bool,

    /// Violation counts keyed by rule name
    pub violation_counts: HashMap<String, usize>,

    /// Counts by severity band
    pub critical_violations: usize,
    pub high_violations: usize,
    pub medium_violations: usize,
    pub low_violations: usize,

    /// The ten most severe violations, verbatim
    pub top_violations: Vec<Violation>,

    /// Non-blocking warnings from the validators
    pub warnings: Vec<EngineWarning>,

    /// Workload-balance summary
    pub balance: BalanceMetrics,

    /// Denominator used for the deficit score
    pub expected_assignments: usize,
}

impl EvaluationResult {
    /// Total violations across severities
    pub fn total_violations(&self) -> usize {
        self.critical_violations
            + self.high_violations
            + self.medium_violations
            + self.low_violations
    }

    /// Distinct rule names present, sorted
    pub fn violation_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.violation_counts.keys().cloned().collect();
        types.sort();
        types
    }

    /// An empty, perfect result (no violations, nothing expected)
    pub fn perfect(expected_assignments: usize) -> Self {
        Self {
            score: 1.0,
            valid: true,
            violation_counts: HashMap::new(),
            critical_violations: 0,
            high_violations: 0,
            medium_violations: 0,
            low_violations: 0,
            top_violations: Vec::new(),
            warnings: Vec::new(),
            balance: BalanceMetrics::default(),
            expected_assignments,
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Aggregates violations into an `EvaluationResult`
#[derive(Debug, Clone, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Score a violation set against the context it was produced from
    pub fn evaluate(
        &self,
        violations: &[Violation],
        warnings: &[EngineWarning],
        ctx: &ValidationContext,
    ) -> EvaluationResult {
        let expected = ctx.primary_count().max(ctx.blocks.len());
        self.evaluate_with_expected(violations, warnings, ctx, expected)
    }

    /// Score against an explicit expected-assignment denominator
    pub fn evaluate_with_expected(
        &self,
        violations: &[Violation],
        warnings: &[EngineWarning],
        ctx: &ValidationContext,
        expected_assignments: usize,
    ) -> EvaluationResult {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut by_severity = [0usize; 4];
        let mut deficit = 0.0;

        for violation in violations {
            *counts.entry(violation.rule.as_str().to_string()).or_insert(0) += 1;
            deficit += violation.severity.weight();
            match violation.severity {
                Severity::Critical => by_severity[0] += 1,
                Severity::High => by_severity[1] += 1,
                Severity::Medium => by_severity[2] += 1,
                Severity::Low => by_severity[3] += 1,
            }
        }

        let denominator = expected_assignments.max(1) as f64;
        let score = (1.0 - deficit / denominator).clamp(0.0, 1.0);
        let valid = by_severity[0] == 0 && by_severity[1] == 0;

        // Most severe first, verbatim
        let mut top: Vec<Violation> = violations.to_vec();
        top.sort_by(|a, b| b.severity.cmp(&a.severity));
        top.truncate(TOP_VIOLATIONS);

        EvaluationResult {
            score,
            valid,
            violation_counts: counts,
            critical_violations: by_severity[0],
            high_violations: by_severity[1],
            medium_violations: by_severity[2],
            low_violations: by_severity[3],
            top_violations: top,
            warnings: warnings.to_vec(),
            balance: self.balance_metrics(ctx),
            expected_assignments,
        }
    }

    /// Workload-balance metrics over the context's primary assignments
    pub fn balance_metrics(&self, ctx: &ValidationContext) -> BalanceMetrics {
        let mut hours_by_person: HashMap<&crate::models::Id, f64> = HashMap::new();
        let mut calls_by_person: HashMap<&crate::models::Id, u32> = HashMap::new();

        for assignment in ctx.assignments.iter().filter(|a| a.is_primary()) {
            *hours_by_person.entry(&assignment.person_id).or_insert(0.0) +=
                ctx.assignment_hours(assignment);

            let is_call = assignment
                .rotation_template_id
                .as_ref()
                .and_then(|id| ctx.template(id))
                .map(|t| t.rotation_type == RotationType::Call)
                .unwrap_or(false);
            if is_call {
                *calls_by_person.entry(&assignment.person_id).or_insert(0) += 1;
            }
        }

        let hours: Vec<f64> = hours_by_person.values().copied().collect();
        let hours_cv = if hours.len() >= 2 {
            let mean = hours.as_slice().mean();
            if mean > 0.0 {
                hours.as_slice().std_dev() / mean
            } else {
                0.0
            }
        } else {
            0.0
        };

        let call_count_gap = if calls_by_person.is_empty() {
            0
        } else {
            // Persons with assignments but no call blocks count as zero
            let max = calls_by_person.values().copied().max().unwrap_or(0);
            let min = hours_by_person
                .keys()
                .map(|p| calls_by_person.get(*p).copied().unwrap_or(0))
                .min()
                .unwrap_or(0);
            max - min
        };

        BalanceMetrics {
            hours_cv,
            call_count_gap,
            persons_assigned: hours_by_person.len(),
        }
    }
}
