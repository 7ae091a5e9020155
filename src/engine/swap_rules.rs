//! Swap request validation rules
//!
//! Pre-creation checks (ownership, horizon, pending limit, one-to-one
//! conflicts), rollback-window eligibility, and equity impact analysis.
//! Post-execution compliance re-checks reuse the duty-hour and supervision
//! validators on the post-swap assignment set; the mutation engine wires
//! that together.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::violation::{EngineWarning, WarningKind};
use super::ValidationContext;
use crate::error::FieldError;
use crate::models::{Id, Person, Swap, SwapKind, SwapStatus};

pub const MAX_SWAP_ADVANCE_DAYS: i64 = 180;
pub const MAX_PENDING_SWAPS_PER_PERSON: usize = 5;
pub const ROLLBACK_WINDOW_HOURS: i64 = 24;
pub const EQUITY_SUNDAY_CALL_CONCERN_GAP: u32 = 3;

/// Result of pre-creation swap validation
#[derive(Debug, Clone, Default)]
pub struct SwapCheck {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
}

impl SwapCheck {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Rollback eligibility decision
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackEligibility {
    pub can_rollback: bool,
    pub reason: Option<String>,
    pub hours_since_execution: f64,
    pub hours_remaining: f64,
}

impl RollbackEligibility {
    fn denied(reason: impl Into<String>, hours_since: f64) -> Self {
        Self {
            can_rollback: false,
            reason: Some(reason.into()),
            hours_since_execution: hours_since,
            hours_remaining: 0.0,
        }
    }
}

/// Equity impact of a proposed swap on call distribution
#[derive(Debug, Clone, PartialEq)]
pub struct EquityImpact {
    pub sunday_call_gap: u32,
    pub weekday_call_gap: u32,
    pub concerns: Vec<String>,
}

impl EquityImpact {
    pub fn is_equitable(&self) -> bool {
        self.concerns.is_empty()
    }
}

/// Validates swap requests against the swap rule set
#[derive(Debug, Clone, Default)]
pub struct SwapValidator;

impl SwapValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a swap request before creation
    pub fn validate_request(
        &self,
        ctx: &ValidationContext,
        swap: &Swap,
        pending_for_requester: usize,
        today: NaiveDate,
    ) -> SwapCheck {
        let mut check = SwapCheck::default();

        // Requester must own at least one primary assignment in the source week
        if !self.owns_week(ctx, &swap.source_person_id, swap.source_week) {
            check.errors.push(
                FieldError::new(
                    "not_owner",
                    format!(
                        "requester {} has no assignment in week of {}",
                        swap.source_person_id, swap.source_week
                    ),
                )
                .with_field("source_week"),
            );
        }

        // Horizon checks
        if swap.source_week < today {
            check.errors.push(
                FieldError::new(
                    "past_date",
                    format!("cannot swap a week in the past ({})", swap.source_week),
                )
                .with_field("source_week"),
            );
        } else if swap.source_week == today {
            check
                .warnings
                .push(format!("swapping the current week ({}) may be too late", swap.source_week));
        }

        let max_future = today + Duration::days(MAX_SWAP_ADVANCE_DAYS);
        if swap.source_week > max_future {
            check.errors.push(
                FieldError::new(
                    "too_far_ahead",
                    format!(
                        "cannot swap more than {MAX_SWAP_ADVANCE_DAYS} days ahead \
                         (week of {})",
                        swap.source_week
                    ),
                )
                .with_field("source_week"),
            );
        }

        // Pending-swap limit
        if pending_for_requester >= MAX_PENDING_SWAPS_PER_PERSON {
            check.errors.push(FieldError::new(
                "too_many_pending",
                format!(
                    "requester has {pending_for_requester} pending swaps \
                     (maximum {MAX_PENDING_SWAPS_PER_PERSON})"
                ),
            ));
        }

        // One-to-one specifics
        if swap.kind == SwapKind::OneToOne {
            match &swap.target_person_id {
                None => {
                    check.errors.push(
                        FieldError::new("missing_target", "target person required for one-to-one swap")
                            .with_field("target_person_id"),
                    );
                }
                Some(target_id) => {
                    if ctx.person(target_id).is_none() {
                        check.errors.push(
                            FieldError::new(
                                "not_found",
                                format!("target person not found: {target_id}"),
                            )
                            .with_field("target_person_id"),
                        );
                    } else if self.owns_week(ctx, target_id, swap.source_week) {
                        check.warnings.push(format!(
                            "target already has assignments in week of {}; \
                             executing would double-book",
                            swap.source_week
                        ));
                    }
                }
            }
        }

        check
    }

    /// Decide whether an executed swap may still be rolled back
    ///
    /// Requires status `executed`, an execution timestamp inside the 24-hour
    /// window, and untouched assignments since execution.
    pub fn rollback_eligibility(
        &self,
        swap: &Swap,
        assignments_untouched: bool,
        now: DateTime<Utc>,
    ) -> RollbackEligibility {
        if swap.status != SwapStatus::Executed {
            return RollbackEligibility::denied(
                format!(
                    "swap status is '{}', must be 'executed' to rollback",
                    swap.status.as_str()
                ),
                0.0,
            );
        }

        let Some(executed_at) = swap.executed_at else {
            return RollbackEligibility::denied("swap has no execution timestamp", 0.0);
        };

        let hours_since = (now - executed_at).num_seconds() as f64 / 3600.0;

        if hours_since >= ROLLBACK_WINDOW_HOURS as f64 {
            return RollbackEligibility::denied("rollback window expired", hours_since);
        }

        if !assignments_untouched {
            return RollbackEligibility::denied(
                "assignments modified since swap execution",
                hours_since,
            );
        }

        RollbackEligibility {
            can_rollback: true,
            reason: None,
            hours_since_execution: hours_since,
            hours_remaining: ROLLBACK_WINDOW_HOURS as f64 - hours_since,
        }
    }

    /// Analyze call-count equity between the two parties of a swap
    pub fn equity_impact(
        &self,
        requester: &Person,
        target: &Person,
        kind: SwapKind,
    ) -> EquityImpact {
        let sunday_gap = requester
            .sunday_call_count
            .abs_diff(target.sunday_call_count);
        let weekday_gap = requester
            .weekday_call_count
            .abs_diff(target.weekday_call_count);

        let mut concerns = Vec::new();

        // Absorb swaps shift burden one way; a wide Sunday-call gap deepens it
        if kind == SwapKind::Absorb && sunday_gap > EQUITY_SUNDAY_CALL_CONCERN_GAP {
            concerns.push(format!(
                "large Sunday-call gap: {} has {}, {} has {}",
                requester.name,
                requester.sunday_call_count,
                target.name,
                target.sunday_call_count,
            ));
        }

        EquityImpact {
            sunday_call_gap: sunday_gap,
            weekday_call_gap: weekday_gap,
            concerns,
        }
    }

    /// Equity warnings in engine form, for merged validation output
    pub fn equity_warnings(
        &self,
        requester: &Person,
        target: &Person,
        kind: SwapKind,
    ) -> Vec<EngineWarning> {
        self.equity_impact(requester, target, kind)
            .concerns
            .into_iter()
            .map(|msg| {
                EngineWarning::new(WarningKind::EquityConcern, Some(requester.id.clone()), msg)
            })
            .collect()
    }

    /// Whether a person has a primary assignment in the week starting at
    /// `week_start`
    pub fn owns_week(&self, ctx: &ValidationContext, person_id: &Id, week_start: NaiveDate) -> bool {
        let week_end = week_start + Duration::days(6);
        ctx.assignments.iter().any(|a| {
            a.is_primary()
                && &a.person_id == person_id
                && ctx
                    .block(&a.block_id)
                    .map(|b| week_start <= b.date && b.date <= week_end)
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn executed_swap(executed_at: DateTime<Utc>) -> Swap {
        let mut swap = Swap::one_to_one(
            Id::new("sw-1").unwrap(),
            Id::new("fac-1").unwrap(),
            d("2025-06-02"),
            Id::new("fac-2").unwrap(),
            d("2025-06-09"),
        );
        swap.status = SwapStatus::Executed;
        swap.executed_at = Some(executed_at);
        swap.rollback_deadline = Some(executed_at + Duration::hours(ROLLBACK_WINDOW_HOURS));
        swap
    }

    #[test]
    fn test_rollback_inside_window() {
        let v = SwapValidator::new();
        let executed_at = Utc::now() - Duration::hours(23) - Duration::minutes(59);
        let swap = executed_swap(executed_at);

        let eligibility = v.rollback_eligibility(&swap, true, Utc::now());
        assert!(eligibility.can_rollback);
        assert!(eligibility.hours_remaining > 0.0);
    }

    #[test]
    fn test_rollback_after_window_expired() {
        let v = SwapValidator::new();
        let executed_at = Utc::now() - Duration::hours(24) - Duration::minutes(1);
        let swap = executed_swap(executed_at);

        let eligibility = v.rollback_eligibility(&swap, true, Utc::now());
        assert!(!eligibility.can_rollback);
        assert_eq!(eligibility.reason.as_deref(), Some("rollback window expired"));
        assert_eq!(eligibility.hours_remaining, 0.0);
    }

    #[test]
    fn test_rollback_requires_executed_status() {
        let v = SwapValidator::new();
        let mut swap = executed_swap(Utc::now());
        swap.status = SwapStatus::Pending;

        let eligibility = v.rollback_eligibility(&swap, true, Utc::now());
        assert!(!eligibility.can_rollback);
        assert!(eligibility.reason.unwrap().contains("pending"));
    }

    #[test]
    fn test_rollback_requires_untouched_assignments() {
        let v = SwapValidator::new();
        let swap = executed_swap(Utc::now() - Duration::hours(1));

        let eligibility = v.rollback_eligibility(&swap, false, Utc::now());
        assert!(!eligibility.can_rollback);
        assert!(eligibility.reason.unwrap().contains("modified"));
    }

    #[test]
    fn test_equity_absorb_concern() {
        let v = SwapValidator::new();
        let mut requester = Person::faculty(Id::new("f1").unwrap(), "Dr. A");
        requester.sunday_call_count = 8;
        let mut target = Person::faculty(Id::new("f2").unwrap(), "Dr. B");
        target.sunday_call_count = 2;

        let impact = v.equity_impact(&requester, &target, SwapKind::Absorb);
        assert_eq!(impact.sunday_call_gap, 6);
        assert!(!impact.is_equitable());

        // Same gap on a one-to-one swap raises no concern
        let impact = v.equity_impact(&requester, &target, SwapKind::OneToOne);
        assert!(impact.is_equitable());
    }
}
