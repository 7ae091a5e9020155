//! Leave and absence validator
//!
//! Decides which absences block assignment and enforces the consequences:
//! - Always-blocking kinds (deployment, TDY, bereavement, maternity,
//!   convalescent, emergency) forbid any primary assignment in range
//! - Sick leave blocks only beyond 3 days, medical leave beyond 7
//! - Vacation and conference never block
//! - Unknown kinds block conservatively
//! - Post-deployment recovery holds 7 assignment-free days, post-convalescent 3
//! - Tentative return dates within 7 days raise a warning, not a violation

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

use super::violation::{EngineWarning, RuleKind, Severity, Violation, WarningKind};
use super::ValidationContext;
use crate::models::{Absence, AbsenceKind, Id};

pub const SICK_BLOCKING_THRESHOLD_DAYS: i64 = 3;
pub const MEDICAL_BLOCKING_THRESHOLD_DAYS: i64 = 7;
pub const POST_DEPLOYMENT_RECOVERY_DAYS: i64 = 7;
pub const POST_CONVALESCENT_RECOVERY_DAYS: i64 = 3;
pub const TENTATIVE_RETURN_WARNING_DAYS: i64 = 7;

/// Validates absence blocking and recovery periods
#[derive(Debug, Clone, Default)]
pub struct LeaveValidator;

impl LeaveValidator {
    pub fn new() -> Self {
        Self
    }

    /// Whether an absence forbids primary assignment in its range
    ///
    /// Precedence: explicit override, then always-blocking kinds, then
    /// duration-conditional kinds, then never-blocking kinds. Anything
    /// unrecognized blocks.
    pub fn is_blocking(&self, absence: &Absence) -> bool {
        if let Some(explicit) = absence.is_blocking_override {
            return explicit;
        }

        match &absence.kind {
            AbsenceKind::Deployment
            | AbsenceKind::Tdy
            | AbsenceKind::Bereavement
            | AbsenceKind::Maternity
            | AbsenceKind::Convalescent
            | AbsenceKind::Emergency => true,
            AbsenceKind::Sick => absence.duration_days() > SICK_BLOCKING_THRESHOLD_DAYS,
            AbsenceKind::Medical => absence.duration_days() > MEDICAL_BLOCKING_THRESHOLD_DAYS,
            AbsenceKind::Vacation | AbsenceKind::Conference => false,
            AbsenceKind::Other(_) => true,
        }
    }

    /// Recovery days owed after an absence ends, if any
    pub fn recovery_days(&self, kind: &AbsenceKind) -> i64 {
        match kind {
            AbsenceKind::Deployment => POST_DEPLOYMENT_RECOVERY_DAYS,
            AbsenceKind::Convalescent => POST_CONVALESCENT_RECOVERY_DAYS,
            _ => 0,
        }
    }

    /// Run every leave check over the context
    pub fn validate(
        &self,
        ctx: &ValidationContext,
        today: NaiveDate,
    ) -> (Vec<Violation>, Vec<EngineWarning>) {
        let assigned_dates = self.assigned_dates_by_person(ctx);
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for absence in ctx.absences {
            let dates = assigned_dates
                .get(&absence.person_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            violations.extend(self.check_assignment_during_block(absence, dates));
            violations.extend(self.check_recovery_period(absence, dates));

            if let Some(w) = self.check_tentative_return(absence, today) {
                warnings.push(w);
            }
        }

        (violations, warnings)
    }

    /// One CRITICAL violation per conflicting date inside a blocking absence
    pub fn check_assignment_during_block(
        &self,
        absence: &Absence,
        assigned_dates: &[NaiveDate],
    ) -> Vec<Violation> {
        if !self.is_blocking(absence) {
            return Vec::new();
        }

        assigned_dates
            .iter()
            .filter(|d| absence.covers(**d))
            .map(|conflict| {
                Violation::on_date(
                    RuleKind::AssignmentDuringBlock,
                    Severity::Critical,
                    Some(absence.person_id.clone()),
                    *conflict,
                    format!(
                        "assignment on {conflict} during blocking {} absence \
                         ({} to {})",
                        absence.kind.as_str(),
                        absence.start_date,
                        absence.end_date,
                    ),
                )
            })
            .collect()
    }

    /// Enforce the assignment-free recovery window after an absence ends
    pub fn check_recovery_period(
        &self,
        absence: &Absence,
        assigned_dates: &[NaiveDate],
    ) -> Vec<Violation> {
        let recovery = self.recovery_days(&absence.kind);
        if recovery == 0 {
            return Vec::new();
        }

        let recovery_end = absence.end_date + Duration::days(recovery);
        let early: Vec<NaiveDate> = assigned_dates
            .iter()
            .filter(|d| **d > absence.end_date && **d <= recovery_end)
            .copied()
            .collect();

        if early.is_empty() {
            return Vec::new();
        }

        vec![Violation::spanning(
            RuleKind::RecoveryPeriod,
            Severity::High,
            Some(absence.person_id.clone()),
            early[0],
            *early.last().expect("non-empty"),
            format!(
                "{} assignments inside the {recovery}-day recovery window after \
                 {} ending {}",
                early.len(),
                absence.kind.as_str(),
                absence.end_date,
            ),
        )]
    }

    /// Tentative return dates approaching within 7 days get flagged
    pub fn check_tentative_return(
        &self,
        absence: &Absence,
        today: NaiveDate,
    ) -> Option<EngineWarning> {
        if !absence.return_date_tentative {
            return None;
        }

        let days_until = (absence.end_date - today).num_days();
        if !(0..=TENTATIVE_RETURN_WARNING_DAYS).contains(&days_until) {
            return None;
        }

        Some(EngineWarning::new(
            WarningKind::TentativeReturn,
            Some(absence.person_id.clone()),
            format!(
                "tentative return date {} approaching ({days_until} days); \
                 confirm the actual return date",
                absence.end_date,
            ),
        ))
    }

    /// Summary of leave impact on capacity over a schedule period
    pub fn leave_impact_summary(
        &self,
        absences: &[&Absence],
        schedule_period_days: i64,
    ) -> LeaveImpactSummary {
        let mut blocking_days = 0;
        let mut non_blocking_days = 0;

        for absence in absences {
            if self.is_blocking(absence) {
                blocking_days += absence.duration_days();
            } else {
                non_blocking_days += absence.duration_days();
            }
        }

        let work_days_available = (schedule_period_days - blocking_days).max(0);
        let work_capacity_hours = work_days_available as f64 * 12.0;
        let hours_limit = 80.0 * 4.0;

        LeaveImpactSummary {
            blocking_days,
            non_blocking_days,
            work_days_available,
            work_capacity_hours,
            capacity_utilization: if work_capacity_hours > 0.0 {
                hours_limit / work_capacity_hours
            } else {
                0.0
            },
        }
    }

    fn assigned_dates_by_person(&self, ctx: &ValidationContext) -> HashMap<Id, Vec<NaiveDate>> {
        let mut by_person: HashMap<Id, Vec<NaiveDate>> = HashMap::new();

        for assignment in ctx.assignments.iter().filter(|a| a.is_primary()) {
            if let Some(block) = ctx.block(&assignment.block_id) {
                by_person
                    .entry(assignment.person_id.clone())
                    .or_default()
                    .push(block.date);
            }
        }

        for dates in by_person.values_mut() {
            dates.sort();
            dates.dedup();
        }

        by_person
    }
}

/// Capacity impact of a person's leave over a period
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveImpactSummary {
    pub blocking_days: i64,
    pub non_blocking_days: i64,
    pub work_days_available: i64,
    pub work_capacity_hours: f64,
    pub capacity_utilization: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn absence(kind: AbsenceKind, start: &str, end: &str) -> Absence {
        Absence::new(
            Id::new("abs-1").unwrap(),
            Id::new("res-1").unwrap(),
            d(start),
            d(end),
            kind,
        )
    }

    #[test]
    fn test_always_blocking_kinds() {
        let v = LeaveValidator::new();
        assert!(v.is_blocking(&absence(AbsenceKind::Deployment, "2025-03-01", "2025-03-02")));
        assert!(v.is_blocking(&absence(AbsenceKind::Tdy, "2025-03-01", "2025-03-01")));
        assert!(v.is_blocking(&absence(AbsenceKind::Maternity, "2025-03-01", "2025-05-01")));
    }

    #[test]
    fn test_sick_duration_threshold() {
        let v = LeaveValidator::new();
        // 3 days does not block
        assert!(!v.is_blocking(&absence(AbsenceKind::Sick, "2025-03-01", "2025-03-03")));
        // 4 days blocks
        assert!(v.is_blocking(&absence(AbsenceKind::Sick, "2025-03-01", "2025-03-04")));
    }

    #[test]
    fn test_medical_duration_threshold() {
        let v = LeaveValidator::new();
        assert!(!v.is_blocking(&absence(AbsenceKind::Medical, "2025-03-01", "2025-03-07")));
        assert!(v.is_blocking(&absence(AbsenceKind::Medical, "2025-03-01", "2025-03-08")));
    }

    #[test]
    fn test_vacation_never_blocks() {
        let v = LeaveValidator::new();
        assert!(!v.is_blocking(&absence(AbsenceKind::Vacation, "2025-03-01", "2025-03-21")));
        assert!(!v.is_blocking(&absence(AbsenceKind::Conference, "2025-03-01", "2025-03-05")));
    }

    #[test]
    fn test_unknown_kind_blocks_conservatively() {
        let v = LeaveValidator::new();
        assert!(v.is_blocking(&absence(
            AbsenceKind::Other("jury_duty".to_string()),
            "2025-03-01",
            "2025-03-02"
        )));
    }

    #[test]
    fn test_explicit_override_wins() {
        let v = LeaveValidator::new();
        let mut a = absence(AbsenceKind::Vacation, "2025-03-01", "2025-03-05");
        a.is_blocking_override = Some(true);
        assert!(v.is_blocking(&a));

        let mut a = absence(AbsenceKind::Deployment, "2025-03-01", "2025-03-05");
        a.is_blocking_override = Some(false);
        assert!(!v.is_blocking(&a));
    }

    #[test]
    fn test_one_violation_per_conflicting_date() {
        let v = LeaveValidator::new();
        let a = absence(AbsenceKind::Deployment, "2025-03-10", "2025-03-20");
        let assigned = vec![
            d("2025-03-09"),
            d("2025-03-11"),
            d("2025-03-12"),
            d("2025-03-15"),
            d("2025-03-21"),
        ];

        let violations = v.check_assignment_during_block(&a, &assigned);
        assert_eq!(violations.len(), 3);
        for violation in &violations {
            assert_eq!(violation.rule, RuleKind::AssignmentDuringBlock);
            assert_eq!(violation.severity, Severity::Critical);
        }
    }

    #[test]
    fn test_post_deployment_recovery() {
        let v = LeaveValidator::new();
        let a = absence(AbsenceKind::Deployment, "2025-03-01", "2025-03-10");
        // Assignment 3 days after return: inside the 7-day window
        let violations = v.check_recovery_period(&a, &[d("2025-03-13")]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, RuleKind::RecoveryPeriod);

        // Assignment 8 days after: clear
        let violations = v.check_recovery_period(&a, &[d("2025-03-18")]);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_post_convalescent_recovery_is_shorter() {
        let v = LeaveValidator::new();
        let a = absence(AbsenceKind::Convalescent, "2025-03-01", "2025-03-10");
        // Day 4 after return is clear for convalescent (3-day window)
        let violations = v.check_recovery_period(&a, &[d("2025-03-14")]);
        assert!(violations.is_empty());

        let violations = v.check_recovery_period(&a, &[d("2025-03-12")]);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_tentative_return_warning_window() {
        let v = LeaveValidator::new();
        let mut a = absence(AbsenceKind::Medical, "2025-03-01", "2025-03-20");
        a.return_date_tentative = true;

        // 5 days out: warn
        assert!(v.check_tentative_return(&a, d("2025-03-15")).is_some());
        // 10 days out: no warning yet
        assert!(v.check_tentative_return(&a, d("2025-03-10")).is_none());
        // Confirmed date: never warn
        a.return_date_tentative = false;
        assert!(v.check_tentative_return(&a, d("2025-03-15")).is_none());
    }

    #[test]
    fn test_leave_impact_summary() {
        let v = LeaveValidator::new();
        let blocking = absence(AbsenceKind::Deployment, "2025-03-01", "2025-03-10");
        let non_blocking = absence(AbsenceKind::Vacation, "2025-04-01", "2025-04-05");

        let summary = v.leave_impact_summary(&[&blocking, &non_blocking], 28);
        assert_eq!(summary.blocking_days, 10);
        assert_eq!(summary.non_blocking_days, 5);
        assert_eq!(summary.work_days_available, 18);
    }
}
