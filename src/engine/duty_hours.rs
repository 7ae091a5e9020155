//! Duty-hour compliance validator
//!
//! Enforces the duty-hour rule set over block-based assignments:
//! - 80-hour maximum per week, averaged over an exact rolling 28-day window
//! - 24+4 continuous-duty limit (24 hours plus 4 hours of handoff)
//! - 10-hour minimum rest after any shift of 24 hours or more
//! - One 24-hour off-period in every rolling 7-day window
//! - Moonlighting hours merged into internal hours before any window math
//!
//! Assignments are converted to hours through rotation intensity: a standard
//! session contributes 6 hours, an intensive session 12. Shifts are derived
//! from adjacency: AM and PM of the same day are continuous, as is PM
//! followed by the next morning's AM.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

use super::violation::{
    EngineWarning, HourAlertLevel, RuleKind, Severity, Violation, WarningKind,
};
use super::ValidationContext;
use crate::models::{Id, RotationType, Session};

// Duty-hour constants
pub const MAX_WEEKLY_HOURS: f64 = 80.0;
pub const ROLLING_DAYS: i64 = 28;
pub const ROLLING_WEEKS: f64 = 4.0;
pub const MAX_SHIFT_HOURS: f64 = 28.0;
pub const EXTENDED_SHIFT_WARNING_HOURS: f64 = 26.0;
pub const REST_TRIGGER_HOURS: f64 = 24.0;
pub const MIN_REST_HOURS: f64 = 10.0;
pub const MOONLIGHTING_WEEKLY_WARNING_HOURS: f64 = 20.0;
pub const MIN_NIGHTS_BETWEEN_CALLS: i64 = 3;

const AM_START: u32 = 8;
const PM_START: u32 = 14;

/// A continuous duty segment reconstructed from adjacent blocks
#[derive(Debug, Clone, PartialEq)]
pub struct DutyShift {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub hours: f64,
}

impl DutyShift {
    /// Date the shift starts on
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

/// Validates duty-hour compliance for residents
#[derive(Debug, Clone)]
pub struct DutyHourValidator {
    max_weekly_hours: f64,
    rolling_days: i64,
}

impl Default for DutyHourValidator {
    fn default() -> Self {
        Self {
            max_weekly_hours: MAX_WEEKLY_HOURS,
            rolling_days: ROLLING_DAYS,
        }
    }
}

impl DutyHourValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every duty-hour check over the context's residents
    pub fn validate(&self, ctx: &ValidationContext) -> (Vec<Violation>, Vec<EngineWarning>) {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for person in ctx.persons.iter().filter(|p| p.is_resident()) {
            let hours = self.hours_by_date(ctx, &person.id);

            let (mut v, mut w) = self.validate_rolling_average(&person.id, &hours);
            violations.append(&mut v);
            warnings.append(&mut w);

            let shifts = self.shifts_for(ctx, &person.id);

            let (mut v, mut w) = self.validate_shift_lengths(&person.id, &shifts);
            violations.append(&mut v);
            warnings.append(&mut w);

            violations.append(&mut self.validate_rest_periods(&person.id, &shifts));
            violations.append(&mut self.validate_one_in_seven(&person.id, &hours));

            warnings.append(&mut self.check_moonlighting_load(ctx, &person.id));
            warnings.append(&mut self.check_call_frequency(ctx, &person.id));
        }

        (violations, warnings)
    }

    /// Total duty hours per date for one person, moonlighting included
    pub fn hours_by_date(&self, ctx: &ValidationContext, person_id: &Id) -> BTreeMap<NaiveDate, f64> {
        let mut hours: BTreeMap<NaiveDate, f64> = BTreeMap::new();

        for assignment in ctx.assignments.iter().filter(|a| {
            a.is_primary() && &a.person_id == person_id
        }) {
            let Some(block) = ctx.block(&assignment.block_id) else {
                continue;
            };
            let per_block = ctx.assignment_hours(assignment);
            *hours.entry(block.date).or_insert(0.0) += per_block;
        }

        // Moonlighting counts toward every window
        if let Some(extra) = ctx.moonlighting.get(person_id) {
            for (date, moonlight) in extra {
                *hours.entry(*date).or_insert(0.0) += moonlight;
            }
        }

        hours
    }

    /// Check every 28-day rolling window anchored at a recorded date
    ///
    /// Overlapping windows breached by the same stretch of work merge into
    /// one violation carrying the worst window's percentage; a single
    /// overload is one finding, not one per anchor it slides past.
    pub fn validate_rolling_average(
        &self,
        person_id: &Id,
        hours_by_date: &BTreeMap<NaiveDate, f64>,
    ) -> (Vec<Violation>, Vec<EngineWarning>) {
        let mut warnings = Vec::new();

        // (anchor, window_end, average_weekly) per breaching window
        let mut breaches: Vec<(NaiveDate, NaiveDate, f64)> = Vec::new();

        for anchor in hours_by_date.keys() {
            let window_end = *anchor + Duration::days(self.rolling_days - 1);

            let total: f64 = hours_by_date
                .range(*anchor..=window_end)
                .map(|(_, h)| h)
                .sum();
            let average_weekly = total / ROLLING_WEEKS;

            if average_weekly > self.max_weekly_hours {
                breaches.push((*anchor, window_end, average_weekly));
            } else if let Some(level) = HourAlertLevel::from_weekly_hours(average_weekly) {
                warnings.push(
                    EngineWarning::new(
                        WarningKind::ApproachingHourLimit,
                        Some(person_id.clone()),
                        format!(
                            "approaching 80-hour limit: {average_weekly:.1}h/week over window \
                             starting {anchor}"
                        ),
                    )
                    .with_alert_level(level),
                );
            }
        }

        // Merge runs of adjacent breaching anchors
        let mut violations = Vec::new();
        let mut run: Option<(NaiveDate, NaiveDate, f64)> = None;

        for (anchor, window_end, average_weekly) in breaches {
            run = match run {
                Some((start, end, worst)) if anchor <= end => {
                    Some((start, end.max(window_end), worst.max(average_weekly)))
                }
                Some(done) => {
                    violations.push(self.breach_violation(person_id, done));
                    Some((anchor, window_end, average_weekly))
                }
                None => Some((anchor, window_end, average_weekly)),
            };
        }
        if let Some(done) = run {
            violations.push(self.breach_violation(person_id, done));
        }

        (violations, warnings)
    }

    fn breach_violation(
        &self,
        person_id: &Id,
        (start, end, average_weekly): (NaiveDate, NaiveDate, f64),
    ) -> Violation {
        let pct = (average_weekly - self.max_weekly_hours) / self.max_weekly_hours * 100.0;
        Violation::spanning(
            RuleKind::EightyHour,
            severity_for_percentage(pct),
            Some(person_id.clone()),
            start,
            end,
            format!(
                "80-hour rule violation: {average_weekly:.1}h/week average over \
                 {start} to {end} (limit: {}h)",
                self.max_weekly_hours
            ),
        )
        .with_percentage(pct)
    }

    /// Reconstruct continuous duty shifts from adjacent assigned blocks
    pub fn shifts_for(&self, ctx: &ValidationContext, person_id: &Id) -> Vec<DutyShift> {
        // Collect (start, hours) per assigned session, ordered
        let mut sessions: Vec<(NaiveDate, Session, f64)> = ctx
            .assignments
            .iter()
            .filter(|a| a.is_primary() && &a.person_id == person_id)
            .filter_map(|a| {
                let block = ctx.block(&a.block_id)?;
                Some((block.date, block.session, ctx.assignment_hours(a)))
            })
            .collect();
        sessions.sort_by_key(|(date, session, _)| (*date, *session));
        sessions.dedup_by_key(|(date, session, _)| (*date, *session));

        let mut shifts: Vec<DutyShift> = Vec::new();

        for (date, session, hours) in sessions {
            let start_hour = match session {
                Session::Am => AM_START,
                Session::Pm => PM_START,
            };
            let start = NaiveDateTime::new(
                date,
                NaiveTime::from_hms_opt(start_hour, 0, 0).expect("valid block start time"),
            );
            let end = start + Duration::minutes((hours * 60.0) as i64);

            match shifts.last_mut() {
                // Continuous when this session begins at or before the
                // previous one ends (same-day PM, or overnight into AM)
                Some(last) if start <= last.end => {
                    if end > last.end {
                        last.hours += (end - last.end).num_minutes() as f64 / 60.0;
                        last.end = end;
                    }
                }
                _ => shifts.push(DutyShift { start, end, hours }),
            }
        }

        shifts
    }

    /// Enforce the 24+4 limit over reconstructed shifts
    pub fn validate_shift_lengths(
        &self,
        person_id: &Id,
        shifts: &[DutyShift],
    ) -> (Vec<Violation>, Vec<EngineWarning>) {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for shift in shifts {
            if shift.hours > MAX_SHIFT_HOURS {
                violations.push(
                    Violation::spanning(
                        RuleKind::TwentyFourPlusFour,
                        Severity::Critical,
                        Some(person_id.clone()),
                        shift.start.date(),
                        shift.end.date(),
                        format!(
                            "24+4 rule violation starting {}: {:.1}h continuous duty \
                             (limit: {MAX_SHIFT_HOURS}h)",
                            shift.date(),
                            shift.hours
                        ),
                    )
                    .with_percentage(
                        (shift.hours - MAX_SHIFT_HOURS) / MAX_SHIFT_HOURS * 100.0,
                    ),
                );
            } else if shift.hours >= EXTENDED_SHIFT_WARNING_HOURS {
                warnings.push(EngineWarning::new(
                    WarningKind::ExtendedShift,
                    Some(person_id.clone()),
                    format!(
                        "extended shift starting {}: {:.1}h (24+4 limit: {MAX_SHIFT_HOURS}h)",
                        shift.date(),
                        shift.hours
                    ),
                ));
            }
        }

        (violations, warnings)
    }

    /// Enforce 10 hours of rest after any shift of 24 hours or more
    pub fn validate_rest_periods(&self, person_id: &Id, shifts: &[DutyShift]) -> Vec<Violation> {
        let mut violations = Vec::new();

        for pair in shifts.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.hours < REST_TRIGGER_HOURS {
                continue;
            }

            let rest_hours = (next.start - prev.end).num_minutes() as f64 / 60.0;
            if rest_hours < MIN_REST_HOURS {
                violations.push(Violation::spanning(
                    RuleKind::RestPeriod,
                    Severity::High,
                    Some(person_id.clone()),
                    prev.end.date(),
                    next.start.date(),
                    format!(
                        "insufficient rest after {:.1}h shift: {rest_hours:.1}h \
                         (minimum {MIN_REST_HOURS}h required)",
                        prev.hours
                    ),
                ));
            }
        }

        violations
    }

    /// Enforce one clear day in every rolling 7-day window
    pub fn validate_one_in_seven(
        &self,
        person_id: &Id,
        hours_by_date: &BTreeMap<NaiveDate, f64>,
    ) -> Vec<Violation> {
        let assigned: Vec<NaiveDate> = hours_by_date
            .iter()
            .filter(|(_, h)| **h > 0.0)
            .map(|(d, _)| *d)
            .collect();

        let mut violations = Vec::new();

        for window in assigned.windows(7) {
            if (window[6] - window[0]).num_days() == 6 {
                violations.push(Violation::spanning(
                    RuleKind::OneInSeven,
                    Severity::High,
                    Some(person_id.clone()),
                    window[0],
                    window[6],
                    format!(
                        "7 consecutive duty days without a day off ({} to {})",
                        window[0], window[6]
                    ),
                ));
            }
        }

        violations
    }

    /// Warn on weekly moonlighting loads high enough to endanger the limit
    pub fn check_moonlighting_load(
        &self,
        ctx: &ValidationContext,
        person_id: &Id,
    ) -> Vec<EngineWarning> {
        let Some(extra) = ctx.moonlighting.get(person_id) else {
            return Vec::new();
        };

        let mut weekly: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for (date, hours) in extra {
            let week_start =
                *date - Duration::days(date.weekday().num_days_from_monday() as i64);
            *weekly.entry(week_start).or_insert(0.0) += hours;
        }

        weekly
            .into_iter()
            .filter(|(_, total)| *total > MOONLIGHTING_WEEKLY_WARNING_HOURS)
            .map(|(week_start, total)| {
                EngineWarning::new(
                    WarningKind::Moonlighting,
                    Some(person_id.clone()),
                    format!(
                        "high moonlighting load week of {week_start}: {total:.1}h \
                         (counts toward the 80-hour limit)"
                    ),
                )
            })
            .collect()
    }

    /// Warn when in-house call lands more often than every 3rd night
    pub fn check_call_frequency(
        &self,
        ctx: &ValidationContext,
        person_id: &Id,
    ) -> Vec<EngineWarning> {
        let mut call_dates: Vec<NaiveDate> = ctx
            .assignments
            .iter()
            .filter(|a| a.is_primary() && &a.person_id == person_id)
            .filter(|a| {
                a.rotation_template_id
                    .as_ref()
                    .and_then(|id| ctx.template(id))
                    .map(|t| t.rotation_type == RotationType::Call)
                    .unwrap_or(false)
            })
            .filter_map(|a| ctx.block(&a.block_id).map(|b| b.date))
            .collect();
        call_dates.sort();
        call_dates.dedup();

        call_dates
            .windows(2)
            .filter(|pair| (pair[1] - pair[0]).num_days() < MIN_NIGHTS_BETWEEN_CALLS)
            .map(|pair| {
                EngineWarning::new(
                    WarningKind::CallFrequency,
                    Some(person_id.clone()),
                    format!(
                        "call on {} follows call on {} (minimum every 3rd night)",
                        pair[1], pair[0]
                    ),
                )
            })
            .collect()
    }

    /// Longest consecutive-duty-day streak, for reporting
    pub fn max_consecutive_duty_days(hours_by_date: &BTreeMap<NaiveDate, f64>) -> u32 {
        let dates: Vec<NaiveDate> = hours_by_date
            .iter()
            .filter(|(_, h)| **h > 0.0)
            .map(|(d, _)| *d)
            .collect();

        let mut max_streak = u32::from(!dates.is_empty());
        let mut streak = max_streak;

        for pair in dates.windows(2) {
            if (pair[1] - pair[0]).num_days() == 1 {
                streak += 1;
                max_streak = max_streak.max(streak);
            } else {
                streak = 1;
            }
        }

        max_streak
    }
}

/// Severity band for a percentage over the 80-hour limit
pub fn severity_for_percentage(pct: f64) -> Severity {
    if pct >= 10.0 {
        Severity::Critical
    } else if pct >= 5.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}
