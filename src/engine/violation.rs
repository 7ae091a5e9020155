//! Violation and warning types produced by the constraint validators

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Id;

// ============================================================================
// Severity
// ============================================================================

/// Severity of a constraint violation
///
/// Ordering is by increasing severity so that `max()` picks the worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Weight used by the evaluator's deficit score
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.5,
            Self::Medium => 0.2,
            Self::Low => 0.05,
        }
    }

    /// A result is invalid when any violation is at or above this level
    pub fn invalidates(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rule Kind
// ============================================================================

/// Which rule a violation was raised against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// 80-hour rolling 28-day average
    EightyHour,
    /// 24+4 continuous duty limit
    TwentyFourPlusFour,
    /// 10-hour rest after a 24-hour shift
    RestPeriod,
    /// One 24-hour off-period per rolling 7 days
    OneInSeven,
    /// Supervision ratio shortfall on a block
    Supervision,
    /// Primary assignment during a blocking absence
    AssignmentDuringBlock,
    /// Assignment inside a post-absence recovery window
    RecoveryPeriod,
    /// Duplicate primary (block, person) pair
    DuplicateAssignment,
    /// Swap precondition failure
    SwapRule,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EightyHour => "80_hour",
            Self::TwentyFourPlusFour => "24_plus_4",
            Self::RestPeriod => "rest_period",
            Self::OneInSeven => "one_in_seven",
            Self::Supervision => "supervision",
            Self::AssignmentDuringBlock => "assignment_during_block",
            Self::RecoveryPeriod => "recovery_period",
            Self::DuplicateAssignment => "duplicate_assignment",
            Self::SwapRule => "swap_rule",
        }
    }

    /// All rule kinds, in the engine's declared validation order
    pub fn all() -> Vec<Self> {
        vec![
            Self::EightyHour,
            Self::TwentyFourPlusFour,
            Self::RestPeriod,
            Self::OneInSeven,
            Self::Supervision,
            Self::AssignmentDuringBlock,
            Self::RecoveryPeriod,
            Self::DuplicateAssignment,
            Self::SwapRule,
        ]
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Violation
// ============================================================================

/// A single constraint violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Rule violated
    pub rule: RuleKind,

    /// Severity level
    pub severity: Severity,

    /// Person the violation concerns, when attributable
    pub person_id: Option<Id>,

    /// Date range the violation spans (inclusive)
    pub date_range: (NaiveDate, NaiveDate),

    /// Human-readable description
    pub message: String,

    /// Percentage over the limit, for threshold-based rules
    pub violation_percentage: Option<f64>,
}

impl Violation {
    /// Create a violation for a single date
    pub fn on_date(
        rule: RuleKind,
        severity: Severity,
        person_id: Option<Id>,
        date: NaiveDate,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            severity,
            person_id,
            date_range: (date, date),
            message: message.into(),
            violation_percentage: None,
        }
    }

    /// Create a violation spanning a date range
    pub fn spanning(
        rule: RuleKind,
        severity: Severity,
        person_id: Option<Id>,
        start: NaiveDate,
        end: NaiveDate,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            severity,
            person_id,
            date_range: (start, end),
            message: message.into(),
            violation_percentage: None,
        }
    }

    /// Attach the percentage-over-limit
    pub fn with_percentage(mut self, pct: f64) -> Self {
        self.violation_percentage = Some(pct);
        self
    }
}

// ============================================================================
// Warnings
// ============================================================================

/// Projected-hours notification ladder for the 80-hour rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HourAlertLevel {
    /// 75+ projected weekly hours
    Yellow,
    /// 78+ projected weekly hours
    Orange,
    /// At or over the 80-hour limit
    Red,
}

impl HourAlertLevel {
    /// Classify projected weekly hours, if they reach any threshold
    pub fn from_weekly_hours(hours: f64) -> Option<Self> {
        if hours >= 80.0 {
            Some(Self::Red)
        } else if hours >= 78.0 {
            Some(Self::Orange)
        } else if hours >= 75.0 {
            Some(Self::Yellow)
        } else {
            None
        }
    }
}

/// Kind of non-blocking warning raised by a validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Weekly hours approaching the 80-hour limit
    ApproachingHourLimit,
    /// Extended shift in the 26-28 h band
    ExtendedShift,
    /// Tentative return date within 7 days
    TentativeReturn,
    /// In-house call more often than every 3rd night
    CallFrequency,
    /// Long run of consecutive duty days
    ConsecutiveDays,
    /// High weekly moonlighting load
    Moonlighting,
    /// Swap would create or deepen call-count inequity
    EquityConcern,
}

/// A non-blocking warning (never affects `valid`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineWarning {
    /// Kind of warning
    pub kind: WarningKind,

    /// Person concerned, when attributable
    pub person_id: Option<Id>,

    /// Human-readable description
    pub message: String,

    /// Alert level for hour-ladder warnings
    pub alert_level: Option<HourAlertLevel>,
}

impl EngineWarning {
    pub fn new(kind: WarningKind, person_id: Option<Id>, message: impl Into<String>) -> Self {
        Self {
            kind,
            person_id,
            message: message.into(),
            alert_level: None,
        }
    }

    pub fn with_alert_level(mut self, level: HourAlertLevel) -> Self {
        self.alert_level = Some(level);
        self
    }
}
