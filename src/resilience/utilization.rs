//! Utilization monitoring and defense levels
//!
//! Classifies effective utilization into five bands with fixed thresholds
//! (green <70%, yellow 70-80%, orange 80-90%, red 90-95%, black ≥95%),
//! each carrying a wait-time multiplier for admission control and a
//! recommendation list. Defense levels mirror an ordered escalation ladder
//! from prevention through emergency.

use serde::{Deserialize, Serialize};

// ============================================================================
// Utilization Levels
// ============================================================================

/// Utilization band with fixed thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtilizationLevel {
    /// Below 70%
    Green,
    /// 70-80%
    Yellow,
    /// 80-90%
    Orange,
    /// 90-95%
    Red,
    /// 95% and above
    Black,
}

impl UtilizationLevel {
    /// Classify a utilization ratio
    pub fn classify(utilization: f64) -> Self {
        if utilization >= 0.95 {
            Self::Black
        } else if utilization >= 0.90 {
            Self::Red
        } else if utilization >= 0.80 {
            Self::Orange
        } else if utilization >= 0.70 {
            Self::Yellow
        } else {
            Self::Green
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
            Self::Black => "black",
        }
    }

    /// Wait-time multiplier applied by admission control at this level
    pub fn wait_time_multiplier(&self) -> f64 {
        match self {
            Self::Green => 1.0,
            Self::Yellow => 1.5,
            Self::Orange => 2.5,
            Self::Red => 5.0,
            Self::Black => 10.0,
        }
    }

    /// Operator recommendations for this level
    pub fn recommendations(&self) -> Vec<&'static str> {
        match self {
            Self::Green => vec!["normal operations"],
            Self::Yellow => vec![
                "monitor closely",
                "defer non-urgent schedule changes",
            ],
            Self::Orange => vec![
                "pause elective additions",
                "review backup coverage",
                "prepare fallback schedules",
            ],
            Self::Red => vec![
                "activate backup coverage",
                "reduce elective services",
                "consider fallback activation",
            ],
            Self::Black => vec![
                "activate fallback schedule",
                "essential services only",
                "escalate to leadership",
            ],
        }
    }
}

/// Snapshot of current capacity pressure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReport {
    /// assignments / safe maximum
    pub effective_utilization: f64,

    pub level: UtilizationLevel,
    pub wait_time_multiplier: f64,
    pub recommendations: Vec<String>,

    /// Raw counts behind the ratio
    pub assignments: usize,
    pub safe_maximum: usize,
}

/// Computes effective utilization against a safe maximum
#[derive(Debug, Clone, Default)]
pub struct UtilizationMonitor;

impl UtilizationMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Assess current load; a zero safe maximum counts as saturated
    pub fn assess(&self, assignments: usize, safe_maximum: usize) -> UtilizationReport {
        let effective_utilization = if safe_maximum == 0 {
            1.0
        } else {
            assignments as f64 / safe_maximum as f64
        };

        let level = UtilizationLevel::classify(effective_utilization);
        if level >= UtilizationLevel::Orange {
            tracing::warn!(
                utilization = effective_utilization,
                level = level.as_str(),
                "utilization elevated"
            );
        }

        UtilizationReport {
            effective_utilization,
            level,
            wait_time_multiplier: level.wait_time_multiplier(),
            recommendations: level
                .recommendations()
                .into_iter()
                .map(String::from)
                .collect(),
            assignments,
            safe_maximum,
        }
    }
}

// ============================================================================
// Defense Levels
// ============================================================================

/// Ordered defense-in-depth ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefenseLevel {
    Prevention,
    Control,
    SafetySystems,
    Containment,
    Emergency,
}

impl DefenseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prevention => "prevention",
            Self::Control => "control",
            Self::SafetySystems => "safety_systems",
            Self::Containment => "containment",
            Self::Emergency => "emergency",
        }
    }

    /// Level warranted by utilization and outstanding critical violations
    pub fn recommended_for(utilization: UtilizationLevel, critical_violations: usize) -> Self {
        match utilization {
            UtilizationLevel::Green if critical_violations == 0 => Self::Prevention,
            UtilizationLevel::Green | UtilizationLevel::Yellow => Self::Control,
            UtilizationLevel::Orange => Self::SafetySystems,
            UtilizationLevel::Red => Self::Containment,
            UtilizationLevel::Black => Self::Emergency,
        }
    }
}

/// Current-versus-recommended defense posture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefensePosture {
    pub current: DefenseLevel,
    pub recommended: DefenseLevel,
    pub escalation_needed: bool,
}

impl DefensePosture {
    /// Evaluate the posture given the operating conditions
    pub fn evaluate(
        current: DefenseLevel,
        utilization: UtilizationLevel,
        critical_violations: usize,
    ) -> Self {
        let recommended = DefenseLevel::recommended_for(utilization, critical_violations);
        Self {
            current,
            recommended,
            escalation_needed: recommended > current,
        }
    }
}
