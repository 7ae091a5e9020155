//! Static fallback schedules and scheduling zones
//!
//! Fallbacks are pre-computed during calm periods and activated with an
//! O(1) lookup plus flag flip when a crisis hits: no generation runs on the
//! hot path. Each fallback carries its assumptions, the services it
//! reduces, and a coverage rate. Zones partition services and people so a
//! failure's blast radius stays contained.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::Id;

// ============================================================================
// Fallback Scenarios
// ============================================================================

/// Pre-defined crisis scenarios with pre-computed schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScenario {
    SingleFacultyLoss,
    DoubleFacultyLoss,
    PcsSeason50Percent,
    HolidaySkeleton,
    PandemicEssential,
    MassCasualty,
    WeatherEmergency,
}

impl FallbackScenario {
    pub fn all() -> Vec<Self> {
        vec![
            Self::SingleFacultyLoss,
            Self::DoubleFacultyLoss,
            Self::PcsSeason50Percent,
            Self::HolidaySkeleton,
            Self::PandemicEssential,
            Self::MassCasualty,
            Self::WeatherEmergency,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleFacultyLoss => "single_faculty_loss",
            Self::DoubleFacultyLoss => "double_faculty_loss",
            Self::PcsSeason50Percent => "pcs_season_50_percent",
            Self::HolidaySkeleton => "holiday_skeleton",
            Self::PandemicEssential => "pandemic_essential",
            Self::MassCasualty => "mass_casualty",
            Self::WeatherEmergency => "weather_emergency",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SingleFacultyLoss => "Single Faculty Loss",
            Self::DoubleFacultyLoss => "Double Faculty Loss",
            Self::PcsSeason50Percent => "PCS Season (50% Capacity)",
            Self::HolidaySkeleton => "Holiday Skeleton Crew",
            Self::PandemicEssential => "Pandemic Essential Only",
            Self::MassCasualty => "Mass Casualty Event",
            Self::WeatherEmergency => "Weather Emergency",
        }
    }

    /// Services reduced or suspended under this scenario
    pub fn reduced_services(&self) -> Vec<&'static str> {
        match self {
            Self::SingleFacultyLoss => vec![],
            Self::DoubleFacultyLoss => vec!["elective_procedures"],
            Self::PcsSeason50Percent => {
                vec!["research_time", "optional_education", "non_urgent_clinics"]
            }
            Self::HolidaySkeleton => vec!["all_non_essential", "education", "research", "admin"],
            Self::PandemicEssential => {
                vec!["all_non_essential", "elective_procedures", "routine_clinics"]
            }
            Self::MassCasualty => vec!["all_non_emergency"],
            Self::WeatherEmergency => vec!["non_essential", "elective_procedures"],
        }
    }
}

// ============================================================================
// Fallback Schedule
// ============================================================================

/// A pre-computed schedule for one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSchedule {
    pub id: Id,
    pub scenario: FallbackScenario,
    pub name: String,
    pub created_at: DateTime<Utc>,

    /// Advisory validity window
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,

    /// Pre-built assignment rows (block, person, rotation, role)
    pub assignments: Vec<serde_json::Value>,

    /// Stated planning assumptions
    pub assumptions: Vec<String>,

    /// Services reduced under this fallback
    pub services_reduced: Vec<String>,

    /// Fraction of normal coverage this fallback provides
    pub coverage_rate: f64,

    // Activation bookkeeping
    pub is_active: bool,
    pub last_activated: Option<DateTime<Utc>>,
    pub activation_count: u32,
}

// ============================================================================
// Scheduling Zones
// ============================================================================

/// An isolated scheduling unit that can operate independently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingZone {
    pub id: Id,
    pub name: String,

    /// Services this zone owns
    pub services: Vec<String>,

    /// People dedicated to the zone
    pub dedicated_persons: Vec<Id>,

    /// Cross-trained backups who can step in
    pub backup_persons: Vec<Id>,

    /// Minimum dedicated coverage to stay self-sufficient
    pub minimum_coverage: usize,
}

impl SchedulingZone {
    /// Whether the zone runs without borrowing from outside
    pub fn is_self_sufficient(&self, available: &HashSet<Id>) -> bool {
        let dedicated_available = self
            .dedicated_persons
            .iter()
            .filter(|p| available.contains(*p))
            .count();
        dedicated_available >= self.minimum_coverage
    }
}

/// Traffic-light health of one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneHealth {
    pub zone: String,
    pub healthy: bool,
    pub dedicated_available: usize,
    pub dedicated_total: usize,
    pub backup_available: usize,
    pub minimum_required: usize,
    /// "GREEN" self-sufficient, "YELLOW" needs backups, "RED" uncovered
    pub status: String,
}

// ============================================================================
// Fallback Scheduler
// ============================================================================

/// Catalogue of pre-computed fallbacks and zones
///
/// Activation is an O(1) map lookup plus flag and counter writes. An
/// expired validity window logs a warning but never blocks activation.
#[derive(Debug, Default)]
pub struct FallbackScheduler {
    fallbacks: HashMap<FallbackScenario, FallbackSchedule>,
    zones: HashMap<Id, SchedulingZone>,
}

impl FallbackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pre-computed fallback for a scenario, replacing any previous
    /// schedule for that scenario
    pub fn precompute(
        &mut self,
        scenario: FallbackScenario,
        valid_from: NaiveDate,
        valid_until: NaiveDate,
        assignments: Vec<serde_json::Value>,
        assumptions: Vec<String>,
        expected_blocks: usize,
    ) -> &FallbackSchedule {
        let coverage_rate = if expected_blocks == 0 {
            if assignments.is_empty() {
                0.0
            } else {
                1.0
            }
        } else {
            (assignments.len() as f64 / expected_blocks as f64).min(1.0)
        };

        let fallback = FallbackSchedule {
            id: Id::generate(),
            scenario,
            name: scenario.display_name().to_string(),
            created_at: Utc::now(),
            valid_from,
            valid_until,
            assignments,
            assumptions,
            services_reduced: scenario
                .reduced_services()
                .into_iter()
                .map(String::from)
                .collect(),
            coverage_rate,
            is_active: false,
            last_activated: None,
            activation_count: 0,
        };

        tracing::info!(
            scenario = scenario.as_str(),
            assignments = fallback.assignments.len(),
            coverage = coverage_rate,
            "fallback pre-computed"
        );

        self.fallbacks.insert(scenario, fallback);
        self.fallbacks.get(&scenario).expect("just inserted")
    }

    /// Activate a fallback: O(1) lookup, flag flip, counter bump
    pub fn activate(&mut self, scenario: FallbackScenario, today: NaiveDate) -> Option<&FallbackSchedule> {
        let fallback = self.fallbacks.get_mut(&scenario)?;

        if today < fallback.valid_from || today > fallback.valid_until {
            tracing::warn!(
                scenario = scenario.as_str(),
                valid_from = %fallback.valid_from,
                valid_until = %fallback.valid_until,
                "activating fallback outside its validity window"
            );
        }

        fallback.is_active = true;
        fallback.last_activated = Some(Utc::now());
        fallback.activation_count += 1;

        tracing::warn!(
            scenario = scenario.as_str(),
            assignments = fallback.assignments.len(),
            coverage = fallback.coverage_rate,
            services_reduced = ?fallback.services_reduced,
            "FALLBACK ACTIVATED"
        );

        Some(&self.fallbacks[&scenario])
    }

    /// Deactivate and return to normal operations
    pub fn deactivate(&mut self, scenario: FallbackScenario) -> bool {
        match self.fallbacks.get_mut(&scenario) {
            Some(fallback) => {
                fallback.is_active = false;
                tracing::info!(scenario = scenario.as_str(), "fallback deactivated");
                true
            }
            None => false,
        }
    }

    /// Fallback for a scenario, if pre-computed
    pub fn get(&self, scenario: FallbackScenario) -> Option<&FallbackSchedule> {
        self.fallbacks.get(&scenario)
    }

    /// Remove a fallback from the catalogue
    pub fn remove(&mut self, scenario: FallbackScenario) -> Option<FallbackSchedule> {
        self.fallbacks.remove(&scenario)
    }

    /// All currently active fallbacks
    pub fn active_fallbacks(&self) -> Vec<&FallbackSchedule> {
        self.fallbacks.values().filter(|f| f.is_active).collect()
    }

    /// Register a zone
    pub fn create_zone(&mut self, zone: SchedulingZone) -> Id {
        let id = zone.id.clone();
        tracing::info!(zone = %zone.name, "scheduling zone created");
        self.zones.insert(id.clone(), zone);
        id
    }

    /// Zone health against current availability
    pub fn zone_health(&self, available: &HashSet<Id>) -> Vec<ZoneHealth> {
        let mut reports: Vec<ZoneHealth> = self
            .zones
            .values()
            .map(|zone| {
                let dedicated_available = zone
                    .dedicated_persons
                    .iter()
                    .filter(|p| available.contains(*p))
                    .count();
                let backup_available = zone
                    .backup_persons
                    .iter()
                    .filter(|p| available.contains(*p))
                    .count();
                let healthy = dedicated_available >= zone.minimum_coverage;

                let status = if healthy {
                    "GREEN"
                } else if dedicated_available + backup_available >= zone.minimum_coverage {
                    "YELLOW"
                } else {
                    "RED"
                };

                ZoneHealth {
                    zone: zone.name.clone(),
                    healthy,
                    dedicated_available,
                    dedicated_total: zone.dedicated_persons.len(),
                    backup_available,
                    minimum_required: zone.minimum_coverage,
                    status: status.to_string(),
                }
            })
            .collect();

        reports.sort_by(|a, b| a.zone.cmp(&b.zone));
        reports
    }

    /// Recommend the best scenario for the current situation
    pub fn best_fallback_for_situation(
        &self,
        faculty_loss_count: usize,
        is_pcs_season: bool,
        is_holiday: bool,
        is_emergency: bool,
    ) -> Option<FallbackScenario> {
        if is_emergency {
            return Some(FallbackScenario::MassCasualty);
        }
        if is_pcs_season && faculty_loss_count >= 5 {
            return Some(FallbackScenario::PcsSeason50Percent);
        }
        if is_holiday {
            return Some(FallbackScenario::HolidaySkeleton);
        }
        if faculty_loss_count >= 2 {
            return Some(FallbackScenario::DoubleFacultyLoss);
        }
        if faculty_loss_count >= 1 {
            return Some(FallbackScenario::SingleFacultyLoss);
        }
        None
    }

    /// Catalogue status for reporting
    pub fn status_report(&self) -> FallbackStatusReport {
        FallbackStatusReport {
            total_available: self.fallbacks.len(),
            active: self.active_fallbacks().len(),
            total_zones: self.zones.len(),
            scenarios: FallbackScenario::all()
                .into_iter()
                .map(|scenario| {
                    let entry = self.fallbacks.get(&scenario);
                    ScenarioStatus {
                        scenario,
                        available: entry.is_some(),
                        active: entry.map(|f| f.is_active).unwrap_or(false),
                        coverage_rate: entry.map(|f| f.coverage_rate),
                        activation_count: entry.map(|f| f.activation_count).unwrap_or(0),
                    }
                })
                .collect(),
        }
    }
}

/// Per-scenario slice of the status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStatus {
    pub scenario: FallbackScenario,
    pub available: bool,
    pub active: bool,
    pub coverage_rate: Option<f64>,
    pub activation_count: u32,
}

/// Catalogue-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackStatusReport {
    pub total_available: usize,
    pub active: usize,
    pub total_zones: usize,
    pub scenarios: Vec<ScenarioStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn precomputed() -> FallbackScheduler {
        let mut scheduler = FallbackScheduler::new();
        for scenario in FallbackScenario::all() {
            scheduler.precompute(
                scenario,
                d("2025-01-01"),
                d("2025-12-31"),
                vec![serde_json::json!({"block_id": "b1", "person_id": "p1", "role": "primary"})],
                vec!["all remaining staff available".to_string()],
                2,
            );
        }
        scheduler
    }

    #[test]
    fn test_precompute_coverage_rate() {
        let mut scheduler = FallbackScheduler::new();
        let fallback = scheduler.precompute(
            FallbackScenario::HolidaySkeleton,
            d("2025-12-20"),
            d("2026-01-05"),
            vec![serde_json::json!({}), serde_json::json!({})],
            Vec::new(),
            4,
        );
        assert!((fallback.coverage_rate - 0.5).abs() < 1e-9);
        assert!(!fallback.is_active);
    }

    #[test]
    fn test_activation_flags_and_counters() {
        let mut scheduler = precomputed();

        let fallback = scheduler
            .activate(FallbackScenario::SingleFacultyLoss, d("2025-06-01"))
            .unwrap();
        assert!(fallback.is_active);
        assert_eq!(fallback.activation_count, 1);
        assert!(fallback.last_activated.is_some());

        scheduler.activate(FallbackScenario::SingleFacultyLoss, d("2025-06-02"));
        assert_eq!(
            scheduler
                .get(FallbackScenario::SingleFacultyLoss)
                .unwrap()
                .activation_count,
            2
        );
    }

    #[test]
    fn test_expired_activation_succeeds_with_warning() {
        let mut scheduler = precomputed();
        // Way outside the validity window; still activates
        let fallback = scheduler
            .activate(FallbackScenario::WeatherEmergency, d("2030-01-01"))
            .unwrap();
        assert!(fallback.is_active);
    }

    #[test]
    fn test_activate_unknown_scenario() {
        let mut scheduler = FallbackScheduler::new();
        assert!(scheduler
            .activate(FallbackScenario::MassCasualty, d("2025-06-01"))
            .is_none());
    }

    #[test]
    fn test_deactivate() {
        let mut scheduler = precomputed();
        scheduler.activate(FallbackScenario::MassCasualty, d("2025-06-01"));
        assert_eq!(scheduler.active_fallbacks().len(), 1);

        assert!(scheduler.deactivate(FallbackScenario::MassCasualty));
        assert!(scheduler.active_fallbacks().is_empty());
    }

    #[test]
    fn test_zone_health_traffic_light() {
        let mut scheduler = FallbackScheduler::new();
        scheduler.create_zone(SchedulingZone {
            id: id("z1"),
            name: "inpatient".to_string(),
            services: vec!["FMIT".to_string()],
            dedicated_persons: vec![id("f1"), id("f2")],
            backup_persons: vec![id("f3")],
            minimum_coverage: 2,
        });

        // All present: GREEN
        let available: HashSet<Id> = [id("f1"), id("f2"), id("f3")].into_iter().collect();
        assert_eq!(scheduler.zone_health(&available)[0].status, "GREEN");

        // One dedicated lost, backup fills: YELLOW
        let available: HashSet<Id> = [id("f1"), id("f3")].into_iter().collect();
        assert_eq!(scheduler.zone_health(&available)[0].status, "YELLOW");

        // Nobody left: RED
        let available: HashSet<Id> = HashSet::new();
        assert_eq!(scheduler.zone_health(&available)[0].status, "RED");
    }

    #[test]
    fn test_best_fallback_recommendation() {
        let scheduler = precomputed();
        assert_eq!(
            scheduler.best_fallback_for_situation(0, false, false, true),
            Some(FallbackScenario::MassCasualty)
        );
        assert_eq!(
            scheduler.best_fallback_for_situation(6, true, false, false),
            Some(FallbackScenario::PcsSeason50Percent)
        );
        assert_eq!(
            scheduler.best_fallback_for_situation(0, false, true, false),
            Some(FallbackScenario::HolidaySkeleton)
        );
        assert_eq!(
            scheduler.best_fallback_for_situation(2, false, false, false),
            Some(FallbackScenario::DoubleFacultyLoss)
        );
        assert_eq!(
            scheduler.best_fallback_for_situation(1, false, false, false),
            Some(FallbackScenario::SingleFacultyLoss)
        );
        assert_eq!(scheduler.best_fallback_for_situation(0, false, false, false), None);
    }

    #[test]
    fn test_status_report_covers_all_scenarios() {
        let scheduler = precomputed();
        let report = scheduler.status_report();
        assert_eq!(report.total_available, 7);
        assert_eq!(report.scenarios.len(), 7);
        assert_eq!(report.active, 0);
    }
}
