//! Resilience scenarios: fallback activation speed, contingency sweeps,
//! utilization bands

mod common;

use common::{d, id, staffed_inputs};
use std::collections::HashSet;
use std::time::Instant;

use rota::models::Id;
use rota::resilience::{
    ContingencyAnalyzer, ContingencyConfig, DefenseLevel, DefensePosture, FallbackScenario,
    FallbackScheduler, UtilizationLevel, UtilizationMonitor,
};

fn precomputed_scheduler() -> FallbackScheduler {
    let mut scheduler = FallbackScheduler::new();
    for scenario in FallbackScenario::all() {
        let assignments: Vec<serde_json::Value> = (0..40)
            .map(|i| {
                serde_json::json!({
                    "block_id": format!("blk-{i}"),
                    "person_id": format!("fac-{}", i % 4),
                    "rotation_template_id": null,
                    "role": "primary",
                })
            })
            .collect();
        scheduler.precompute(
            scenario,
            d("2025-01-01"),
            d("2025-12-31"),
            assignments,
            vec!["remaining staff at full availability".to_string()],
            40,
        );
    }
    scheduler
}

/// Activating any of the seven precomputed fallbacks is an O(1) lookup:
/// well under 10ms cold, with flags and counters updated
#[test]
fn fallback_activation_is_constant_time() {
    let mut scheduler = precomputed_scheduler();

    for scenario in FallbackScenario::all() {
        let started = Instant::now();
        let fallback = scheduler.activate(scenario, d("2025-06-01")).unwrap();
        let elapsed = started.elapsed();

        assert!(
            elapsed.as_millis() < 10,
            "{} activation took {elapsed:?}",
            scenario.as_str()
        );
        assert!(fallback.is_active);
        assert_eq!(fallback.activation_count, 1);
        assert!(fallback.last_activated.is_some());
    }

    assert_eq!(scheduler.active_fallbacks().len(), 7);
}

/// Activation outside the validity window warns but never fails
#[test]
fn expired_fallback_still_activates() {
    let mut scheduler = precomputed_scheduler();
    let fallback = scheduler
        .activate(FallbackScenario::WeatherEmergency, d("2031-07-04"))
        .unwrap();
    assert!(fallback.is_active);
}

/// The recommendation table picks scenarios by situation
#[test]
fn fallback_recommendation_table() {
    let scheduler = precomputed_scheduler();

    assert_eq!(
        scheduler.best_fallback_for_situation(0, false, false, true),
        Some(FallbackScenario::MassCasualty)
    );
    assert_eq!(
        scheduler.best_fallback_for_situation(7, true, false, false),
        Some(FallbackScenario::PcsSeason50Percent)
    );
    assert_eq!(
        scheduler.best_fallback_for_situation(1, false, false, false),
        Some(FallbackScenario::SingleFacultyLoss)
    );
    assert_eq!(
        scheduler.best_fallback_for_situation(0, false, false, false),
        None
    );
}

/// N−1 over a healthy program finds no fatal person; dropping to a single
/// resident makes that resident fatal
#[test]
fn n_minus_1_fatality_depends_on_slack() {
    let healthy = ContingencyAnalyzer::new(
        staffed_inputs(d("2025-01-06"), 10, 4),
        ContingencyConfig::default(),
    );
    assert!(healthy.n_minus_1().fatal_persons.is_empty());

    let fragile = ContingencyAnalyzer::new(
        staffed_inputs(d("2025-01-06"), 10, 1),
        ContingencyConfig::default(),
    );
    let report = fragile.n_minus_1();
    assert!(report.fatal_persons.contains(&id("res-0")));

    let impact = report
        .impacts
        .iter()
        .find(|i| i.person_id == id("res-0"))
        .unwrap();
    assert!(!impact.feasible);
    assert!(!impact.uncoverable_blocks.is_empty());
}

/// N−2 restricted to faculty checks exactly the faculty pairs
#[test]
fn n_minus_2_faculty_pair_sweep() {
    let analyzer = ContingencyAnalyzer::new(
        staffed_inputs(d("2025-01-06"), 10, 3),
        ContingencyConfig::default(),
    );
    let report = analyzer.n_minus_2();
    // Two faculty in the fixture: a single ordered pair
    assert_eq!(report.pairs_checked, 1);
}

/// Cascade simulation: ample slack absorbs a seed failure; tight capacity
/// propagates it
#[test]
fn cascade_depends_on_capacity() {
    let roomy = ContingencyAnalyzer::new(
        staffed_inputs(d("2025-01-06"), 10, 5),
        ContingencyConfig::default(),
    );
    let report = roomy.simulate_cascade(&id("res-0"));
    assert!(!report.cascade_occurred);

    let tight = ContingencyAnalyzer::new(
        staffed_inputs(d("2025-01-06"), 10, 2),
        ContingencyConfig {
            safe_blocks_per_person: 3,
            ..Default::default()
        },
    );
    let report = tight.simulate_cascade(&id("res-0"));
    assert!(report.cascade_occurred);
}

/// Utilization bands, multipliers, and defense escalation line up
#[test]
fn utilization_bands_drive_defense_levels() {
    let monitor = UtilizationMonitor::new();

    let report = monitor.assess(50, 100);
    assert_eq!(report.level, UtilizationLevel::Green);
    assert_eq!(report.wait_time_multiplier, 1.0);

    let report = monitor.assess(93, 100);
    assert_eq!(report.level, UtilizationLevel::Red);

    let posture = DefensePosture::evaluate(DefenseLevel::Prevention, report.level, 0);
    assert_eq!(posture.recommended, DefenseLevel::Containment);
    assert!(posture.escalation_needed);

    let report = monitor.assess(99, 100);
    assert_eq!(report.level, UtilizationLevel::Black);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("fallback")));
}

/// Zone health reflects who is actually available
#[test]
fn zone_health_tracks_availability() {
    let mut scheduler = FallbackScheduler::new();
    scheduler.create_zone(rota::resilience::SchedulingZone {
        id: id("zone-inpatient"),
        name: "inpatient".to_string(),
        services: vec!["FMIT".to_string()],
        dedicated_persons: vec![id("fac-0"), id("fac-1")],
        backup_persons: vec![id("fac-2")],
        minimum_coverage: 2,
    });

    let all: HashSet<Id> = [id("fac-0"), id("fac-1"), id("fac-2")].into_iter().collect();
    assert_eq!(scheduler.zone_health(&all)[0].status, "GREEN");

    let degraded: HashSet<Id> = [id("fac-0"), id("fac-2")].into_iter().collect();
    assert_eq!(scheduler.zone_health(&degraded)[0].status, "YELLOW");

    let empty: HashSet<Id> = [id("fac-0")].into_iter().collect();
    assert_eq!(scheduler.zone_health(&empty)[0].status, "RED");
}
