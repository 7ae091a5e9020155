//! Property suite over the core invariants

mod common;

use common::{d, id, staffed_inputs};
use proptest::prelude::*;
use std::time::Duration;

use rota::cache::TieredCache;
use rota::engine::{MoonlightingHours, RuleKind, Severity, ValidationContext, Violation};
use rota::evaluator::Evaluator;
use rota::generator::{Algorithm, CandidateGenerator, GeneratorConfig, GeneratorParams};
use rota::models::{Assignment, Person};

fn algorithm_strategy() -> impl Strategy<Value = Algorithm> {
    prop_oneof![
        Just(Algorithm::Greedy),
        Just(Algorithm::CpSearch),
        Just(Algorithm::Milp),
        Just(Algorithm::Hybrid),
    ]
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        Just(Severity::Critical),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No generated candidate ever contains a duplicate primary
    /// (block, person) pair
    #[test]
    fn generated_candidates_have_unique_primary_pairs(
        residents in 1usize..5,
        days in 1i64..10,
        seed in any::<u64>(),
        algorithm in algorithm_strategy(),
    ) {
        let inputs = staffed_inputs(d("2025-01-06"), days, residents);
        let generator = CandidateGenerator::new(inputs, GeneratorConfig::default());
        let params = GeneratorParams::for_algorithm(algorithm).with_seed(seed);

        if let Some(candidate) = generator.generate_single(&params).unwrap() {
            let mut seen = std::collections::HashSet::new();
            for assignment in candidate.assignments.iter().filter(|a| a.is_primary()) {
                prop_assert!(
                    seen.insert((assignment.block_id.clone(), assignment.person_id.clone())),
                    "duplicate primary pair from {algorithm}"
                );
            }
        }
    }

    /// valid ⇔ no CRITICAL and no HIGH violation
    #[test]
    fn validity_matches_severity_census(severities in prop::collection::vec(severity_strategy(), 0..40)) {
        let persons = vec![Person::resident(id("res-0"), "Resident 0", 1)];
        let moonlighting = MoonlightingHours::new();
        let ctx = ValidationContext::new(&persons, &[], &[], &[], &[], &[], &moonlighting);

        let violations: Vec<Violation> = severities
            .iter()
            .map(|severity| {
                Violation::on_date(
                    RuleKind::EightyHour,
                    *severity,
                    Some(id("res-0")),
                    d("2025-01-06"),
                    "synthetic",
                )
            })
            .collect();

        let result = Evaluator::new().evaluate_with_expected(&violations, &[], &ctx, 50);

        let has_blocking = severities
            .iter()
            .any(|s| matches!(s, Severity::Critical | Severity::High));
        prop_assert_eq!(result.valid, !has_blocking);
        prop_assert!((0.0..=1.0).contains(&result.score));
        prop_assert_eq!(result.total_violations(), severities.len());
    }

    /// Identical inputs and identical seed produce bit-identical candidates
    #[test]
    fn generation_is_deterministic_per_seed(
        seed in any::<u64>(),
        algorithm in algorithm_strategy(),
    ) {
        let params = GeneratorParams::for_algorithm(algorithm).with_seed(seed);

        let serialize = |assignments: &[Assignment]| serde_json::to_string(assignments).unwrap();

        let first = {
            let generator = CandidateGenerator::new(
                staffed_inputs(d("2025-01-06"), 7, 3),
                GeneratorConfig::default(),
            );
            generator.generate_single(&params).unwrap().map(|c| serialize(&c.assignments))
        };
        let second = {
            let generator = CandidateGenerator::new(
                staffed_inputs(d("2025-01-06"), 7, 3),
                GeneratorConfig::default(),
            );
            generator.generate_single(&params).unwrap().map(|c| serialize(&c.assignments))
        };

        prop_assert_eq!(first, second);
    }

    /// set(k, v, ttl, tags); invalidate_by_tag(t ∈ tags); get(k) is a miss
    #[test]
    fn tag_invalidation_always_evicts(
        key_stem in "[a-z]{1,12}",
        value in any::<i64>(),
        tags in prop::collection::vec("[a-z]{1,8}", 1..4),
        tag_index in any::<prop::sample::Index>(),
    ) {
        tokio_test::block_on(async {
            let cache = TieredCache::in_memory_only(64);
            let key = format!("rota:test:{key_stem}");

            cache.set(&key, &value, Duration::from_secs(60), &tags).await;
            assert_eq!(cache.get::<i64>(&key).await, Some(value));

            let tag = &tags[tag_index.index(tags.len())];
            cache.invalidate_by_tag(tag).await;

            assert_eq!(cache.get::<i64>(&key).await, None, "entry survived tag invalidation");
        });
    }

    /// The evaluator's deficit score matches its closed form
    #[test]
    fn score_matches_weighted_deficit(
        criticals in 0usize..10,
        highs in 0usize..10,
        mediums in 0usize..10,
        lows in 0usize..10,
        expected in 1usize..100,
    ) {
        let persons = vec![Person::resident(id("res-0"), "Resident 0", 1)];
        let moonlighting = MoonlightingHours::new();
        let ctx = ValidationContext::new(&persons, &[], &[], &[], &[], &[], &moonlighting);

        let mut violations = Vec::new();
        for (count, severity) in [
            (criticals, Severity::Critical),
            (highs, Severity::High),
            (mediums, Severity::Medium),
            (lows, Severity::Low),
        ] {
            for _ in 0..count {
                violations.push(Violation::on_date(
                    RuleKind::Supervision,
                    severity,
                    None,
                    d("2025-01-06"),
                    "synthetic",
                ));
            }
        }

        let result = Evaluator::new().evaluate_with_expected(&violations, &[], &ctx, expected);

        let deficit = criticals as f64 * 1.0
            + highs as f64 * 0.5
            + mediums as f64 * 0.2
            + lows as f64 * 0.05;
        let closed_form = (1.0 - deficit / expected as f64).clamp(0.0, 1.0);
        prop_assert!((result.score - closed_form).abs() < 1e-9);
    }
}
