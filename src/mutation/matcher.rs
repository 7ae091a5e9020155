//! Swap matching: pairing compatible pending requests
//!
//! Pairs of pending swaps are scored by a compatibility function with four
//! components: date proximity, symmetric coverage (each side wants what
//! the other offers), training-year compatibility, and equity impact from
//! the parties' call-count gaps. Scores land in [0, 1]; a minimum
//! threshold filters candidates before ranking.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::models::{Id, Person, Swap};

/// Requests further apart than this never match
pub const MAX_DATE_SEPARATION_DAYS: i64 = 60;

/// Minimum compatibility score to surface a match
pub const MIN_COMPATIBILITY_SCORE: f64 = 0.5;

/// Source weeks starting within this many days are urgent
pub const URGENT_WINDOW_DAYS: i64 = 14;

// Component weights
const WEIGHT_DATE: f64 = 0.3;
const WEIGHT_COVERAGE: f64 = 0.3;
const WEIGHT_TRAINING: f64 = 0.2;
const WEIGHT_EQUITY: f64 = 0.2;

// ============================================================================
// Results
// ============================================================================

/// Urgency of a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPriority {
    Normal,
    High,
}

/// One ranked counterparty for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMatch {
    /// The counterparty request
    pub candidate_id: Id,

    /// Compatibility in [0, 1]
    pub compatibility_score: f64,

    /// Urgency derived from how soon the source week starts
    pub priority: MatchPriority,
}

/// Outcome of one auto-match pass over all pending requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoMatchReport {
    pub total_requests_processed: usize,
    pub total_matches_found: usize,

    /// Matched request pairs
    pub matched: Vec<(Id, Id)>,

    /// Requests with no compatible counterparty
    pub no_match: Vec<Id>,

    /// Unmatched requests whose source week is imminent
    pub high_priority: Vec<Id>,
}

// ============================================================================
// Matcher
// ============================================================================

/// Scores and pairs pending swap requests
#[derive(Debug, Clone)]
pub struct SwapMatcher {
    pub max_date_separation_days: i64,
    pub min_score: f64,
}

impl Default for SwapMatcher {
    fn default() -> Self {
        Self {
            max_date_separation_days: MAX_DATE_SEPARATION_DAYS,
            min_score: MIN_COMPATIBILITY_SCORE,
        }
    }
}

impl SwapMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compatibility of two pending requests in [0, 1]
    ///
    /// Requests from the same person never match.
    pub fn compatibility(
        &self,
        request: &Swap,
        candidate: &Swap,
        persons: &HashMap<Id, Person>,
    ) -> f64 {
        if request.source_person_id == candidate.source_person_id {
            return 0.0;
        }

        let date_score = self.date_proximity(request.source_week, candidate.source_week);
        if date_score == 0.0 {
            return 0.0;
        }

        let coverage_score = self.symmetric_coverage(request, candidate);
        let training_score = self.training_compatibility(request, candidate, persons);
        let equity_score = self.equity_component(request, candidate, persons);

        WEIGHT_DATE * date_score
            + WEIGHT_COVERAGE * coverage_score
            + WEIGHT_TRAINING * training_score
            + WEIGHT_EQUITY * equity_score
    }

    /// Top-k counterparties for one request, ranked by score descending
    pub fn suggest_optimal_matches(
        &self,
        request_id: &Id,
        pending: &[Swap],
        persons: &HashMap<Id, Person>,
        top_k: usize,
    ) -> Result<Vec<RankedMatch>, ValidationError> {
        let request = pending
            .iter()
            .find(|s| &s.id == request_id)
            .ok_or_else(|| ValidationError::not_found("swap request", request_id))?;

        let today = chrono::Utc::now().date_naive();
        let mut matches: Vec<RankedMatch> = pending
            .iter()
            .filter(|candidate| candidate.id != request.id)
            .filter_map(|candidate| {
                let score = self.compatibility(request, candidate, persons);
                (score >= self.min_score).then(|| RankedMatch {
                    candidate_id: candidate.id.clone(),
                    compatibility_score: score,
                    priority: self.priority_for(candidate, today),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.compatibility_score
                .partial_cmp(&a.compatibility_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    /// Single pass over all pending requests: pair each unmatched request
    /// with its best available counterparty
    pub fn auto_match_pending_requests(
        &self,
        pending: &[Swap],
        persons: &HashMap<Id, Person>,
        today: NaiveDate,
    ) -> AutoMatchReport {
        // Oldest requests get first pick
        let mut order: Vec<&Swap> = pending.iter().collect();
        order.sort_by_key(|s| (s.requested_at, s.id.clone()));

        let mut taken: HashSet<Id> = HashSet::new();
        let mut report = AutoMatchReport {
            total_requests_processed: pending.len(),
            ..Default::default()
        };

        for request in &order {
            if taken.contains(&request.id) {
                continue;
            }

            let best = order
                .iter()
                .filter(|candidate| {
                    candidate.id != request.id && !taken.contains(&candidate.id)
                })
                .filter_map(|candidate| {
                    let score = self.compatibility(request, candidate, persons);
                    (score >= self.min_score).then_some((candidate.id.clone(), score))
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((partner, score)) => {
                    tracing::debug!(
                        request = %request.id,
                        partner = %partner,
                        score,
                        "auto-matched swap pair"
                    );
                    taken.insert(request.id.clone());
                    taken.insert(partner.clone());
                    report.matched.push((request.id.clone(), partner));
                    report.total_matches_found += 1;
                }
                None => {
                    report.no_match.push(request.id.clone());
                    if self.priority_for(request, today) == MatchPriority::High {
                        report.high_priority.push(request.id.clone());
                    }
                }
            }
        }

        report
    }

    fn date_proximity(&self, a: NaiveDate, b: NaiveDate) -> f64 {
        let distance = (a - b).num_days().abs();
        if distance >= self.max_date_separation_days {
            0.0
        } else {
            1.0 - distance as f64 / self.max_date_separation_days as f64
        }
    }

    /// Full marks when each side's offered week is the other's wanted week
    fn symmetric_coverage(&self, request: &Swap, candidate: &Swap) -> f64 {
        let request_wants_candidate = request.target_week == Some(candidate.source_week);
        let candidate_wants_request = candidate.target_week == Some(request.source_week);

        match (request_wants_candidate, candidate_wants_request) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.5,
            (false, false) => 0.0,
        }
    }

    fn training_compatibility(
        &self,
        request: &Swap,
        candidate: &Swap,
        persons: &HashMap<Id, Person>,
    ) -> f64 {
        let (Some(a), Some(b)) = (
            persons.get(&request.source_person_id),
            persons.get(&candidate.source_person_id),
        ) else {
            return 0.0;
        };

        match (a.pgy_level, b.pgy_level) {
            // Faculty swap freely with faculty
            (None, None) => 1.0,
            (Some(x), Some(y)) if x == y => 1.0,
            (Some(x), Some(y)) if x.abs_diff(y) == 1 => 0.7,
            (Some(_), Some(_)) => 0.4,
            // Resident/faculty pairs rarely carry the same duties
            _ => 0.2,
        }
    }

    fn equity_component(
        &self,
        request: &Swap,
        candidate: &Swap,
        persons: &HashMap<Id, Person>,
    ) -> f64 {
        let (Some(a), Some(b)) = (
            persons.get(&request.source_person_id),
            persons.get(&candidate.source_person_id),
        ) else {
            return 0.5;
        };

        let sunday_gap = a.sunday_call_count.abs_diff(b.sunday_call_count);
        let weekday_gap = a.weekday_call_count.abs_diff(b.weekday_call_count);
        1.0 - ((sunday_gap + weekday_gap) as f64 / 10.0).min(1.0)
    }

    fn priority_for(&self, swap: &Swap, today: NaiveDate) -> MatchPriority {
        if (swap.source_week - today).num_days() <= URGENT_WINDOW_DAYS {
            MatchPriority::High
        } else {
            MatchPriority::Normal
        }
    }
}
