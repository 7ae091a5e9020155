//! Incremental roster construction state shared by the strategies
//!
//! Tracks per-resident load, assigned dates, and faculty supervision load
//! while a strategy builds up an assignment list, and answers the cheap
//! feasibility questions every strategy asks (availability already handled
//! by the context, 1-in-7 streaks, session double-booking).

use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;

use super::context::{AssignmentFactory, SolveContext};
use crate::models::{Assignment, Block, Id, Session};

/// Mutable construction state for one solve
pub struct RosterState {
    /// Duty hours accumulated per resident index
    pub hours: Vec<f64>,

    /// Dates each resident is assigned, per resident index
    assigned_dates: Vec<BTreeSet<NaiveDate>>,

    /// Sessions each resident holds, per resident index
    assigned_sessions: Vec<BTreeSet<(NaiveDate, Session)>>,

    /// Supervision blocks accumulated per faculty index
    pub faculty_load: Vec<u32>,

    /// Assignments constructed so far
    pub assignments: Vec<Assignment>,

    factory: AssignmentFactory,
}

impl RosterState {
    pub fn new(ctx: &SolveContext) -> Self {
        Self {
            hours: vec![0.0; ctx.residents.len()],
            assigned_dates: vec![BTreeSet::new(); ctx.residents.len()],
            assigned_sessions: vec![BTreeSet::new(); ctx.residents.len()],
            faculty_load: vec![0; ctx.faculty.len()],
            assignments: Vec::new(),
            factory: AssignmentFactory::new(),
        }
    }

    /// Whether the resident already holds this exact session
    pub fn holds_session(&self, resident_idx: usize, block: &Block) -> bool {
        self.assigned_sessions[resident_idx].contains(&(block.date, block.session))
    }

    /// Whether assigning `date` would give the resident 7 consecutive duty
    /// days
    pub fn would_break_one_in_seven(&self, resident_idx: usize, date: NaiveDate) -> bool {
        let dates = &self.assigned_dates[resident_idx];
        if dates.contains(&date) {
            return false; // already counted
        }

        // Count the contiguous streak this date would join
        let mut streak = 1;
        let mut cursor = date - Duration::days(1);
        while dates.contains(&cursor) {
            streak += 1;
            cursor -= Duration::days(1);
        }
        cursor = date + Duration::days(1);
        while dates.contains(&cursor) {
            streak += 1;
            cursor += Duration::days(1);
        }

        streak >= 7
    }

    /// Record a primary assignment for the resident at `resident_idx`
    pub fn record_primary(
        &mut self,
        ctx: &SolveContext,
        resident_idx: usize,
        block: &Block,
        template_id: Option<Id>,
        hours: f64,
    ) {
        let assignment = self.factory.primary(
            block.id.clone(),
            ctx.residents[resident_idx].id.clone(),
            template_id,
        );
        self.assignments.push(assignment);
        self.hours[resident_idx] += hours;
        self.assigned_dates[resident_idx].insert(block.date);
        self.assigned_sessions[resident_idx].insert((block.date, block.session));
    }

    /// Remove the most recent primary for backtracking search
    pub fn unrecord_last_primary(&mut self, ctx: &SolveContext, block: &Block, hours: f64) {
        let Some(assignment) = self.assignments.pop() else {
            return;
        };
        if let Some(idx) = ctx
            .residents
            .iter()
            .position(|r| r.id == assignment.person_id)
        {
            self.hours[idx] -= hours;
            self.assigned_sessions[idx].remove(&(block.date, block.session));
            // Only drop the date when no session remains on it
            let still_assigned = self.assigned_sessions[idx]
                .iter()
                .any(|(date, _)| *date == block.date);
            if !still_assigned {
                self.assigned_dates[idx].remove(&block.date);
            }
        }
    }

    /// Record a supervising assignment for the least-loaded faculty member;
    /// returns false when no faculty exists
    pub fn record_supervisor(&mut self, ctx: &SolveContext, block: &Block) -> bool {
        let Some((idx, _)) = self
            .faculty_load
            .iter()
            .enumerate()
            .min_by_key(|(idx, load)| (**load, *idx))
        else {
            return false;
        };

        let assignment = self
            .factory
            .supervising(block.id.clone(), ctx.faculty[idx].id.clone());
        self.assignments.push(assignment);
        self.faculty_load[idx] += 1;
        true
    }

    /// Fraction of blocks holding at least one primary assignment
    pub fn coverage(&self, ctx: &SolveContext) -> f64 {
        if ctx.blocks.is_empty() {
            return 1.0;
        }
        let covered: BTreeSet<&Id> = self
            .assignments
            .iter()
            .filter(|a| a.is_primary())
            .map(|a| &a.block_id)
            .collect();
        covered.len() as f64 / ctx.blocks.len() as f64
    }

    /// Objective: coverage minus a small load-imbalance penalty
    pub fn objective(&self, ctx: &SolveContext) -> f64 {
        let coverage = self.coverage(ctx);
        let imbalance = match (
            self.hours.iter().cloned().fold(f64::INFINITY, f64::min),
            self.hours.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ) {
            (min, max) if min.is_finite() && max > 0.0 => (max - min) / max,
            _ => 0.0,
        };
        coverage - 0.1 * imbalance
    }

    /// Consume the state, yielding the constructed assignments
    pub fn into_assignments(self) -> Vec<Assignment> {
        self.assignments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Person;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn ctx_with_one_resident() -> SolveContext {
        let persons = vec![
            Person::resident(id("r1"), "Alpha", 1),
            Person::faculty(id("f1"), "Stone"),
        ];
        let blocks: Vec<Block> = (0..14)
            .map(|i| {
                Block::new(
                    id(&format!("b{i}")),
                    d("2025-01-06") + Duration::days(i),
                    Session::Am,
                    i as u32 + 1,
                )
            })
            .collect();
        SolveContext::build(&persons, &blocks, &[], &[])
    }

    #[test]
    fn test_one_in_seven_streak_detection() {
        let ctx = ctx_with_one_resident();
        let mut roster = RosterState::new(&ctx);

        // Assign 6 consecutive days
        for i in 0..6 {
            let block = ctx.blocks[i].clone();
            roster.record_primary(&ctx, 0, &block, None, 6.0);
        }

        // Day 7 would complete an unbroken week
        assert!(roster.would_break_one_in_seven(0, d("2025-01-12")));
        // A later date with a gap is fine
        assert!(!roster.would_break_one_in_seven(0, d("2025-01-14")));
    }

    #[test]
    fn test_streak_detection_joins_both_sides() {
        let ctx = ctx_with_one_resident();
        let mut roster = RosterState::new(&ctx);

        // Days 1-3 and 5-7 assigned; day 4 would bridge into a 7-day streak
        for i in [0usize, 1, 2, 4, 5, 6] {
            let block = ctx.blocks[i].clone();
            roster.record_primary(&ctx, 0, &block, None, 6.0);
        }
        assert!(roster.would_break_one_in_seven(0, d("2025-01-09")));
    }

    #[test]
    fn test_supervisor_picks_least_loaded() {
        let persons = vec![
            Person::resident(id("r1"), "Alpha", 1),
            Person::faculty(id("f1"), "Stone"),
            Person::faculty(id("f2"), "Vale"),
        ];
        let blocks = vec![
            Block::new(id("b1"), d("2025-01-06"), Session::Am, 1),
            Block::new(id("b2"), d("2025-01-06"), Session::Pm, 2),
        ];
        let ctx = SolveContext::build(&persons, &blocks, &[], &[]);
        let mut roster = RosterState::new(&ctx);

        assert!(roster.record_supervisor(&ctx, &ctx.blocks[0].clone()));
        assert!(roster.record_supervisor(&ctx, &ctx.blocks[1].clone()));
        // Both faculty carry one block each
        assert_eq!(roster.faculty_load, vec![1, 1]);
    }

    #[test]
    fn test_coverage_and_objective() {
        let ctx = ctx_with_one_resident();
        let mut roster = RosterState::new(&ctx);
        assert_eq!(roster.coverage(&ctx), 0.0);

        let block = ctx.blocks[0].clone();
        roster.record_primary(&ctx, 0, &block, None, 6.0);
        assert!((roster.coverage(&ctx) - 1.0 / 14.0).abs() < 1e-9);
        assert!(roster.objective(&ctx) > 0.0);
    }

    #[test]
    fn test_backtracking_unrecord() {
        let ctx = ctx_with_one_resident();
        let mut roster = RosterState::new(&ctx);
        let block = ctx.blocks[0].clone();

        roster.record_primary(&ctx, 0, &block, None, 6.0);
        assert_eq!(roster.assignments.len(), 1);
        assert_eq!(roster.hours[0], 6.0);

        roster.unrecord_last_primary(&ctx, &block, 6.0);
        assert!(roster.assignments.is_empty());
        assert_eq!(roster.hours[0], 0.0);
        assert!(!roster.would_break_one_in_seven(0, block.date));
    }
}
