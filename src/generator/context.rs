//! Solve context shared by every generator strategy
//!
//! Strategies receive a pre-built, deterministically ordered view of the
//! scheduling inputs: residents sorted by training year then name, blocks
//! sorted chronologically, active templates, and an availability matrix
//! derived from blocking absences and recovery windows. Identical inputs
//! always produce an identical context, which is what makes seeded solves
//! reproducible.

use chrono::{Duration, NaiveDate};
use std::collections::HashSet;

use crate::engine::LeaveValidator;
use crate::models::{
    Absence, Assignment, AssignmentRole, Block, Id, Person, RotationTemplate,
};

/// Deterministically ordered inputs for one solve
pub struct SolveContext {
    /// Residents, sorted by (pgy_level, name, id)
    pub residents: Vec<Person>,

    /// Faculty, sorted by (name, id)
    pub faculty: Vec<Person>,

    /// Blocks, sorted by (date, session, block_number)
    pub blocks: Vec<Block>,

    /// Active (non-archived) templates, sorted by id
    pub templates: Vec<RotationTemplate>,

    /// (resident index, date) pairs where assignment is forbidden
    unavailable: HashSet<(usize, NaiveDate)>,
}

impl SolveContext {
    /// Build a context from raw inputs
    pub fn build(
        persons: &[Person],
        blocks: &[Block],
        templates: &[RotationTemplate],
        absences: &[Absence],
    ) -> Self {
        let mut residents: Vec<Person> = persons.iter().filter(|p| p.is_resident()).cloned().collect();
        residents.sort_by(|a, b| {
            (a.pgy_level, &a.name, &a.id).cmp(&(b.pgy_level, &b.name, &b.id))
        });

        let mut faculty: Vec<Person> = persons.iter().filter(|p| p.is_faculty()).cloned().collect();
        faculty.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

        let mut blocks: Vec<Block> = blocks.to_vec();
        blocks.sort_by(|a, b| {
            (a.date, a.session, a.block_number).cmp(&(b.date, b.session, b.block_number))
        });

        let mut templates: Vec<RotationTemplate> =
            templates.iter().filter(|t| !t.is_archived()).cloned().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));

        let unavailable = Self::build_unavailability(&residents, absences);

        Self {
            residents,
            faculty,
            blocks,
            templates,
            unavailable,
        }
    }

    /// Whether the resident at `idx` may take a primary assignment on `date`
    pub fn is_available(&self, resident_idx: usize, date: NaiveDate) -> bool {
        !self.unavailable.contains(&(resident_idx, date))
    }

    /// Indices of residents available on `date`, in context order
    pub fn available_residents(&self, date: NaiveDate) -> Vec<usize> {
        (0..self.residents.len())
            .filter(|idx| self.is_available(*idx, date))
            .collect()
    }

    /// Whether any work can be scheduled at all
    pub fn is_solvable(&self) -> bool {
        !self.residents.is_empty() && !self.blocks.is_empty()
    }

    fn build_unavailability(
        residents: &[Person],
        absences: &[Absence],
    ) -> HashSet<(usize, NaiveDate)> {
        let leave = LeaveValidator::new();
        let mut unavailable = HashSet::new();

        for absence in absences {
            let Some(idx) = residents.iter().position(|r| r.id == absence.person_id) else {
                continue;
            };

            if leave.is_blocking(absence) {
                let mut date = absence.start_date;
                while date <= absence.end_date {
                    unavailable.insert((idx, date));
                    date += Duration::days(1);
                }
            }

            // Recovery windows hold assignment-free days after return
            let recovery = leave.recovery_days(&absence.kind);
            for offset in 1..=recovery {
                unavailable.insert((idx, absence.end_date + Duration::days(offset)));
            }
        }

        unavailable
    }
}

/// Hands out assignments with deterministic sequential identifiers
///
/// Random identifiers would break the reproducibility contract: identical
/// inputs and seed must produce bit-identical candidates.
#[derive(Debug, Default)]
pub struct AssignmentFactory {
    counter: u32,
}

impl AssignmentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> Id {
        self.counter += 1;
        Id::new(format!("asg-{:06}", self.counter)).expect("sequential id is well-formed")
    }

    /// Create a primary assignment
    pub fn primary(
        &mut self,
        block_id: Id,
        person_id: Id,
        rotation_template_id: Option<Id>,
    ) -> Assignment {
        Assignment {
            id: self.next_id(),
            block_id,
            person_id,
            rotation_template_id,
            role: AssignmentRole::Primary,
            version: 0,
        }
    }

    /// Create a supervising assignment
    pub fn supervising(&mut self, block_id: Id, person_id: Id) -> Assignment {
        Assignment {
            id: self.next_id(),
            block_id,
            person_id,
            rotation_template_id: None,
            role: AssignmentRole::Supervising,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AbsenceKind, Session};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    #[test]
    fn test_context_ordering_is_deterministic() {
        let persons = vec![
            Person::resident(id("r2"), "Zeta", 2),
            Person::resident(id("r1"), "Alpha", 1),
            Person::faculty(id("f1"), "Stone"),
        ];
        let blocks = vec![
            Block::new(id("b2"), d("2025-01-07"), Session::Am, 2),
            Block::new(id("b1"), d("2025-01-06"), Session::Pm, 1),
        ];

        let ctx = SolveContext::build(&persons, &blocks, &[], &[]);
        assert_eq!(ctx.residents[0].name, "Alpha");
        assert_eq!(ctx.residents[1].name, "Zeta");
        assert_eq!(ctx.faculty.len(), 1);
        assert_eq!(ctx.blocks[0].date, d("2025-01-06"));
    }

    #[test]
    fn test_blocking_absence_removes_availability() {
        let persons = vec![Person::resident(id("r1"), "Alpha", 1)];
        let absences = vec![Absence::new(
            id("a1"),
            id("r1"),
            d("2025-01-10"),
            d("2025-01-12"),
            AbsenceKind::Deployment,
        )];

        let ctx = SolveContext::build(&persons, &[], &[], &absences);
        assert!(!ctx.is_available(0, d("2025-01-10")));
        assert!(!ctx.is_available(0, d("2025-01-12")));
        // Post-deployment recovery: 7 more unavailable days
        assert!(!ctx.is_available(0, d("2025-01-19")));
        assert!(ctx.is_available(0, d("2025-01-20")));
        assert!(ctx.is_available(0, d("2025-01-09")));
    }

    #[test]
    fn test_non_blocking_absence_keeps_availability() {
        let persons = vec![Person::resident(id("r1"), "Alpha", 1)];
        let absences = vec![Absence::new(
            id("a1"),
            id("r1"),
            d("2025-01-10"),
            d("2025-01-12"),
            AbsenceKind::Vacation,
        )];

        let ctx = SolveContext::build(&persons, &[], &[], &absences);
        assert!(ctx.is_available(0, d("2025-01-11")));
    }

    #[test]
    fn test_archived_templates_excluded() {
        let mut archived =
            RotationTemplate::new(id("rt1"), "Old Service", crate::models::RotationType::Clinic);
        archived.archive();
        let active =
            RotationTemplate::new(id("rt2"), "Clinic", crate::models::RotationType::Clinic);

        let ctx = SolveContext::build(&[], &[], &[archived, active], &[]);
        assert_eq!(ctx.templates.len(), 1);
        assert_eq!(ctx.templates[0].id, id("rt2"));
    }

    #[test]
    fn test_assignment_factory_sequential_ids() {
        let mut factory = AssignmentFactory::new();
        let a1 = factory.primary(id("b1"), id("r1"), None);
        let a2 = factory.primary(id("b2"), id("r1"), None);
        assert_eq!(a1.id.as_str(), "asg-000001");
        assert_eq!(a2.id.as_str(), "asg-000002");
    }
}
