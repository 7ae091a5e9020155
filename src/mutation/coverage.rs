//! Proxy coverage view: who is covering for whom on a date
//!
//! A read-side derivation aggregating every coverage relationship visible
//! for a date: executed swap absorptions and exchanges, backup call,
//! absence coverage, and remote-surrogate stand-ins. The view never
//! changes persisted state; surrogate placeholders are synthesized at read
//! time and exist for display only.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Absence, Assignment, AssignmentRole, Block, Id, Person, Swap, SwapKind, SwapStatus};

/// Display name used when no concrete coverer is resolvable
const SURROGATE_PLACEHOLDER: &str = "(Surrogate TBD)";
const COVERAGE_PLACEHOLDER: &str = "(Coverage TBD)";

// ============================================================================
// View types
// ============================================================================

/// Kind of coverage relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageType {
    /// Absorb swap: one person took another's week outright
    SwapAbsorb,
    /// One-to-one swap exchange
    SwapExchange,
    /// Backup call shadowing a primary
    BackupCall,
    /// Stand-in for an absent person
    AbsenceCoverage,
    /// Display-only surrogate for someone working remotely
    RemoteSurrogate,
}

impl CoverageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SwapAbsorb => "swap_absorb",
            Self::SwapExchange => "swap_exchange",
            Self::BackupCall => "backup_call",
            Self::AbsenceCoverage => "absence_coverage",
            Self::RemoteSurrogate => "remote_surrogate",
        }
    }
}

/// Lightweight person reference; placeholder refs carry no id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Option<Id>,
    pub name: String,
}

impl PersonRef {
    fn of(person: &Person) -> Self {
        Self {
            id: Some(person.id.clone()),
            name: person.name.clone(),
        }
    }

    fn placeholder(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }

    /// Whether this reference is a display-only placeholder
    pub fn is_placeholder(&self) -> bool {
        self.id.is_none()
    }
}

/// One covering/covered pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRelationship {
    pub coverage_type: CoverageType,
    pub covering: PersonRef,
    pub covered: PersonRef,

    /// Originating record (swap id, absence id, block id)
    pub source_ref: Option<Id>,
}

/// Providing/receiving tallies for one person
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonCoverageSummary {
    pub name: String,
    pub providing: usize,
    pub receiving: usize,
}

/// The full view for one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageView {
    pub date: NaiveDate,
    pub relationships: Vec<CoverageRelationship>,

    /// Per-person providing/receiving summary, keyed by person id
    pub by_person: HashMap<Id, PersonCoverageSummary>,

    /// Persons providing the most coverage, descending
    pub top_coverers: Vec<PersonRef>,

    /// Persons receiving the most coverage, descending
    pub most_covered: Vec<PersonRef>,
}

// ============================================================================
// Builder
// ============================================================================

/// Inputs the view derives from
pub struct CoverageInputs<'a> {
    pub persons: &'a [Person],
    pub blocks: &'a [Block],
    pub assignments: &'a [Assignment],
    pub absences: &'a [Absence],
    pub swaps: &'a [Swap],
}

/// Derives coverage views; holds no state and writes nothing
#[derive(Debug, Clone, Default)]
pub struct CoverageReporter;

impl CoverageReporter {
    pub fn new() -> Self {
        Self
    }

    /// Build the coverage view for one date
    pub fn view_for(&self, date: NaiveDate, inputs: &CoverageInputs) -> CoverageView {
        let persons: HashMap<&Id, &Person> =
            inputs.persons.iter().map(|p| (&p.id, p)).collect();
        let mut relationships = Vec::new();

        self.collect_swap_coverage(date, inputs, &persons, &mut relationships);
        self.collect_backup_call(date, inputs, &persons, &mut relationships);
        self.collect_absence_coverage(date, inputs, &persons, &mut relationships);
        self.collect_remote_surrogates(date, inputs, &persons, &mut relationships);

        let (by_person, top_coverers, most_covered) = self.summarize(&relationships);

        CoverageView {
            date,
            relationships,
            by_person,
            top_coverers,
            most_covered,
        }
    }

    fn collect_swap_coverage(
        &self,
        date: NaiveDate,
        inputs: &CoverageInputs,
        persons: &HashMap<&Id, &Person>,
        out: &mut Vec<CoverageRelationship>,
    ) {
        let week_of = |week_start: NaiveDate| {
            week_start <= date && date <= week_start + Duration::days(6)
        };

        for swap in inputs
            .swaps
            .iter()
            .filter(|s| s.status == SwapStatus::Executed)
        {
            let source = persons.get(&swap.source_person_id).copied();
            let target = swap
                .target_person_id
                .as_ref()
                .and_then(|id| persons.get(id).copied());
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };

            match swap.kind {
                SwapKind::Absorb if week_of(swap.source_week) => {
                    out.push(CoverageRelationship {
                        coverage_type: CoverageType::SwapAbsorb,
                        covering: PersonRef::of(target),
                        covered: PersonRef::of(source),
                        source_ref: Some(swap.id.clone()),
                    });
                }
                SwapKind::OneToOne => {
                    if week_of(swap.source_week) {
                        out.push(CoverageRelationship {
                            coverage_type: CoverageType::SwapExchange,
                            covering: PersonRef::of(target),
                            covered: PersonRef::of(source),
                            source_ref: Some(swap.id.clone()),
                        });
                    }
                    if swap.target_week.map(week_of).unwrap_or(false) {
                        out.push(CoverageRelationship {
                            coverage_type: CoverageType::SwapExchange,
                            covering: PersonRef::of(source),
                            covered: PersonRef::of(target),
                            source_ref: Some(swap.id.clone()),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_backup_call(
        &self,
        date: NaiveDate,
        inputs: &CoverageInputs,
        persons: &HashMap<&Id, &Person>,
        out: &mut Vec<CoverageRelationship>,
    ) {
        let todays_blocks: Vec<&Block> =
            inputs.blocks.iter().filter(|b| b.date == date).collect();

        for block in todays_blocks {
            let on_block: Vec<&Assignment> = inputs
                .assignments
                .iter()
                .filter(|a| a.block_id == block.id)
                .collect();

            for backup in on_block
                .iter()
                .filter(|a| a.role == AssignmentRole::Backup)
            {
                let Some(backup_person) = persons.get(&backup.person_id).copied() else {
                    continue;
                };
                let primary = on_block
                    .iter()
                    .find(|a| a.role == AssignmentRole::Primary)
                    .and_then(|a| persons.get(&a.person_id).copied());

                out.push(CoverageRelationship {
                    coverage_type: CoverageType::BackupCall,
                    covering: PersonRef::of(backup_person),
                    covered: primary
                        .map(|p| PersonRef::of(p))
                        .unwrap_or_else(|| PersonRef::placeholder(COVERAGE_PLACEHOLDER)),
                    source_ref: Some(block.id.clone()),
                });
            }
        }
    }

    fn collect_absence_coverage(
        &self,
        date: NaiveDate,
        inputs: &CoverageInputs,
        persons: &HashMap<&Id, &Person>,
        out: &mut Vec<CoverageRelationship>,
    ) {
        for absence in inputs.absences.iter().filter(|a| a.covers(date)) {
            let Some(absent) = persons.get(&absence.person_id).copied() else {
                continue;
            };

            out.push(CoverageRelationship {
                coverage_type: CoverageType::AbsenceCoverage,
                covering: PersonRef::placeholder(COVERAGE_PLACEHOLDER),
                covered: PersonRef::of(absent),
                source_ref: Some(absence.id.clone()),
            });
        }
    }

    fn collect_remote_surrogates(
        &self,
        date: NaiveDate,
        inputs: &CoverageInputs,
        persons: &HashMap<&Id, &Person>,
        out: &mut Vec<CoverageRelationship>,
    ) {
        // Persons tagged remote with assignments today get a display-only
        // surrogate entry
        let assigned_today: Vec<&Id> = inputs
            .blocks
            .iter()
            .filter(|b| b.date == date)
            .flat_map(|block| {
                inputs
                    .assignments
                    .iter()
                    .filter(|a| a.block_id == block.id && a.is_primary())
                    .map(|a| &a.person_id)
            })
            .collect();

        for person_id in assigned_today {
            let Some(person) = persons.get(person_id).copied() else {
                continue;
            };
            if person.role_tags.iter().any(|tag| tag == "remote") {
                out.push(CoverageRelationship {
                    coverage_type: CoverageType::RemoteSurrogate,
                    covering: PersonRef::placeholder(SURROGATE_PLACEHOLDER),
                    covered: PersonRef::of(person),
                    source_ref: None,
                });
            }
        }
    }

    fn summarize(
        &self,
        relationships: &[CoverageRelationship],
    ) -> (
        HashMap<Id, PersonCoverageSummary>,
        Vec<PersonRef>,
        Vec<PersonRef>,
    ) {
        let mut by_person: HashMap<Id, PersonCoverageSummary> = HashMap::new();

        for relationship in relationships {
            if let Some(id) = &relationship.covering.id {
                let entry = by_person.entry(id.clone()).or_default();
                entry.name = relationship.covering.name.clone();
                entry.providing += 1;
            }
            if let Some(id) = &relationship.covered.id {
                let entry = by_person.entry(id.clone()).or_default();
                entry.name = relationship.covered.name.clone();
                entry.receiving += 1;
            }
        }

        let mut ranked: Vec<(&Id, &PersonCoverageSummary)> = by_person.iter().collect();

        ranked.sort_by(|a, b| b.1.providing.cmp(&a.1.providing).then(a.0.cmp(b.0)));
        let top_coverers = ranked
            .iter()
            .filter(|(_, s)| s.providing > 0)
            .take(5)
            .map(|(id, s)| PersonRef {
                id: Some((*id).clone()),
                name: s.name.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| b.1.receiving.cmp(&a.1.receiving).then(a.0.cmp(b.0)));
        let most_covered = ranked
            .iter()
            .filter(|(_, s)| s.receiving > 0)
            .take(5)
            .map(|(id, s)| PersonRef {
                id: Some((*id).clone()),
                name: s.name.clone(),
            })
            .collect();

        (by_person, top_coverers, most_covered)
    }
}
