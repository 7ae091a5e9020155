//! Supervision-ratio validator
//!
//! Enforces per-block supervision requirements: PGY-1 residents need one
//! supervising faculty per two residents, PGY-2 and above one per four.
//! The requirement for a block is the larger of the two, rounded up.

use std::collections::HashMap;

use super::violation::{RuleKind, Severity, Violation};
use super::ValidationContext;
use crate::models::{AssignmentRole, Id};

pub const PGY1_RATIO: u32 = 2;
pub const PGY23_RATIO: u32 = 4;

/// Per-block staffing census
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCensus {
    pub pgy1_count: u32,
    pub pgy23_count: u32,
    pub supervising_faculty: u32,
}

impl BlockCensus {
    /// Supervising faculty required for this census
    pub fn required_faculty(&self) -> u32 {
        let for_pgy1 = self.pgy1_count.div_ceil(PGY1_RATIO);
        let for_pgy23 = self.pgy23_count.div_ceil(PGY23_RATIO);
        for_pgy1.max(for_pgy23)
    }

    /// Faculty shortfall, zero when satisfied
    pub fn shortage(&self) -> u32 {
        self.required_faculty().saturating_sub(self.supervising_faculty)
    }
}

/// Validates supervision ratios block by block
#[derive(Debug, Clone, Default)]
pub struct SupervisionValidator;

impl SupervisionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check every block in the context
    pub fn validate(&self, ctx: &ValidationContext) -> Vec<Violation> {
        let census = self.census_by_block(ctx);
        let mut violations = Vec::new();

        for block in ctx.blocks {
            let Some(counts) = census.get(&block.id) else {
                continue;
            };
            let shortage = counts.shortage();
            if shortage == 0 {
                continue;
            }

            violations.push(Violation::on_date(
                RuleKind::Supervision,
                Severity::High,
                None,
                block.date,
                format!(
                    "block {} {}: insufficient supervising faculty \
                     (required {}, available {}; PGY-1: {}, PGY-2/3: {})",
                    block.date,
                    block.session,
                    counts.required_faculty(),
                    counts.supervising_faculty,
                    counts.pgy1_count,
                    counts.pgy23_count,
                ),
            ));
        }

        violations
    }

    /// Count residents by training year and supervising faculty per block
    pub fn census_by_block(&self, ctx: &ValidationContext) -> HashMap<Id, BlockCensus> {
        let mut census: HashMap<Id, BlockCensus> = HashMap::new();

        for assignment in ctx.assignments {
            let Some(person) = ctx.person(&assignment.person_id) else {
                continue;
            };
            let entry = census.entry(assignment.block_id.clone()).or_default();

            match assignment.role {
                AssignmentRole::Primary if person.is_resident() => {
                    if person.is_intern() {
                        entry.pgy1_count += 1;
                    } else {
                        entry.pgy23_count += 1;
                    }
                }
                AssignmentRole::Supervising if person.is_faculty() => {
                    entry.supervising_faculty += 1;
                }
                _ => {}
            }
        }

        census
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_faculty_rounding() {
        let census = BlockCensus {
            pgy1_count: 3,
            pgy23_count: 0,
            supervising_faculty: 0,
        };
        // ceil(3/2) = 2
        assert_eq!(census.required_faculty(), 2);

        let census = BlockCensus {
            pgy1_count: 0,
            pgy23_count: 5,
            supervising_faculty: 0,
        };
        // ceil(5/4) = 2
        assert_eq!(census.required_faculty(), 2);
    }

    #[test]
    fn test_required_faculty_takes_max() {
        let census = BlockCensus {
            pgy1_count: 2,
            pgy23_count: 8,
            supervising_faculty: 0,
        };
        // max(ceil(2/2)=1, ceil(8/4)=2) = 2
        assert_eq!(census.required_faculty(), 2);
    }

    #[test]
    fn test_shortage() {
        let census = BlockCensus {
            pgy1_count: 4,
            pgy23_count: 0,
            supervising_faculty: 1,
        };
        assert_eq!(census.shortage(), 1);

        let satisfied = BlockCensus {
            pgy1_count: 2,
            pgy23_count: 2,
            supervising_faculty: 1,
        };
        assert_eq!(satisfied.shortage(), 0);
    }

    #[test]
    fn test_empty_census_needs_nothing() {
        let census = BlockCensus::default();
        assert_eq!(census.required_faculty(), 0);
        assert_eq!(census.shortage(), 0);
    }
}
