//! Post-publication mutation engine
//!
//! Once a schedule is in production, change flows through here rather than
//! back into the generator loop: validated swap requests, compatibility
//! matching over the pending pool, atomic execution with a 24-hour
//! rollback window, and the read-only proxy coverage view.
//!
//! # Modules
//!
//! - [`matcher`] - compatibility scoring, ranked suggestions, auto-matching
//! - [`executor`] - swap lifecycle, execution, rollback, cache invalidation
//! - [`coverage`] - per-date coverage relationships (display-only)

pub mod coverage;
pub mod executor;
pub mod matcher;

pub use coverage::{
    CoverageInputs, CoverageRelationship, CoverageReporter, CoverageType, CoverageView,
    PersonCoverageSummary, PersonRef,
};
pub use executor::SwapExecutor;
pub use matcher::{
    AutoMatchReport, MatchPriority, RankedMatch, SwapMatcher, MAX_DATE_SEPARATION_DAYS,
    MIN_COMPATIBILITY_SCORE,
};
