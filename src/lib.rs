//! rota - Autonomous Duty-Schedule Controller
//!
//! A closed-loop scheduling core for medical residency programs: it
//! repeatedly generates candidate schedules, evaluates them against a
//! stack of hard and soft constraints, persists every attempt for
//! resumability, and keeps published schedules workable under
//! disturbances.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`] - Core entities (persons, blocks, rotations, swaps)
//! - [`generator`] - Candidate generation over the strategy stack
//! - [`engine`] - Pure constraint validators and their composition
//! - [`evaluator`] - Violation aggregation and scoring
//! - [`autonomous`] - Control loop, run state, and run persistence
//! - [`resilience`] - Utilization, contingency, fallbacks, metastability
//! - [`mutation`] - Post-publication swaps and proxy coverage
//! - [`cache`] - Two-tier read-side cache with tag invalidation
//! - [`queue`] - Task queue, retry, circuit breaker, throttling
//! - [`storage`] - Record store contract and in-memory arenas
//! - [`config`] - Configuration management and settings
//!
//! # Example
//!
//! ```no_run
//! use rota::autonomous::{RunManager, RunRequest, RunStore};
//! use rota::engine::MoonlightingHours;
//! use rota::generator::GeneratorInputs;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(RunStore::new("runs")?);
//!     let manager = RunManager::new(store);
//!
//!     let request = RunRequest::new(
//!         "baseline",
//!         chrono::NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
//!         chrono::NaiveDate::from_ymd_opt(2025, 2, 2).unwrap(),
//!     );
//!     let state = manager.create(&request)?;
//!     manager.start(&state.run_id, GeneratorInputs::default(), MoonlightingHours::new())?;
//!     Ok(())
//! }
//! ```

pub mod autonomous;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod metrics;
pub mod models;
pub mod mutation;
pub mod notify;
pub mod queue;
pub mod resilience;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::autonomous::{RunManager, RunRequest, RunState, RunStatus, RunStore};
    pub use crate::config::Config;
    pub use crate::engine::{ConstraintEngine, EvaluationPeriod, Severity, ValidationContext};
    pub use crate::error::{Error, ErrorCategory, Result, RotaError};
    pub use crate::evaluator::{EvaluationResult, Evaluator};
    pub use crate::generator::{Algorithm, Candidate, CandidateGenerator, GeneratorParams};
    pub use crate::models::{
        Absence, Assignment, Block, Id, Person, RotationTemplate, Swap,
    };
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::Id;
