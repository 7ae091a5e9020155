//! Autonomous scheduling runs: control loop, state, and persistence
//!
//! A run is one closed-loop invocation with its own persisted directory.
//! The manager exposes the run lifecycle (create, start, resume, cancel,
//! status, list) and keeps each active run on its own worker thread; the
//! loop itself is sequential inside an iteration.
//!
//! ```text
//! Inputs → Generator → Candidate → Evaluator → Result
//!             ▲                                   │
//!             └── next params ── Controller ◄─────┘
//!                                   │
//!                          state.json + history.ndjson
//! ```

pub mod controller;
pub mod state;
pub mod store;

pub use controller::{ControlLoop, ControlLoopConfig};
pub use state::{IterationRecord, RunState, RunStatus, StopReason};
pub use store::{RunStore, RunSummary};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::NaiveDate;

use crate::engine::MoonlightingHours;
use crate::error::{Result, RunError};
use crate::generator::{CandidateGenerator, GeneratorConfig, GeneratorInputs};
use crate::utils::cancel::{CancelHandle, CancelToken};

/// Artifact filenames every run directory exposes
pub const ARTIFACT_FILES: [&str; 5] = [
    "state.json",
    "history.ndjson",
    "schedule.json",
    "report.json",
    "run.log",
];

// ============================================================================
// Run Request
// ============================================================================

/// Parameters for creating a run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scenario: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_iterations: u32,
    pub target_score: f64,
    pub stagnation_limit: u32,
    pub rng_seed: u64,
}

impl RunRequest {
    pub fn new(scenario: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            scenario: scenario.into(),
            start_date,
            end_date,
            max_iterations: 200,
            target_score: 0.95,
            stagnation_limit: 20,
            rng_seed: 42,
        }
    }

    pub fn with_limits(mut self, max_iterations: u32, stagnation_limit: u32) -> Self {
        self.max_iterations = max_iterations;
        self.stagnation_limit = stagnation_limit;
        self
    }

    pub fn with_target(mut self, target_score: f64) -> Self {
        self.target_score = target_score;
        self
    }

    pub fn with_seed(mut self, rng_seed: u64) -> Self {
        self.rng_seed = rng_seed;
        self
    }
}

// ============================================================================
// Run Manager
// ============================================================================

struct ActiveRun {
    cancel: CancelHandle,
    worker: JoinHandle<()>,
}

/// Lifecycle surface over autonomous runs
///
/// Each started run gets its own worker thread and cancellation handle;
/// multiple runs may execute concurrently, each writing only to its own
/// run directory.
pub struct RunManager {
    store: Arc<RunStore>,
    loop_config: ControlLoopConfig,
    generator_config: GeneratorConfig,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl RunManager {
    pub fn new(store: Arc<RunStore>) -> Self {
        Self {
            store,
            loop_config: ControlLoopConfig::default(),
            generator_config: GeneratorConfig::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_loop_config(mut self, config: ControlLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn with_generator_config(mut self, config: GeneratorConfig) -> Self {
        self.generator_config = config;
        self
    }

    /// Create a run directory and initial state without starting the loop
    pub fn create(&self, request: &RunRequest) -> Result<RunState> {
        self.store.create_run(
            &request.scenario,
            request.start_date,
            request.end_date,
            request.max_iterations,
            request.target_score,
            request.stagnation_limit,
            request.rng_seed,
        )
    }

    /// Start a created (or resumed) run on its own worker thread
    pub fn start(
        &self,
        run_id: &str,
        inputs: GeneratorInputs,
        moonlighting: MoonlightingHours,
    ) -> Result<()> {
        let mut state = self
            .store
            .load_run(run_id)?
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;

        if state.status.is_terminal() {
            return Err(RunError::NotResumable(
                run_id.to_string(),
                state.status.as_str().to_string(),
            )
            .into());
        }

        let (handle, token) = CancelToken::new();
        let store = Arc::clone(&self.store);
        let loop_config = self.loop_config.clone();
        let generator_config = self.generator_config.clone();
        let thread_run_id = run_id.to_string();

        let worker = std::thread::Builder::new()
            .name(format!("run-{run_id}"))
            .spawn(move || {
                let generator = CandidateGenerator::new(inputs, generator_config)
                    .with_cancel(token.clone());
                let control = ControlLoop::new(&store, &generator, loop_config)
                    .with_moonlighting(moonlighting)
                    .with_cancel(token);

                match control.run(&mut state) {
                    Ok(status) => {
                        tracing::info!(
                            run_id = %thread_run_id,
                            status = status.as_str(),
                            best = state.best_score,
                            "run finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(run_id = %thread_run_id, error = %e, "run aborted");
                    }
                }
            })
            .map_err(RunError::Storage)?;

        self.active.lock().expect("active-run lock poisoned").insert(
            run_id.to_string(),
            ActiveRun {
                cancel: handle,
                worker,
            },
        );

        Ok(())
    }

    /// Rebuild state after a crash and start the loop again
    pub fn resume(
        &self,
        run_id: &str,
        inputs: GeneratorInputs,
        moonlighting: MoonlightingHours,
    ) -> Result<()> {
        let state = self
            .store
            .recover(run_id)?
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))?;

        if state.status.is_terminal() {
            return Err(RunError::NotResumable(
                run_id.to_string(),
                state.status.as_str().to_string(),
            )
            .into());
        }

        self.start(run_id, inputs, moonlighting)
    }

    /// Request cooperative cancellation of an active run
    pub fn cancel(&self, run_id: &str) -> bool {
        let active = self.active.lock().expect("active-run lock poisoned");
        match active.get(run_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Block until an active run's worker exits
    pub fn join(&self, run_id: &str) {
        let worker = {
            let mut active = self.active.lock().expect("active-run lock poisoned");
            active.remove(run_id).map(|run| run.worker)
        };
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }

    /// Current persisted state of a run
    pub fn status(&self, run_id: &str) -> Result<Option<RunState>> {
        self.store.load_run(run_id)
    }

    /// Condensed summary of a run
    pub fn summary(&self, run_id: &str) -> Result<Option<RunSummary>> {
        self.store.run_summary(run_id)
    }

    /// List runs, optionally filtered by scenario
    pub fn list(&self, scenario: Option<&str>) -> Result<Vec<String>> {
        self.store.list_runs(scenario)
    }

    /// Paths of a run's downloadable artifacts that exist on disk
    pub fn artifacts(&self, run_id: &str) -> Vec<PathBuf> {
        let run_dir = self.store.run_dir(run_id);
        ARTIFACT_FILES
            .iter()
            .map(|name| run_dir.join(name))
            .filter(|path| path.exists())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, Id, Person, Session};
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn inputs() -> GeneratorInputs {
        let persons = vec![
            Person::resident(id("r1"), "Alpha", 1),
            Person::resident(id("r2"), "Beta", 2),
            Person::faculty(id("f1"), "Stone"),
        ];
        let blocks: Vec<Block> = (0..10)
            .map(|i| {
                Block::new(
                    id(&format!("b{i}")),
                    d("2025-01-06") + chrono::Duration::days(i / 2),
                    if i % 2 == 0 { Session::Am } else { Session::Pm },
                    i as u32 + 1,
                )
            })
            .collect();
        GeneratorInputs {
            persons,
            blocks,
            templates: Vec::new(),
            absences: Vec::new(),
        }
    }

    fn manager() -> (TempDir, RunManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RunStore::new(dir.path()).unwrap());
        (dir, RunManager::new(store))
    }

    #[test]
    fn test_create_start_join_lifecycle() {
        let (_dir, manager) = manager();
        let request = RunRequest::new("lifecycle", d("2025-01-06"), d("2025-01-10"))
            .with_limits(30, 10)
            .with_target(0.9);

        let state = manager.create(&request).unwrap();
        manager
            .start(&state.run_id, inputs(), MoonlightingHours::new())
            .unwrap();
        manager.join(&state.run_id);

        let finished = manager.status(&state.run_id).unwrap().unwrap();
        assert!(finished.status.is_terminal());
        assert!(!manager.artifacts(&state.run_id).is_empty());
    }

    #[test]
    fn test_start_unknown_run_fails() {
        let (_dir, manager) = manager();
        let result = manager.start("missing_run", inputs(), MoonlightingHours::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_start_terminal_run_fails() {
        let (_dir, manager) = manager();
        let request = RunRequest::new("done", d("2025-01-06"), d("2025-01-10")).with_target(0.5);

        let mut state = manager.create(&request).unwrap();
        state.status = RunStatus::Completed;
        manager.store.save_state(&state).unwrap();

        let result = manager.start(&state.run_id, inputs(), MoonlightingHours::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_unknown_run() {
        let (_dir, manager) = manager();
        assert!(!manager.cancel("nothing_here"));
    }

    #[test]
    fn test_list_and_summary() {
        let (_dir, manager) = manager();
        let request = RunRequest::new("listing", d("2025-01-06"), d("2025-01-10"));
        let state = manager.create(&request).unwrap();

        assert_eq!(manager.list(Some("listing")).unwrap().len(), 1);
        let summary = manager.summary(&state.run_id).unwrap().unwrap();
        assert_eq!(summary.scenario, "listing");
    }
}
