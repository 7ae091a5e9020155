//! Persistent run-state storage
//!
//! Directory structure, one folder per run:
//!
//! ```text
//! runs/
//!     {scenario}_{YYYYMMDD_HHMMSS}_{rand8}/
//!         state.json       # RunState, overwritten atomically
//!         history.ndjson   # append-only, one JSON object per line
//!         schedule.json    # best-so-far assignments
//!         report.json      # best-so-far evaluation result
//!         run.log          # timestamped textual log
//! ```
//!
//! The store is the only writer for a given run. `state.json` is written
//! via write-new-then-rename; `history.ndjson` appends hold a store-level
//! mutex for the duration of one write and fsync every tenth record. A
//! torn final history line (crash mid-append) is detected by JSON-validity
//! probe and discarded on load.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::state::{IterationRecord, RunState};
use crate::error::{Result, RunError};
use crate::evaluator::EvaluationResult;

/// Records between forced fsyncs of the history file
const FSYNC_INTERVAL: u32 = 10;

/// Filesystem store for autonomous runs
pub struct RunStore {
    base_path: PathBuf,
    append_lock: Mutex<()>,
}

impl RunStore {
    /// Open (and create if needed) a store rooted at `base_path`
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(RunError::Storage)?;
        Ok(Self {
            base_path,
            append_lock: Mutex::new(()),
        })
    }

    /// Directory holding one run's artifacts
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.base_path.join(run_id)
    }

    /// Create a new run: directory, initial state, empty history
    #[allow(clippy::too_many_arguments)]
    pub fn create_run(
        &self,
        scenario: &str,
        start_date: chrono::NaiveDate,
        end_date: chrono::NaiveDate,
        max_iterations: u32,
        target_score: f64,
        stagnation_limit: u32,
        rng_seed: u64,
    ) -> Result<RunState> {
        let rand8 = &uuid::Uuid::new_v4().simple().to_string()[..8];
        let run_id = format!(
            "{scenario}_{}_{rand8}",
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        let state = RunState::new(
            run_id.clone(),
            scenario.to_string(),
            start_date,
            end_date,
            max_iterations,
            target_score,
            stagnation_limit,
            rng_seed,
        );

        let run_dir = self.run_dir(&run_id);
        fs::create_dir_all(&run_dir).map_err(RunError::Storage)?;

        self.save_state(&state)?;
        File::create(run_dir.join("history.ndjson")).map_err(RunError::Storage)?;

        tracing::info!(run_id = %run_id, scenario = %scenario, "run created");
        Ok(state)
    }

    /// Persist the state atomically (write new, then rename)
    pub fn save_state(&self, state: &RunState) -> Result<()> {
        let run_dir = self.run_dir(&state.run_id);
        fs::create_dir_all(&run_dir).map_err(RunError::Storage)?;
        self.write_atomic(&run_dir.join("state.json"), |writer| {
            serde_json::to_writer_pretty(writer, state)
                .map_err(|e| RunError::CorruptState(state.run_id.clone(), e))
        })
    }

    /// Load a run's state, `None` when the run does not exist
    pub fn load_run(&self, run_id: &str) -> Result<Option<RunState>> {
        let state_path = self.run_dir(run_id).join("state.json");
        if !state_path.exists() {
            return Ok(None);
        }

        let file = File::open(&state_path).map_err(RunError::Storage)?;
        let state = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RunError::CorruptState(run_id.to_string(), e))?;
        Ok(Some(state))
    }

    /// Append one record to `history.ndjson`
    ///
    /// Iteration numbers must be contiguous from 1; the file is strictly
    /// append-only and fsynced every tenth record.
    pub fn append_iteration(&self, run_id: &str, record: &IterationRecord) -> Result<()> {
        let line = record
            .to_ndjson_line()
            .map_err(|e| RunError::CorruptState(run_id.to_string(), e))?;

        let _guard = self.append_lock.lock().expect("history lock poisoned");
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.run_dir(run_id).join("history.ndjson"))
            .map_err(RunError::Storage)?;

        writeln!(file, "{line}").map_err(RunError::Storage)?;

        if record.iteration % FSYNC_INTERVAL == 0 {
            file.sync_all().map_err(RunError::Storage)?;
        }

        Ok(())
    }

    /// Load the full iteration history
    ///
    /// A torn final line is discarded with a warning; an invalid line
    /// anywhere else is corruption and fails the load.
    pub fn load_history(&self, run_id: &str) -> Result<Vec<IterationRecord>> {
        let history_path = self.run_dir(run_id).join("history.ndjson");
        if !history_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&history_path).map_err(RunError::Storage)?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .map_err(RunError::Storage)?;

        let mut records = Vec::with_capacity(lines.len());
        let last_index = lines.len().saturating_sub(1);

        for (index, line) in lines.iter().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<IterationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if index == last_index => {
                    tracing::warn!(
                        run_id = %run_id,
                        error = %e,
                        "discarding torn final history line"
                    );
                }
                Err(e) => {
                    return Err(RunError::CorruptState(run_id.to_string(), e).into());
                }
            }
        }

        Ok(records)
    }

    /// Write the best schedule atomically
    pub fn save_schedule(&self, run_id: &str, assignments: &[serde_json::Value]) -> Result<()> {
        self.write_atomic(&self.run_dir(run_id).join("schedule.json"), |writer| {
            serde_json::to_writer_pretty(writer, assignments)
                .map_err(|e| RunError::CorruptState(run_id.to_string(), e))
        })
    }

    /// Write the best evaluation report atomically
    pub fn save_report(&self, run_id: &str, result: &EvaluationResult) -> Result<()> {
        self.write_atomic(&self.run_dir(run_id).join("report.json"), |writer| {
            serde_json::to_writer_pretty(writer, result)
                .map_err(|e| RunError::CorruptState(run_id.to_string(), e))
        })
    }

    /// Append a timestamped line to `run.log`
    pub fn log(&self, run_id: &str, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.run_dir(run_id).join("run.log"))
            .map_err(RunError::Storage)?;
        writeln!(file, "[{}] {message}", Utc::now().to_rfc3339()).map_err(RunError::Storage)?;
        Ok(())
    }

    /// List run ids, optionally filtered by scenario prefix, sorted
    pub fn list_runs(&self, scenario: Option<&str>) -> Result<Vec<String>> {
        let mut runs = Vec::new();

        for entry in fs::read_dir(&self.base_path).map_err(RunError::Storage)? {
            let entry = entry.map_err(RunError::Storage)?;
            let path = entry.path();
            if !path.is_dir() || !path.join("state.json").exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if scenario.map(|s| name.starts_with(s)).unwrap_or(true) {
                runs.push(name.to_string());
            }
        }

        runs.sort();
        Ok(runs)
    }

    /// Best iteration from history: highest-scoring valid record, falling
    /// back to the highest-scoring record overall
    pub fn best_from_history(&self, run_id: &str) -> Result<Option<IterationRecord>> {
        let records = self.load_history(run_id)?;
        if records.is_empty() {
            return Ok(None);
        }

        let best_valid = records
            .iter()
            .filter(|r| r.valid)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        let best = best_valid.or_else(|| {
            records
                .iter()
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        });

        Ok(best.cloned())
    }

    /// Rebuild state after a crash
    ///
    /// Loads `state.json`; when the history holds more records than the
    /// state's iteration counter (the crash landed between an append and a
    /// state save), the derived counters are recomputed from history.
    pub fn recover(&self, run_id: &str) -> Result<Option<RunState>> {
        let Some(mut state) = self.load_run(run_id)? else {
            return Ok(None);
        };

        let records = self.load_history(run_id)?;
        let replayed = records.len() as u32;

        if replayed > state.current_iteration {
            tracing::warn!(
                run_id = %run_id,
                state_iteration = state.current_iteration,
                history_records = replayed,
                "state.json is stale, recomputing counters from history"
            );

            state.current_iteration = replayed;
            if let Some(best) = records
                .iter()
                .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            {
                if best.score > state.best_score {
                    state.best_score = best.score;
                    state.best_iteration = best.iteration;
                    state.best_params = Some(best.params.clone());
                }
            }
            state.iterations_since_improvement = replayed.saturating_sub(state.best_iteration);
            self.save_state(&state)?;
        }

        Ok(Some(state))
    }

    /// Summary for reporting and the run-listing surface
    pub fn run_summary(&self, run_id: &str) -> Result<Option<RunSummary>> {
        let Some(state) = self.load_run(run_id)? else {
            return Ok(None);
        };
        let history = self.load_history(run_id)?;

        Ok(Some(RunSummary {
            run_id: run_id.to_string(),
            scenario: state.scenario.clone(),
            status: state.status,
            total_iterations: state.current_iteration,
            best_score: state.best_score,
            best_iteration: state.best_iteration,
            created_at: state.created_at,
            updated_at: state.updated_at,
            history_count: history.len(),
            valid_count: history.iter().filter(|r| r.valid).count(),
        }))
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn write_atomic<F>(&self, path: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> std::result::Result<(), RunError>,
    {
        let temp_path = path.with_extension("json.tmp");

        let file = File::create(&temp_path).map_err(RunError::Storage)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush().map_err(RunError::Storage)?;

        fs::rename(&temp_path, path).map_err(RunError::Storage)?;
        Ok(())
    }
}

/// Condensed view of one run
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scenario: String,
    pub status: super::state::RunStatus,
    pub total_iterations: u32,
    pub best_score: f64,
    pub best_iteration: u32,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub history_count: usize,
    pub valid_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorParams;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn store() -> (TempDir, RunStore) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn create(store: &RunStore) -> RunState {
        store
            .create_run("baseline", d("2025-01-06"), d("2025-02-02"), 100, 0.95, 20, 42)
            .unwrap()
    }

    fn record(iteration: u32, score: f64, valid: bool) -> IterationRecord {
        IterationRecord {
            iteration,
            timestamp: Utc::now(),
            params: GeneratorParams::default(),
            score,
            valid,
            critical_violations: 0,
            total_violations: 0,
            violation_types: Vec::new(),
            duration_seconds: 0.1,
            notes: String::new(),
        }
    }

    #[test]
    fn test_create_run_layout() {
        let (_dir, store) = store();
        let state = create(&store);

        assert!(state.run_id.starts_with("baseline_"));
        let run_dir = store.run_dir(&state.run_id);
        assert!(run_dir.join("state.json").exists());
        assert!(run_dir.join("history.ndjson").exists());
    }

    #[test]
    fn test_state_save_load_roundtrip() {
        let (_dir, store) = store();
        let mut state = create(&store);

        state.best_score = 0.87;
        state.current_iteration = 12;
        store.save_state(&state).unwrap();

        let loaded = store.load_run(&state.run_id).unwrap().unwrap();
        assert_eq!(loaded.best_score, 0.87);
        assert_eq!(loaded.current_iteration, 12);
    }

    #[test]
    fn test_load_missing_run() {
        let (_dir, store) = store();
        assert!(store.load_run("nope_20250101_000000_aaaa0000").unwrap().is_none());
    }

    #[test]
    fn test_history_append_and_load() {
        let (_dir, store) = store();
        let state = create(&store);

        for i in 1..=15 {
            store
                .append_iteration(&state.run_id, &record(i, i as f64 / 20.0, i % 2 == 0))
                .unwrap();
        }

        let history = store.load_history(&state.run_id).unwrap();
        assert_eq!(history.len(), 15);
        for (idx, rec) in history.iter().enumerate() {
            assert_eq!(rec.iteration as usize, idx + 1);
        }
    }

    #[test]
    fn test_torn_final_line_discarded() {
        let (_dir, store) = store();
        let state = create(&store);

        store.append_iteration(&state.run_id, &record(1, 0.5, true)).unwrap();
        store.append_iteration(&state.run_id, &record(2, 0.6, true)).unwrap();

        // Simulate a crash mid-append
        let history_path = store.run_dir(&state.run_id).join("history.ndjson");
        let mut file = OpenOptions::new().append(true).open(&history_path).unwrap();
        write!(file, "{{\"iteration\": 3, \"timest").unwrap();

        let history = store.load_history(&state.run_id).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_fails() {
        let (_dir, store) = store();
        let state = create(&store);

        let history_path = store.run_dir(&state.run_id).join("history.ndjson");
        let mut file = OpenOptions::new().append(true).open(&history_path).unwrap();
        writeln!(file, "not json at all").unwrap();
        drop(file);
        store.append_iteration(&state.run_id, &record(2, 0.6, true)).unwrap();

        assert!(store.load_history(&state.run_id).is_err());
    }

    #[test]
    fn test_best_from_history_prefers_valid() {
        let (_dir, store) = store();
        let state = create(&store);

        store.append_iteration(&state.run_id, &record(1, 0.9, false)).unwrap();
        store.append_iteration(&state.run_id, &record(2, 0.6, true)).unwrap();
        store.append_iteration(&state.run_id, &record(3, 0.7, true)).unwrap();

        let best = store.best_from_history(&state.run_id).unwrap().unwrap();
        assert_eq!(best.iteration, 3);
        assert!(best.valid);
    }

    #[test]
    fn test_best_from_history_falls_back_to_invalid() {
        let (_dir, store) = store();
        let state = create(&store);

        store.append_iteration(&state.run_id, &record(1, 0.4, false)).unwrap();
        store.append_iteration(&state.run_id, &record(2, 0.2, false)).unwrap();

        let best = store.best_from_history(&state.run_id).unwrap().unwrap();
        assert_eq!(best.iteration, 1);
    }

    #[test]
    fn test_recover_recomputes_stale_counters() {
        let (_dir, store) = store();
        let state = create(&store);

        // Three records appended, but state.json still says iteration 0
        store.append_iteration(&state.run_id, &record(1, 0.3, true)).unwrap();
        store.append_iteration(&state.run_id, &record(2, 0.8, true)).unwrap();
        store.append_iteration(&state.run_id, &record(3, 0.5, true)).unwrap();

        let recovered = store.recover(&state.run_id).unwrap().unwrap();
        assert_eq!(recovered.current_iteration, 3);
        assert_eq!(recovered.best_score, 0.8);
        assert_eq!(recovered.best_iteration, 2);
        assert_eq!(recovered.iterations_since_improvement, 1);
    }

    #[test]
    fn test_list_runs_with_filter() {
        let (_dir, store) = store();
        create(&store);
        store
            .create_run("n1-test", d("2025-01-06"), d("2025-02-02"), 50, 0.9, 10, 1)
            .unwrap();

        assert_eq!(store.list_runs(None).unwrap().len(), 2);
        assert_eq!(store.list_runs(Some("baseline")).unwrap().len(), 1);
        assert!(store.list_runs(Some("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_run_summary() {
        let (_dir, store) = store();
        let state = create(&store);

        store.append_iteration(&state.run_id, &record(1, 0.3, true)).unwrap();
        store.append_iteration(&state.run_id, &record(2, 0.4, false)).unwrap();

        let summary = store.run_summary(&state.run_id).unwrap().unwrap();
        assert_eq!(summary.history_count, 2);
        assert_eq!(summary.valid_count, 1);
        assert_eq!(summary.scenario, "baseline");
    }

    #[test]
    fn test_run_log_appends() {
        let (_dir, store) = store();
        let state = create(&store);

        store.log(&state.run_id, "iteration 1 complete").unwrap();
        store.log(&state.run_id, "iteration 2 complete").unwrap();

        let content = fs::read_to_string(store.run_dir(&state.run_id).join("run.log")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("iteration 1 complete"));
    }
}
