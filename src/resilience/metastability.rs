//! Metastability detection over solver trajectories
//!
//! A search is metastable when it keeps running without making progress: the
//! objective plateaus, or no improvement lands for a long stretch. The
//! detector consumes an abstract trajectory of solver states, classifies the
//! situation, and recommends an escape strategy with a confidence score.
//! The control loop consults it at a configurable interval and feeds real
//! per-iteration states; strategy adapters may synthesize trajectories from
//! their own statistics.

use serde::{Deserialize, Serialize};

/// Default consultation interval for the control loop
pub const DEFAULT_CHECK_INTERVAL: u32 = 50;

// ============================================================================
// Solver State
// ============================================================================

/// One point in a solver trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverState {
    /// Iteration the state was sampled at
    pub iteration: u32,

    /// Objective value at that iteration (higher is better)
    pub objective: f64,

    /// Outstanding constraint violations at that iteration
    pub violations: usize,
}

impl SolverState {
    pub fn new(iteration: u32, objective: f64, violations: usize) -> Self {
        Self {
            iteration,
            objective,
            violations,
        }
    }
}

// ============================================================================
// Escape Strategies
// ============================================================================

/// What to do about a metastable search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeStrategy {
    /// Not trapped; keep searching
    ContinueSearch,
    /// Raise exploration pressure (diversification temperature)
    IncreaseTemperature,
    /// Restart from scratch with a fresh seed
    RestartNewSeed,
    /// Large perturbation of the current best, then continue
    BasinHopping,
    /// The local optimum is good enough; stop trying to escape
    AcceptLocalOptimum,
}

impl EscapeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContinueSearch => "continue_search",
            Self::IncreaseTemperature => "increase_temperature",
            Self::RestartNewSeed => "restart_new_seed",
            Self::BasinHopping => "basin_hopping",
            Self::AcceptLocalOptimum => "accept_local_optimum",
        }
    }
}

/// Full analysis of a trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetastabilityAnalysis {
    /// Whether the search is trapped
    pub is_metastable: bool,

    /// Plateau detected over the configured window
    pub plateau_detected: bool,

    /// Iterations since the best objective improved
    pub iterations_since_improvement: u32,

    /// Best objective seen in the trajectory
    pub best_objective: f64,

    /// Recommended action
    pub recommended_strategy: EscapeStrategy,

    /// Confidence in the recommendation, in [0, 1]
    pub confidence: f64,
}

impl MetastabilityAnalysis {
    /// Analysis of an empty or healthy trajectory
    pub fn healthy() -> Self {
        Self {
            is_metastable: false,
            plateau_detected: false,
            iterations_since_improvement: 0,
            best_objective: 0.0,
            recommended_strategy: EscapeStrategy::ContinueSearch,
            confidence: 1.0,
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Detects plateaus and prolonged stagnation in solver trajectories
#[derive(Debug, Clone)]
pub struct MetastabilityDetector {
    /// Relative objective change below which a window counts as flat
    pub plateau_threshold: f64,

    /// Window length for plateau detection
    pub plateau_window: usize,

    /// Stagnation length at which the search counts as trapped
    pub min_stagnation: u32,

    /// Objective at which a local optimum is acceptable
    pub acceptance_objective: f64,
}

impl Default for MetastabilityDetector {
    fn default() -> Self {
        Self {
            plateau_threshold: 0.01,
            plateau_window: 100,
            min_stagnation: 50,
            acceptance_objective: 0.9,
        }
    }
}

impl MetastabilityDetector {
    pub fn new(plateau_threshold: f64, plateau_window: usize, min_stagnation: u32) -> Self {
        Self {
            plateau_threshold,
            plateau_window,
            min_stagnation,
            ..Default::default()
        }
    }

    /// Analyze a trajectory and recommend an escape strategy
    pub fn analyze(&self, trajectory: &[SolverState]) -> MetastabilityAnalysis {
        if trajectory.is_empty() {
            return MetastabilityAnalysis::healthy();
        }

        let best = trajectory
            .iter()
            .map(|s| s.objective)
            .fold(f64::NEG_INFINITY, f64::max);
        let best_index = trajectory
            .iter()
            .position(|s| s.objective == best)
            .unwrap_or(0);
        let stagnation = (trajectory.len() - 1 - best_index) as u32;

        let plateau = self.detect_plateau(trajectory);
        let stagnant = stagnation >= self.min_stagnation;
        let is_metastable = plateau || stagnant;

        let (strategy, confidence) = if !is_metastable {
            (EscapeStrategy::ContinueSearch, 1.0)
        } else {
            self.classify(trajectory, best, stagnation, plateau)
        };

        MetastabilityAnalysis {
            is_metastable,
            plateau_detected: plateau,
            iterations_since_improvement: stagnation,
            best_objective: best,
            recommended_strategy: strategy,
            confidence,
        }
    }

    /// Plateau: relative objective change inside the trailing window is
    /// below the threshold
    fn detect_plateau(&self, trajectory: &[SolverState]) -> bool {
        if trajectory.len() < self.plateau_window {
            return false;
        }

        let window = &trajectory[trajectory.len() - self.plateau_window..];
        let first = window[0].objective;
        let last = window[window.len() - 1].objective;
        let base = first.abs().max(1e-9);

        ((last - first) / base).abs() < self.plateau_threshold
    }

    fn classify(
        &self,
        trajectory: &[SolverState],
        best: f64,
        stagnation: u32,
        plateau: bool,
    ) -> (EscapeStrategy, f64) {
        let last = trajectory.last().expect("non-empty trajectory");

        // Confidence grows with how far past the stagnation threshold we are
        let overrun =
            (stagnation as f64 / self.min_stagnation.max(1) as f64).min(2.0) / 2.0;
        let confidence = (0.5 + 0.5 * overrun).min(1.0);

        // A clean, high-objective plateau is a local optimum worth keeping
        if best >= self.acceptance_objective && last.violations == 0 {
            return (EscapeStrategy::AcceptLocalOptimum, confidence);
        }

        // A flat window with violations outstanding wants more exploration
        if plateau && stagnation < self.min_stagnation {
            return (EscapeStrategy::IncreaseTemperature, confidence);
        }

        // Deep stagnation after a plateau points to a wide basin
        if plateau && stagnation >= 2 * self.min_stagnation {
            return (EscapeStrategy::BasinHopping, confidence);
        }

        (EscapeStrategy::RestartNewSeed, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_trajectory(len: usize, objective: f64, violations: usize) -> Vec<SolverState> {
        (0..len)
            .map(|i| SolverState::new(i as u32, objective, violations))
            .collect()
    }

    fn improving_trajectory(len: usize) -> Vec<SolverState> {
        (0..len)
            .map(|i| SolverState::new(i as u32, i as f64 / len as f64, len - i))
            .collect()
    }

    #[test]
    fn test_empty_trajectory_is_healthy() {
        let detector = MetastabilityDetector::default();
        let analysis = detector.analyze(&[]);
        assert!(!analysis.is_metastable);
        assert_eq!(analysis.recommended_strategy, EscapeStrategy::ContinueSearch);
    }

    #[test]
    fn test_improving_trajectory_continues() {
        let detector = MetastabilityDetector::new(0.01, 50, 30);
        let analysis = detector.analyze(&improving_trajectory(100));
        assert!(!analysis.is_metastable);
        assert_eq!(analysis.iterations_since_improvement, 0);
    }

    #[test]
    fn test_plateau_detected() {
        let detector = MetastabilityDetector::new(0.01, 50, 100);
        let trajectory = flat_trajectory(60, 0.5, 3);
        let analysis = detector.analyze(&trajectory);
        assert!(analysis.plateau_detected);
        assert!(analysis.is_metastable);
    }

    #[test]
    fn test_short_trajectory_has_no_plateau() {
        let detector = MetastabilityDetector::new(0.01, 100, 200);
        let analysis = detector.analyze(&flat_trajectory(50, 0.5, 3));
        assert!(!analysis.plateau_detected);
    }

    #[test]
    fn test_stagnation_detected() {
        let detector = MetastabilityDetector::new(0.01, 1000, 20);
        // Best at index 0, then 40 non-improving iterations
        let mut trajectory = vec![SolverState::new(0, 0.8, 0)];
        trajectory.extend(flat_trajectory(40, 0.5, 2));
        let analysis = detector.analyze(&trajectory);
        assert!(analysis.is_metastable);
        assert_eq!(analysis.iterations_since_improvement, 40);
    }

    #[test]
    fn test_accept_local_optimum_when_good_and_clean() {
        let detector = MetastabilityDetector::new(0.01, 20, 10);
        let trajectory = flat_trajectory(40, 0.95, 0);
        let analysis = detector.analyze(&trajectory);
        assert!(analysis.is_metastable);
        assert_eq!(
            analysis.recommended_strategy,
            EscapeStrategy::AcceptLocalOptimum
        );
    }

    #[test]
    fn test_restart_recommended_for_dirty_stagnation() {
        let detector = MetastabilityDetector::new(0.01, 1000, 15);
        let mut trajectory = vec![SolverState::new(0, 0.6, 1)];
        trajectory.extend(flat_trajectory(30, 0.4, 5));
        let analysis = detector.analyze(&trajectory);
        assert!(analysis.is_metastable);
        assert_eq!(analysis.recommended_strategy, EscapeStrategy::RestartNewSeed);
    }

    #[test]
    fn test_basin_hopping_for_deep_plateau() {
        let detector = MetastabilityDetector::new(0.01, 20, 10);
        let trajectory = flat_trajectory(40, 0.5, 4);
        let analysis = detector.analyze(&trajectory);
        assert!(analysis.is_metastable);
        assert_eq!(analysis.recommended_strategy, EscapeStrategy::BasinHopping);
    }

    #[test]
    fn test_confidence_bounds() {
        let detector = MetastabilityDetector::new(0.01, 20, 10);
        let analysis = detector.analyze(&flat_trajectory(100, 0.5, 4));
        assert!(analysis.confidence >= 0.5);
        assert!(analysis.confidence <= 1.0);
    }
}
