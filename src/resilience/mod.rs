//! Resilience subsystem: observe, predict, escape, fall back
//!
//! Four cooperating pieces keep published schedules workable under
//! disturbance:
//!
//! - [`utilization`] - capacity pressure bands and defense levels
//! - [`contingency`] - N−1/N−2 loss analysis and cascade simulation
//! - [`fallback`] - pre-computed static schedules with O(1) activation
//! - [`metastability`] - solver-trajectory plateau/stagnation detection
//!
//! The control loop consults the metastability detector at a configurable
//! interval and may receive escape strategies; the rest of the subsystem
//! serves operators independently of any run.

pub mod contingency;
pub mod fallback;
pub mod metastability;
pub mod utilization;

pub use contingency::{
    CascadeReport, ContingencyAnalyzer, ContingencyConfig, FatalPair, NMinusOneReport,
    NMinusTwoReport, PersonLossImpact,
};
pub use fallback::{
    FallbackScenario, FallbackSchedule, FallbackScheduler, FallbackStatusReport, SchedulingZone,
    ZoneHealth,
};
pub use metastability::{
    EscapeStrategy, MetastabilityAnalysis, MetastabilityDetector, SolverState,
    DEFAULT_CHECK_INTERVAL,
};
pub use utilization::{
    DefenseLevel, DefensePosture, UtilizationLevel, UtilizationMonitor, UtilizationReport,
};
