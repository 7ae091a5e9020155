//! Unified error handling for the rota scheduling core
//!
//! This module provides a consolidated error handling system that:
//! - Re-exports domain-specific error types
//! - Provides a common `RotaError` trait for consistent behavior
//! - Offers a unified `Error` enum for cross-domain error handling
//!
//! Constraint violations are deliberately NOT errors: they are data carried
//! in `EvaluationResult` and interpreted by the control loop.
//!
//! # Error Hierarchy
//!
//! ```text
//! Error (unified)
//! ├── Validation (ValidationError)
//! ├── Generator (GeneratorError)
//! ├── Run (RunError)
//! ├── Mutation (MutationError)
//! ├── Queue (QueueError)
//! ├── Cache (CacheError)
//! ├── Store (anyhow::Error)
//! └── Other (anyhow::Error)
//! ```

use thiserror::Error;

/// Unified result type for rota operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common trait for all rota errors
///
/// This trait provides a consistent interface across all error types.
pub trait RotaError: std::error::Error + Send + Sync {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get error category for metrics/logging
    fn category(&self) -> ErrorCategory;
}

/// Error category for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller-supplied data is malformed
    Validation,
    /// Solver/generation failures
    Generator,
    /// Control-loop and run-state failures
    Run,
    /// Swap matching/execution failures
    Mutation,
    /// Task queue and dispatch failures
    Queue,
    /// Cache tier failures (always non-fatal)
    Cache,
    /// Record-store / filesystem failures
    Store,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get category name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Generator => "generator",
            ErrorCategory::Run => "run",
            ErrorCategory::Mutation => "mutation",
            ErrorCategory::Queue => "queue",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Store => "store",
            ErrorCategory::Other => "other",
        }
    }
}

// ============================================================================
// Domain Errors
// ============================================================================

/// Caller-supplied data is malformed. Surfaced verbatim, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid identifier: '{0}' (expected [A-Za-z0-9_-]{{1,64}})")]
    InvalidIdentifier(String),

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{0}")]
    Rule(String),
}

impl ValidationError {
    pub fn invalid_identifier(raw: impl Into<String>) -> Self {
        Self::InvalidIdentifier(raw.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn rule(msg: impl Into<String>) -> Self {
        Self::Rule(msg.into())
    }
}

/// Candidate-generation failures
///
/// Infeasible solves and timeouts are not surfaced through this type: the
/// generator logs them and returns `None` so the controller can pick the
/// next parameter set. These variants cover contract misuse and data-layer
/// failures that make the current iteration unusable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("no residents available for period {start}..{end}")]
    NoResidents { start: String, end: String },

    #[error("no blocks in period {start}..{end}")]
    NoBlocks { start: String, end: String },

    #[error("unknown algorithm: '{0}'")]
    UnknownAlgorithm(String),

    #[error("perturbation rate {0} outside (0, 1]")]
    InvalidPerturbationRate(f64),
}

/// Control-loop and run-state failures
#[derive(Error, Debug)]
pub enum RunError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {0} is not resumable (status: {1})")]
    NotResumable(String, String),

    #[error("run {run_id} failed: {consecutive} consecutive iteration errors (last: {last})")]
    ConsecutiveFailures {
        run_id: String,
        consecutive: u32,
        last: String,
    },

    #[error("corrupt state file for run {0}: {1}")]
    CorruptState(String, #[source] serde_json::Error),

    #[error("run storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Swap matching/execution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("swap {0} cannot be executed: {1}")]
    NotExecutable(String, String),

    #[error("rollback window expired for swap {0}")]
    RollbackWindowExpired(String),

    #[error("optimistic-concurrency conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("multi-way swaps have no executor")]
    MultiWayUnsupported,
}

/// Task queue and dispatch failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue for priority {0} is full (depth {1})")]
    Full(&'static str, usize),

    #[error("task {0} rejected: {1}")]
    Rejected(String, String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("circuit breaker open for '{0}'")]
    CircuitOpen(String),

    #[error("dependency failed: {0}")]
    DependencyFailed(String),
}

/// Cache tier failures. Logged and swallowed; the system behaves as a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache pool error: {0}")]
    Pool(String),

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("L2 call exceeded {0}s ceiling")]
    Timeout(u64),
}

// ============================================================================
// Unified Error
// ============================================================================

/// Unified error type for cross-domain operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed caller input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Generation contract/data failures
    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// Control-loop failures
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// Swap engine failures
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    /// Queue/dispatch failures
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Cache failures (callers should degrade, not propagate)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Record-store failures
    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),

    /// Generic errors with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a store error
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Error::Store(err.into())
    }

    /// Create an error with context
    pub fn context(msg: impl Into<String>) -> Self {
        Error::Other(anyhow::anyhow!("{}", msg.into()))
    }
}

impl RotaError for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Error::Validation(_) => false,
            Error::Generator(_) => false,
            Error::Run(e) => matches!(e, RunError::Storage(_)),
            Error::Mutation(e) => matches!(e, MutationError::Conflict { .. }),
            Error::Queue(e) => matches!(e, QueueError::Full(_, _) | QueueError::CircuitOpen(_)),
            Error::Cache(_) => true,
            Error::Store(_) => true,
            Error::Other(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::Generator(_) => ErrorCategory::Generator,
            Error::Run(_) => ErrorCategory::Run,
            Error::Mutation(_) => ErrorCategory::Mutation,
            Error::Queue(_) => ErrorCategory::Queue,
            Error::Cache(_) => ErrorCategory::Cache,
            Error::Store(_) => ErrorCategory::Store,
            Error::Other(_) => ErrorCategory::Other,
        }
    }
}

// ============================================================================
// Mutation outcome surface
// ============================================================================

/// Field-level error in a mutation response
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldError {
    /// Machine-readable code ("not_found", "past_date", ...)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Offending field, when attributable
    pub field: Option<String>,
}

impl FieldError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Structured result of a mutation request
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MutationOutcome {
    /// Whether the mutation was applied
    pub success: bool,
    /// Errors that prevented or qualified the mutation
    pub errors: Vec<FieldError>,
    /// Non-blocking warnings
    pub warnings: Vec<String>,
}

impl MutationOutcome {
    /// Successful outcome with no messages
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Failed outcome carrying the given errors
    pub fn failed(errors: Vec<FieldError>) -> Self {
        Self {
            success: false,
            errors,
            warnings: Vec::new(),
        }
    }

    /// Attach warnings
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_not_recoverable() {
        let err: Error = ValidationError::invalid_identifier("bad id").into();
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn test_mutation_conflict_recoverable() {
        let err: Error = MutationError::Conflict {
            entity: "assignment",
            id: "a1".to_string(),
        }
        .into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Mutation);
    }

    #[test]
    fn test_cache_error_recoverable() {
        let err: Error = CacheError::Timeout(5).into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Cache);
    }

    #[test]
    fn test_store_error_recoverable() {
        let err = Error::store(anyhow::anyhow!("connection reset"));
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Store);
    }

    #[test]
    fn test_category_as_str() {
        assert_eq!(ErrorCategory::Generator.as_str(), "generator");
        assert_eq!(ErrorCategory::Cache.as_str(), "cache");
    }

    #[test]
    fn test_mutation_outcome() {
        let ok = MutationOutcome::ok();
        assert!(ok.success);
        assert!(ok.errors.is_empty());

        let failed = MutationOutcome::failed(vec![FieldError::new(
            "past_date",
            "source week is in the past",
        )
        .with_field("source_week")]);
        assert!(!failed.success);
        assert_eq!(failed.errors[0].field.as_deref(), Some("source_week"));
    }
}
