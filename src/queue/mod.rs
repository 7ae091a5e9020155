//! Background task queue with priorities, dependencies, and dead letter
//!
//! Tasks carry a name, JSON arguments, a priority band, an optional
//! countdown or ETA, and an optional dependency list. Priorities map to
//! distinct queues drained highest-first. Dependent tasks stay blocked
//! until every parent succeeds; any parent failure moves the dependent to
//! the dead-letter store with cause `dependency_failed`.
//!
//! The dead-letter store is durable: a Redis list when available, an
//! append-only NDJSON file otherwise. Replay is explicit and
//! administrator-gated.
//!
//! # Modules
//!
//! - [`retry`] - backoff/jitter retry policies and the `Retrying` combinator
//! - [`breaker`] - circuit breaker and the `Guarded` combinator
//! - [`throttle`] - admission-control strategies with the degradation ladder

pub mod breaker;
pub mod retry;
pub mod throttle;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, Guarded};
pub use retry::{Backoff, Jitter, Retrying, RetryHooks, RetryPolicy};
pub use throttle::{ThrottleAction, ThrottleDecision, ThrottleMetrics, ThrottleStrategy};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, QueueError, Result};
use crate::models::Id;

// ============================================================================
// Priorities
// ============================================================================

/// Priority bands, each backed by its own queue
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// All bands, drain order (highest first)
    pub fn drain_order() -> [Self; 4] {
        [Self::Critical, Self::High, Self::Normal, Self::Low]
    }

    fn band_index(&self) -> usize {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Submission payload for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Registered task name
    pub name: String,

    /// JSON arguments handed to the executor
    #[serde(default)]
    pub args: serde_json::Value,

    pub priority: TaskPriority,

    /// Delay before the task becomes ready
    #[serde(skip)]
    pub countdown: Option<Duration>,

    /// Absolute readiness time; wins over countdown
    pub eta: Option<DateTime<Utc>>,

    /// Parent tasks that must succeed first
    #[serde(default)]
    pub dependencies: Vec<Id>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: serde_json::Value::Null,
            priority: TaskPriority::Normal,
            countdown: None,
            eta: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Id>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Lifecycle state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready (or waiting on countdown/ETA) in its band
    Pending,
    /// Waiting on unfinished parents
    Blocked,
    /// Handed to an executor
    Running,
    Succeeded,
    Failed,
    DeadLettered,
}

/// A task tracked by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    pub spec: TaskSpec,
    pub state: TaskState,
    pub enqueued_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
}

// ============================================================================
// Dead Letter Store
// ============================================================================

/// One dead-lettered task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task_id: Id,
    pub name: String,
    pub args: serde_json::Value,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Durable store for exhausted tasks: Redis list primary, NDJSON file
/// fallback
pub struct DeadLetterStore {
    redis: Option<deadpool_redis::Pool>,
    list_key: String,
    fallback_path: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetterStore {
    /// File-only store rooted at `dir`
    pub fn file_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            redis: None,
            list_key: "rota:dead_letter".to_string(),
            fallback_path: dir.into().join("dead_letter.ndjson"),
            write_lock: Mutex::new(()),
        }
    }

    /// Store with a Redis primary and file fallback
    pub fn with_redis(pool: deadpool_redis::Pool, dir: impl Into<PathBuf>) -> Self {
        Self {
            redis: Some(pool),
            ..Self::file_only(dir)
        }
    }

    /// Persist an entry; Redis failure falls back to the file
    pub async fn record(&self, entry: &DeadLetterEntry) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| Error::context(format!("dead-letter serialization: {e}")))?;

        if let Some(pool) = &self.redis {
            let pushed: Option<()> = async {
                let mut conn = pool.get().await.ok()?;
                redis::cmd("RPUSH")
                    .arg(&self.list_key)
                    .arg(&line)
                    .query_async(&mut *conn)
                    .await
                    .ok()
            }
            .await;

            if pushed.is_some() {
                return Ok(());
            }
            tracing::warn!("dead-letter Redis write failed, using file fallback");
        }

        let _guard = self.write_lock.lock().expect("dead-letter lock poisoned");
        if let Some(parent) = self.fallback_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::context(e.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.fallback_path)
            .map_err(|e| Error::context(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| Error::context(e.to_string()))?;
        Ok(())
    }

    /// All persisted entries (file tier; Redis tier when available)
    pub async fn entries(&self) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = Vec::new();

        if let Some(pool) = &self.redis {
            if let Ok(mut conn) = pool.get().await {
                let lines: Vec<String> = redis::cmd("LRANGE")
                    .arg(&self.list_key)
                    .arg(0)
                    .arg(-1)
                    .query_async(&mut *conn)
                    .await
                    .unwrap_or_default();
                for line in lines {
                    if let Ok(entry) = serde_json::from_str(&line) {
                        entries.push(entry);
                    }
                }
            }
        }

        if self.fallback_path.exists() {
            let file = std::fs::File::open(&self.fallback_path)
                .map_err(|e| Error::context(e.to_string()))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| Error::context(e.to_string()))?;
                if let Ok(entry) = serde_json::from_str::<DeadLetterEntry>(&line) {
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }
}

// ============================================================================
// Task Queue
// ============================================================================

/// Queue tuning
#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    /// Maximum queued tasks per priority band
    pub max_depth_per_band: usize,

    /// Admission-control strategy
    pub throttle: ThrottleStrategy,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_depth_per_band: 1000,
            throttle: ThrottleStrategy::Adaptive,
        }
    }
}

#[derive(Default)]
struct QueueInner {
    /// One FIFO per band, indexed by `TaskPriority::band_index`
    bands: [VecDeque<Id>; 4],
    tasks: HashMap<Id, Task>,
    /// parent → dependents
    dependents: HashMap<Id, Vec<Id>>,
    /// dependent → unfinished parents
    blocked_on: HashMap<Id, HashSet<Id>>,
}

/// Priority task queue with dependency deferral and dead letter
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    dead_letter: DeadLetterStore,
    config: TaskQueueConfig,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig, dead_letter: DeadLetterStore) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            dead_letter,
            config,
        }
    }

    /// Submit a task; over-limit enqueues are rejected with a retry-after
    /// hint from the throttling strategy
    pub async fn submit(&self, spec: TaskSpec) -> Result<Id> {
        // Parent failure is checked before admission so the dependent can
        // be dead-lettered even under back-pressure
        let failed_parent = {
            let inner = self.inner.lock().expect("queue lock poisoned");
            spec.dependencies.iter().find(|parent| {
                matches!(
                    inner.tasks.get(*parent).map(|t| t.state),
                    Some(TaskState::Failed) | Some(TaskState::DeadLettered)
                )
            }).cloned()
        };

        let id = Id::generate();
        let now = Utc::now();

        if let Some(parent) = failed_parent {
            let entry = DeadLetterEntry {
                task_id: id.clone(),
                name: spec.name.clone(),
                args: spec.args.clone(),
                reason: "dependency_failed".to_string(),
                dead_lettered_at: now,
            };
            self.dead_letter.record(&entry).await?;

            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.tasks.insert(
                id.clone(),
                Task {
                    id: id.clone(),
                    spec,
                    state: TaskState::DeadLettered,
                    enqueued_at: now,
                    ready_at: now,
                },
            );
            tracing::warn!(task = %id, parent = %parent, "dependent dead-lettered at submit");
            return Ok(id);
        }

        let mut inner = self.inner.lock().expect("queue lock poisoned");

        // Back-pressure per band
        let depth = inner.bands[spec.priority.band_index()].len();
        let metrics = ThrottleMetrics {
            utilization: depth as f64 / self.config.max_depth_per_band as f64,
            queue_utilization: depth as f64 / self.config.max_depth_per_band as f64,
            queued_requests: depth,
        };
        let decision = self.config.throttle.decide(metrics, spec.priority);
        if decision.action == ThrottleAction::Reject {
            return Err(Error::Queue(QueueError::Rejected(
                spec.name,
                format!("{} (retry after {}s)", decision.reason, decision.retry_after),
            )));
        }

        // Unknown parents are a contract error
        for parent in &spec.dependencies {
            if !inner.tasks.contains_key(parent) {
                return Err(Error::Queue(QueueError::UnknownTask(parent.to_string())));
            }
        }

        let ready_at = spec
            .eta
            .or_else(|| {
                spec.countdown.map(|countdown| {
                    now + ChronoDuration::milliseconds(countdown.as_millis() as i64)
                })
            })
            .unwrap_or(now);

        let unfinished: HashSet<Id> = spec
            .dependencies
            .iter()
            .filter(|parent| {
                inner.tasks.get(*parent).map(|t| t.state) != Some(TaskState::Succeeded)
            })
            .cloned()
            .collect();

        let state = if unfinished.is_empty() {
            TaskState::Pending
        } else {
            TaskState::Blocked
        };

        for parent in &unfinished {
            inner
                .dependents
                .entry(parent.clone())
                .or_default()
                .push(id.clone());
        }
        if !unfinished.is_empty() {
            inner.blocked_on.insert(id.clone(), unfinished);
        }

        let priority = spec.priority;
        inner.tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                spec,
                state,
                enqueued_at: now,
                ready_at,
            },
        );
        if state == TaskState::Pending {
            inner.bands[priority.band_index()].push_back(id.clone());
        }

        Ok(id)
    }

    /// Submit a sequential chain; each task depends on the previous one
    pub async fn submit_chain(&self, specs: Vec<TaskSpec>) -> Result<Vec<Id>> {
        let mut ids = Vec::with_capacity(specs.len());
        let mut previous: Option<Id> = None;

        for mut spec in specs {
            if let Some(parent) = &previous {
                spec.dependencies.push(parent.clone());
            }
            let id = self.submit(spec).await?;
            previous = Some(id.clone());
            ids.push(id);
        }

        Ok(ids)
    }

    /// Submit an independent group
    pub async fn submit_group(&self, specs: Vec<TaskSpec>) -> Result<Vec<Id>> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(self.submit(spec).await?);
        }
        Ok(ids)
    }

    /// Pop the next ready task, highest band first; marks it running
    pub fn pop_ready(&self) -> Option<Task> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let QueueInner { bands, tasks, .. } = &mut *inner;

        for priority in TaskPriority::drain_order() {
            let band = &mut bands[priority.band_index()];
            let position = band.iter().position(|id| {
                tasks
                    .get(id)
                    .map(|t| t.state == TaskState::Pending && t.ready_at <= now)
                    .unwrap_or(false)
            });

            if let Some(position) = position {
                let id = band.remove(position).expect("position just found");
                let task = tasks.get_mut(&id).expect("task tracked");
                task.state = TaskState::Running;
                return Some(task.clone());
            }
        }

        None
    }

    /// Record terminal success and release dependents whose parents are all
    /// done
    pub fn complete_success(&self, id: &Id) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let QueueInner {
            bands,
            tasks,
            dependents,
            blocked_on,
        } = &mut *inner;

        let task = tasks
            .get_mut(id)
            .ok_or_else(|| Error::Queue(QueueError::UnknownTask(id.to_string())))?;
        task.state = TaskState::Succeeded;

        for dependent in dependents.remove(id).unwrap_or_default() {
            let released = match blocked_on.get_mut(&dependent) {
                Some(parents) => {
                    parents.remove(id);
                    parents.is_empty()
                }
                None => false,
            };
            if released {
                blocked_on.remove(&dependent);
                if let Some(task) = tasks.get_mut(&dependent) {
                    if task.state == TaskState::Blocked {
                        task.state = TaskState::Pending;
                        bands[task.spec.priority.band_index()].push_back(dependent.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Record terminal failure: the task and every transitive dependent go
    /// to the dead-letter store
    pub async fn complete_failure(&self, id: &Id, reason: &str) -> Result<()> {
        let mut to_bury: Vec<(Id, String)> = vec![(id.clone(), reason.to_string())];
        let mut entries = Vec::new();

        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");

            while let Some((task_id, cause)) = to_bury.pop() {
                let Some(task) = inner.tasks.get_mut(&task_id) else {
                    continue;
                };
                if matches!(task.state, TaskState::DeadLettered) {
                    continue;
                }
                task.state = if task_id == *id {
                    TaskState::Failed
                } else {
                    TaskState::DeadLettered
                };

                entries.push(DeadLetterEntry {
                    task_id: task_id.clone(),
                    name: task.spec.name.clone(),
                    args: task.spec.args.clone(),
                    reason: cause,
                    dead_lettered_at: Utc::now(),
                });

                for dependent in inner.dependents.remove(&task_id).unwrap_or_default() {
                    inner.blocked_on.remove(&dependent);
                    to_bury.push((dependent, "dependency_failed".to_string()));
                }
            }
        }

        for entry in &entries {
            self.dead_letter.record(entry).await?;
            tracing::warn!(task = %entry.task_id, reason = %entry.reason, "task dead-lettered");
        }

        Ok(())
    }

    /// Current state of a task
    pub fn task_state(&self, id: &Id) -> Option<TaskState> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .tasks
            .get(id)
            .map(|t| t.state)
    }

    /// Queued depth of one band
    pub fn band_depth(&self, priority: TaskPriority) -> usize {
        self.inner.lock().expect("queue lock poisoned").bands[priority.band_index()].len()
    }

    /// Dead-letter entries, for administrator review
    pub async fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>> {
        self.dead_letter.entries().await
    }

    /// Administrator-gated replay: resubmit a dead-lettered task as a fresh
    /// task with no dependencies
    pub async fn replay(
        &self,
        principal: &crate::models::Principal,
        entry: &DeadLetterEntry,
    ) -> Result<Id> {
        if !principal.role.is_administrator() {
            return Err(Error::Queue(QueueError::Rejected(
                entry.name.clone(),
                "dead-letter replay requires an admin role".to_string(),
            )));
        }
        let spec = TaskSpec::new(entry.name.clone()).with_args(entry.args.clone());
        self.submit(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue() -> (TempDir, TaskQueue) {
        let dir = TempDir::new().unwrap();
        let queue = TaskQueue::new(
            TaskQueueConfig::default(),
            DeadLetterStore::file_only(dir.path()),
        );
        (dir, queue)
    }

    #[tokio::test]
    async fn test_priority_drain_order() {
        let (_dir, queue) = queue();
        let low = queue
            .submit(TaskSpec::new("low").with_priority(TaskPriority::Low))
            .await
            .unwrap();
        let critical = queue
            .submit(TaskSpec::new("critical").with_priority(TaskPriority::Critical))
            .await
            .unwrap();
        let normal = queue
            .submit(TaskSpec::new("normal").with_priority(TaskPriority::Normal))
            .await
            .unwrap();

        assert_eq!(queue.pop_ready().unwrap().id, critical);
        assert_eq!(queue.pop_ready().unwrap().id, normal);
        assert_eq!(queue.pop_ready().unwrap().id, low);
        assert!(queue.pop_ready().is_none());
    }

    #[tokio::test]
    async fn test_countdown_defers_readiness() {
        let (_dir, queue) = queue();
        queue
            .submit(TaskSpec::new("later").with_countdown(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(queue.pop_ready().is_none());
    }

    #[tokio::test]
    async fn test_dependency_blocks_until_parent_succeeds() {
        let (_dir, queue) = queue();
        let parent = queue.submit(TaskSpec::new("parent")).await.unwrap();
        let child = queue
            .submit(TaskSpec::new("child").with_dependencies(vec![parent.clone()]))
            .await
            .unwrap();

        assert_eq!(queue.task_state(&child), Some(TaskState::Blocked));

        let popped = queue.pop_ready().unwrap();
        assert_eq!(popped.id, parent);
        queue.complete_success(&parent).unwrap();

        assert_eq!(queue.task_state(&child), Some(TaskState::Pending));
        assert_eq!(queue.pop_ready().unwrap().id, child);
    }

    #[tokio::test]
    async fn test_parent_failure_dead_letters_dependents() {
        let (_dir, queue) = queue();
        let parent = queue.submit(TaskSpec::new("parent")).await.unwrap();
        let child = queue
            .submit(TaskSpec::new("child").with_dependencies(vec![parent.clone()]))
            .await
            .unwrap();
        let grandchild = queue
            .submit(TaskSpec::new("grandchild").with_dependencies(vec![child.clone()]))
            .await
            .unwrap();

        queue.pop_ready();
        queue.complete_failure(&parent, "boom").await.unwrap();

        assert_eq!(queue.task_state(&child), Some(TaskState::DeadLettered));
        assert_eq!(queue.task_state(&grandchild), Some(TaskState::DeadLettered));

        let letters = queue.dead_letters().await.unwrap();
        assert_eq!(letters.len(), 3);
        assert!(letters
            .iter()
            .any(|e| e.task_id == child && e.reason == "dependency_failed"));
    }

    #[tokio::test]
    async fn test_submit_against_failed_parent_dead_letters_immediately() {
        let (_dir, queue) = queue();
        let parent = queue.submit(TaskSpec::new("parent")).await.unwrap();
        queue.pop_ready();
        queue.complete_failure(&parent, "boom").await.unwrap();

        let late_child = queue
            .submit(TaskSpec::new("late").with_dependencies(vec![parent]))
            .await
            .unwrap();
        assert_eq!(queue.task_state(&late_child), Some(TaskState::DeadLettered));
    }

    #[tokio::test]
    async fn test_unknown_dependency_rejected() {
        let (_dir, queue) = queue();
        let result = queue
            .submit(TaskSpec::new("orphan").with_dependencies(vec![Id::generate()]))
            .await;
        assert!(matches!(
            result,
            Err(Error::Queue(QueueError::UnknownTask(_)))
        ));
    }

    #[tokio::test]
    async fn test_back_pressure_rejects_low_priority() {
        let dir = TempDir::new().unwrap();
        let queue = TaskQueue::new(
            TaskQueueConfig {
                max_depth_per_band: 10,
                throttle: ThrottleStrategy::Adaptive,
            },
            DeadLetterStore::file_only(dir.path()),
        );

        // Fill the low band to 80% utilization; the adaptive ladder admits
        // (or queues) low priority up to that point
        for i in 0..8 {
            queue
                .submit(TaskSpec::new(format!("t{i}")).with_priority(TaskPriority::Low))
                .await
                .unwrap();
        }

        let result = queue
            .submit(TaskSpec::new("one-too-many").with_priority(TaskPriority::Low))
            .await;
        assert!(matches!(result, Err(Error::Queue(QueueError::Rejected(_, _)))));

        // Critical still flows
        queue
            .submit(TaskSpec::new("vip").with_priority(TaskPriority::Critical))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_chain_builds_dependencies() {
        let (_dir, queue) = queue();
        let ids = queue
            .submit_chain(vec![
                TaskSpec::new("one"),
                TaskSpec::new("two"),
                TaskSpec::new("three"),
            ])
            .await
            .unwrap();

        assert_eq!(queue.task_state(&ids[0]), Some(TaskState::Pending));
        assert_eq!(queue.task_state(&ids[1]), Some(TaskState::Blocked));
        assert_eq!(queue.task_state(&ids[2]), Some(TaskState::Blocked));

        queue.pop_ready();
        queue.complete_success(&ids[0]).unwrap();
        assert_eq!(queue.task_state(&ids[1]), Some(TaskState::Pending));
        assert_eq!(queue.task_state(&ids[2]), Some(TaskState::Blocked));
    }

    #[tokio::test]
    async fn test_replay_is_admin_gated() {
        let (_dir, queue) = queue();
        let parent = queue.submit(TaskSpec::new("doomed")).await.unwrap();
        queue.pop_ready();
        queue.complete_failure(&parent, "boom").await.unwrap();

        let letters = queue.dead_letters().await.unwrap();

        let resident = crate::models::Principal::new(
            Id::new("res-1").unwrap(),
            crate::models::Role::Resident,
        );
        assert!(queue.replay(&resident, &letters[0]).await.is_err());

        let admin = crate::models::Principal::new(
            Id::new("admin-1").unwrap(),
            crate::models::Role::Admin,
        );
        let replayed = queue.replay(&admin, &letters[0]).await.unwrap();
        assert_eq!(queue.task_state(&replayed), Some(TaskState::Pending));
    }
}
