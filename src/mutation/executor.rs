//! Swap lifecycle execution with validation, rollback, and invalidation
//!
//! Execution is atomic from the caller's view: the post-swap state is
//! validated first (duty-hour and supervision re-checks), the assignment
//! mutation runs under per-person locks, and any validator violation
//! aborts with no state change. Executed swaps carry a 24-hour rollback
//! window; rollback restores the exact assignment set present immediately
//! before execution, provided nothing touched those assignments since.
//!
//! Optimistic-concurrency conflicts during the mutation are retried once
//! with fresh reads; a second conflict surfaces to the caller.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::cache::TieredCache;
use crate::engine::swap_rules::ROLLBACK_WINDOW_HOURS;
use crate::engine::{
    ConstraintEngine, MoonlightingHours, RuleKind, SwapValidator, ValidationContext, Violation,
};
use crate::error::{Error, FieldError, MutationError, MutationOutcome, Result};
use crate::models::{Assignment, Id, Principal, Swap, SwapKind, SwapStatus};
use crate::storage::RecordStore;

/// Days of context loaded around the affected weeks for re-validation;
/// covers a full rolling duty-hour window on both sides
const VALIDATION_MARGIN_DAYS: i64 = 28;

// ============================================================================
// Rollback bookkeeping
// ============================================================================

#[derive(Debug, Clone)]
struct RollbackRecord {
    /// Exact assignments as they were immediately before execution
    pre_image: Vec<Assignment>,

    /// Assignment versions immediately after execution; a mismatch means
    /// something else touched the assignment since
    post_versions: HashMap<Id, u64>,
}

// ============================================================================
// Executor
// ============================================================================

/// Drives the swap lifecycle against the record store
pub struct SwapExecutor {
    store: Arc<dyn RecordStore>,
    engine: ConstraintEngine,
    cache: Option<Arc<TieredCache>>,
    person_locks: Mutex<HashMap<Id, Arc<tokio::sync::Mutex<()>>>>,
    rollback_records: Mutex<HashMap<Id, RollbackRecord>>,
}

impl SwapExecutor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            engine: ConstraintEngine::new(),
            cache: None,
            person_locks: Mutex::new(HashMap::new()),
            rollback_records: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a cache for post-execution invalidation
    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    // =========================================================================
    // Request lifecycle
    // =========================================================================

    /// Validate and create a swap request
    ///
    /// Any role may request; the request must come from the source person
    /// unless the principal can mutate schedules outright.
    pub async fn request(
        &self,
        principal: &Principal,
        swap: Swap,
        today: NaiveDate,
    ) -> Result<MutationOutcome> {
        if principal.id != swap.source_person_id && !principal.role.can_mutate_schedules() {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "forbidden",
                "only the source person or a coordinator may request this swap",
            )]));
        }

        let snapshot = self.snapshot_around(swap.source_week, swap.target_week).await?;
        let pending = self
            .store
            .pending_swaps_for(&swap.source_person_id)
            .await?
            .len();

        let ctx = snapshot.context();
        let check = SwapValidator::new().validate_request(&ctx, &swap, pending, today);

        if !check.is_valid() {
            return Ok(MutationOutcome::failed(check.errors).with_warnings(check.warnings));
        }

        self.store.insert_swap(swap).await?;
        Ok(MutationOutcome::ok().with_warnings(check.warnings))
    }

    /// Approve a pending swap (coordinator or admin)
    pub async fn approve(&self, principal: &Principal, swap_id: &Id) -> Result<MutationOutcome> {
        if let Some(denied) = Self::require_mutator(principal) {
            return Ok(denied);
        }
        self.transition(swap_id, SwapStatus::Pending, SwapStatus::Approved)
            .await
    }

    /// Reject a pending swap (coordinator or admin)
    pub async fn reject(&self, principal: &Principal, swap_id: &Id) -> Result<MutationOutcome> {
        if let Some(denied) = Self::require_mutator(principal) {
            return Ok(denied);
        }
        self.transition(swap_id, SwapStatus::Pending, SwapStatus::Rejected)
            .await
    }

    /// Cancel a pending swap; the requester may cancel their own
    pub async fn cancel(&self, principal: &Principal, swap_id: &Id) -> Result<MutationOutcome> {
        if !principal.role.can_mutate_schedules() {
            let owns = self
                .store
                .swap(swap_id)
                .await?
                .map(|s| s.source_person_id == principal.id)
                .unwrap_or(false);
            if !owns {
                return Ok(MutationOutcome::failed(vec![FieldError::new(
                    "forbidden",
                    "only the requester or a coordinator may cancel this swap",
                )]));
            }
        }
        self.transition(swap_id, SwapStatus::Pending, SwapStatus::Cancelled)
            .await
    }

    fn require_mutator(principal: &Principal) -> Option<MutationOutcome> {
        if principal.role.can_mutate_schedules() {
            None
        } else {
            Some(MutationOutcome::failed(vec![FieldError::new(
                "forbidden",
                "this operation requires a coordinator or admin role",
            )]))
        }
    }

    /// All pending swaps
    pub async fn list_pending(&self) -> Result<Vec<Swap>> {
        self.store.swaps_with_status(SwapStatus::Pending).await
    }

    async fn transition(
        &self,
        swap_id: &Id,
        expected: SwapStatus,
        next: SwapStatus,
    ) -> Result<MutationOutcome> {
        let Some(mut swap) = self.store.swap(swap_id).await? else {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "not_found",
                format!("swap not found: {swap_id}"),
            )]));
        };

        if swap.status != expected {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "invalid_status",
                format!(
                    "swap is '{}', expected '{}'",
                    swap.status.as_str(),
                    expected.as_str()
                ),
            )]));
        }

        swap.status = next;
        swap.decided_at = Some(Utc::now());
        self.store.update_swap(swap).await?;
        Ok(MutationOutcome::ok())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute an approved swap atomically
    ///
    /// Validates the post-swap state, applies the assignment exchange under
    /// per-person locks, stamps the execution timestamp and 24-hour
    /// rollback deadline, and invalidates caches tagged by either person
    /// and the affected weeks. Any validator violation aborts with no
    /// state change.
    pub async fn execute(&self, principal: &Principal, swap_id: &Id) -> Result<MutationOutcome> {
        if let Some(denied) = Self::require_mutator(principal) {
            return Ok(denied);
        }
        let Some(mut swap) = self.store.swap(swap_id).await? else {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "not_found",
                format!("swap not found: {swap_id}"),
            )]));
        };

        if swap.kind == SwapKind::MultiWay {
            return Err(Error::Mutation(MutationError::MultiWayUnsupported));
        }
        if swap.status != SwapStatus::Approved {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "invalid_status",
                format!("swap is '{}', must be approved", swap.status.as_str()),
            )]));
        }
        let Some(target_id) = swap.target_person_id.clone() else {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "missing_target",
                "swap has no counterparty to execute against",
            )]));
        };
        let source_id = swap.source_person_id.clone();

        // Affected assignments: the source's week, and for one-to-one the
        // target's week going the other way
        let source_moves = self
            .week_assignments(&source_id, swap.source_week)
            .await?;
        let target_moves = match (swap.kind, swap.target_week) {
            (SwapKind::OneToOne, Some(week)) => {
                self.week_assignments(&target_id, week).await?
            }
            _ => Vec::new(),
        };

        if source_moves.is_empty() {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "nothing_to_swap",
                format!("{source_id} has no assignments in week of {}", swap.source_week),
            )]));
        }

        // Validate the post-swap state before touching anything
        let snapshot = self.snapshot_around(swap.source_week, swap.target_week).await?;
        let new_violations = self.post_swap_violations(
            &snapshot,
            &source_moves,
            &target_moves,
            &source_id,
            &target_id,
        );

        let blocking: Vec<&Violation> = new_violations
            .iter()
            .filter(|v| v.severity.invalidates())
            .collect();
        if !blocking.is_empty() {
            tracing::warn!(
                swap = %swap_id,
                violations = blocking.len(),
                "swap execution aborted by compliance re-check"
            );
            return Ok(MutationOutcome::failed(
                blocking
                    .iter()
                    .map(|v| FieldError::new(v.rule.as_str(), v.message.clone()))
                    .collect(),
            ));
        }
        let warnings: Vec<String> = new_violations.iter().map(|v| v.message.clone()).collect();

        // Linearize per person; lock order is sorted to stay deadlock-free
        let locks = self.person_locks_for(&[source_id.clone(), target_id.clone()]);
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        // Apply the exchange; conflicts retry once with fresh reads
        let mut pre_image = Vec::new();
        let mut post_versions = HashMap::new();

        for assignment in source_moves.iter() {
            let updated = self
                .reassign(assignment.clone(), target_id.clone())
                .await?;
            pre_image.push(assignment.clone());
            post_versions.insert(updated.id.clone(), updated.version);
        }
        for assignment in target_moves.iter() {
            let updated = self
                .reassign(assignment.clone(), source_id.clone())
                .await?;
            pre_image.push(assignment.clone());
            post_versions.insert(updated.id.clone(), updated.version);
        }

        let executed_at = Utc::now();
        swap.status = SwapStatus::Executed;
        swap.executed_at = Some(executed_at);
        swap.rollback_deadline = Some(executed_at + Duration::hours(ROLLBACK_WINDOW_HOURS));
        self.store.update_swap(swap.clone()).await?;

        self.rollback_records
            .lock()
            .expect("rollback-record lock poisoned")
            .insert(
                swap_id.clone(),
                RollbackRecord {
                    pre_image,
                    post_versions,
                },
            );

        drop(guards);

        self.invalidate_for(&source_id, &target_id, &swap).await;

        tracing::info!(swap = %swap_id, "swap executed");
        Ok(MutationOutcome::ok().with_warnings(warnings))
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Rollback eligibility for an executed swap
    pub async fn rollback_eligibility(
        &self,
        swap_id: &Id,
        now: DateTime<Utc>,
    ) -> Result<crate::engine::swap_rules::RollbackEligibility> {
        let swap = self
            .store
            .swap(swap_id)
            .await?
            .ok_or_else(|| Error::Mutation(MutationError::NotExecutable(
                swap_id.to_string(),
                "swap not found".to_string(),
            )))?;

        let untouched = self.assignments_untouched(swap_id).await?;
        Ok(SwapValidator::new().rollback_eligibility(&swap, untouched, now))
    }

    /// Roll an executed swap back inside its 24-hour window
    ///
    /// Restores the exact assignment set present immediately before
    /// execution.
    pub async fn rollback(
        &self,
        principal: &Principal,
        swap_id: &Id,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome> {
        if let Some(denied) = Self::require_mutator(principal) {
            return Ok(denied);
        }
        let Some(mut swap) = self.store.swap(swap_id).await? else {
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "not_found",
                format!("swap not found: {swap_id}"),
            )]));
        };

        let untouched = self.assignments_untouched(swap_id).await?;
        let eligibility = SwapValidator::new().rollback_eligibility(&swap, untouched, now);
        if !eligibility.can_rollback {
            let reason = eligibility
                .reason
                .unwrap_or_else(|| "rollback not permitted".to_string());
            return Ok(MutationOutcome::failed(vec![FieldError::new(
                "rollback_denied",
                reason,
            )]));
        }

        let record = self
            .rollback_records
            .lock()
            .expect("rollback-record lock poisoned")
            .get(swap_id)
            .cloned()
            .ok_or_else(|| {
                Error::Mutation(MutationError::NotExecutable(
                    swap_id.to_string(),
                    "no rollback record retained".to_string(),
                ))
            })?;

        let mut people: Vec<Id> = record
            .pre_image
            .iter()
            .map(|a| a.person_id.clone())
            .collect();
        people.sort();
        people.dedup();

        let locks = self.person_locks_for(&people);
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }

        for original in &record.pre_image {
            let current = self
                .store
                .assignment(&original.id)
                .await?
                .ok_or_else(|| {
                    Error::Mutation(MutationError::NotExecutable(
                        swap_id.to_string(),
                        format!("assignment {} vanished", original.id),
                    ))
                })?;

            let mut restored = original.clone();
            restored.version = current.version;
            self.store.update_assignment(restored).await?;
        }

        swap.status = SwapStatus::RolledBack;
        self.store.update_swap(swap.clone()).await?;
        self.rollback_records
            .lock()
            .expect("rollback-record lock poisoned")
            .remove(swap_id);

        drop(guards);

        if let Some(target_id) = &swap.target_person_id {
            self.invalidate_for(&swap.source_person_id, target_id, &swap).await;
        }

        tracing::info!(swap = %swap_id, "swap rolled back");
        Ok(MutationOutcome::ok())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn reassign(&self, assignment: Assignment, new_person: Id) -> Result<Assignment> {
        let mut updated = assignment.clone();
        updated.person_id = new_person.clone();

        match self.store.update_assignment(updated).await {
            Ok(applied) => Ok(applied),
            Err(Error::Mutation(MutationError::Conflict { .. })) => {
                // One retry with a fresh read; a second conflict surfaces
                let fresh = self
                    .store
                    .assignment(&assignment.id)
                    .await?
                    .ok_or_else(|| {
                        Error::Mutation(MutationError::NotExecutable(
                            assignment.id.to_string(),
                            "assignment vanished during execution".to_string(),
                        ))
                    })?;
                let mut retry = fresh;
                retry.person_id = new_person;
                self.store.update_assignment(retry).await
            }
            Err(e) => Err(e),
        }
    }

    /// Whether every assignment the swap touched still carries the version
    /// stamped at execution
    async fn assignments_untouched(&self, swap_id: &Id) -> Result<bool> {
        let record = {
            let records = self
                .rollback_records
                .lock()
                .expect("rollback-record lock poisoned");
            records.get(swap_id).cloned()
        };
        let Some(record) = record else {
            return Ok(false);
        };

        for (assignment_id, version) in &record.post_versions {
            let current = self.store.assignment(assignment_id).await?;
            if current.map(|a| a.version) != Some(*version) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn week_assignments(&self, person_id: &Id, week_start: NaiveDate) -> Result<Vec<Assignment>> {
        let assignments = self
            .store
            .assignments_for_person(person_id, week_start, week_start + Duration::days(6))
            .await?;
        Ok(assignments.into_iter().filter(|a| a.is_primary()).collect())
    }

    /// Duty-hour and supervision findings introduced by the swap
    fn post_swap_violations(
        &self,
        snapshot: &Snapshot,
        source_moves: &[Assignment],
        target_moves: &[Assignment],
        source_id: &Id,
        target_id: &Id,
    ) -> Vec<Violation> {
        let post_assignments: Vec<Assignment> = snapshot
            .assignments
            .iter()
            .map(|a| {
                let mut assignment = a.clone();
                if source_moves.iter().any(|m| m.id == a.id) {
                    assignment.person_id = target_id.clone();
                } else if target_moves.iter().any(|m| m.id == a.id) {
                    assignment.person_id = source_id.clone();
                }
                assignment
            })
            .collect();

        let moonlighting = MoonlightingHours::new();
        let pre_ctx = ValidationContext::new(
            &snapshot.persons,
            &snapshot.blocks,
            &snapshot.templates,
            &snapshot.assignments,
            &snapshot.absences,
            &[],
            &moonlighting,
        );
        let post_ctx = ValidationContext::new(
            &snapshot.persons,
            &snapshot.blocks,
            &snapshot.templates,
            &post_assignments,
            &snapshot.absences,
            &[],
            &moonlighting,
        );

        let collect = |ctx: &ValidationContext| -> Vec<Violation> {
            let (mut violations, _) = self.engine.duty_hour_rules().validate(ctx);
            violations.extend(self.engine.supervision_rules().validate(ctx));
            violations
        };

        let pre_keys: Vec<(RuleKind, Option<Id>, (NaiveDate, NaiveDate))> = collect(&pre_ctx)
            .into_iter()
            .map(|v| (v.rule, v.person_id, v.date_range))
            .collect();

        collect(&post_ctx)
            .into_iter()
            .filter(|v| !pre_keys.contains(&(v.rule, v.person_id.clone(), v.date_range)))
            .collect()
    }

    /// Per-person mutexes in sorted order
    fn person_locks_for(&self, people: &[Id]) -> Vec<Arc<tokio::sync::Mutex<()>>> {
        let mut sorted: Vec<Id> = people.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut registry = self.person_locks.lock().expect("person-lock registry poisoned");
        sorted
            .into_iter()
            .map(|person| {
                Arc::clone(
                    registry
                        .entry(person)
                        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
                )
            })
            .collect()
    }

    async fn invalidate_for(&self, source: &Id, target: &Id, swap: &Swap) {
        let Some(cache) = &self.cache else {
            return;
        };

        cache.invalidate_by_tag(&format!("person:{source}")).await;
        cache.invalidate_by_tag(&format!("person:{target}")).await;
        cache
            .invalidate_by_tag(&format!("week:{}", swap.source_week))
            .await;
        if let Some(week) = swap.target_week {
            cache.invalidate_by_tag(&format!("week:{week}")).await;
        }
    }

    async fn snapshot_around(
        &self,
        source_week: NaiveDate,
        target_week: Option<NaiveDate>,
    ) -> Result<Snapshot> {
        let earliest = target_week
            .map(|w| w.min(source_week))
            .unwrap_or(source_week)
            - Duration::days(VALIDATION_MARGIN_DAYS);
        let latest = target_week
            .map(|w| w.max(source_week))
            .unwrap_or(source_week)
            + Duration::days(6 + VALIDATION_MARGIN_DAYS);

        Ok(Snapshot {
            persons: self.store.persons().await?,
            blocks: self.store.blocks_in_range(earliest, latest).await?,
            templates: self.store.templates().await?,
            assignments: self.store.assignments_in_range(earliest, latest).await?,
            absences: self.store.absences_in_range(earliest, latest).await?,
        })
    }
}

/// Store snapshot for one validation pass
struct Snapshot {
    persons: Vec<crate::models::Person>,
    blocks: Vec<crate::models::Block>,
    templates: Vec<crate::models::RotationTemplate>,
    assignments: Vec<Assignment>,
    absences: Vec<crate::models::Absence>,
}

impl Snapshot {
    fn context(&self) -> ValidationContext<'_> {
        static EMPTY_MOONLIGHTING: std::sync::OnceLock<MoonlightingHours> =
            std::sync::OnceLock::new();
        ValidationContext::new(
            &self.persons,
            &self.blocks,
            &self.templates,
            &self.assignments,
            &self.absences,
            &[],
            EMPTY_MOONLIGHTING.get_or_init(MoonlightingHours::new),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, Person, Role, Session};
    use crate::storage::MemoryStore;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    fn coordinator() -> Principal {
        Principal::new(id("coord-1"), Role::Coordinator)
    }

    /// Two faculty with one week of assignments each, plus supervision
    /// staff so the re-check passes
    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());

        for (pid, name) in [("f1", "Dr. Stone"), ("f2", "Dr. Vale"), ("f3", "Dr. Reef")] {
            store
                .upsert_person(Person::faculty(id(pid), name))
                .await
                .unwrap();
        }

        // Week of 2025-06-02 belongs to f1, week of 2025-06-09 to f2
        let mut block_number = 1;
        for (owner, week) in [("f1", "2025-06-02"), ("f2", "2025-06-09")] {
            for day in 0..5 {
                let date = d(week) + Duration::days(day);
                let block = Block::new(
                    id(&format!("b-{owner}-{day}")),
                    date,
                    Session::Am,
                    block_number,
                );
                block_number += 1;
                store.upsert_block(block).await.unwrap();
                store
                    .insert_assignment(Assignment::primary(
                        id(&format!("b-{owner}-{day}")),
                        id(owner),
                        None,
                    ))
                    .await
                    .unwrap();
            }
        }

        store
    }

    async fn approved_swap(store: &Arc<MemoryStore>) -> Swap {
        let mut swap = Swap::one_to_one(
            id("sw1"),
            id("f1"),
            d("2025-06-02"),
            id("f2"),
            d("2025-06-09"),
        );
        swap.status = SwapStatus::Approved;
        store.insert_swap(swap.clone()).await.unwrap();
        swap
    }

    #[tokio::test]
    async fn test_execute_exchanges_weeks() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);
        approved_swap(&store).await;

        let outcome = executor.execute(&coordinator(), &id("sw1")).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.errors);

        // f2 now owns f1's old week and vice versa
        let june2 = store
            .assignments_for_person(&id("f2"), d("2025-06-02"), d("2025-06-08"))
            .await
            .unwrap();
        assert_eq!(june2.len(), 5);
        let june9 = store
            .assignments_for_person(&id("f1"), d("2025-06-09"), d("2025-06-15"))
            .await
            .unwrap();
        assert_eq!(june9.len(), 5);

        let swap = store.swap(&id("sw1")).await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::Executed);
        let executed_at = swap.executed_at.unwrap();
        assert_eq!(
            swap.rollback_deadline.unwrap(),
            executed_at + Duration::hours(24)
        );
    }

    #[tokio::test]
    async fn test_execute_requires_approval() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);

        let swap = Swap::one_to_one(
            id("sw1"),
            id("f1"),
            d("2025-06-02"),
            id("f2"),
            d("2025-06-09"),
        );
        store.insert_swap(swap).await.unwrap();

        let outcome = executor.execute(&coordinator(), &id("sw1")).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].code, "invalid_status");

        // Nothing moved
        let untouched = store
            .assignments_for_person(&id("f1"), d("2025-06-02"), d("2025-06-08"))
            .await
            .unwrap();
        assert_eq!(untouched.len(), 5);
    }

    #[tokio::test]
    async fn test_multi_way_has_no_executor() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);

        let mut swap = Swap::absorb(id("sw1"), id("f1"), d("2025-06-02"));
        swap.kind = SwapKind::MultiWay;
        swap.status = SwapStatus::Approved;
        store.insert_swap(swap).await.unwrap();

        let result = executor.execute(&coordinator(), &id("sw1")).await;
        assert!(matches!(
            result,
            Err(Error::Mutation(MutationError::MultiWayUnsupported))
        ));
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_assignments() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);
        approved_swap(&store).await;

        let before: Vec<(Id, Id)> = store
            .assignments_in_range(d("2025-06-02"), d("2025-06-15"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| (a.id, a.person_id))
            .collect();

        executor.execute(&coordinator(), &id("sw1")).await.unwrap();
        let outcome = executor.rollback(&coordinator(), &id("sw1"), Utc::now()).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.errors);

        let after: Vec<(Id, Id)> = store
            .assignments_in_range(d("2025-06-02"), d("2025-06-15"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| (a.id, a.person_id))
            .collect();

        let mut before_sorted = before;
        let mut after_sorted = after;
        before_sorted.sort();
        after_sorted.sort();
        assert_eq!(before_sorted, after_sorted);

        let swap = store.swap(&id("sw1")).await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_after_window_rejected() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);
        approved_swap(&store).await;
        executor.execute(&coordinator(), &id("sw1")).await.unwrap();

        // One minute past the deadline
        let late = Utc::now() + Duration::hours(24) + Duration::minutes(1);
        let eligibility = executor.rollback_eligibility(&id("sw1"), late).await.unwrap();
        assert!(!eligibility.can_rollback);
        assert_eq!(eligibility.reason.as_deref(), Some("rollback window expired"));
        assert_eq!(eligibility.hours_remaining, 0.0);

        let outcome = executor.rollback(&coordinator(), &id("sw1"), late).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.errors[0].message.contains("expired"));
    }

    #[tokio::test]
    async fn test_rollback_just_inside_window_succeeds() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);
        approved_swap(&store).await;
        executor.execute(&coordinator(), &id("sw1")).await.unwrap();

        let almost = Utc::now() + Duration::hours(23) + Duration::minutes(59);
        let eligibility = executor
            .rollback_eligibility(&id("sw1"), almost)
            .await
            .unwrap();
        assert!(eligibility.can_rollback);
        assert!(eligibility.hours_remaining > 0.0);
    }

    #[tokio::test]
    async fn test_rollback_blocked_by_later_modification() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);
        approved_swap(&store).await;
        executor.execute(&coordinator(), &id("sw1")).await.unwrap();

        // Someone edits one of the swapped assignments afterward
        let touched = store
            .assignments_for_person(&id("f2"), d("2025-06-02"), d("2025-06-08"))
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        store.update_assignment(touched).await.unwrap();

        let outcome = executor.rollback(&coordinator(), &id("sw1"), Utc::now()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.errors[0].message.contains("modified"));
    }

    #[tokio::test]
    async fn test_request_lifecycle_transitions() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);

        let swap = Swap::one_to_one(
            id("sw1"),
            id("f1"),
            d("2025-06-02"),
            id("f2"),
            d("2025-06-09"),
        );
        let outcome = executor.request(&Principal::new(id("f1"), Role::Faculty), swap, d("2025-05-01")).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.errors);

        assert_eq!(executor.list_pending().await.unwrap().len(), 1);

        let outcome = executor.approve(&coordinator(), &id("sw1")).await.unwrap();
        assert!(outcome.success);

        // Approving twice fails on status
        let outcome = executor.approve(&coordinator(), &id("sw1")).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_request_rejects_past_week() {
        let store = seeded_store().await;
        let executor = SwapExecutor::new(store.clone() as Arc<dyn RecordStore>);

        let swap = Swap::one_to_one(
            id("sw1"),
            id("f1"),
            d("2025-06-02"),
            id("f2"),
            d("2025-06-09"),
        );
        // "Today" is after the source week
        let outcome = executor.request(&Principal::new(id("f1"), Role::Faculty), swap, d("2025-07-01")).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.errors.iter().any(|e| e.code == "past_date"));
    }
}
