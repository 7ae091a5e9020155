//! In-memory record store over typed arenas
//!
//! Entities live in per-type arenas (a `Vec` slab plus an id→slot index);
//! cross-references are identifiers, never pointers. The whole store sits
//! behind one `RwLock`, which is plenty for the single-process uses this
//! implementation serves (tests, embedded runs, the mutation engine's
//! validation snapshots).

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::RwLock;

use super::RecordStore;
use crate::error::{Error, MutationError, Result, ValidationError};
use crate::models::{Absence, Assignment, Block, Id, Person, RotationTemplate, Swap, SwapStatus};

/// A typed slab with an identifier index
#[derive(Debug)]
struct Arena<T> {
    slots: Vec<T>,
    index: HashMap<Id, usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone> Arena<T> {
    fn get(&self, id: &Id) -> Option<&T> {
        self.index.get(id).map(|slot| &self.slots[*slot])
    }

    fn upsert(&mut self, id: Id, value: T) {
        match self.index.get(&id) {
            Some(slot) => self.slots[*slot] = value,
            None => {
                self.index.insert(id, self.slots.len());
                self.slots.push(value);
            }
        }
    }

    fn all(&self) -> Vec<T> {
        self.slots.clone()
    }
}

#[derive(Debug, Default)]
struct Inner {
    persons: Arena<Person>,
    blocks: Arena<Block>,
    templates: Arena<RotationTemplate>,
    assignments: Arena<Assignment>,
    absences: Arena<Absence>,
    swaps: Arena<Swap>,
}

/// Arena-backed in-memory implementation of [`RecordStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience loader for tests and embedded runs
    pub fn seeded(
        persons: Vec<Person>,
        blocks: Vec<Block>,
        templates: Vec<RotationTemplate>,
    ) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write().expect("store lock poisoned");
            for person in persons {
                inner.persons.upsert(person.id.clone(), person);
            }
            for block in blocks {
                inner.blocks.upsert(block.id.clone(), block);
            }
            for template in templates {
                inner.templates.upsert(template.id.clone(), template);
            }
        }
        store
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("store lock poisoned")
    }

    fn block_date(inner: &Inner, block_id: &Id) -> Option<NaiveDate> {
        inner.blocks.get(block_id).map(|b| b.date)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn person(&self, id: &Id) -> Result<Option<Person>> {
        Ok(self.read().persons.get(id).cloned())
    }

    async fn persons(&self) -> Result<Vec<Person>> {
        Ok(self.read().persons.all())
    }

    async fn upsert_person(&self, person: Person) -> Result<()> {
        self.write().persons.upsert(person.id.clone(), person);
        Ok(())
    }

    async fn block(&self, id: &Id) -> Result<Option<Block>> {
        Ok(self.read().blocks.get(id).cloned())
    }

    async fn blocks_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self
            .read()
            .blocks
            .all()
            .into_iter()
            .filter(|b| start <= b.date && b.date <= end)
            .collect();
        blocks.sort_by_key(|b| (b.date, b.session, b.block_number));
        Ok(blocks)
    }

    async fn upsert_block(&self, block: Block) -> Result<()> {
        self.write().blocks.upsert(block.id.clone(), block);
        Ok(())
    }

    async fn template(&self, id: &Id) -> Result<Option<RotationTemplate>> {
        Ok(self.read().templates.get(id).cloned())
    }

    async fn templates(&self) -> Result<Vec<RotationTemplate>> {
        Ok(self.read().templates.all())
    }

    async fn upsert_template(&self, template: RotationTemplate) -> Result<()> {
        self.write().templates.upsert(template.id.clone(), template);
        Ok(())
    }

    async fn assignment(&self, id: &Id) -> Result<Option<Assignment>> {
        Ok(self.read().assignments.get(id).cloned())
    }

    async fn assignments_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Assignment>> {
        let inner = self.read();
        Ok(inner
            .assignments
            .all()
            .into_iter()
            .filter(|a| {
                Self::block_date(&inner, &a.block_id)
                    .map(|d| start <= d && d <= end)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn assignments_for_person(
        &self,
        person_id: &Id,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Assignment>> {
        let inner = self.read();
        Ok(inner
            .assignments
            .all()
            .into_iter()
            .filter(|a| &a.person_id == person_id)
            .filter(|a| {
                Self::block_date(&inner, &a.block_id)
                    .map(|d| start <= d && d <= end)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<()> {
        let mut inner = self.write();
        if inner.assignments.get(&assignment.id).is_some() {
            return Err(Error::Validation(ValidationError::invalid_field(
                "assignment",
                format!("duplicate id {}", assignment.id),
            )));
        }
        inner.assignments.upsert(assignment.id.clone(), assignment);
        Ok(())
    }

    async fn update_assignment(&self, mut assignment: Assignment) -> Result<Assignment> {
        let mut inner = self.write();
        let current = inner.assignments.get(&assignment.id).cloned().ok_or_else(|| {
            Error::Validation(ValidationError::not_found("assignment", &assignment.id))
        })?;

        if current.version != assignment.version {
            return Err(Error::Mutation(MutationError::Conflict {
                entity: "assignment",
                id: assignment.id.to_string(),
            }));
        }

        assignment.version += 1;
        inner
            .assignments
            .upsert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    async fn delete_assignment(&self, id: &Id) -> Result<bool> {
        let mut inner = self.write();
        let Some(slot) = inner.assignments.index.remove(id) else {
            return Ok(false);
        };
        inner.assignments.slots.remove(slot);
        // Re-pack the index after the removal shifted later slots
        for other_slot in inner.assignments.index.values_mut() {
            if *other_slot > slot {
                *other_slot -= 1;
            }
        }
        Ok(true)
    }

    async fn absences_for_person(&self, person_id: &Id) -> Result<Vec<Absence>> {
        Ok(self
            .read()
            .absences
            .all()
            .into_iter()
            .filter(|a| &a.person_id == person_id)
            .collect())
    }

    async fn absences_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Absence>> {
        Ok(self
            .read()
            .absences
            .all()
            .into_iter()
            .filter(|a| a.start_date <= end && start <= a.end_date)
            .collect())
    }

    async fn upsert_absence(&self, absence: Absence) -> Result<()> {
        self.write().absences.upsert(absence.id.clone(), absence);
        Ok(())
    }

    async fn swap(&self, id: &Id) -> Result<Option<Swap>> {
        Ok(self.read().swaps.get(id).cloned())
    }

    async fn swaps_with_status(&self, status: SwapStatus) -> Result<Vec<Swap>> {
        Ok(self
            .read()
            .swaps
            .all()
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }

    async fn pending_swaps_for(&self, person_id: &Id) -> Result<Vec<Swap>> {
        Ok(self
            .read()
            .swaps
            .all()
            .into_iter()
            .filter(|s| s.status == SwapStatus::Pending && &s.source_person_id == person_id)
            .collect())
    }

    async fn insert_swap(&self, swap: Swap) -> Result<()> {
        self.write().swaps.upsert(swap.id.clone(), swap);
        Ok(())
    }

    async fn update_swap(&self, swap: Swap) -> Result<()> {
        let mut inner = self.write();
        if inner.swaps.get(&swap.id).is_none() {
            return Err(Error::Validation(ValidationError::not_found("swap", &swap.id)));
        }
        inner.swaps.upsert(swap.id.clone(), swap);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AbsenceKind, Session};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_person_roundtrip() {
        let store = MemoryStore::new();
        store
            .upsert_person(Person::resident(id("r1"), "Alpha", 1))
            .await
            .unwrap();

        let person = store.person(&id("r1")).await.unwrap().unwrap();
        assert_eq!(person.name, "Alpha");
        assert!(store.person(&id("r2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocks_in_range_sorted() {
        let store = MemoryStore::new();
        store
            .upsert_block(Block::new(id("b2"), d("2025-01-08"), Session::Am, 2))
            .await
            .unwrap();
        store
            .upsert_block(Block::new(id("b1"), d("2025-01-06"), Session::Pm, 1))
            .await
            .unwrap();
        store
            .upsert_block(Block::new(id("b3"), d("2025-02-01"), Session::Am, 3))
            .await
            .unwrap();

        let blocks = store
            .blocks_in_range(d("2025-01-01"), d("2025-01-31"))
            .await
            .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, id("b1"));
    }

    #[tokio::test]
    async fn test_assignment_optimistic_concurrency() {
        let store = MemoryStore::new();
        store
            .upsert_block(Block::new(id("b1"), d("2025-01-06"), Session::Am, 1))
            .await
            .unwrap();

        let assignment = Assignment::primary(id("b1"), id("r1"), None);
        let assignment_id = assignment.id.clone();
        store.insert_assignment(assignment.clone()).await.unwrap();

        // First update at version 0 succeeds and bumps the version
        let updated = store.update_assignment(assignment.clone()).await.unwrap();
        assert_eq!(updated.version, 1);

        // Re-sending the stale version conflicts
        let stale = store.update_assignment(assignment).await;
        assert!(matches!(
            stale,
            Err(Error::Mutation(MutationError::Conflict { .. }))
        ));

        // Fresh read succeeds
        let fresh = store.assignment(&assignment_id).await.unwrap().unwrap();
        store.update_assignment(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_assignment_insert_rejected() {
        let store = MemoryStore::new();
        let assignment = Assignment::primary(id("b1"), id("r1"), None);
        store.insert_assignment(assignment.clone()).await.unwrap();
        assert!(store.insert_assignment(assignment).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_assignment_repacks_index() {
        let store = MemoryStore::new();
        let a1 = Assignment::primary(id("b1"), id("r1"), None);
        let a2 = Assignment::primary(id("b2"), id("r1"), None);
        let a2_id = a2.id.clone();
        store.insert_assignment(a1.clone()).await.unwrap();
        store.insert_assignment(a2).await.unwrap();

        assert!(store.delete_assignment(&a1.id).await.unwrap());
        assert!(!store.delete_assignment(&a1.id).await.unwrap());

        // The survivor is still reachable through the repacked index
        let survivor = store.assignment(&a2_id).await.unwrap().unwrap();
        assert_eq!(survivor.block_id, id("b2"));
    }

    #[tokio::test]
    async fn test_assignments_for_person_by_range() {
        let store = MemoryStore::new();
        store
            .upsert_block(Block::new(id("b1"), d("2025-01-06"), Session::Am, 1))
            .await
            .unwrap();
        store
            .upsert_block(Block::new(id("b2"), d("2025-03-01"), Session::Am, 2))
            .await
            .unwrap();
        store
            .insert_assignment(Assignment::primary(id("b1"), id("r1"), None))
            .await
            .unwrap();
        store
            .insert_assignment(Assignment::primary(id("b2"), id("r1"), None))
            .await
            .unwrap();

        let january = store
            .assignments_for_person(&id("r1"), d("2025-01-01"), d("2025-01-31"))
            .await
            .unwrap();
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].block_id, id("b1"));
    }

    #[tokio::test]
    async fn test_absence_range_overlap() {
        let store = MemoryStore::new();
        store
            .upsert_absence(Absence::new(
                id("a1"),
                id("r1"),
                d("2025-01-10"),
                d("2025-01-20"),
                AbsenceKind::Deployment,
            ))
            .await
            .unwrap();

        // Overlapping range finds it
        let hits = store
            .absences_in_range(d("2025-01-15"), d("2025-02-01"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        // Disjoint range does not
        let misses = store
            .absences_in_range(d("2025-02-01"), d("2025-02-28"))
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_pending_swaps_for_person() {
        let store = MemoryStore::new();
        let mut executed = Swap::absorb(id("s1"), id("f1"), d("2025-06-02"));
        executed.status = SwapStatus::Executed;
        store.insert_swap(executed).await.unwrap();
        store
            .insert_swap(Swap::absorb(id("s2"), id("f1"), d("2025-06-09")))
            .await
            .unwrap();
        store
            .insert_swap(Swap::absorb(id("s3"), id("f2"), d("2025-06-09")))
            .await
            .unwrap();

        let pending = store.pending_swaps_for(&id("f1")).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id("s2"));
    }
}
