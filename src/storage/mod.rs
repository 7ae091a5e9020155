//! Record storage abstraction
//!
//! The core consumes a transactional record store through the
//! [`RecordStore`] trait: CRUD over the scheduling entities, range queries
//! by date and person, and optimistic-concurrency updates. Implementations
//! are swappable; the bundled [`MemoryStore`] keeps entities in typed
//! arenas keyed by identifier index and backs tests and embedded use.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Mutation engine, run manager         │
//! └─────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────┐
//! │              RecordStore trait              │
//! └─────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   MemoryStore   │     │  external store  │
//! │ (typed arenas)  │     │  (transactional) │
//! └─────────────────┘     └──────────────────┘
//! ```

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Absence, Assignment, Block, Id, Person, RotationTemplate, Swap, SwapStatus};

/// Transactional record store contract consumed by the core
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Persons
    async fn person(&self, id: &Id) -> Result<Option<Person>>;
    async fn persons(&self) -> Result<Vec<Person>>;
    async fn upsert_person(&self, person: Person) -> Result<()>;

    // Blocks
    async fn block(&self, id: &Id) -> Result<Option<Block>>;
    async fn blocks_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Block>>;
    async fn upsert_block(&self, block: Block) -> Result<()>;

    // Rotation templates
    async fn template(&self, id: &Id) -> Result<Option<RotationTemplate>>;
    async fn templates(&self) -> Result<Vec<RotationTemplate>>;
    async fn upsert_template(&self, template: RotationTemplate) -> Result<()>;

    // Assignments
    async fn assignment(&self, id: &Id) -> Result<Option<Assignment>>;
    async fn assignments_in_range(&self, start: NaiveDate, end: NaiveDate)
        -> Result<Vec<Assignment>>;
    async fn assignments_for_person(
        &self,
        person_id: &Id,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Assignment>>;
    async fn insert_assignment(&self, assignment: Assignment) -> Result<()>;

    /// Optimistic-concurrency update: the stored version must equal the
    /// given record's version; the stored version then increments
    async fn update_assignment(&self, assignment: Assignment) -> Result<Assignment>;
    async fn delete_assignment(&self, id: &Id) -> Result<bool>;

    // Absences
    async fn absences_for_person(&self, person_id: &Id) -> Result<Vec<Absence>>;
    async fn absences_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Absence>>;
    async fn upsert_absence(&self, absence: Absence) -> Result<()>;

    // Swaps
    async fn swap(&self, id: &Id) -> Result<Option<Swap>>;
    async fn swaps_with_status(&self, status: SwapStatus) -> Result<Vec<Swap>>;
    async fn pending_swaps_for(&self, person_id: &Id) -> Result<Vec<Swap>>;
    async fn insert_swap(&self, swap: Swap) -> Result<()>;
    async fn update_swap(&self, swap: Swap) -> Result<()>;
}
