// Core data structures for the rota scheduling core

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

lazy_static! {
    static ref ID_SHAPE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid id regex");
}

// ============================================================================
// Identifiers
// ============================================================================

/// External identifier, validated at the boundary.
///
/// Accepts `[A-Za-z0-9_-]{1,64}`; anything else is rejected with a
/// `ValidationError` before it reaches the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Validate and wrap an external identifier
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if ID_SHAPE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(ValidationError::invalid_identifier(raw))
        }
    }

    /// Generate a fresh random identifier (UUID simple form)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Person
// ============================================================================

/// Kind of scheduled person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonKind {
    Resident,
    Faculty,
}

impl PersonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Faculty => "faculty",
        }
    }
}

/// A schedulable person (resident or faculty)
///
/// Immutable within a run; runs re-load persons from the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Identifier
    pub id: Id,

    /// Display name
    pub name: String,

    /// Resident or faculty
    pub kind: PersonKind,

    /// Training year (residents only)
    pub pgy_level: Option<u8>,

    /// Free-form role tags ("chief", "night_float", ...)
    #[serde(default)]
    pub role_tags: Vec<String>,

    /// Capability flag: can staff procedure services
    #[serde(default)]
    pub performs_procedures: bool,

    /// Lifetime Sunday-call count, used by swap equity scoring
    #[serde(default)]
    pub sunday_call_count: u32,

    /// Lifetime weekday-call count, used by swap equity scoring
    #[serde(default)]
    pub weekday_call_count: u32,
}

impl Person {
    /// Create a resident at the given training year
    pub fn resident(id: Id, name: impl Into<String>, pgy_level: u8) -> Self {
        Self {
            id,
            name: name.into(),
            kind: PersonKind::Resident,
            pgy_level: Some(pgy_level),
            role_tags: Vec::new(),
            performs_procedures: false,
            sunday_call_count: 0,
            weekday_call_count: 0,
        }
    }

    /// Create a faculty member
    pub fn faculty(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: PersonKind::Faculty,
            pgy_level: None,
            role_tags: Vec::new(),
            performs_procedures: false,
            sunday_call_count: 0,
            weekday_call_count: 0,
        }
    }

    pub fn is_resident(&self) -> bool {
        self.kind == PersonKind::Resident
    }

    pub fn is_faculty(&self) -> bool {
        self.kind == PersonKind::Faculty
    }

    /// PGY-1 residents need the tighter supervision ratio
    pub fn is_intern(&self) -> bool {
        self.is_resident() && self.pgy_level == Some(1)
    }
}

// ============================================================================
// Block
// ============================================================================

/// Half-day session within a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Session {
    Am,
    Pm,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Am => "AM",
            Self::Pm => "PM",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The atomic unit of assignment: one AM or PM session on one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Identifier
    pub id: Id,

    /// Calendar date
    pub date: NaiveDate,

    /// AM or PM session
    pub session: Session,

    /// Sequential block number within the schedule period
    pub block_number: u32,

    /// Saturday or Sunday
    pub is_weekend: bool,

    /// Recognized holiday
    pub is_holiday: bool,
}

impl Block {
    /// Create a block, deriving the weekend flag from the date
    pub fn new(id: Id, date: NaiveDate, session: Session, block_number: u32) -> Self {
        let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        Self {
            id,
            date,
            session,
            block_number,
            is_weekend,
            is_holiday: false,
        }
    }

    /// Mark as a holiday block
    pub fn with_holiday(mut self, holiday: bool) -> Self {
        self.is_holiday = holiday;
        self
    }
}

// ============================================================================
// Rotation Template
// ============================================================================

/// Service/activity type of a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationType {
    Clinic,
    Inpatient,
    Elective,
    Call,
}

/// Duty intensity of a rotation, which determines per-block hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    /// Standard session, 6 hours per block
    Standard,
    /// Intensive service (inpatient, night float), 12 hours per block
    Intensive,
}

impl Intensity {
    /// Duty hours contributed by one block at this intensity
    pub fn hours_per_block(&self) -> f64 {
        match self {
            Self::Standard => 6.0,
            Self::Intensive => 12.0,
        }
    }
}

/// Named service/activity with supervision and capacity attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationTemplate {
    /// Identifier
    pub id: Id,

    /// Service name ("Continuity Clinic", "FMIT", ...)
    pub name: String,

    /// Service type
    pub rotation_type: RotationType,

    /// Whether faculty supervision is required on this service
    pub supervision_required: bool,

    /// Maximum residents per block on this service
    pub max_residents: u32,

    /// Duty intensity
    pub intensity: Intensity,

    /// Template version, bumped on edit
    pub version: u32,

    /// Soft-archive timestamp; archived templates stay resolvable
    pub archived_at: Option<DateTime<Utc>>,
}

impl RotationTemplate {
    /// Create a template with defaults (standard intensity, version 1)
    pub fn new(id: Id, name: impl Into<String>, rotation_type: RotationType) -> Self {
        Self {
            id,
            name: name.into(),
            rotation_type,
            supervision_required: matches!(rotation_type, RotationType::Inpatient),
            max_residents: 4,
            intensity: Intensity::Standard,
            version: 1,
            archived_at: None,
        }
    }

    /// Set intensity
    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    /// Set supervision requirement
    pub fn with_supervision(mut self, required: bool) -> Self {
        self.supervision_required = required;
        self
    }

    /// Set capacity
    pub fn with_max_residents(mut self, max: u32) -> Self {
        self.max_residents = max;
        self
    }

    /// Whether the template has been soft-archived
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Soft-archive this template
    pub fn archive(&mut self) {
        self.archived_at = Some(Utc::now());
    }
}

// ============================================================================
// Assignment
// ============================================================================

/// Role a person fills on an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentRole {
    Primary,
    Backup,
    Supervising,
}

impl AssignmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::Supervising => "supervising",
        }
    }
}

/// A (block, person, rotation, role) tuple
///
/// Uniqueness invariant: at most one primary (block, person) pair may exist
/// in any assignment set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// Identifier
    pub id: Id,

    /// The block being covered
    pub block_id: Id,

    /// The covering person
    pub person_id: Id,

    /// The service being performed, when known
    pub rotation_template_id: Option<Id>,

    /// Role on this block
    pub role: AssignmentRole,

    /// Record version for optimistic-concurrency updates
    #[serde(default)]
    pub version: u64,
}

impl Assignment {
    /// Create a primary assignment
    pub fn primary(block_id: Id, person_id: Id, rotation_template_id: Option<Id>) -> Self {
        Self {
            id: Id::generate(),
            block_id,
            person_id,
            rotation_template_id,
            role: AssignmentRole::Primary,
            version: 0,
        }
    }

    /// Create a supervising assignment
    pub fn supervising(block_id: Id, person_id: Id) -> Self {
        Self {
            id: Id::generate(),
            block_id,
            person_id,
            rotation_template_id: None,
            role: AssignmentRole::Supervising,
            version: 0,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == AssignmentRole::Primary
    }
}

// ============================================================================
// Absence
// ============================================================================

/// Kind of absence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceKind {
    Deployment,
    Tdy,
    Vacation,
    Sick,
    Medical,
    Bereavement,
    Maternity,
    Convalescent,
    Conference,
    Emergency,
    /// Unrecognized kinds block conservatively
    Other(String),
}

impl AbsenceKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "deployment",
            Self::Tdy => "tdy",
            Self::Vacation => "vacation",
            Self::Sick => "sick",
            Self::Medical => "medical",
            Self::Bereavement => "bereavement",
            Self::Maternity => "maternity",
            Self::Convalescent => "convalescent",
            Self::Conference => "conference",
            Self::Emergency => "emergency",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Parse from an external string, mapping unknown kinds to `Other`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "deployment" => Self::Deployment,
            "tdy" => Self::Tdy,
            "vacation" => Self::Vacation,
            "sick" => Self::Sick,
            "medical" => Self::Medical,
            "bereavement" => Self::Bereavement,
            "maternity" | "maternity_paternity" => Self::Maternity,
            "convalescent" => Self::Convalescent,
            "conference" => Self::Conference,
            "emergency" | "emergency_leave" | "family_emergency" => Self::Emergency,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A date-range absence for one person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Absence {
    /// Identifier
    pub id: Id,

    /// Absent person
    pub person_id: Id,

    /// First absent date (inclusive)
    pub start_date: NaiveDate,

    /// Last absent date (inclusive)
    pub end_date: NaiveDate,

    /// Kind of absence
    pub kind: AbsenceKind,

    /// Explicit blocking override; when unset, blocking is derived from
    /// kind and duration by the leave validator
    pub is_blocking_override: Option<bool>,

    /// Whether the return date is still tentative
    #[serde(default)]
    pub return_date_tentative: bool,
}

impl Absence {
    /// Create an absence with derived blocking
    pub fn new(
        id: Id,
        person_id: Id,
        start_date: NaiveDate,
        end_date: NaiveDate,
        kind: AbsenceKind,
    ) -> Self {
        Self {
            id,
            person_id,
            start_date,
            end_date,
            kind,
            is_blocking_override: None,
            return_date_tentative: false,
        }
    }

    /// Inclusive duration in days
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    /// Whether the absence covers the given date
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

// ============================================================================
// Swap
// ============================================================================

/// Kind of swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    /// Direct exchange between two people
    OneToOne,
    /// One person gives a week away, the other absorbs it
    Absorb,
    /// Multi-person chain; accepted by the validator taxonomy but has no
    /// executor
    MultiWay,
}

impl SwapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::Absorb => "absorb",
            Self::MultiWay => "multi_way",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().trim() {
            "one_to_one" => Some(Self::OneToOne),
            "absorb" => Some(Self::Absorb),
            "multi_way" => Some(Self::MultiWay),
            _ => None,
        }
    }
}

/// Lifecycle status of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
    Cancelled,
    RolledBack,
}

impl SwapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::RolledBack)
    }
}

/// A requested or executed schedule swap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    /// Identifier
    pub id: Id,

    /// Person giving up the source week
    pub source_person_id: Id,

    /// Week (Monday date) being given up
    pub source_week: NaiveDate,

    /// Counterparty, when known (one-to-one)
    pub target_person_id: Option<Id>,

    /// Week offered in exchange (one-to-one)
    pub target_week: Option<NaiveDate>,

    /// Kind of swap
    pub kind: SwapKind,

    /// Lifecycle status
    pub status: SwapStatus,

    /// When the request was created
    pub requested_at: DateTime<Utc>,

    /// When the request was approved/rejected
    pub decided_at: Option<DateTime<Utc>>,

    /// When the swap was executed
    pub executed_at: Option<DateTime<Utc>>,

    /// Execution + 24 h; rollback is allowed strictly before this
    pub rollback_deadline: Option<DateTime<Utc>>,
}

impl Swap {
    /// Create a pending one-to-one swap request
    pub fn one_to_one(
        id: Id,
        source_person_id: Id,
        source_week: NaiveDate,
        target_person_id: Id,
        target_week: NaiveDate,
    ) -> Self {
        Self {
            id,
            source_person_id,
            source_week,
            target_person_id: Some(target_person_id),
            target_week: Some(target_week),
            kind: SwapKind::OneToOne,
            status: SwapStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
            executed_at: None,
            rollback_deadline: None,
        }
    }

    /// Create a pending absorb request (no fixed counterparty)
    pub fn absorb(id: Id, source_person_id: Id, source_week: NaiveDate) -> Self {
        Self {
            id,
            source_person_id,
            source_week,
            target_person_id: None,
            target_week: None,
            kind: SwapKind::Absorb,
            status: SwapStatus::Pending,
            requested_at: Utc::now(),
            decided_at: None,
            executed_at: None,
            rollback_deadline: None,
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Role tag carried by an authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coordinator,
    Admin,
    Resident,
    Faculty,
}

impl Role {
    /// Whether this role may mutate published schedules
    pub fn can_mutate_schedules(&self) -> bool {
        matches!(self, Self::Coordinator | Self::Admin)
    }

    /// Whether this role may manage the fallback catalogue and replay the
    /// dead-letter queue
    pub fn is_administrator(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Authenticated principal attached to every mutation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Id,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Id, role: Role) -> Self {
        Self { id, role }
    }
}

// ============================================================================
// Tests
// ============================================================================
