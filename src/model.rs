use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Rejected interval: `start` is not strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidInterval {
    pub start: Ms,
    pub end: Ms,
}

impl fmt::Display for InvalidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid interval [{}, {}): start must be before end",
            self.start, self.end
        )
    }
}

impl std::error::Error for InvalidInterval {}

/// Half-open interval `[start, end)`.
///
/// Fields are private so every `Span` in the system satisfies `start < end`,
/// including ones read back from the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(Ms, Ms)", into = "(Ms, Ms)")]
pub struct Span {
    start: Ms,
    end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Result<Self, InvalidInterval> {
        if start >= end {
            return Err(InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ms {
        self.start
    }

    pub fn end(&self) -> Ms {
        self.end
    }

    /// Width in ms, saturating at `Ms::MAX` for spans wider than `i64`.
    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl TryFrom<(Ms, Ms)> for Span {
    type Error = InvalidInterval;

    fn try_from((start, end): (Ms, Ms)) -> Result<Self, Self::Error> {
        Span::new(start, end)
    }
}

impl From<Span> for (Ms, Ms) {
    fn from(span: Span) -> Self {
        (span.start, span.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// What kind of thing a booking occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Venue,
    Person,
}

/// A bookable venue or staff member. Ordered by `(kind, id)`; that order is
/// also the order in which resource locks are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Ulid,
}

impl ResourceRef {
    pub fn venue(id: Ulid) -> Self {
        Self {
            kind: ResourceKind::Venue,
            id,
        }
    }

    pub fn person(id: Ulid) -> Self {
        Self {
            kind: ResourceKind::Person,
            id,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceKind::Venue => write!(f, "venue:{}", self.id),
            ResourceKind::Person => write!(f, "person:{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Draft,
    Confirmed,
    Completed,
    Cancelled,
    Postponed,
}

impl BookingStatus {
    /// Participating bookings occupy their resources; the rest are inert.
    pub fn is_participating(self) -> bool {
        matches!(
            self,
            BookingStatus::Draft | BookingStatus::Confirmed | BookingStatus::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Legal status moves. Staying in the same status is always allowed.
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Draft, Confirmed)
                | (Draft, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (Confirmed, Postponed)
                | (Postponed, Confirmed)
                | (Postponed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Draft => "draft",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Postponed => "postponed",
        };
        f.write_str(s)
    }
}

/// A booking: one interval across a venue and any number of staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub span: Span,
    /// Venue first, then staff. Treated as a set.
    pub resources: Vec<ResourceRef>,
    pub status: BookingStatus,
    /// Event name shown in schedules.
    pub label: Option<String>,
}

impl BookingRecord {
    pub fn new(
        id: Ulid,
        span: Span,
        resources: impl IntoIterator<Item = ResourceRef>,
        status: BookingStatus,
    ) -> Self {
        let mut record = Self {
            id,
            span,
            resources: resources.into_iter().collect(),
            status,
            label: None,
        };
        record.resources = record.distinct_resources();
        record
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Resources with duplicates dropped, first occurrence wins.
    pub fn distinct_resources(&self) -> Vec<ResourceRef> {
        let mut out: Vec<ResourceRef> = Vec::with_capacity(self.resources.len());
        for r in &self.resources {
            if !out.contains(r) {
                out.push(*r);
            }
        }
        out
    }

    pub fn occupies_resources(&self) -> bool {
        self.status.is_participating() && !self.resources.is_empty()
    }
}

/// One existing booking blocking a proposal on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    pub resource: ResourceRef,
    pub booking_id: Ulid,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} held by booking {}", self.resource, self.booking_id)
    }
}

/// Outcome of a conflict check. An empty list means no conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub conflicts: Vec<Conflict>,
}

impl ConflictResult {
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Distinct booking ids in report order.
    pub fn booking_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = Vec::new();
        for c in &self.conflicts {
            if !ids.contains(&c.booking_id) {
                ids.push(c.booking_id);
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub span: Span,
    pub booking_id: Ulid,
}

/// Participating booking intervals on one resource, sorted by `span.start`
/// (insertion order among equal starts).
#[derive(Debug, Clone)]
pub struct ResourceIndex {
    pub resource: ResourceRef,
    entries: Vec<IndexEntry>,
}

impl ResourceIndex {
    pub fn new(resource: ResourceRef) -> Self {
        Self {
            resource,
            entries: Vec::new(),
        }
    }

    /// Insert unconditionally, keeping sort order. Overlap policy lives in the
    /// conflict engine, not here.
    pub fn insert(&mut self, span: Span, booking_id: Ulid) {
        let pos = self
            .entries
            .partition_point(|e| e.span.start <= span.start);
        self.entries.insert(pos, IndexEntry { span, booking_id });
    }

    /// Remove the entry for `booking_id`. Absent ids are a no-op.
    pub fn remove(&mut self, booking_id: Ulid) -> Option<Span> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos).span)
    }

    pub fn contains(&self, booking_id: Ulid) -> bool {
        self.entries.iter().any(|e| e.booking_id == booking_id)
    }

    /// Entries whose span overlaps `query`, in scan order.
    /// Binary search skips entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &IndexEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// Booking ids overlapping `query`.
    pub fn query(&self, query: &Span) -> Vec<Ulid> {
        self.overlapping(query).map(|e| e.booking_id).collect()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingReserved { record: BookingRecord },
    BookingUpdated { record: BookingRecord },
    BookingReleased { id: Ulid },
}
