use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, Overlap, ReservationError};

impl Engine {
    pub fn get_booking(&self, id: &Ulid) -> Option<BookingRecord> {
        self.store.get(id)
    }

    /// Every live booking, ordered by start time.
    pub fn list_bookings(&self) -> Vec<BookingRecord> {
        let mut records = self.store.records();
        records.sort_by_key(|r| (r.span.start(), r.id));
        records
    }

    /// Schedule for one venue or staff member: every booking on `resource`
    /// overlapping `window`, in any status, ordered by start time.
    pub fn bookings_on(
        &self,
        resource: &ResourceRef,
        window: &Span,
    ) -> Result<Vec<BookingRecord>, ReservationError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(ReservationError::LimitExceeded("query window too wide"));
        }
        let mut records: Vec<BookingRecord> = self
            .store
            .records()
            .into_iter()
            .filter(|r| r.resources.contains(resource) && r.span.overlaps(window))
            .collect();
        records.sort_by_key(|r| (r.span.start(), r.id));
        Ok(records)
    }

    /// Whether `resource` is free for the whole of `span`. Advisory, like
    /// `check`.
    pub fn is_available(&self, resource: &ResourceRef, span: &Span) -> bool {
        self.conflicts.query(resource, span).is_empty()
    }

    /// Overlapping participating bookings found in the indexes.
    pub fn audit(&self) -> Vec<Overlap> {
        self.conflicts.audit()
    }
}
