use std::sync::PoisonError;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::record_outcome;

use super::conflict::{validate_booking, LockSet};
use super::{Engine, ReservationError};

impl Engine {
    /// Check `booking` and commit it in one exclusive section. On conflict
    /// nothing is written and every blocking booking is reported.
    pub fn reserve(&self, booking: BookingRecord) -> Result<Ulid, ReservationError> {
        let result = self.reserve_inner(booking);
        record_outcome("reserve", &result);
        result
    }

    fn reserve_inner(&self, mut record: BookingRecord) -> Result<Ulid, ReservationError> {
        validate_booking(&record)?;
        record.resources = record.distinct_resources();

        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let _held = self.booking_lock(record.id);

        if self.store.contains(&record.id) || self.store.is_released(&record.id) {
            return Err(ReservationError::AlreadyExists(record.id));
        }

        let shards = self.conflicts.shards_for(&record.resources);
        let mut locks = LockSet::acquire(&shards);

        let conflicts = locks.conflicts(&record, None);
        if !conflicts.is_empty() {
            debug!(booking = %record.id, conflicts = conflicts.len(), "reservation rejected");
            return Err(ReservationError::Conflicting(conflicts));
        }

        let event = Event::BookingReserved { record: record.clone() };
        self.journal_append(&event)?;
        locks.insert(&record);
        self.store.insert(record.clone());
        self.notify.send_all(&record.resources, &event);
        drop(locks);

        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).increment(1.0);
        info!(
            booking = %record.id,
            status = %record.status,
            span = %record.span,
            resources = record.resources.len(),
            "booking reserved"
        );
        Ok(record.id)
    }

    /// Replace booking `id` with `booking` (its id is forced to `id`). The
    /// booking's own current entries never count as conflicts; a status change
    /// must be a legal transition.
    pub fn update(&self, id: Ulid, booking: BookingRecord) -> Result<(), ReservationError> {
        let result = self.modify(id, move |_| booking);
        record_outcome("update", &result);
        result
    }

    /// Move booking `id` to `status`, keeping its interval and resources.
    /// Entering a participating status re-checks the interval; leaving it
    /// frees the booking's resources.
    pub fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<(), ReservationError> {
        let result = self.modify(id, |current| BookingRecord {
            status,
            ..current.clone()
        });
        record_outcome("set_status", &result);
        result
    }

    fn modify(
        &self,
        id: Ulid,
        change: impl FnOnce(&BookingRecord) -> BookingRecord,
    ) -> Result<(), ReservationError> {
        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let _held = self.booking_lock(id);

        let Some(old) = self.store.get(&id) else {
            warn!(booking = %id, "update of unknown booking");
            return Err(ReservationError::NotFound(id));
        };

        let mut record = change(&old);
        record.id = id;
        record.resources = record.distinct_resources();
        validate_booking(&record)?;
        if !old.status.can_transition_to(record.status) {
            return Err(ReservationError::InvalidTransition {
                from: old.status,
                to: record.status,
            });
        }

        let mut touched = old.resources.clone();
        touched.extend(record.resources.iter().copied());
        let shards = self.conflicts.shards_for(&touched);
        let mut locks = LockSet::acquire(&shards);

        let conflicts = locks.conflicts(&record, Some(id));
        if !conflicts.is_empty() {
            debug!(booking = %id, conflicts = conflicts.len(), "update rejected");
            return Err(ReservationError::Conflicting(conflicts));
        }

        let event = Event::BookingUpdated { record: record.clone() };
        self.journal_append(&event)?;
        // Remove then re-insert; entries are never edited in place.
        locks.withdraw(&old);
        locks.insert(&record);
        self.store.insert(record.clone());
        self.notify.send_all(&touched, &event);
        drop(locks);

        info!(
            booking = %id,
            from = %old.status,
            to = %record.status,
            span = %record.span,
            "booking updated"
        );
        Ok(())
    }

    /// Hard-delete booking `id` and free its resources. Releasing an already
    /// released booking does nothing; an id never seen is `NotFound`.
    pub fn release(&self, id: Ulid) -> Result<(), ReservationError> {
        let result = self.release_inner(id);
        record_outcome("release", &result);
        result
    }

    fn release_inner(&self, id: Ulid) -> Result<(), ReservationError> {
        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let _held = self.booking_lock(id);

        if self.store.is_released(&id) {
            debug!(booking = %id, "booking already released");
            return Ok(());
        }
        let Some(old) = self.store.get(&id) else {
            warn!(booking = %id, "release of unknown booking");
            return Err(ReservationError::NotFound(id));
        };

        let shards = self.conflicts.shards_for(&old.resources);
        let mut locks = LockSet::acquire(&shards);

        let event = Event::BookingReleased { id };
        self.journal_append(&event)?;
        locks.withdraw(&old);
        self.store.release(id);
        self.notify.send_all(&old.resources, &event);
        drop(locks);

        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).decrement(1.0);
        info!(booking = %id, "booking released");
        Ok(())
    }
}
