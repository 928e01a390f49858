use dashmap::{DashMap, DashSet};
use ulid::Ulid;

use crate::model::*;

/// Authoritative booking records plus tombstones for released ids.
///
/// Released ids stay reserved forever: a second release is a no-op and the
/// id can't be reused by a later reservation.
pub struct BookingStore {
    bookings: DashMap<Ulid, BookingRecord>,
    released: DashSet<Ulid>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            released: DashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<BookingRecord> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.bookings.contains_key(id)
    }

    pub fn is_released(&self, id: &Ulid) -> bool {
        self.released.contains(id)
    }

    pub fn insert(&self, record: BookingRecord) {
        self.bookings.insert(record.id, record);
    }

    /// Remove the record and leave a tombstone.
    pub fn release(&self, id: Ulid) -> Option<BookingRecord> {
        self.released.insert(id);
        self.bookings.remove(&id).map(|(_, record)| record)
    }

    pub fn records(&self) -> Vec<BookingRecord> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    pub fn released_ids(&self) -> Vec<Ulid> {
        self.released.iter().map(|id| *id).collect()
    }

    /// Apply a journal event during replay.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::BookingReserved { record } | Event::BookingUpdated { record } => {
                self.insert(record.clone());
            }
            Event::BookingReleased { id } => {
                self.release(*id);
            }
        }
    }

    /// Minimal event list that recreates this store.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut records = self.records();
        records.sort_by_key(|r| r.id);
        let mut released = self.released_ids();
        released.sort();

        let mut events: Vec<Event> = records
            .into_iter()
            .map(|record| Event::BookingReserved { record })
            .collect();
        events.extend(released.into_iter().map(|id| Event::BookingReleased { id }));
        events
    }
}
