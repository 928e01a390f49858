mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{ConflictEngine, Overlap};
pub use error::ReservationError;
pub use store::BookingStore;

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::info;
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotifyHub;

const BOOKING_LOCK_STRIPES: usize = 64;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Booking reservations: the store, its derived resource indexes, and the
/// locking that makes check-then-commit atomic.
///
/// Lock order, outermost first:
/// 1. `commit_gate` (read for every mutation, write for rebuild/compaction)
/// 2. the booking-lock stripe of the booking being changed
/// 3. resource index write locks, ascending by `ResourceRef`
/// 4. the journal
pub struct Engine {
    pub conflicts: ConflictEngine,
    store: BookingStore,
    pub notify: Arc<NotifyHub>,
    journal: Option<Mutex<Journal>>,
    /// Serializes operations on the same booking id. Ids hash onto a fixed
    /// set of stripes; unrelated ids may share one, which only costs
    /// parallelism since an operation never holds two.
    booking_locks: Box<[Mutex<()>]>,
    commit_gate: RwLock<()>,
}

impl Engine {
    /// Purely in-memory engine with no journal.
    pub fn new(notify: Arc<NotifyHub>) -> Self {
        Self {
            conflicts: ConflictEngine::new(),
            store: BookingStore::new(),
            notify,
            journal: None,
            booking_locks: (0..BOOKING_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            commit_gate: RwLock::new(()),
        }
    }

    /// In-memory engine seeded from the caller's own booking store. Later
    /// duplicates of an id replace earlier ones.
    pub fn from_records(
        records: impl IntoIterator<Item = BookingRecord>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        let engine = Self::new(notify);
        for mut record in records {
            record.resources = record.distinct_resources();
            engine.store.insert(record);
        }
        engine.conflicts.rebuild(engine.store.records().iter());
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(engine.store.len() as f64);
        engine
    }

    /// Open the journal at `path`, replay it into the store, and rebuild
    /// every resource index from the participating records.
    pub fn open(path: &Path, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Journal::recover(path)?;
        let journal = Journal::open(path)?.with_backlog(events.len() as u64);

        let mut engine = Self::new(notify);
        for event in &events {
            engine.store.apply_event(event);
        }
        engine.conflicts.rebuild(engine.store.records().iter());
        engine.journal = Some(Mutex::new(journal));

        info!(
            path = %path.display(),
            events = events.len(),
            bookings = engine.store.len(),
            indexed = engine.conflicts.entry_count(),
            "journal replayed"
        );
        metrics::gauge!(crate::observability::BOOKINGS_ACTIVE).set(engine.store.len() as f64);
        Ok(engine)
    }

    /// Advisory conflict check; see `ConflictEngine::check`.
    pub fn check(&self, proposed: &BookingRecord, exclude_id: Option<Ulid>) -> ConflictResult {
        self.conflicts.check(proposed, exclude_id)
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    fn booking_lock(&self, id: Ulid) -> MutexGuard<'_, ()> {
        let stripe = (id.0 % BOOKING_LOCK_STRIPES as u128) as usize;
        lock(&self.booking_locks[stripe])
    }

    /// Append to the journal, if any. Runs before anything is applied.
    fn journal_append(&self, event: &Event) -> Result<(), ReservationError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        lock(journal)
            .append(event)
            .map_err(|e| ReservationError::JournalError(e.to_string()))?;
        metrics::counter!(crate::observability::JOURNAL_APPENDS_TOTAL).increment(1);
        Ok(())
    }

    /// Clear and replay every index from the store's participating records.
    pub fn rebuild_index(&self) {
        let _gate = self.commit_gate.write().unwrap_or_else(PoisonError::into_inner);
        self.conflicts.rebuild(self.store.records().iter());
    }

    /// Rewrite the journal with the minimal event set for the current store.
    pub fn compact_journal(&self) -> Result<(), ReservationError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().unwrap_or_else(PoisonError::into_inner);
        let events = self.store.snapshot_events();
        lock(journal)
            .compact(&events)
            .map_err(|e| ReservationError::JournalError(e.to_string()))?;
        info!(events = events.len(), "journal compacted");
        Ok(())
    }

    pub fn journal_appends_since_compact(&self) -> u64 {
        self.journal
            .as_ref()
            .map_or(0, |j| lock(j).appends_since_compact())
    }
}
