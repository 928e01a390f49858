use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::ReservationError;

pub type SharedResourceIndex = Arc<RwLock<ResourceIndex>>;

// Index mutations never panic midway, so a poisoned lock still guards a
// consistent index.
fn read_index(shard: &SharedResourceIndex) -> RwLockReadGuard<'_, ResourceIndex> {
    shard.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_index(shard: &SharedResourceIndex) -> RwLockWriteGuard<'_, ResourceIndex> {
    shard.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn validate_booking(record: &BookingRecord) -> Result<(), ReservationError> {
    let span = &record.span;
    if span.start() < MIN_VALID_TIMESTAMP_MS || span.end() > MAX_VALID_TIMESTAMP_MS {
        return Err(ReservationError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(ReservationError::LimitExceeded("span too wide"));
    }
    if let Some(ref l) = record.label
        && l.len() > MAX_LABEL_LEN {
            return Err(ReservationError::LimitExceeded("label too long"));
        }
    if record.distinct_resources().len() > MAX_RESOURCES_PER_BOOKING {
        return Err(ReservationError::LimitExceeded("too many resources on booking"));
    }
    Ok(())
}

/// Append every entry of `index` overlapping `span` to `out`, skipping
/// `exclude_id`.
fn collect_conflicts(
    index: &ResourceIndex,
    span: &Span,
    exclude_id: Option<Ulid>,
    out: &mut Vec<Conflict>,
) {
    for entry in index.overlapping(span) {
        if Some(entry.booking_id) == exclude_id {
            continue;
        }
        out.push(Conflict {
            resource: index.resource,
            booking_id: entry.booking_id,
        });
    }
}

/// Two participating bookings found overlapping on the same resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub resource: ResourceRef,
    pub first: Ulid,
    pub second: Ulid,
}

/// The conflict policy and the per-resource indexes it reads.
///
/// Only bookings in a participating status are ever indexed. Index shards are
/// created on first use and never dropped, so a cloned shard handle stays the
/// one every other caller locks.
pub struct ConflictEngine {
    indexes: DashMap<ResourceRef, SharedResourceIndex>,
}

impl Default for ConflictEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictEngine {
    pub fn new() -> Self {
        Self {
            indexes: DashMap::new(),
        }
    }

    fn existing_shard(&self, resource: &ResourceRef) -> Option<SharedResourceIndex> {
        self.indexes.get(resource).map(|e| e.value().clone())
    }

    fn shard(&self, resource: &ResourceRef) -> SharedResourceIndex {
        self.indexes
            .entry(*resource)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceIndex::new(*resource))))
            .value()
            .clone()
    }

    /// Shard handles for `resources`, deduplicated and in lock order.
    pub(crate) fn shards_for(
        &self,
        resources: &[ResourceRef],
    ) -> Vec<(ResourceRef, SharedResourceIndex)> {
        let mut sorted = resources.to_vec();
        sorted.sort();
        sorted.dedup();
        sorted.into_iter().map(|r| (r, self.shard(&r))).collect()
    }

    /// Bookings on `resource` whose interval overlaps `span`.
    pub fn query(&self, resource: &ResourceRef, span: &Span) -> Vec<Ulid> {
        match self.existing_shard(resource) {
            Some(shard) => read_index(&shard).query(span),
            None => Vec::new(),
        }
    }

    /// Advisory conflict check. Each resource is read-locked on its own, so
    /// the answer can be stale by the time the caller acts on it; the
    /// reservation path re-runs the same check under write locks.
    pub fn check(&self, proposed: &BookingRecord, exclude_id: Option<Ulid>) -> ConflictResult {
        if !proposed.status.is_participating() {
            return ConflictResult::default();
        }
        let started = Instant::now();
        let mut conflicts = Vec::new();
        for resource in proposed.distinct_resources() {
            if let Some(shard) = self.existing_shard(&resource) {
                collect_conflicts(&read_index(&shard), &proposed.span, exclude_id, &mut conflicts);
            }
        }
        metrics::histogram!(crate::observability::CHECK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        ConflictResult { conflicts }
    }

    /// Clear every index and replay the participating records into it.
    /// The caller must keep mutations out while this runs.
    pub fn rebuild<'r>(&self, records: impl IntoIterator<Item = &'r BookingRecord>) {
        let records: Vec<&BookingRecord> = records
            .into_iter()
            .filter(|r| r.occupies_resources())
            .collect();
        let mut resources: Vec<ResourceRef> = self.indexes.iter().map(|e| *e.key()).collect();
        for r in &records {
            resources.extend(r.resources.iter().copied());
        }
        let shards = self.shards_for(&resources);
        let mut locks = LockSet::acquire(&shards);
        locks.clear();
        for record in records {
            locks.insert(record);
        }
        tracing::debug!(
            resources = shards.len(),
            entries = locks.entry_count(),
            "resource indexes rebuilt"
        );
    }

    /// Overlapping participating pairs on any resource. Empty whenever the
    /// indexes were only ever mutated through the reservation path.
    pub fn audit(&self) -> Vec<Overlap> {
        let shards: Vec<SharedResourceIndex> =
            self.indexes.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for shard in shards {
            let index = read_index(&shard);
            let entries = index.entries();
            for (i, a) in entries.iter().enumerate() {
                // Entries are sorted by start: stop once b starts at/after a ends.
                for b in entries[i + 1..]
                    .iter()
                    .take_while(|b| b.span.start() < a.span.end())
                {
                    found.push(Overlap {
                        resource: index.resource,
                        first: a.booking_id,
                        second: b.booking_id,
                    });
                }
            }
        }
        found
    }

    pub fn resource_count(&self) -> usize {
        self.indexes.len()
    }

    /// Total indexed entries across all resources.
    pub fn entry_count(&self) -> usize {
        let shards: Vec<SharedResourceIndex> =
            self.indexes.iter().map(|e| e.value().clone()).collect();
        shards.iter().map(|s| read_index(s).len()).sum()
    }
}

/// Write guards on a sorted set of resource indexes, held for one
/// check-then-commit section.
pub(crate) struct LockSet<'a> {
    guards: Vec<(ResourceRef, RwLockWriteGuard<'a, ResourceIndex>)>,
}

impl<'a> LockSet<'a> {
    /// `shards` must be sorted and deduplicated (see `shards_for`); locks are
    /// taken in that order.
    pub(crate) fn acquire(shards: &'a [(ResourceRef, SharedResourceIndex)]) -> Self {
        debug_assert!(shards.windows(2).all(|w| w[0].0 < w[1].0));
        Self {
            guards: shards.iter().map(|(r, s)| (*r, write_index(s))).collect(),
        }
    }

    fn get_mut(&mut self, resource: &ResourceRef) -> Option<&mut ResourceIndex> {
        let pos = self.guards.binary_search_by_key(resource, |(r, _)| *r).ok()?;
        Some(&mut *self.guards[pos].1)
    }

    fn get(&self, resource: &ResourceRef) -> Option<&ResourceIndex> {
        let pos = self.guards.binary_search_by_key(resource, |(r, _)| *r).ok()?;
        Some(&*self.guards[pos].1)
    }

    /// Authoritative check: same policy as `ConflictEngine::check`, reported
    /// in the proposal's resource order.
    pub(crate) fn conflicts(
        &self,
        proposed: &BookingRecord,
        exclude_id: Option<Ulid>,
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        if !proposed.status.is_participating() {
            return conflicts;
        }
        for resource in proposed.distinct_resources() {
            if let Some(index) = self.get(&resource) {
                collect_conflicts(index, &proposed.span, exclude_id, &mut conflicts);
            }
        }
        conflicts
    }

    /// Index `record` on each of its resources. Non-participating records are
    /// ignored.
    pub(crate) fn insert(&mut self, record: &BookingRecord) {
        if !record.status.is_participating() {
            return;
        }
        for resource in record.distinct_resources() {
            if let Some(index) = self.get_mut(&resource) {
                index.insert(record.span, record.id);
            }
        }
    }

    /// Drop `record`'s entries from each of its resources. Idempotent.
    pub(crate) fn withdraw(&mut self, record: &BookingRecord) {
        for resource in record.distinct_resources() {
            if let Some(index) = self.get_mut(&resource) {
                index.remove(record.id);
            }
        }
    }

    fn clear(&mut self) {
        for (_, index) in &mut self.guards {
            index.clear();
        }
    }

    fn entry_count(&self) -> usize {
        self.guards.iter().map(|(_, index)| index.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: Ms, end: Ms) -> Span {
        Span::new(start, end).unwrap()
    }

    fn confirmed(span: Span, resources: &[ResourceRef]) -> BookingRecord {
        BookingRecord::new(Ulid::new(), span, resources.iter().copied(), BookingStatus::Confirmed)
    }

    fn seed(engine: &ConflictEngine, records: &[&BookingRecord]) {
        engine.rebuild(records.iter().copied());
    }

    #[test]
    fn check_reports_overlap_per_resource() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let dj = ResourceRef::person(Ulid::new());
        let existing = confirmed(span(100, 200), &[venue, dj]);
        seed(&engine, &[&existing]);

        let proposed = confirmed(span(150, 250), &[venue, dj]);
        let result = engine.check(&proposed, None);
        assert_eq!(
            result.conflicts,
            vec![
                Conflict { resource: venue, booking_id: existing.id },
                Conflict { resource: dj, booking_id: existing.id },
            ]
        );
        assert_eq!(result.booking_ids(), vec![existing.id]);
    }

    #[test]
    fn check_order_follows_proposal_resources() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let dj = ResourceRef::person(Ulid::new());
        let on_venue = confirmed(span(0, 100), &[venue]);
        let on_dj = confirmed(span(0, 100), &[dj]);
        seed(&engine, &[&on_venue, &on_dj]);

        // Staff listed before the venue: the report follows that order.
        let proposed = confirmed(span(50, 60), &[dj, venue]);
        let ids = engine.check(&proposed, None).booking_ids();
        assert_eq!(ids, vec![on_dj.id, on_venue.id]);
    }

    #[test]
    fn check_excludes_given_id() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let existing = confirmed(span(100, 200), &[venue]);
        seed(&engine, &[&existing]);

        let mut moved = existing.clone();
        moved.span = span(150, 300);
        assert!(engine.check(&moved, Some(existing.id)).is_clear());
        assert!(!engine.check(&moved, None).is_clear());
    }

    #[test]
    fn check_skips_non_participating_proposals() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        seed(&engine, &[&confirmed(span(0, 1000), &[venue])]);

        for status in [BookingStatus::Cancelled, BookingStatus::Postponed] {
            let proposed = BookingRecord::new(Ulid::new(), span(10, 20), [venue], status);
            assert!(engine.check(&proposed, None).is_clear());
        }
    }

    #[test]
    fn draft_blocks_like_confirmed() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let draft = BookingRecord::new(Ulid::new(), span(0, 100), [venue], BookingStatus::Draft);
        seed(&engine, &[&draft]);

        let proposed =
            BookingRecord::new(Ulid::new(), span(50, 150), [venue], BookingStatus::Draft);
        assert_eq!(engine.check(&proposed, None).booking_ids(), vec![draft.id]);
    }

    #[test]
    fn rebuild_ignores_inert_records() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let cancelled =
            BookingRecord::new(Ulid::new(), span(0, 100), [venue], BookingStatus::Cancelled);
        let postponed =
            BookingRecord::new(Ulid::new(), span(0, 100), [venue], BookingStatus::Postponed);
        seed(&engine, &[&cancelled, &postponed]);

        assert_eq!(engine.entry_count(), 0);
        assert!(engine.check(&confirmed(span(0, 100), &[venue]), None).is_clear());
    }

    #[test]
    fn rebuild_replaces_previous_state() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let old = confirmed(span(0, 100), &[venue]);
        seed(&engine, &[&old]);
        assert_eq!(engine.query(&venue, &span(0, 100)), vec![old.id]);

        seed(&engine, &[]);
        assert!(engine.query(&venue, &span(0, 100)).is_empty());
    }

    #[test]
    fn zero_resource_booking_never_conflicts() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        seed(&engine, &[&confirmed(span(0, 100), &[venue])]);
        assert!(engine.check(&confirmed(span(0, 100), &[]), None).is_clear());
    }

    #[test]
    fn duplicate_resources_report_once() {
        let engine = ConflictEngine::new();
        let dj = ResourceRef::person(Ulid::new());
        let existing = confirmed(span(0, 100), &[dj]);
        seed(&engine, &[&existing]);

        let mut proposed = confirmed(span(0, 100), &[dj]);
        proposed.resources = vec![dj, dj, dj];
        assert_eq!(engine.check(&proposed, None).conflicts.len(), 1);
    }

    #[test]
    fn audit_finds_overlaps_inserted_behind_the_policy() {
        let engine = ConflictEngine::new();
        let venue = ResourceRef::venue(Ulid::new());
        let a = confirmed(span(0, 100), &[venue]);
        let b = confirmed(span(50, 150), &[venue]);
        let c = confirmed(span(150, 200), &[venue]);
        seed(&engine, &[&a, &b, &c]);

        assert_eq!(
            engine.audit(),
            vec![Overlap { resource: venue, first: a.id, second: b.id }]
        );
    }

    #[test]
    fn validate_rejects_limits() {
        let venue = ResourceRef::venue(Ulid::new());
        let too_wide = confirmed(span(0, MAX_SPAN_DURATION_MS + 1), &[venue]);
        assert_eq!(
            validate_booking(&too_wide),
            Err(ReservationError::LimitExceeded("span too wide"))
        );

        let negative = confirmed(span(-10, 10), &[venue]);
        assert!(validate_booking(&negative).is_err());

        let long_label = confirmed(span(0, 10), &[venue]).with_label("x".repeat(MAX_LABEL_LEN + 1));
        assert!(validate_booking(&long_label).is_err());

        let crowd: Vec<ResourceRef> = (0..=MAX_RESOURCES_PER_BOOKING)
            .map(|_| ResourceRef::person(Ulid::new()))
            .collect();
        assert!(validate_booking(&confirmed(span(0, 10), &crowd)).is_err());
    }
}
