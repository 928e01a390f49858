use crate::engine::ReservationError;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: reserve/update/release calls. Labels: op, outcome.
pub const RESERVATIONS_TOTAL: &str = "gigslot_reservations_total";

/// Counter: individual conflicts reported by the committed path.
pub const CONFLICTS_TOTAL: &str = "gigslot_conflicts_total";

/// Histogram: advisory check latency in seconds.
pub const CHECK_DURATION_SECONDS: &str = "gigslot_check_duration_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Counter: events appended to the journal.
pub const JOURNAL_APPENDS_TOTAL: &str = "gigslot_journal_appends_total";

/// Gauge: live booking records.
pub const BOOKINGS_ACTIVE: &str = "gigslot_bookings_active";

/// Map a result to a short outcome label for metrics.
pub fn outcome_label<T>(result: &Result<T, ReservationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ReservationError::Conflicting(_)) => "conflict",
        Err(ReservationError::NotFound(_)) => "not_found",
        Err(ReservationError::AlreadyExists(_)) => "already_exists",
        Err(ReservationError::InvalidInterval(_)) => "invalid_interval",
        Err(ReservationError::InvalidTransition { .. }) => "invalid_transition",
        Err(ReservationError::LimitExceeded(_)) => "limit_exceeded",
        Err(ReservationError::JournalError(_)) => "journal_error",
    }
}

/// Count one reservation-path call.
pub fn record_outcome<T>(op: &'static str, result: &Result<T, ReservationError>) {
    metrics::counter!(RESERVATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result))
        .increment(1);
    if let Err(ReservationError::Conflicting(conflicts)) = result {
        metrics::counter!(CONFLICTS_TOTAL).increment(conflicts.len() as u64);
    }
}
