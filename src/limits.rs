use crate::model::Ms;

/// Earliest accepted timestamp (1970-01-01).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted timestamp (year 2200, roughly).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking may not run longer than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

/// Venue plus staff assigned to one booking.
pub const MAX_RESOURCES_PER_BOOKING: usize = 64;

pub const MAX_LABEL_LEN: usize = 1024;

/// Widest window accepted by schedule queries (one year).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
