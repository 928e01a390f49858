use ulid::Ulid;

use crate::model::{BookingStatus, Conflict, InvalidInterval};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    InvalidInterval(InvalidInterval),
    Conflicting(Vec<Conflict>),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    LimitExceeded(&'static str),
    JournalError(String),
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::InvalidInterval(e) => write!(f, "{e}"),
            ReservationError::Conflicting(conflicts) => {
                write!(f, "conflicts with {} existing booking(s)", conflicts.len())?;
                for (i, c) in conflicts.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { ", " };
                    write!(f, "{sep}{c}")?;
                }
                Ok(())
            }
            ReservationError::NotFound(id) => write!(f, "booking not found: {id}"),
            ReservationError::AlreadyExists(id) => write!(f, "booking already exists: {id}"),
            ReservationError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            ReservationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            ReservationError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for ReservationError {}

impl From<InvalidInterval> for ReservationError {
    fn from(e: InvalidInterval) -> Self {
        ReservationError::InvalidInterval(e)
    }
}
