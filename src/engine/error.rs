use ulid::Ulid;

use crate::model::DateRange;

#[derive(Debug)]
pub enum EngineError {
    /// Booking or property id does not exist.
    NotFound(Ulid),
    /// Storage-level uniqueness violation beneath the validator.
    AlreadyExists(Ulid),
    /// Candidate start date is after its end date.
    InvalidRange(DateRange),
    /// Candidate range overlaps the named booking.
    DateConflict(Ulid),
    /// Customer owns the property they tried to book.
    OwnBooking(Ulid),
    /// Property lock could not be taken, even after the retry.
    Transient(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True for outcomes decided by booking rules rather than by the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRange(_) | EngineError::DateConflict(_) | EngineError::OwnBooking(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange(range) => {
                write!(f, "start date is after end date: {range}")
            }
            EngineError::DateConflict(id) => {
                write!(f, "dates are already booked (conflicts with booking {id})")
            }
            EngineError::OwnBooking(id) => {
                write!(f, "owner cannot book own property: {id}")
            }
            EngineError::Transient(id) => {
                write!(f, "property {id} is busy, try again")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
