use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Booking, DateRange};

use super::EngineError;

/// Why a candidate range was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Start date after end date.
    InvalidRange,
    /// Shares at least one date with `booking_id`.
    DateConflict { booking_id: Ulid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    #[cfg(test)]
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

impl Rejection {
    pub fn into_error(self, candidate: DateRange) -> EngineError {
        match self {
            Rejection::InvalidRange => EngineError::InvalidRange(candidate),
            Rejection::DateConflict { booking_id } => EngineError::DateConflict(booking_id),
        }
    }
}

/// Decide whether `[start, end]` may be committed next to `existing`.
///
/// `exclude` drops one booking from the candidate set so an edited booking is
/// never judged against its own stored range. Pure and deterministic: the first
/// conflicting booking in iteration order is the one reported.
pub fn validate<'a>(
    start: NaiveDate,
    end: NaiveDate,
    existing: impl IntoIterator<Item = &'a Booking>,
    exclude: Option<Ulid>,
) -> Verdict {
    let candidate = DateRange::new(start, end);
    if !candidate.is_ordered() {
        return Verdict::Reject(Rejection::InvalidRange);
    }

    existing
        .into_iter()
        .filter(|b| Some(b.id) != exclude)
        .find(|b| candidate.conflicts_with(&b.range))
        .map_or(Verdict::Accept, |b| {
            Verdict::Reject(Rejection::DateConflict { booking_id: b.id })
        })
}
