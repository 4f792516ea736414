use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in whole currency units.
pub type Price = i64;

/// Calendar date format at every external boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

/// Closed range of calendar dates `[start, end]`.
///
/// Construction does not check ordering: a reversed range is a legal value that
/// the conflict validator rejects, so callers can hand it over unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    /// Whole days between start and end. Zero for a same-day range.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// True only if `self` lies strictly before or strictly after `other`.
    /// Sharing a single boundary date is not clear.
    pub fn is_clear_of(&self, other: &DateRange) -> bool {
        (self.start < other.start && self.end < other.start)
            || (self.start > other.end && self.end > other.end)
    }

    pub fn conflicts_with(&self, other: &DateRange) -> bool {
        !self.is_clear_of(other)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}]",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// One reservation of a property by a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub property_id: Ulid,
    pub customer_id: Ulid,
    pub range: DateRange,
    /// `nights × price_rate` at the time of the last create/edit. Never recomputed on read.
    pub total_price: Price,
}

/// Price of a stay at the given per-day rate.
pub fn quote(range: &DateRange, price_rate: u32) -> Price {
    range.nights() * Price::from(price_rate)
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub price_rate: u32,
    /// Bookings sorted by `range.start`.
    pub bookings: Vec<Booking>,
}

impl PropertyState {
    pub fn new(id: Ulid, owner_id: Ulid, price_rate: u32) -> Self {
        Self {
            id,
            owner_id,
            price_rate,
            bookings: Vec::new(),
        }
    }

    /// Insert keeping the `range.start` order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start <= booking.range.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings starting on or before `day`. Any booking that can conflict with a
    /// range ending on `day` is in this prefix.
    pub fn bookings_starting_by(&self, day: NaiveDate) -> &[Booking] {
        let bound = self.bookings.partition_point(|b| b.range.start <= day);
        &self.bookings[..bound]
    }

    pub fn info(&self) -> PropertyInfo {
        PropertyInfo {
            id: self.id,
            owner_id: self.owner_id,
            price_rate: self.price_rate,
            booking_count: self.bookings.len(),
        }
    }
}

/// WAL record format. One variant per committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyRegistered {
        id: Ulid,
        owner_id: Ulid,
        price_rate: u32,
    },
    PropertyRateChanged {
        id: Ulid,
        price_rate: u32,
    },
    PropertyRemoved {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
    },
    BookingDeleted {
        id: Ulid,
        property_id: Ulid,
    },
}

impl Event {
    /// Property whose state the event changes.
    pub fn property_id(&self) -> Ulid {
        match self {
            Event::PropertyRegistered { id, .. }
            | Event::PropertyRateChanged { id, .. }
            | Event::PropertyRemoved { id } => *id,
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                booking.property_id
            }
            Event::BookingDeleted { property_id, .. } => *property_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub price_rate: u32,
    pub booking_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn booking(start: &str, end: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            property_id: Ulid::new(),
            customer_id: Ulid::new(),
            range: DateRange::new(d(start), d(end)),
            total_price: 0,
        }
    }

    #[test]
    fn parse_date_accepts_iso() {
        assert_eq!(d("2024-06-01"), NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(d(" 2024-02-29 "), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("2024/06/01").is_err());
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("2024-06-01T10:00:00").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn nights_counts_whole_days() {
        assert_eq!(DateRange::new(d("2024-01-01"), d("2024-01-04")).nights(), 3);
        assert_eq!(DateRange::new(d("2024-01-01"), d("2024-01-01")).nights(), 0);
        assert_eq!(DateRange::new(d("2024-02-28"), d("2024-03-01")).nights(), 2);
    }

    #[test]
    fn quote_multiplies_rate() {
        let r = DateRange::new(d("2024-01-01"), d("2024-01-04"));
        assert_eq!(quote(&r, 100), 300);
        assert_eq!(quote(&r, 0), 0);
    }

    #[test]
    fn shared_boundary_is_not_clear() {
        let a = DateRange::new(d("2024-06-01"), d("2024-06-10"));
        let b = DateRange::new(d("2024-06-10"), d("2024-06-15"));
        let c = DateRange::new(d("2024-06-11"), d("2024-06-15"));
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
        assert!(a.is_clear_of(&c));
        assert!(c.is_clear_of(&a));
    }

    #[test]
    fn containment_conflicts() {
        let outer = DateRange::new(d("2024-06-01"), d("2024-06-30"));
        let inner = DateRange::new(d("2024-06-10"), d("2024-06-12"));
        assert!(outer.conflicts_with(&inner));
        assert!(inner.conflicts_with(&outer));
    }

    #[test]
    fn display_uses_iso_dates() {
        let r = DateRange::new(d("2024-06-01"), d("2024-06-10"));
        assert_eq!(r.to_string(), "[2024-06-01, 2024-06-10]");
    }

    #[test]
    fn bookings_kept_in_start_order() {
        let mut ps = PropertyState::new(Ulid::new(), Ulid::new(), 100);
        ps.insert_booking(booking("2024-03-01", "2024-03-05"));
        ps.insert_booking(booking("2024-01-01", "2024-01-05"));
        ps.insert_booking(booking("2024-02-01", "2024-02-05"));
        let starts: Vec<_> = ps.bookings.iter().map(|b| b.range.start).collect();
        assert_eq!(starts, vec![d("2024-01-01"), d("2024-02-01"), d("2024-03-01")]);
    }

    #[test]
    fn remove_booking_by_id() {
        let mut ps = PropertyState::new(Ulid::new(), Ulid::new(), 100);
        let b = booking("2024-01-01", "2024-01-05");
        let id = b.id;
        ps.insert_booking(b);
        ps.insert_booking(booking("2024-02-01", "2024-02-05"));
        assert_eq!(ps.remove_booking(id).map(|b| b.id), Some(id));
        assert!(ps.booking(id).is_none());
        assert_eq!(ps.bookings.len(), 1);
        assert!(ps.remove_booking(id).is_none());
    }

    #[test]
    fn starting_by_is_inclusive_prefix() {
        let mut ps = PropertyState::new(Ulid::new(), Ulid::new(), 100);
        ps.insert_booking(booking("2024-01-01", "2024-01-05"));
        ps.insert_booking(booking("2024-01-10", "2024-01-12"));
        ps.insert_booking(booking("2024-01-20", "2024-01-25"));
        assert_eq!(ps.bookings_starting_by(d("2023-12-31")).len(), 0);
        assert_eq!(ps.bookings_starting_by(d("2024-01-10")).len(), 2);
        assert_eq!(ps.bookings_starting_by(d("2024-12-31")).len(), 3);
    }

    #[test]
    fn event_names_its_property() {
        let b = booking("2024-01-01", "2024-01-02");
        let pid = b.property_id;
        assert_eq!(Event::BookingCreated { booking: b }.property_id(), pid);
        let id = Ulid::new();
        assert_eq!(Event::PropertyRemoved { id }.property_id(), id);
    }

    #[test]
    fn event_survives_bincode() {
        let event = Event::BookingUpdated {
            booking: booking("2024-06-01", "2024-06-10"),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
