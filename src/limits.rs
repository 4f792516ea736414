//! Hard caps on engine state and inputs.

/// Properties held by one engine.
pub const MAX_PROPERTIES: usize = 100_000;

/// Bookings held by one property.
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 50_000;

/// Upper bound on `price_rate` per day.
pub const MAX_PRICE_RATE: u32 = 10_000_000;

/// Lock acquisition attempts for a booking transaction (first try + one retry).
pub const LOCK_ATTEMPTS: usize = 2;

/// Longest SQL statement the parser accepts.
pub const MAX_SQL_LEN: usize = 16 * 1024;
