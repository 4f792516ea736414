use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

/// Booking records, grouped per property.
///
/// Each property's bookings sit behind that property's lock. Holding the write
/// guard is the transaction: reads through the guard see every committed
/// booking and nothing can commit next to them until the guard drops.
pub struct BookingStore {
    properties: DashMap<Ulid, SharedPropertyState>,
    /// Reverse lookup: booking id → property id.
    booking_to_property: DashMap<Ulid, Ulid>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            properties: DashMap::new(),
            booking_to_property: DashMap::new(),
        }
    }

    /// Build a store from fully replayed property states.
    pub fn from_states(states: HashMap<Ulid, PropertyState>) -> Self {
        let store = Self::new();
        for (id, ps) in states {
            for b in &ps.bookings {
                store.booking_to_property.insert(b.id, id);
            }
            store.properties.insert(id, Arc::new(RwLock::new(ps)));
        }
        store
    }

    // ── Properties ───────────────────────────────────────────

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn contains_property(&self, id: &Ulid) -> bool {
        self.properties.contains_key(id)
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.properties.get(id).map(|e| e.value().clone())
    }

    /// True if `handle` is still the live state for `id`.
    pub fn is_current(&self, id: &Ulid, handle: &SharedPropertyState) -> bool {
        self.properties
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), handle))
    }

    pub fn insert_property(&self, state: PropertyState) {
        self.properties
            .insert(state.id, Arc::new(RwLock::new(state)));
    }

    /// Drop a property and un-index its bookings. Caller holds its write guard.
    pub fn detach_property(&self, ps: &PropertyState) {
        for b in &ps.bookings {
            self.booking_to_property.remove(&b.id);
        }
        self.properties.remove(&ps.id);
    }

    /// Snapshot of every property handle. Never hold DashMap refs across an await.
    pub fn property_handles(&self) -> Vec<SharedPropertyState> {
        self.properties.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn property_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_property.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_property.len()
    }

    // ── Store contract, checked inside the property transaction ──

    /// Current bookings of the locked property.
    pub fn bookings_for_property<'a>(&self, ps: &'a PropertyState) -> &'a [Booking] {
        &ps.bookings
    }

    pub fn get<'a>(
        &self,
        ps: &'a PropertyState,
        booking_id: Ulid,
    ) -> Result<&'a Booking, EngineError> {
        ps.booking(booking_id).ok_or(EngineError::NotFound(booking_id))
    }

    /// Uniqueness and capacity checks an insert must pass before it is logged.
    pub fn check_insert(&self, ps: &PropertyState, booking: &Booking) -> Result<(), EngineError> {
        if self.booking_to_property.contains_key(&booking.id) || ps.booking(booking.id).is_some() {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        if ps.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many bookings on property"));
        }
        Ok(())
    }

    /// An update or delete needs the record to still be there.
    pub fn check_present(&self, ps: &PropertyState, booking_id: Ulid) -> Result<(), EngineError> {
        self.get(ps, booking_id).map(|_| ())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a logged event to the locked property and keep the index in step.
    pub fn apply_event(&self, ps: &mut PropertyState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_to_property
                    .insert(booking.id, booking.property_id);
            }
            Event::BookingDeleted { id, .. } => {
                self.booking_to_property.remove(id);
            }
            Event::PropertyRemoved { .. } => {
                self.detach_property(ps);
            }
            _ => {}
        }
        apply_to_property(ps, event);
    }
}

/// Apply an event to a property's own state. No index, no locking.
pub(super) fn apply_to_property(ps: &mut PropertyState, event: &Event) {
    match event {
        Event::PropertyRateChanged { price_rate, .. } => {
            ps.price_rate = *price_rate;
        }
        Event::BookingCreated { booking } => {
            ps.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking } => {
            ps.remove_booking(booking.id);
            ps.insert_booking(booking.clone());
        }
        Event::BookingDeleted { id, .. } => {
            ps.remove_booking(*id);
        }
        // Registration and removal act on the property map, not on one property.
        Event::PropertyRegistered { .. } | Event::PropertyRemoved { .. } => {}
    }
}

/// Fold a WAL into property states.
pub(super) fn rebuild(events: &[Event]) -> HashMap<Ulid, PropertyState> {
    let mut states: HashMap<Ulid, PropertyState> = HashMap::new();
    for event in events {
        match event {
            Event::PropertyRegistered {
                id,
                owner_id,
                price_rate,
            } => {
                states.insert(*id, PropertyState::new(*id, *owner_id, *price_rate));
            }
            Event::PropertyRemoved { id } => {
                states.remove(id);
            }
            other => {
                if let Some(ps) = states.get_mut(&other.property_id()) {
                    apply_to_property(ps, other);
                }
            }
        }
    }
    states
}
