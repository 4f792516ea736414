use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate, Verdict};
use super::lifecycle::{conclude, Operation, Stage};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Property registry ────────────────────────────────────

    pub async fn register_property(
        &self,
        id: Ulid,
        owner_id: Ulid,
        price_rate: u32,
    ) -> Result<PropertyInfo, EngineError> {
        if price_rate > MAX_PRICE_RATE {
            return Err(EngineError::LimitExceeded("price rate too high"));
        }
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        if self.store.property_count() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        if self.store.contains_property(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PropertyRegistered {
            id,
            owner_id,
            price_rate,
        };
        self.wal_append(&event).await?;
        let ps = PropertyState::new(id, owner_id, price_rate);
        let info = ps.info();
        self.store.insert_property(ps);
        info!("registered property {id} (owner {owner_id}, rate {price_rate})");
        Ok(info)
    }

    /// New per-day rate. Stored booking prices keep the rate they were quoted at.
    pub async fn change_price_rate(
        &self,
        id: Ulid,
        price_rate: u32,
    ) -> Result<PropertyInfo, EngineError> {
        if price_rate > MAX_PRICE_RATE {
            return Err(EngineError::LimitExceeded("price rate too high"));
        }
        let _gate = self.gate.read().await;
        let mut guard = self.lock_property(id).await?;
        let event = Event::PropertyRateChanged { id, price_rate };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Remove a property together with all of its bookings.
    pub async fn remove_property(&self, id: Ulid) -> Result<PropertyInfo, EngineError> {
        let _gate = self.gate.read().await;
        let _catalog = self.catalog.lock().await;
        let mut guard = self.lock_property(id).await?;
        let info = guard.info();
        let event = Event::PropertyRemoved { id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("removed property {id} with {} bookings", info.booking_count);
        Ok(info)
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Validate `[start, end]` against the property's bookings and commit a new
    /// booking priced at the current rate.
    pub async fn create_booking(
        &self,
        property_id: Ulid,
        customer_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let mut stage = Stage::Received;
        let result = self
            .try_create(property_id, customer_id, start, end, &mut stage)
            .await;
        conclude(Operation::Create, stage, &result);
        result
    }

    async fn try_create(
        &self,
        property_id: Ulid,
        customer_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        stage: &mut Stage,
    ) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_property(property_id).await?;
        if guard.owner_id == customer_id {
            return Err(EngineError::OwnBooking(property_id));
        }

        let range = DateRange::new(start, end);
        let verdict = validate(start, end, guard.bookings_starting_by(end), None);
        *stage = stage.on_verdict(&verdict);
        if let Verdict::Reject(rejection) = verdict {
            return Err(rejection.into_error(range));
        }

        let booking = Booking {
            id: Ulid::new(),
            property_id,
            customer_id,
            range,
            total_price: quote(&range, guard.price_rate),
        };
        self.store.check_insert(&guard, &booking)?;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        *stage = stage.on_commit();
        info!(
            "booked property {property_id} {range} for customer {customer_id} as {}",
            booking.id
        );
        Ok(booking)
    }

    /// Move a booking to new dates. `None` keeps the stored value. The booking
    /// is re-priced at the property's current rate.
    pub async fn update_booking(
        &self,
        booking_id: Ulid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Booking, EngineError> {
        let mut stage = Stage::Received;
        let result = self.try_update(booking_id, start, end, &mut stage).await;
        conclude(Operation::Update, stage, &result);
        result
    }

    async fn try_update(
        &self,
        booking_id: Ulid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        stage: &mut Stage,
    ) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_booking(booking_id).await?;
        let current = self.store.get(&guard, booking_id)?.clone();

        let range = DateRange::new(
            start.unwrap_or(current.range.start),
            end.unwrap_or(current.range.end),
        );
        let verdict = validate(
            range.start,
            range.end,
            guard.bookings_starting_by(range.end),
            Some(booking_id),
        );
        *stage = stage.on_verdict(&verdict);
        if let Verdict::Reject(rejection) = verdict {
            return Err(rejection.into_error(range));
        }

        let booking = Booking {
            range,
            total_price: quote(&range, guard.price_rate),
            ..current
        };
        let event = Event::BookingUpdated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        *stage = stage.on_commit();
        info!("moved booking {booking_id} to {range}");
        Ok(booking)
    }

    /// Remove a booking. Returns the record as it was.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mut stage = Stage::Received;
        let result = self.try_delete(booking_id, &mut stage).await;
        conclude(Operation::Delete, stage, &result);
        result
    }

    async fn try_delete(
        &self,
        booking_id: Ulid,
        stage: &mut Stage,
    ) -> Result<Booking, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.lock_booking(booking_id).await?;
        let removed = self.store.get(&guard, booking_id)?.clone();
        // Removal cannot create a conflict.
        *stage = stage.on_verdict(&Verdict::Accept);

        let event = Event::BookingDeleted {
            id: booking_id,
            property_id: removed.property_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        *stage = stage.on_commit();
        info!("deleted booking {booking_id}");
        Ok(removed)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;

        let mut events = Vec::new();
        for handle in self.store.property_handles() {
            let ps = handle.read().await;
            events.push(Event::PropertyRegistered {
                id: ps.id,
                owner_id: ps.owner_id,
                price_rate: ps.price_rate,
            });
            events.extend(ps.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
