use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let property_id = self
            .store
            .property_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let handle = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = handle.read().await;
        self.store.get(&guard, booking_id).cloned()
    }

    /// Bookings of one property in start-date order.
    pub async fn bookings_for_property(
        &self,
        property_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        let handle = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = handle.read().await;
        Ok(self.store.bookings_for_property(&guard).to_vec())
    }

    /// Every booking made by `customer_id`, ordered by start date then id.
    /// Empty for an unknown customer.
    pub async fn bookings_for_customer(&self, customer_id: Ulid) -> Vec<Booking> {
        let mut out = Vec::new();
        for handle in self.store.property_handles() {
            let guard = handle.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.customer_id == customer_id)
                    .cloned(),
            );
        }
        out.sort_by_key(|b| (b.range.start, b.id));
        out
    }

    pub async fn get_property(&self, property_id: Ulid) -> Result<PropertyInfo, EngineError> {
        let handle = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let info = handle.read().await.info();
        Ok(info)
    }

    /// All properties, ordered by id.
    pub async fn list_properties(&self) -> Vec<PropertyInfo> {
        let mut out = Vec::with_capacity(self.store.property_count());
        for handle in self.store.property_handles() {
            out.push(handle.read().await.info());
        }
        out.sort_by_key(|p| p.id);
        out
    }

    /// Current per-day rate of a property.
    #[cfg(test)]
    pub async fn price_rate(&self, property_id: Ulid) -> Result<u32, EngineError> {
        self.get_property(property_id).await.map(|p| p.price_rate)
    }
}
