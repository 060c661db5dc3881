use tracing::{info, warn};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{ReservationStore, validate_span};

use super::Engine;

impl<S: ReservationStore> Engine<S> {
    /// Check availability and create the reservation as one step.
    ///
    /// Holds the room's booking lock from the availability read until the
    /// store has committed, so a concurrent overlapping request waits and then
    /// fails with `Conflict`.
    pub async fn book(&self, data: NewReservation) -> Result<Reservation> {
        validate_span(&data.span)?;
        // Rejects unknown rooms before a lock entry is created for them.
        self.store.get_room(data.room_id).await?;

        let lock = self.room_lock(data.room_id);
        let _booking = lock.lock().await;

        if let Some(existing) = self.conflicting_reservation(data.room_id, &data.span).await? {
            warn!(
                "booking conflict on room {}: [{}, {}) overlaps {existing}",
                data.room_id, data.span.start, data.span.end
            );
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(Error::Conflict(existing));
        }

        let reservation = self.store.create_reservation(data).await?;
        info!(
            "booked {} on room {} for {} [{}, {})",
            reservation.id,
            reservation.room_id,
            reservation.user_id,
            reservation.span.start,
            reservation.span.end
        );
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Cancel a reservation. Its interval becomes bookable again; the record stays.
    pub async fn cancel(&self, id: Ulid) -> Result<()> {
        self.store.cancel_reservation(id).await?;
        info!("cancelled reservation {id}");
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL).increment(1);
        Ok(())
    }
}
