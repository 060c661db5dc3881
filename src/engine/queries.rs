use ulid::Ulid;

use crate::error::Result;
use crate::model::*;
use crate::store::ReservationStore;

use super::Engine;

impl<S: ReservationStore> Engine<S> {
    pub async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>> {
        self.store.list_rooms(filter).await
    }

    pub async fn get_room(&self, id: Ulid) -> Result<Room> {
        self.store.get_room(id).await
    }

    pub async fn list_reservations_for_room(
        &self,
        room_id: Ulid,
        include_cancelled: bool,
    ) -> Result<Vec<Reservation>> {
        self.store
            .list_reservations_for_room(room_id, include_cancelled)
            .await
    }

    pub async fn list_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>> {
        self.store.list_reservations_for_user(user_id).await
    }

    /// Split a user's reservations into upcoming (active, starting after
    /// `now`, soonest first) and past (everything else, latest first).
    pub async fn user_reservations_at(&self, user_id: &str, now: Ms) -> Result<UserReservations> {
        let all = self.store.list_reservations_for_user(user_id).await?;
        let (mut upcoming, past): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|r| r.is_active() && r.span.start > now);
        upcoming.reverse();
        Ok(UserReservations { upcoming, past })
    }
}
