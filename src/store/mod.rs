//! Durable room and reservation storage.
//!
//! [`ReservationStore`] is the contract the engine reads and writes through.
//! [`WalStore`] keeps everything in memory and makes it durable with a
//! write-ahead log.

mod validate;
mod wal_store;

pub use validate::{validate_new_reservation, validate_room, validate_span};
pub use wal_store::{SharedRoomState, WalStore};

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::Result;
use crate::model::*;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Rooms matching `filter`, ordered by id.
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>>;

    async fn get_room(&self, id: Ulid) -> Result<Room>;

    /// Create or replace a room. Existing reservations are kept.
    async fn upsert_room(&self, room: Room) -> Result<()>;

    /// Reservations for a room, sorted by start time ascending.
    async fn list_reservations_for_room(
        &self,
        room_id: Ulid,
        include_cancelled: bool,
    ) -> Result<Vec<Reservation>>;

    /// Every reservation a user ever made, sorted by start time descending.
    async fn list_reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>>;

    /// All non-cancelled reservations across all rooms.
    async fn list_active_reservations(&self) -> Result<Vec<Reservation>>;

    /// Validate and persist a reservation. Does not check for overlaps.
    async fn create_reservation(&self, data: NewReservation) -> Result<Reservation>;

    /// Mark a reservation cancelled. Cancelling twice is a no-op.
    async fn cancel_reservation(&self, id: Ulid) -> Result<()>;
}
