use futures::future::try_join_all;
use tracing::debug;
use ulid::Ulid;

use crate::error::Result;
use crate::model::*;
use crate::store::ReservationStore;

use super::Engine;
use super::conflict::find_conflict;

impl<S: ReservationStore> Engine<S> {
    /// True iff no active reservation on `room_id` overlaps `[start, end)`.
    ///
    /// On its own this is only a snapshot: a booking made between this call
    /// and a later write is not seen. Use [`Engine::book`] to check and write
    /// as one step.
    pub async fn check_availability(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<bool> {
        let span = Span::checked(start, end)?;
        Ok(self.conflicting_reservation(room_id, &span).await?.is_none())
    }

    pub(super) async fn conflicting_reservation(
        &self,
        room_id: Ulid,
        span: &Span,
    ) -> Result<Option<Ulid>> {
        let existing = self.store.list_reservations_for_room(room_id, false).await?;
        let hit = find_conflict(&existing, span).map(|r| r.id);
        debug!(
            "availability {room_id} [{}, {}): {}",
            span.start,
            span.end,
            hit.map_or("free".to_string(), |id| format!("blocked by {id}"))
        );
        Ok(hit)
    }

    /// Rooms matching `filter` that are free for all of `[start, end)`.
    /// An empty result is a valid answer.
    pub async fn search_available_rooms(
        &self,
        start: Ms,
        end: Ms,
        filter: &RoomFilter,
    ) -> Result<Vec<Room>> {
        let span = Span::checked(start, end)?;
        let rooms = self.store.list_rooms(filter).await?;
        let checked = try_join_all(rooms.into_iter().map(|room| async move {
            let blocked = self.conflicting_reservation(room.id, &span).await?;
            Ok::<_, crate::error::Error>(blocked.is_none().then_some(room))
        }))
        .await?;
        Ok(checked.into_iter().flatten().collect())
    }
}
