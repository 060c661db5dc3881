use std::collections::HashMap;

use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;
use crate::store::ReservationStore;

use super::Engine;

/// Active reservation counts per room, highest first, ties by room id ascending.
/// Rooms without active reservations do not appear.
pub fn rank_by_count<'a>(reservations: impl IntoIterator<Item = &'a Reservation>) -> Vec<(Ulid, usize)> {
    let mut counts: HashMap<Ulid, usize> = HashMap::new();
    for r in reservations.into_iter().filter(|r| r.is_active()) {
        *counts.entry(r.room_id).or_default() += 1;
    }
    let mut ranked: Vec<(Ulid, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Booked hours of the active reservations starting inside `period`, against
/// `hours_per_day` for every (partial) day the period spans.
pub fn utilization<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    period: &Span,
    hours_per_day: u32,
) -> UtilizationStats {
    let (count, hours) = reservations
        .into_iter()
        .filter(|r| r.is_active() && period.contains_instant(r.span.start))
        .fold((0usize, 0.0f64), |(n, h), r| (n + 1, h + r.span.hours()));

    let days = (period.duration_ms() + DAY_MS - 1) / DAY_MS;
    let available = days as f64 * hours_per_day as f64;

    UtilizationStats {
        total_reservations: count,
        total_hours_booked: hours,
        utilization_percentage: if available > 0.0 { hours / available * 100.0 } else { 0.0 },
        average_reservation_length: if count == 0 { 0.0 } else { hours / count as f64 },
    }
}

impl<S: ReservationStore> Engine<S> {
    /// The `limit` most booked rooms with their active reservation counts.
    pub async fn rank_popular_rooms(&self, limit: usize) -> Result<Vec<PopularRoom>> {
        if limit > MAX_POPULAR_LIMIT {
            return Err(Error::LimitExceeded("popular rooms limit too large"));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let active = self.store.list_active_reservations().await?;

        let mut out = Vec::with_capacity(limit);
        for (room_id, booking_count) in rank_by_count(&active) {
            if out.len() == limit {
                break;
            }
            match self.store.get_room(room_id).await {
                Ok(room) => out.push(PopularRoom { room, booking_count }),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    pub async fn compute_utilization(
        &self,
        room_id: Ulid,
        period_start: Ms,
        period_end: Ms,
    ) -> Result<UtilizationStats> {
        let period = Span::checked(period_start, period_end)?;
        if period.duration_ms() > MAX_UTILIZATION_WINDOW_MS {
            return Err(Error::LimitExceeded("utilization window too wide"));
        }
        let reservations = self.store.list_reservations_for_room(room_id, false).await?;
        Ok(utilization(
            &reservations,
            &period,
            self.config.operating_hours_per_day,
        ))
    }
}
