mod availability;
mod conflict;
mod mutations;
mod queries;
mod stats;

pub use conflict::{conflicts, find_conflict};
pub use stats::{rank_by_count, utilization};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::store::{ReservationStore, WalStore};

pub const DEFAULT_OPERATING_HOURS_PER_DAY: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bookable hours per calendar day, the denominator of utilization.
    pub operating_hours_per_day: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operating_hours_per_day: DEFAULT_OPERATING_HOURS_PER_DAY,
        }
    }
}

/// Availability checks, booking and usage statistics over a [`ReservationStore`].
///
/// Reads are plain store reads. Bookings for the same room are serialized by a
/// per-room mutex held across the availability check and the write, so two
/// overlapping requests can never both commit.
pub struct Engine<S: ReservationStore = WalStore> {
    store: Arc<S>,
    config: EngineConfig,
    booking_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl<S: ReservationStore> Engine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            booking_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub(super) fn room_lock(&self, room_id: Ulid) -> Arc<Mutex<()>> {
        self.booking_locks.entry(room_id).or_default().clone()
    }
}
