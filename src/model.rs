use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Unix milliseconds (UTC). Engine-internal time is always this.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted bounds.
    pub fn checked(start: Ms, end: Ms) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn hours(&self) -> f64 {
        self.duration_ms() as f64 / HOUR_MS as f64
    }

    /// The one overlap rule. Adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoomType {
    #[serde(rename = "Lecture Hall")]
    LectureHall,
    Classroom,
    Lab,
    #[serde(rename = "Meeting Room")]
    MeetingRoom,
    #[serde(rename = "Study Room")]
    StudyRoom,
    #[serde(rename = "Conference Room")]
    ConferenceRoom,
    Office,
    Auditorium,
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoomType::LectureHall => "Lecture Hall",
            RoomType::Classroom => "Classroom",
            RoomType::Lab => "Lab",
            RoomType::MeetingRoom => "Meeting Room",
            RoomType::StudyRoom => "Study Room",
            RoomType::ConferenceRoom => "Conference Room",
            RoomType::Office => "Office",
            RoomType::Auditorium => "Auditorium",
        };
        f.write_str(s)
    }
}

/// A bookable space. Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub building: String,
    pub capacity: u32,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    #[serde(default)]
    pub equipment: BTreeSet<String>,
}

/// Predicate for `list_rooms`. Every `None` / empty field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomFilter {
    pub min_capacity: Option<u32>,
    #[serde(rename = "type")]
    pub room_type: Option<RoomType>,
    pub building: Option<String>,
    /// Any-of: a room matches if it carries at least one of these tags.
    pub equipment: Vec<String>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        if let Some(min) = self.min_capacity
            && room.capacity < min
        {
            return false;
        }
        if let Some(t) = self.room_type
            && room.room_type != t
        {
            return false;
        }
        if let Some(ref b) = self.building
            && &room.building != b
        {
            return false;
        }
        self.equipment.is_empty() || self.equipment.iter().any(|e| room.equipment.contains(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: String,
    pub user_email: String,
    pub span: Span,
    pub purpose: String,
    pub attendees: u32,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    /// Cancelled reservations are kept for audit but never block a room.
    pub fn is_active(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }
}

/// Caller-supplied part of a reservation; id and timestamps come from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub user_id: String,
    pub user_email: String,
    pub span: Span,
    pub purpose: String,
    pub attendees: u32,
    pub status: ReservationStatus,
}

/// A room and every reservation ever made for it, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start. Equal starts keep insertion order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get_reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter().filter(|r| r.is_active())
    }

    /// Active reservations overlapping the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.is_active() && r.span.end > query.start)
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomUpserted {
        room: Room,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
        cancelled_at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularRoom {
    pub room: Room,
    pub booking_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationStats {
    pub total_reservations: usize,
    pub total_hours_booked: f64,
    pub utilization_percentage: f64,
    pub average_reservation_length: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReservations {
    /// Active and not yet started, soonest first.
    pub upcoming: Vec<Reservation>,
    /// Started, finished or cancelled, most recent first.
    pub past: Vec<Reservation>,
}
