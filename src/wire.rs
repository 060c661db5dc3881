//! Newline-delimited JSON protocol.
//!
//! Each request is one line `{"op": "...", ...}`; each response is one line,
//! either `{"ok": ...}` or `{"error": {"kind": "...", "message": "...", "retryable": bool}}`.
//! Timestamps are RFC 3339 strings; any offset is accepted and answers are UTC.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::limits::MAX_REQUEST_LINE_LEN;
use crate::model::*;
use crate::observability;
use crate::store::ReservationStore;

fn default_popular_limit() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListRooms {
        #[serde(default)]
        filter: RoomFilter,
    },
    GetRoom {
        id: Ulid,
    },
    PutRoom {
        room: Room,
    },
    RoomReservations {
        room_id: Ulid,
        #[serde(default)]
        include_cancelled: bool,
    },
    UserReservations {
        user_id: String,
    },
    CheckAvailability {
        room_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    SearchAvailableRooms {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        filter: RoomFilter,
    },
    PopularRooms {
        #[serde(default = "default_popular_limit")]
        limit: usize,
    },
    Utilization {
        room_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Book {
        room_id: Ulid,
        user_id: String,
        user_email: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        purpose: String,
        attendees: u32,
        #[serde(default)]
        status: Option<ReservationStatus>,
    },
    Cancel {
        id: Ulid,
    },
}

impl Request {
    /// Short label for logs and metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Request::ListRooms { .. } => "list_rooms",
            Request::GetRoom { .. } => "get_room",
            Request::PutRoom { .. } => "put_room",
            Request::RoomReservations { .. } => "room_reservations",
            Request::UserReservations { .. } => "user_reservations",
            Request::CheckAvailability { .. } => "check_availability",
            Request::SearchAvailableRooms { .. } => "search_available_rooms",
            Request::PopularRooms { .. } => "popular_rooms",
            Request::Utilization { .. } => "utilization",
            Request::Book { .. } => "book",
            Request::Cancel { .. } => "cancel",
        }
    }
}

fn to_datetime(ms: Ms) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(Error::LimitExceeded("timestamp out of range"))
}

/// A reservation as it crosses the boundary: instants as UTC datetimes.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: String,
    pub user_email: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub purpose: String,
    pub attendees: u32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<Reservation> for ReservationView {
    type Error = Error;

    fn try_from(r: Reservation) -> Result<Self> {
        Ok(Self {
            id: r.id,
            room_id: r.room_id,
            user_id: r.user_id,
            user_email: r.user_email,
            start_time: to_datetime(r.span.start)?,
            end_time: to_datetime(r.span.end)?,
            purpose: r.purpose,
            attendees: r.attendees,
            status: r.status,
            created_at: to_datetime(r.created_at)?,
            cancelled_at: r.cancelled_at.map(to_datetime).transpose()?,
        })
    }
}

fn views(reservations: Vec<Reservation>) -> Result<Vec<ReservationView>> {
    reservations.into_iter().map(ReservationView::try_from).collect()
}

fn to_value<T: Serialize>(v: T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| Error::StorageError(format!("encode response: {e}")))
}

/// Run one request against the engine.
pub async fn execute<S: ReservationStore>(engine: &Engine<S>, req: Request) -> Result<Value> {
    match req {
        Request::ListRooms { filter } => to_value(engine.list_rooms(&filter).await?),
        Request::GetRoom { id } => to_value(engine.get_room(id).await?),
        Request::PutRoom { room } => {
            engine.store().upsert_room(room).await?;
            Ok(Value::Null)
        }
        Request::RoomReservations {
            room_id,
            include_cancelled,
        } => to_value(views(
            engine
                .list_reservations_for_room(room_id, include_cancelled)
                .await?,
        )?),
        Request::UserReservations { user_id } => {
            let split = engine.user_reservations_at(&user_id, now_ms()).await?;
            Ok(json!({
                "upcoming": views(split.upcoming)?,
                "past": views(split.past)?,
            }))
        }
        Request::CheckAvailability {
            room_id,
            start,
            end,
        } => {
            let available = engine
                .check_availability(room_id, start.timestamp_millis(), end.timestamp_millis())
                .await?;
            Ok(json!({ "available": available }))
        }
        Request::SearchAvailableRooms { start, end, filter } => to_value(
            engine
                .search_available_rooms(start.timestamp_millis(), end.timestamp_millis(), &filter)
                .await?,
        ),
        Request::PopularRooms { limit } => {
            let ranked = engine.rank_popular_rooms(limit).await?;
            let rows: Vec<Value> = ranked
                .into_iter()
                .map(|p| json!({ "room": p.room, "booking_count": p.booking_count }))
                .collect();
            Ok(Value::Array(rows))
        }
        Request::Utilization {
            room_id,
            start,
            end,
        } => {
            let stats = engine
                .compute_utilization(room_id, start.timestamp_millis(), end.timestamp_millis())
                .await?;
            Ok(json!({
                "total_reservations": stats.total_reservations,
                "total_hours_booked": stats.total_hours_booked,
                "utilization_percentage": stats.utilization_percentage,
                "average_reservation_length": stats.average_reservation_length,
            }))
        }
        Request::Book {
            room_id,
            user_id,
            user_email,
            start,
            end,
            purpose,
            attendees,
            status,
        } => {
            let span = Span::checked(start.timestamp_millis(), end.timestamp_millis())?;
            let reservation = engine
                .book(NewReservation {
                    room_id,
                    user_id,
                    user_email,
                    span,
                    purpose,
                    attendees,
                    status: status.unwrap_or(ReservationStatus::Confirmed),
                })
                .await?;
            to_value(ReservationView::try_from(reservation)?)
        }
        Request::Cancel { id } => {
            engine.cancel(id).await?;
            Ok(Value::Null)
        }
    }
}

fn error_line(kind: &str, message: String, retryable: bool) -> String {
    json!({ "error": { "kind": kind, "message": message, "retryable": retryable } }).to_string()
}

/// Parse, execute and encode one request line.
pub async fn handle_line<S: ReservationStore>(engine: &Engine<S>, line: &str) -> String {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "bad_request")
                .increment(1);
            return error_line("bad_request", e.to_string(), false);
        }
    };

    let op = req.op();
    let started = Instant::now();
    let result = execute(engine, req).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(value) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": value }).to_string()
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => e.kind())
                .increment(1);
            tracing::debug!("{op} failed: {e}");
            error_line(e.kind(), e.to_string(), e.is_retryable())
        }
    }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Serve one client until it disconnects. Bad lines get an error response and
/// the connection stays open.
pub async fn process_connection<S: ReservationStore>(
    socket: TcpStream,
    engine: Arc<Engine<S>>,
) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));

    while let Some(line) = framed.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&*engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                error_line("limit_exceeded", "request line too long".into(), false)
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(response).await.map_err(codec_err)?;
    }
    Ok(())
}
