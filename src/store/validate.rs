use crate::error::{Error, Result};
use crate::limits::*;
use crate::model::*;

pub fn validate_span(span: &Span) -> Result<()> {
    if span.start >= span.end {
        return Err(Error::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(Error::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_SPAN_MS {
        return Err(Error::LimitExceeded("reservation too long"));
    }
    Ok(())
}

pub fn validate_room(room: &Room) -> Result<()> {
    if room.name.trim().is_empty() {
        return Err(Error::ValidationError("room name is required"));
    }
    if room.name.len() > MAX_ROOM_NAME_LEN || room.building.len() > MAX_ROOM_NAME_LEN {
        return Err(Error::LimitExceeded("room name too long"));
    }
    if room.capacity == 0 {
        return Err(Error::ValidationError("room capacity must be positive"));
    }
    if room.equipment.len() > MAX_EQUIPMENT_TAGS {
        return Err(Error::LimitExceeded("too many equipment tags"));
    }
    Ok(())
}

/// Field checks for a reservation about to be stored in `room`.
pub fn validate_new_reservation(data: &NewReservation, room: &Room) -> Result<()> {
    validate_span(&data.span)?;
    if data.user_id.is_empty() {
        return Err(Error::ValidationError("user id is required"));
    }
    if data.user_id.len() > MAX_USER_ID_LEN {
        return Err(Error::LimitExceeded("user id too long"));
    }
    if data.user_email.is_empty() {
        return Err(Error::ValidationError("user email is required"));
    }
    if data.user_email.len() > MAX_EMAIL_LEN {
        return Err(Error::LimitExceeded("user email too long"));
    }
    if data.purpose.trim().is_empty() {
        return Err(Error::ValidationError("purpose is required"));
    }
    if data.purpose.len() > MAX_PURPOSE_LEN {
        return Err(Error::LimitExceeded("purpose too long"));
    }
    if data.attendees == 0 || data.attendees > room.capacity {
        return Err(Error::InvalidAttendeeCount {
            attendees: data.attendees,
            capacity: room.capacity,
        });
    }
    if data.status == ReservationStatus::Cancelled {
        return Err(Error::ValidationError("a new reservation cannot be cancelled"));
    }
    Ok(())
}
