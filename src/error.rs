use thiserror::Error;
use ulid::Ulid;

use crate::model::Ms;

/// Failures surfaced by the store and the engine. None of them are fatal to the
/// process; every one leaves stored state untouched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: Ms, end: Ms },

    #[error("invalid attendee count {attendees}: room capacity is {capacity}")]
    InvalidAttendeeCount { attendees: u32, capacity: u32 },

    #[error("conflict with reservation: {0}")]
    Conflict(Ulid),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("validation error: {0}")]
    ValidationError(&'static str),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl Error {
    /// Short machine-readable name, used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInterval { .. } => "invalid_interval",
            Error::InvalidAttendeeCount { .. } => "invalid_attendee_count",
            Error::Conflict(_) => "conflict",
            Error::StorageError(_) => "storage_error",
            Error::ValidationError(_) => "validation_error",
            Error::LimitExceeded(_) => "limit_exceeded",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::StorageError(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
