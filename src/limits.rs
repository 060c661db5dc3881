use crate::model::{DAY_MS, Ms};

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_EQUIPMENT_TAGS: usize = 64;

pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PURPOSE_LEN: usize = 2_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
pub const MAX_RESERVATION_SPAN_MS: Ms = 31 * DAY_MS;

pub const MAX_UTILIZATION_WINDOW_MS: Ms = 366 * DAY_MS;
pub const MAX_POPULAR_LIMIT: usize = 1_000;

pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;
