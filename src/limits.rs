pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_DETAIL_LEN: usize = 4096;
pub const MAX_DRIVER_NAME_LEN: usize = 256;

pub const MAX_ROOMS: usize = 100_000;
pub const MAX_DRIVERS: usize = 100_000;
pub const MAX_BOOKINGS: usize = 1_000_000;

/// Largest accepted JSON request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Largest WAL record payload. A length prefix above this ends replay.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
