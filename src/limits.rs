/// Max length of any display name (employee, device, room, category, location).
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a leave reason, rejection reason or device description.
pub const MAX_REASON_LEN: usize = 2_000;

/// Max number of calendar days a single leave request may cover.
pub const MAX_LEAVE_DAYS: i64 = 366;

/// Max units a single device record may track.
pub const MAX_DEVICE_UNITS: u32 = 100_000;

/// Max active bookings a room may hold on one date. Closed bookings never count.
pub const MAX_ACTIVE_BOOKINGS_PER_ROOM_DAY: usize = 1_440;

/// Max depth walked when checking the supervision chain for cycles.
pub const MAX_HIERARCHY_DEPTH: usize = 64;
