/// Maximum number of rooms in one registry.
pub const MAX_ROOMS: usize = 1_024;

/// Maximum length of a room name or username, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Maximum length of the free-text leader/info fields, in bytes.
pub const MAX_TEXT_LEN: usize = 1_024;

/// Maximum stored reservations per room, active or not.
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Maximum number of registered users.
pub const MAX_USERS: usize = 10_000;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Password bytes beyond this are rejected rather than hashed.
pub const MAX_PASSWORD_LEN: usize = 1_024;
