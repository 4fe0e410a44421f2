use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ReservationRef, TimeRange};

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval(&'static str),
    InvalidTimeFormat(String),
    InvalidDate(String),
    InvalidRange(TimeRange),
    /// A required field is blank or malformed.
    InvalidInput(&'static str),
    /// Rejected by an overlapping reservation of equal or better priority.
    SlotUnavailable {
        conflict: Ulid,
        date: NaiveDate,
        range: TimeRange,
    },
    RoomNotFound(String),
    RoomExists(String),
    ReservationNotFound(ReservationRef),
    /// The reservation's end has passed; it can no longer be reactivated.
    ReservationExpired(Ulid),
    UserNotFound(String),
    UserExists(String),
    WeakPassword(usize),
    AdminExists,
    LastAdmin(String),
    AuthenticationFailed,
    LimitExceeded(&'static str),
    PersistenceFailure(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidTimeFormat(s) => write!(f, "invalid time format: {s:?}"),
            EngineError::InvalidDate(s) => write!(f, "invalid date (expected YYYY-MM-DD): {s:?}"),
            EngineError::InvalidRange(range) => {
                write!(f, "invalid range {range}: start must be before end")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::SlotUnavailable { conflict, date, range } => {
                write!(f, "time slot {date} {range} already reserved (by {conflict})")
            }
            EngineError::RoomNotFound(name) => write!(f, "room not found: {name}"),
            EngineError::RoomExists(name) => write!(f, "room already exists: {name}"),
            EngineError::ReservationNotFound(r) => write!(f, "reservation not found: {r}"),
            EngineError::ReservationExpired(id) => {
                write!(f, "reservation {id} has already ended")
            }
            EngineError::UserNotFound(name) => write!(f, "user not found: {name}"),
            EngineError::UserExists(name) => write!(f, "username already exists: {name}"),
            EngineError::WeakPassword(min) => {
                write!(f, "password must be at least {min} characters long")
            }
            EngineError::AdminExists => write!(f, "an admin account already exists"),
            EngineError::LastAdmin(name) => {
                write!(f, "cannot remove {name}: it is the last admin account")
            }
            EngineError::AuthenticationFailed => write!(f, "incorrect credentials"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
