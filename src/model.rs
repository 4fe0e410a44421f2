use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::slots::format_time;

/// Minutes since midnight. `24:00` is a valid end bound.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open time-of-day interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "crate::slots::hhmm")]
    pub start: Minute,
    #[serde(with = "crate::slots::hhmm")]
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Validating constructor for caller-supplied bounds.
    pub fn checked(start: Minute, end: Minute) -> Option<Self> {
        (start < end && end <= MINUTES_PER_DAY).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_time(self.start), format_time(self.end))
    }
}

/// Why a room is booked. The purpose decides the booking's rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Purpose {
    Presentation,
    Meeting,
    StudySession,
    Other,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [
        Purpose::Presentation,
        Purpose::Meeting,
        Purpose::StudySession,
        Purpose::Other,
    ];

    /// Lower is stronger.
    pub fn priority(self) -> u8 {
        match self {
            Purpose::Presentation => 1,
            Purpose::Meeting => 2,
            Purpose::StudySession => 3,
            Purpose::Other => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Purpose::Presentation => "Presentation",
            Purpose::Meeting => "Meeting",
            Purpose::StudySession => "Study Session",
            Purpose::Other => "Other",
        }
    }

    /// Unrecognized text falls back to `Other`, the weakest rank.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "presentation" => Purpose::Presentation,
            "meeting" => Purpose::Meeting,
            "studysession" | "study" => Purpose::StudySession,
            _ => Purpose::Other,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<Purpose> for String {
    fn from(p: Purpose) -> Self {
        p.label().to_string()
    }
}

impl From<String> for Purpose {
    fn from(s: String) -> Self {
        Purpose::from_label(&s)
    }
}

/// A booking of one room on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub range: TimeRange,
    pub purpose: Purpose,
    pub priority: u8,
    pub leader: String,
    #[serde(default)]
    pub info: String,
    /// Soft-delete flag; inactive reservations never conflict.
    pub active: bool,
}

impl Reservation {
    /// True if both are active, on the same date, overlap, and are not the same booking.
    pub fn conflicts_with(&self, other: &Reservation) -> bool {
        self.id != other.id
            && self.active
            && other.active
            && self.date == other.date
            && self.range.overlaps(&other.range)
    }
}

/// Addresses one stored reservation of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationRef {
    /// Position in the room's stored list, inactive entries included.
    Index(usize),
    Id(Ulid),
}

impl fmt::Display for ReservationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationRef::Index(i) => write!(f, "#{i}"),
            ReservationRef::Id(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Clear the active flag; the entry stays in storage.
    Soft,
    /// Remove the entry from storage.
    Hard,
}

/// What a caller asks for; the engine assigns id, priority and the active flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub date: NaiveDate,
    pub range: TimeRange,
    pub purpose: Purpose,
    pub leader: String,
    pub info: String,
}

impl ReservationRequest {
    pub fn new(date: NaiveDate, range: TimeRange, purpose: Purpose, leader: impl Into<String>) -> Self {
        Self {
            date,
            range,
            purpose,
            leader: leader.into(),
            info: String::new(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn into_reservation(self) -> Reservation {
        Reservation {
            id: Ulid::new(),
            date: self.date,
            range: self.range,
            purpose: self.purpose,
            priority: self.purpose.priority(),
            leader: self.leader,
            info: self.info,
            active: true,
        }
    }
}

/// In-memory state of one room. Only ever touched through the room's lock.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub name: String,
    /// Insertion order, including inactive reservations.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(name: String) -> Self {
        Self {
            name,
            reservations: Vec::new(),
        }
    }

    pub fn from_record(record: RoomRecord) -> Self {
        Self {
            name: record.name,
            reservations: record.reservations,
        }
    }

    pub fn position(&self, id: Ulid) -> Option<usize> {
        self.reservations.iter().position(|r| r.id == id)
    }

    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(move |r| r.active && r.date == date)
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.active).count()
    }

    pub fn record(&self) -> RoomRecord {
        RoomRecord {
            name: self.name.clone(),
            reservations: self.reservations.clone(),
        }
    }
}

/// Persisted form of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reservations: Vec<Reservation>,
}

impl RoomRecord {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reservations: Vec::new(),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Broadcast to collaborators after a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    RoomAdded {
        room: String,
    },
    RoomRemoved {
        room: String,
    },
    Booked {
        room: String,
        reservation: Reservation,
    },
    /// A lower-priority reservation was overridden; its holder should be told.
    Displaced {
        room: String,
        id: Ulid,
        purpose: Purpose,
        date: NaiveDate,
        range: TimeRange,
        leader: String,
    },
    Cancelled {
        room: String,
        id: Ulid,
    },
    Restored {
        room: String,
        id: Ulid,
    },
    Expired {
        room: String,
        id: Ulid,
    },
}

impl Notice {
    pub fn room(&self) -> &str {
        match self {
            Notice::RoomAdded { room }
            | Notice::RoomRemoved { room }
            | Notice::Booked { room, .. }
            | Notice::Displaced { room, .. }
            | Notice::Cancelled { room, .. }
            | Notice::Restored { room, .. }
            | Notice::Expired { room, .. } => room,
        }
    }

    pub fn displaced(room: &str, r: &Reservation) -> Self {
        Notice::Displaced {
            room: room.to_string(),
            id: r.id,
            purpose: r.purpose,
            date: r.date,
            range: r.range,
            leader: r.leader.clone(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub name: String,
    pub active_reservations: usize,
    pub stored_reservations: usize,
}

/// Outcome of an accepted reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booked {
    pub id: Ulid,
    /// Position in the room's reservation list.
    pub index: usize,
    /// Reservations overridden to make room, as they were before displacement.
    pub displaced: Vec<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCell {
    pub label: String,
    pub occupant: Option<Reservation>,
}

/// One room's day laid out over a slot catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayView {
    pub room: String,
    pub date: NaiveDate,
    pub cells: Vec<SlotCell>,
}

impl DayView {
    pub fn free_labels(&self) -> impl Iterator<Item = &str> {
        self.cells
            .iter()
            .filter(|c| c.occupant.is_none())
            .map(|c| c.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn reservation(start: Minute, end: Minute) -> Reservation {
        ReservationRequest::new(date(), TimeRange::new(start, end), Purpose::Meeting, "ana")
            .into_reservation()
    }

    #[test]
    fn range_basics() {
        let r = TimeRange::new(540, 600);
        assert_eq!(r.duration(), 60);
        assert!(r.contains_instant(540));
        assert!(r.contains_instant(599));
        assert!(!r.contains_instant(600)); // half-open
        assert_eq!(r.to_string(), "09:00-10:00");
    }

    #[test]
    fn range_overlap_is_symmetric() {
        let a = TimeRange::new(540, 600);
        let b = TimeRange::new(570, 630);
        let c = TimeRange::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching endpoints
        assert!(!c.overlaps(&a));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn checked_rejects_reversed_and_overlong() {
        assert!(TimeRange::checked(600, 540).is_none());
        assert!(TimeRange::checked(600, 600).is_none());
        assert!(TimeRange::checked(0, MINUTES_PER_DAY + 1).is_none());
        assert_eq!(TimeRange::checked(1380, MINUTES_PER_DAY), Some(TimeRange::new(1380, 1440)));
    }

    #[test]
    fn purpose_priorities_rank_presentation_first() {
        let ranks: Vec<u8> = Purpose::ALL.iter().map(|p| p.priority()).collect();
        assert_eq!(ranks, vec![1, 2, 3, 5]);
    }

    #[test]
    fn purpose_from_label() {
        assert_eq!(Purpose::from_label("Study Session"), Purpose::StudySession);
        assert_eq!(Purpose::from_label("study_session"), Purpose::StudySession);
        assert_eq!(Purpose::from_label(" MEETING "), Purpose::Meeting);
        assert_eq!(Purpose::from_label("Birthday party"), Purpose::Other);
        assert_eq!(Purpose::from_label(""), Purpose::Other);
    }

    #[test]
    fn reservation_never_conflicts_with_itself() {
        let a = reservation(540, 600);
        assert!(!a.conflicts_with(&a));
        let b = reservation(570, 630);
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn inactive_or_other_date_does_not_conflict() {
        let a = reservation(540, 600);
        let mut b = reservation(540, 600);
        b.active = false;
        assert!(!a.conflicts_with(&b));
        let mut c = reservation(540, 600);
        c.date = date().succ_opt().unwrap();
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn reservation_json_shape() {
        let r = reservation(540, 600);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["date"], "2025-01-10");
        assert_eq!(json["start"], "09:00");
        assert_eq!(json["end"], "10:00");
        assert_eq!(json["purpose"], "Meeting");
        assert_eq!(json["priority"], 2);
        let back: Reservation = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn room_record_null_reservations_load_empty() {
        let rec: RoomRecord =
            serde_json::from_str(r#"{"name":"Study Room 1","reservations":null}"#).unwrap();
        assert!(rec.reservations.is_empty());
        let rec: RoomRecord = serde_json::from_str(r#"{"name":"LRE Room"}"#).unwrap();
        assert_eq!(rec.name, "LRE Room");
        assert!(rec.reservations.is_empty());
    }

    #[test]
    fn active_on_filters_date_and_flag() {
        let mut rs = RoomState::new("Conference Room".into());
        let a = reservation(540, 600);
        let mut b = reservation(600, 660);
        b.active = false;
        let mut c = reservation(660, 720);
        c.date = date().succ_opt().unwrap();
        rs.reservations = vec![a.clone(), b, c];
        let hits: Vec<_> = rs.active_on(date()).collect();
        assert_eq!(hits, vec![&a]);
        assert_eq!(rs.active_count(), 2);
        assert_eq!(rs.position(a.id), Some(0));
    }
}
