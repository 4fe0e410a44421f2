use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::model::{Minute, TimeRange, MINUTES_PER_DAY};

/// Parse a time of day. Accepts `HH:MM` (24-hour, `24:00` allowed as an end
/// bound) and `H:MM AM`/`H:MM PM`.
pub fn parse_time(input: &str) -> Result<Minute, EngineError> {
    let bad = || EngineError::InvalidTimeFormat(input.to_string());
    let trimmed = input.trim();
    let (clock, meridiem) = match trimmed.split_once(' ') {
        Some((clock, m)) => (clock, Some(m.trim())),
        None => (trimmed, None),
    };
    let (h, m) = clock.split_once(':').ok_or_else(bad)?;
    let digits = |s: &str, max_len: usize| {
        !s.is_empty() && s.len() <= max_len && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(h, 2) || m.len() != 2 || !digits(m, 2) {
        return Err(bad());
    }
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if minute >= 60 {
        return Err(bad());
    }

    let hour = match meridiem {
        None => {
            if hour > 24 || (hour == 24 && minute != 0) {
                return Err(bad());
            }
            hour
        }
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return Err(bad());
            }
            match meridiem.to_ascii_uppercase().as_str() {
                "AM" => hour % 12,
                "PM" => hour % 12 + 12,
                _ => return Err(bad()),
            }
        }
    };
    Ok(hour * 60 + minute)
}

pub fn format_time(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Parse a calendar day in `YYYY-MM-DD` form.
pub fn parse_date(input: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidDate(input.to_string()))
}

/// Parse `start`/`end` into a booking range.
pub fn parse_range(start: &str, end: &str) -> Result<TimeRange, EngineError> {
    let s = parse_time(start)?;
    let e = parse_time(end)?;
    TimeRange::checked(s, e).ok_or(EngineError::InvalidRange(TimeRange { start: s, end: e }))
}

/// Every slot start from `day_start` through `day_end` inclusive, `interval` apart.
pub fn generate_slots(
    interval_minutes: i64,
    day_start: Minute,
    day_end: Minute,
) -> Result<Vec<String>, EngineError> {
    Ok(slot_times(interval_minutes, day_start, day_end)?
        .into_iter()
        .map(format_time)
        .collect())
}

fn slot_times(
    interval_minutes: i64,
    day_start: Minute,
    day_end: Minute,
) -> Result<Vec<Minute>, EngineError> {
    if interval_minutes <= 0 {
        return Err(EngineError::InvalidInterval("interval must be positive"));
    }
    if day_start >= day_end || day_end >= MINUTES_PER_DAY {
        return Err(EngineError::InvalidInterval("day window is empty or out of range"));
    }
    let window = i64::from(day_end - day_start);
    if window % interval_minutes != 0 {
        return Err(EngineError::InvalidInterval(
            "interval does not evenly divide the day window",
        ));
    }
    Ok((day_start..=day_end)
        .step_by(interval_minutes as usize)
        .collect())
}

/// True iff the slots, sorted by time of day, are exactly `interval` apart.
/// Zero or one slot is contiguous; an unparseable label is not.
pub fn slots_are_contiguous<S: AsRef<str>>(slots: &[S], interval: Minute) -> bool {
    let mut times = Vec::with_capacity(slots.len());
    for slot in slots {
        match parse_time(slot.as_ref()) {
            Ok(t) => times.push(t),
            Err(_) => return false,
        }
    }
    if times.len() <= 1 {
        return true;
    }
    if interval == 0 {
        return false;
    }
    times.sort_unstable();
    times.windows(2).all(|w| w[1] - w[0] == interval)
}

/// The fixed grid of bookable slots used for display and selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCatalog {
    interval: Minute,
    times: Vec<Minute>,
    labels: Vec<String>,
}

impl SlotCatalog {
    pub fn generate(interval_minutes: i64, day_start: Minute, day_end: Minute) -> Result<Self, EngineError> {
        let times = slot_times(interval_minutes, day_start, day_end)?;
        let labels = times.iter().copied().map(format_time).collect();
        Ok(Self {
            interval: interval_minutes as Minute,
            times,
            labels,
        })
    }

    pub fn interval(&self) -> Minute {
        self.interval
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// `(label, start minute)` pairs in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Minute)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.times.iter().copied())
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        let t = parse_time(label).ok()?;
        self.times.binary_search(&t).ok()
    }

    /// Booking window `[first, last + interval)` for a contiguous selection.
    /// The end never runs past `24:00`.
    pub fn booking_range<S: AsRef<str>>(&self, selected: &[S]) -> Result<TimeRange, EngineError> {
        if selected.is_empty() {
            return Err(EngineError::InvalidInterval("no slots selected"));
        }
        let mut times = Vec::with_capacity(selected.len());
        for label in selected {
            let idx = self
                .index_of(label.as_ref())
                .ok_or_else(|| EngineError::InvalidTimeFormat(label.as_ref().to_string()))?;
            times.push(self.times[idx]);
        }
        if !slots_are_contiguous(selected, self.interval) {
            return Err(EngineError::InvalidInterval("selected slots are not contiguous"));
        }
        let first = times.iter().copied().min().unwrap_or_default();
        let last = times.iter().copied().max().unwrap_or_default();
        Ok(TimeRange::new(first, (last + self.interval).min(MINUTES_PER_DAY)))
    }
}

/// Serde adapter storing a [`Minute`] as `HH:MM`.
pub mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_time, parse_time};
    use crate::model::Minute;

    pub fn serialize<S: Serializer>(minute: &Minute, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_time(*minute))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Minute, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_time(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_slots_from_eight_to_eleven_pm() {
        let slots = generate_slots(60, 8 * 60, 23 * 60).unwrap();
        assert_eq!(slots.len(), 16);
        assert_eq!(slots.first().unwrap(), "08:00");
        assert_eq!(slots.last().unwrap(), "23:00");
        let times: Vec<Minute> = slots.iter().map(|s| parse_time(s).unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn full_day_hourly() {
        let slots = generate_slots(60, 0, 23 * 60).unwrap();
        assert_eq!(slots.len(), 24);
        assert_eq!(slots[0], "00:00");
    }

    #[test]
    fn half_hour_slots() {
        let slots = generate_slots(30, 9 * 60, 10 * 60).unwrap();
        assert_eq!(slots, vec!["09:00", "09:30", "10:00"]);
    }

    #[test]
    fn invalid_intervals() {
        assert!(matches!(generate_slots(0, 480, 1380), Err(EngineError::InvalidInterval(_))));
        assert!(matches!(generate_slots(-15, 480, 1380), Err(EngineError::InvalidInterval(_))));
        // 15h window is not a multiple of 40 minutes
        assert!(matches!(generate_slots(40, 480, 1380), Err(EngineError::InvalidInterval(_))));
        assert!(matches!(generate_slots(60, 600, 480), Err(EngineError::InvalidInterval(_))));
        assert!(matches!(generate_slots(60, 0, MINUTES_PER_DAY), Err(EngineError::InvalidInterval(_))));
    }

    #[test]
    fn parse_twenty_four_hour() {
        assert_eq!(parse_time("00:00").unwrap(), 0);
        assert_eq!(parse_time("09:30").unwrap(), 570);
        assert_eq!(parse_time("9:30").unwrap(), 570);
        assert_eq!(parse_time("23:59").unwrap(), 1439);
        assert_eq!(parse_time("24:00").unwrap(), 1440);
    }

    #[test]
    fn parse_twelve_hour() {
        assert_eq!(parse_time("8:00 AM").unwrap(), 480);
        assert_eq!(parse_time("12:00 AM").unwrap(), 0);
        assert_eq!(parse_time("12:30 PM").unwrap(), 750);
        assert_eq!(parse_time("3:04 PM").unwrap(), 15 * 60 + 4);
        assert_eq!(parse_time("11:00 pm").unwrap(), 1380);
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in ["", "9", "9:5", "25:00", "24:01", "10:60", "13:00 PM", "0:30 AM", "ab:cd", "+9:00", "9:00 XM"] {
            assert!(
                matches!(parse_time(s), Err(EngineError::InvalidTimeFormat(_))),
                "{s:?} should be rejected"
            );
        }
    }

    #[test]
    fn format_pads() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(545), "09:05");
        assert_eq!(format_time(1440), "24:00");
    }

    #[test]
    fn parse_date_normalizes() {
        let d = parse_date("2025-01-10").unwrap();
        assert_eq!(d.to_string(), "2025-01-10");
        assert!(matches!(parse_date("10/01/2025"), Err(EngineError::InvalidDate(_))));
        assert!(matches!(parse_date("2025-02-30"), Err(EngineError::InvalidDate(_))));
    }

    #[test]
    fn parse_range_rejects_reversed() {
        assert_eq!(parse_range("09:00", "10:30").unwrap(), TimeRange::new(540, 630));
        assert!(matches!(parse_range("10:00", "09:00"), Err(EngineError::InvalidRange(_))));
        assert!(matches!(parse_range("10:00", "10:00"), Err(EngineError::InvalidRange(_))));
    }

    #[test]
    fn contiguity() {
        assert!(slots_are_contiguous::<&str>(&[], 60));
        assert!(slots_are_contiguous(&["10:00"], 60));
        assert!(slots_are_contiguous(&["10:00", "09:00", "11:00"], 60)); // order-insensitive
        assert!(!slots_are_contiguous(&["09:00", "11:00"], 60));
        assert!(!slots_are_contiguous(&["09:00", "09:00"], 60));
        assert!(!slots_are_contiguous(&["09:00", "nope"], 60));
        assert!(slots_are_contiguous(&["9:00 AM", "10:00"], 60));
    }

    #[test]
    fn catalog_index_of() {
        let catalog = SlotCatalog::generate(60, 480, 1380).unwrap();
        assert_eq!(catalog.len(), 16);
        assert_eq!(catalog.index_of("08:00"), Some(0));
        assert_eq!(catalog.index_of("1:00 PM"), Some(5));
        assert_eq!(catalog.index_of("23:00"), Some(15));
        assert_eq!(catalog.index_of("07:00"), None);
        assert_eq!(catalog.index_of("08:30"), None);
        assert_eq!(catalog.index_of("garbage"), None);
    }

    #[test]
    fn catalog_booking_range() {
        let catalog = SlotCatalog::generate(60, 480, 1380).unwrap();
        let range = catalog.booking_range(&["10:00", "09:00"]).unwrap();
        assert_eq!(range, TimeRange::new(540, 660));
        let last = catalog.booking_range(&["23:00"]).unwrap();
        assert_eq!(last, TimeRange::new(1380, 1440));
        assert!(matches!(
            catalog.booking_range(&["09:00", "11:00"]),
            Err(EngineError::InvalidInterval(_))
        ));
        assert!(matches!(
            catalog.booking_range(&["09:30"]),
            Err(EngineError::InvalidTimeFormat(_))
        ));
        assert!(matches!(
            catalog.booking_range::<&str>(&[]),
            Err(EngineError::InvalidInterval(_))
        ));
    }

    #[test]
    fn booking_range_stops_at_midnight() {
        let catalog = SlotCatalog::generate(120, 60, 1380).unwrap();
        assert_eq!(catalog.booking_range(&["23:00"]).unwrap(), TimeRange::new(1380, 1440));
        assert_eq!(
            catalog.booking_range(&["21:00", "23:00"]).unwrap(),
            TimeRange::new(1260, 1440)
        );
    }
}
