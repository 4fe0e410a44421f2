use chrono::{NaiveDateTime, Timelike};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn minute_of(t: NaiveDateTime) -> Minute {
    t.hour() * 60 + t.minute()
}

/// What the resolver decided for a candidate reservation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Nothing active overlaps.
    Accept,
    /// Everything overlapping is strictly weaker; these indices get displaced.
    Override(Vec<usize>),
    /// An overlapping reservation has equal or better priority.
    Reject(Ulid),
}

/// Decide a candidate against a room's stored reservations.
///
/// Pure: the caller holds the room's lock and applies the outcome. The
/// candidate's own entry (same id) is ignored, as are inactive entries and
/// other dates. Ties reject.
pub(crate) fn resolve(existing: &[Reservation], candidate: &Reservation) -> Resolution {
    let mut displaced = Vec::new();
    for (idx, r) in existing.iter().enumerate() {
        if !r.active
            || r.id == candidate.id
            || r.date != candidate.date
            || !r.range.overlaps(&candidate.range)
        {
            continue;
        }
        if r.priority <= candidate.priority {
            return Resolution::Reject(r.id);
        }
        displaced.push(idx);
    }
    if displaced.is_empty() {
        Resolution::Accept
    } else {
        Resolution::Override(displaced)
    }
}

/// Index pairs `(i, j)`, `i < j`, of active reservations that overlap on
/// the same date.
pub(crate) fn overlapping_pairs(reservations: &[Reservation]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, a) in reservations.iter().enumerate() {
        for (j, b) in reservations.iter().enumerate().skip(i + 1) {
            if a.conflicts_with(b) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

pub(crate) fn validate_request(req: &ReservationRequest) -> Result<(), EngineError> {
    if req.range.start >= req.range.end || req.range.end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidRange(req.range));
    }
    if req.leader.trim().is_empty() {
        return Err(EngineError::InvalidInput("leader name must not be empty"));
    }
    if req.leader.len() > MAX_TEXT_LEN || req.info.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

/// True once the reservation's end has passed at `now`.
pub(crate) fn is_expired(r: &Reservation, now: NaiveDateTime) -> bool {
    let today = now.date();
    r.date < today || (r.date == today && r.range.end <= minute_of(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn res(start: Minute, end: Minute, purpose: Purpose) -> Reservation {
        ReservationRequest::new(date(), TimeRange::new(start, end), purpose, "x").into_reservation()
    }

    #[test]
    fn empty_room_accepts() {
        assert_eq!(resolve(&[], &res(540, 600, Purpose::Other)), Resolution::Accept);
    }

    #[test]
    fn touching_endpoints_accept() {
        let existing = vec![res(540, 600, Purpose::Presentation)];
        assert_eq!(resolve(&existing, &res(600, 660, Purpose::Other)), Resolution::Accept);
        assert_eq!(resolve(&existing, &res(480, 540, Purpose::Other)), Resolution::Accept);
    }

    #[test]
    fn stronger_candidate_overrides() {
        // priority 3 existing, priority 2 candidate
        let existing = vec![res(540, 600, Purpose::StudySession)];
        let candidate = res(570, 630, Purpose::Meeting);
        assert_eq!(resolve(&existing, &candidate), Resolution::Override(vec![0]));
    }

    #[test]
    fn weaker_candidate_rejected() {
        let existing = vec![res(540, 600, Purpose::StudySession)];
        let candidate = res(570, 630, Purpose::Other);
        assert_eq!(resolve(&existing, &candidate), Resolution::Reject(existing[0].id));
    }

    #[test]
    fn equal_priority_rejected() {
        let existing = vec![res(540, 600, Purpose::Meeting)];
        let candidate = res(540, 600, Purpose::Meeting);
        assert_eq!(resolve(&existing, &candidate), Resolution::Reject(existing[0].id));
    }

    #[test]
    fn override_collects_every_weaker_overlap() {
        let existing = vec![
            res(480, 540, Purpose::Other),        // before, untouched
            res(540, 600, Purpose::StudySession), // overlaps
            res(600, 660, Purpose::Other),        // overlaps
            res(660, 720, Purpose::Meeting),      // after, untouched
        ];
        let candidate = res(550, 660, Purpose::Presentation);
        assert_eq!(resolve(&existing, &candidate), Resolution::Override(vec![1, 2]));
    }

    #[test]
    fn any_stronger_overlap_rejects_whole_request() {
        let existing = vec![
            res(540, 600, Purpose::Other),
            res(600, 660, Purpose::Presentation),
        ];
        let candidate = res(540, 660, Purpose::Meeting);
        assert_eq!(resolve(&existing, &candidate), Resolution::Reject(existing[1].id));
    }

    #[test]
    fn inactive_and_other_dates_ignored() {
        let mut inactive = res(540, 600, Purpose::Presentation);
        inactive.active = false;
        let mut other_day = res(540, 600, Purpose::Presentation);
        other_day.date = date().succ_opt().unwrap();
        let existing = vec![inactive, other_day];
        assert_eq!(resolve(&existing, &res(540, 600, Purpose::Other)), Resolution::Accept);
    }

    #[test]
    fn candidate_never_conflicts_with_itself() {
        let mut stored = res(540, 600, Purpose::Other);
        let existing = vec![stored.clone()];
        assert_eq!(resolve(&existing, &stored), Resolution::Accept);
        stored.active = false;
        assert_eq!(resolve(&[stored.clone()], &stored), Resolution::Accept);
    }

    #[test]
    fn validate_rejects_bad_requests() {
        let ok = ReservationRequest::new(date(), TimeRange::new(540, 600), Purpose::Meeting, "ana");
        assert!(validate_request(&ok).is_ok());

        let mut reversed = ok.clone();
        reversed.range = TimeRange { start: 600, end: 540 };
        assert!(matches!(validate_request(&reversed), Err(EngineError::InvalidRange(_))));

        let mut nameless = ok.clone();
        nameless.leader = "  ".into();
        assert!(matches!(validate_request(&nameless), Err(EngineError::InvalidInput(_))));

        let long = ok.with_info("x".repeat(MAX_TEXT_LEN + 1));
        assert!(matches!(validate_request(&long), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn expiry_uses_end_of_range() {
        let r = res(540, 600, Purpose::Meeting);
        let at = |h: u32, m: u32| date().and_hms_opt(h, m, 0).unwrap();
        assert!(!is_expired(&r, at(9, 59)));
        assert!(is_expired(&r, at(10, 0)));
        let yesterday = date().pred_opt().unwrap().and_hms_opt(23, 0, 0).unwrap();
        assert!(!is_expired(&r, yesterday));
        let tomorrow = date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(is_expired(&r, tomorrow));
    }

    #[test]
    fn overlapping_pairs_reports_only_active_same_date_overlaps() {
        let a = res(540, 600, Purpose::Meeting);
        let b = res(570, 630, Purpose::Other);
        let mut c = res(540, 600, Purpose::Other);
        c.active = false;
        let mut d = res(540, 600, Purpose::Other);
        d.date = date().succ_opt().unwrap();
        let e = res(600, 660, Purpose::Other);
        assert_eq!(overlapping_pairs(&[a, b, c, d, e]), vec![(0, 1), (1, 4)]);
    }
}
