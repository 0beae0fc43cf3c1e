//! Proximity matching of candidate shifts against an in-time.

use crate::clock::{minutes_between, LocalClock};
use crate::error::AttendanceResult;
use crate::models::{ShiftCandidate, ShiftDefinition};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::cmp::Ordering;
use tracing::warn;

/// A candidate starting at most this long before the in-time is preferred.
pub const PREFERRED_WINDOW_MINUTES: f64 = 35.0;

/// The occurrence of a shift start closest to an in-time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartProximity {
    pub difference_minutes: f64,
    pub anchor_date: NaiveDate,
    pub start: DateTime<Utc>,
}

/// Distance from `in_time` to the start of `shift` on `date`.  Shifts
/// starting at or after 20:00 are also measured against the previous
/// day's start, and the nearer occurrence wins.
pub fn start_proximity(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    shift: &ShiftDefinition,
    date: NaiveDate,
) -> AttendanceResult<StartProximity> {
    let times = shift.times()?;
    let start = clock.at(date, times.start);
    let mut best = StartProximity {
        difference_minutes: minutes_between(start, in_time).abs(),
        anchor_date: date,
        start,
    };
    if times.starts_at_night() {
        let previous_date = date - Duration::days(1);
        let previous = clock.at(previous_date, times.start);
        let difference = minutes_between(previous, in_time).abs();
        if difference < best.difference_minutes {
            best = StartProximity {
                difference_minutes: difference,
                anchor_date: previous_date,
                start: previous,
            };
        }
    }
    Ok(best)
}

fn annotate(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    candidate: &ShiftCandidate,
    date: NaiveDate,
) -> Option<ShiftCandidate> {
    match start_proximity(clock, in_time, &candidate.shift, date) {
        Ok(proximity) => {
            let mut annotated = candidate.clone();
            annotated.difference_minutes = Some(proximity.difference_minutes);
            annotated.anchor_date = Some(proximity.anchor_date);
            annotated.is_start_before_log = proximity.start <= in_time;
            annotated.is_preferred = annotated.is_start_before_log
                && proximity.difference_minutes <= PREFERRED_WINDOW_MINUTES;
            Some(annotated)
        }
        Err(err) => {
            warn!(shift_id = %candidate.shift.id, error = %err, "skipping candidate with malformed times");
            None
        }
    }
}

fn difference(candidate: &ShiftCandidate) -> f64 {
    candidate.difference_minutes.unwrap_or(f64::INFINITY)
}

/// Ordering of matched candidates: roster first, then preferred, then
/// started-before-log, then nearest, then source priority.
pub fn compare_candidates(a: &ShiftCandidate, b: &ShiftCandidate) -> Ordering {
    b.is_roster()
        .cmp(&a.is_roster())
        .then_with(|| b.is_preferred.cmp(&a.is_preferred))
        .then_with(|| b.is_start_before_log.cmp(&a.is_start_before_log))
        .then_with(|| difference(a).total_cmp(&difference(b)))
        .then_with(|| a.source.cmp(&b.source))
}

/// Annotates every candidate, drops those further than `tolerance_minutes`
/// from the in-time and sorts the survivors.
pub fn match_candidates(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    candidates: &[ShiftCandidate],
    date: NaiveDate,
    tolerance_minutes: f64,
) -> Vec<ShiftCandidate> {
    let mut matched: Vec<ShiftCandidate> = candidates
        .iter()
        .filter_map(|candidate| annotate(clock, in_time, candidate, date))
        .filter(|candidate| difference(candidate) <= tolerance_minutes)
        .collect();
    matched.sort_by(compare_candidates);
    matched
}

/// The single nearest candidate, ignoring tolerance.
pub fn nearest_candidate(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    candidates: &[ShiftCandidate],
    date: NaiveDate,
) -> Option<ShiftCandidate> {
    candidates
        .iter()
        .filter_map(|candidate| annotate(clock, in_time, candidate, date))
        .min_by(|a, b| {
            difference(a)
                .total_cmp(&difference(b))
                .then_with(|| a.source.cmp(&b.source))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourcePriority;
    use crate::test_support::{at, candidate, clock, day, shift};

    #[test]
    fn test_tolerance_filters_far_candidates() {
        let candidates = vec![
            candidate(shift("GEN", "09:00", "18:00"), SourcePriority::Designation),
            candidate(shift("EVE", "14:00", "23:00"), SourcePriority::Department),
        ];
        let matched = match_candidates(&clock(), at("2024-03-01", "09:10"), &candidates, day("2024-03-01"), 180.0);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].shift.id, "GEN");
        assert_eq!(matched[0].difference_minutes, Some(10.0));
        assert!(matched[0].is_start_before_log);
        assert!(matched[0].is_preferred);
    }

    #[test]
    fn test_preferred_beats_closer_future_start() {
        let candidates = vec![
            candidate(shift("A", "09:00", "18:00"), SourcePriority::Designation),
            candidate(shift("B", "09:30", "18:30"), SourcePriority::Designation),
        ];
        // 09:20: A started 20 minutes ago, B starts in 10 minutes.
        let matched = match_candidates(&clock(), at("2024-03-01", "09:20"), &candidates, day("2024-03-01"), 180.0);
        assert_eq!(matched[0].shift.id, "A");
        assert!(!matched[1].is_start_before_log);
    }

    #[test]
    fn test_roster_always_sorts_first() {
        let candidates = vec![
            candidate(shift("A", "09:00", "18:00"), SourcePriority::Designation),
            candidate(shift("R", "10:30", "19:30"), SourcePriority::Roster),
        ];
        let matched = match_candidates(&clock(), at("2024-03-01", "09:05"), &candidates, day("2024-03-01"), 180.0);
        assert_eq!(matched[0].shift.id, "R");
        assert_eq!(matched[1].shift.id, "A");
    }

    #[test]
    fn test_night_shift_matches_previous_day_after_midnight() {
        let candidates = vec![candidate(shift("NIGHT", "22:00", "06:00"), SourcePriority::Department)];
        let matched = match_candidates(&clock(), at("2024-03-02", "00:30"), &candidates, day("2024-03-02"), 180.0);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].difference_minutes, Some(150.0));
        assert_eq!(matched[0].anchor_date, Some(day("2024-03-01")));
        assert!(matched[0].is_start_before_log);
        assert!(!matched[0].is_preferred);
    }

    #[test]
    fn test_nearest_ignores_tolerance() {
        let candidates = vec![
            candidate(shift("GEN", "09:00", "18:00"), SourcePriority::Designation),
            candidate(shift("EVE", "14:00", "23:00"), SourcePriority::Department),
        ];
        let in_time = at("2024-03-01", "13:00");
        assert!(match_candidates(&clock(), in_time, &candidates, day("2024-03-01"), 30.0).is_empty());
        let nearest = nearest_candidate(&clock(), in_time, &candidates, day("2024-03-01")).unwrap();
        assert_eq!(nearest.shift.id, "EVE");
    }

    #[test]
    fn test_malformed_candidate_is_skipped() {
        let candidates = vec![
            candidate(shift("BAD", "9am", "18:00"), SourcePriority::Designation),
            candidate(shift("GEN", "09:00", "18:00"), SourcePriority::Designation),
        ];
        let matched = match_candidates(&clock(), at("2024-03-01", "09:00"), &candidates, day("2024-03-01"), 180.0);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].shift.id, "GEN");
    }
}
