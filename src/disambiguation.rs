//! Choosing one shift among several matched candidates.
//!
//! Detection never writes anything.  It returns a [`Detection`] and the
//! orchestrator decides what to persist: the assignment, a roster
//! deviation, or a confused-shift record for manual review.

use crate::clock::{circular_minutes, minute_of_day, minutes_between, LocalClock};
use crate::matcher::start_proximity;
use crate::models::{MatchMethod, ShiftCandidate};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

/// A roster shift ending this close to the actual out-time is taken
/// without scoring.
pub const ROSTER_FAST_PATH_MINUTES: f64 = 90.0;
const IN_TIME_WEIGHT: f64 = 0.6;
const OUT_TIME_WEIGHT: f64 = 0.4;
/// Multiplier applied to the roster candidate's score.
const ROSTER_SCORE_BOOST: f64 = 0.3;
const TIGHT_FIT_MINUTES: f64 = 30.0;
const TIGHT_MARGIN: f64 = 15.0;
const LOOSE_MARGIN: f64 = 30.0;
/// Half-width of the band around the midpoint of two shift starts in
/// which an arrival is considered ambiguous.
pub const SYMMETRY_BAND_MINUTES: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Detection {
    Assigned {
        candidate: ShiftCandidate,
        method: MatchMethod,
    },
    Ambiguous {
        candidates: Vec<ShiftCandidate>,
    },
    Failed {
        reason: String,
    },
}

fn anchor(candidate: &ShiftCandidate, date: NaiveDate) -> NaiveDate {
    candidate.anchor_date.unwrap_or(date)
}

fn in_time_difference(
    clock: &LocalClock,
    candidate: &ShiftCandidate,
    in_time: DateTime<Utc>,
    date: NaiveDate,
) -> Option<f64> {
    match candidate.difference_minutes {
        Some(difference) => Some(difference),
        None => start_proximity(clock, in_time, &candidate.shift, date)
            .ok()
            .map(|p| p.difference_minutes),
    }
}

/// Distance between the out-time and the candidate's shift end.
fn out_time_difference(
    clock: &LocalClock,
    candidate: &ShiftCandidate,
    out_time: DateTime<Utc>,
    date: NaiveDate,
) -> Option<f64> {
    clock
        .shift_window(&candidate.shift, anchor(candidate, date))
        .ok()
        .map(|window| minutes_between(window.end, out_time).abs())
}

#[derive(Debug)]
struct Scored<'a> {
    candidate: &'a ShiftCandidate,
    score: f64,
    out_difference: f64,
}

/// Weighted in/out fit.  The best score wins only when it beats the
/// runner-up by a margin that tightens when its own out-time fit is good.
fn resolve_by_out_time(
    clock: &LocalClock,
    candidates: &[ShiftCandidate],
    in_time: DateTime<Utc>,
    out_time: DateTime<Utc>,
    date: NaiveDate,
) -> Option<ShiftCandidate> {
    let mut scored: Vec<Scored<'_>> = candidates
        .iter()
        .filter_map(|candidate| {
            let in_difference = in_time_difference(clock, candidate, in_time, date)?;
            let out_difference = out_time_difference(clock, candidate, out_time, date)?;
            let mut score = IN_TIME_WEIGHT * in_difference + OUT_TIME_WEIGHT * out_difference;
            if candidate.is_roster() {
                score *= ROSTER_SCORE_BOOST;
            }
            Some(Scored {
                candidate,
                score,
                out_difference,
            })
        })
        .collect();
    scored.sort_by(|a, b| a.score.total_cmp(&b.score));

    match scored.as_slice() {
        [] => None,
        [only] => Some(only.candidate.clone()),
        [best, runner_up, ..] => {
            let margin = if best.out_difference < TIGHT_FIT_MINUTES {
                TIGHT_MARGIN
            } else {
                LOOSE_MARGIN
            };
            debug!(
                best = %best.candidate.shift.id,
                best_score = best.score,
                runner_up = %runner_up.candidate.shift.id,
                runner_up_score = runner_up.score,
                margin,
                "out-time scoring"
            );
            if runner_up.score - best.score > margin {
                Some(best.candidate.clone())
            } else {
                None
            }
        }
    }
}

/// Whether the arrival sits close to the midpoint between the two
/// nearest candidate starts.  Starts more than twelve hours apart are
/// compared across midnight.
pub fn is_ambiguous_arrival(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    candidates: &[ShiftCandidate],
) -> bool {
    let mut starts: Vec<(f64, f64)> = candidates
        .iter()
        .filter_map(|candidate| {
            let times = candidate.shift.times().ok()?;
            Some((
                candidate.difference_minutes.unwrap_or(f64::INFINITY),
                minute_of_day(times.start) as f64,
            ))
        })
        .collect();
    starts.sort_by(|a, b| a.0.total_cmp(&b.0));
    let [(_, first), (_, second), ..] = starts.as_slice() else {
        return false;
    };

    let arrival = clock.minute_of_day(in_time) as f64;
    let mut midpoint = (first + second) / 2.0;
    if (first - second).abs() > 720.0 {
        midpoint = (midpoint + 720.0).rem_euclid(1440.0);
    }
    circular_minutes(arrival, midpoint) <= SYMMETRY_BAND_MINUTES
}

/// The candidate whose start is nearest the in-time.  Ties keep the
/// matcher's order, so a roster shift wins an exact tie.
fn closest<'a>(
    clock: &LocalClock,
    candidates: &'a [ShiftCandidate],
    in_time: DateTime<Utc>,
    date: NaiveDate,
) -> &'a ShiftCandidate {
    let distance = |c: &ShiftCandidate| {
        in_time_difference(clock, c, in_time, date).unwrap_or(f64::INFINITY)
    };
    candidates
        .iter()
        .fold(&candidates[0], |best, c| {
            if distance(c) < distance(best) {
                c
            } else {
                best
            }
        })
}

fn same_start(candidates: &[ShiftCandidate]) -> bool {
    let mut starts = candidates.iter().map(|c| c.shift.times().map(|t| t.start).ok());
    match starts.next() {
        Some(Some(first)) => starts.all(|start| start == Some(first)),
        _ => false,
    }
}

/// Picks one shift for a punch pair from candidates already filtered and
/// ordered by the proximity matcher.
pub fn detect_shift(
    clock: &LocalClock,
    candidates: &[ShiftCandidate],
    in_time: DateTime<Utc>,
    out_time: Option<DateTime<Utc>>,
    date: NaiveDate,
) -> Detection {
    match candidates {
        [] => {
            return Detection::Failed {
                reason: "no candidate shifts".to_string(),
            }
        }
        [only] => {
            return Detection::Assigned {
                candidate: only.clone(),
                method: MatchMethod::Single,
            }
        }
        _ => {}
    }

    if same_start(candidates) {
        let roster = candidates.iter().find(|c| c.is_roster());
        let Some(out_time) = out_time else {
            return match roster {
                Some(roster) => Detection::Assigned {
                    candidate: roster.clone(),
                    method: MatchMethod::RosterBlind,
                },
                None => Detection::Ambiguous {
                    candidates: candidates.to_vec(),
                },
            };
        };
        if let Some(roster) = roster {
            let fits = out_time_difference(clock, roster, out_time, date)
                .is_some_and(|difference| difference <= ROSTER_FAST_PATH_MINUTES);
            if fits {
                return Detection::Assigned {
                    candidate: roster.clone(),
                    method: MatchMethod::RosterOverride,
                };
            }
        }
        return match resolve_by_out_time(clock, candidates, in_time, out_time, date) {
            Some(candidate) => Detection::Assigned {
                candidate,
                method: MatchMethod::OutTimeScore,
            },
            None => Detection::Ambiguous {
                candidates: candidates.to_vec(),
            },
        };
    }

    if !is_ambiguous_arrival(clock, in_time, candidates) {
        return Detection::Assigned {
            candidate: closest(clock, candidates, in_time, date).clone(),
            method: MatchMethod::ProximityClosest,
        };
    }

    let resolved = out_time
        .and_then(|out_time| resolve_by_out_time(clock, candidates, in_time, out_time, date));
    match resolved {
        Some(candidate) => Detection::Assigned {
            candidate,
            method: MatchMethod::OutTimeScore,
        },
        None => Detection::Ambiguous {
            candidates: candidates.to_vec(),
        },
    }
}
