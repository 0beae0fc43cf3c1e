//! Multi-shift segmentation of one day's punches.
//!
//! The segmenter walks the chronological IN punches of the attendance
//! date and turns each qualifying one into a [`ShiftSegment`].  State
//! (`block_until` and the segments produced so far) lives in an explicit
//! accumulator folded over the punch list, so running it twice on the
//! same inputs gives the same segments.
//!
//! Nothing here writes to a store.  Assignments that should be written
//! back to the roster and punch pairs needing manual review are returned
//! in the [`Segmentation`] for the orchestrator to persist.

use crate::clock::{hours_between, overlap_hours, round2, LocalClock, ShiftWindow};
use crate::config::GraceOverrides;
use crate::disambiguation::{detect_shift, Detection};
use crate::error::AttendanceError;
use crate::lateness::punctuality;
use crate::matcher::{match_candidates, nearest_candidate, start_proximity};
use crate::models::{
    ConfusedShiftRecord, ConfusedStatus, Direction, MatchMethod, OnDutyInterval, PunchEvent,
    SegmentStatus, ShiftCandidate, ShiftId, ShiftSegment,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const MAX_SEGMENTS_PER_DAY: usize = 3;
/// Punch pairs longer than this are checked for two back-to-back shifts.
pub const LONG_PUNCH_HOURS: f64 = 14.0;
pub const LONG_PUNCH_MATCH_MINUTES: f64 = 60.0;
pub const DEFAULT_EXPECTED_HOURS: f64 = 8.0;
pub const PRESENT_RATIO: f64 = 0.9;
pub const HALF_DAY_RATIO: f64 = 0.45;
/// Extra hours beyond this point to a date or timezone mismatch.
pub const MAX_EXTRA_HOURS: f64 = 16.0;
const OUT_SEARCH_HOURS: i64 = 24;
const UNASSIGNED_BLOCK_HOURS: i64 = 1;

/// Read-only inputs for one (employee, date) run.
#[derive(Debug, Clone)]
pub struct DayContext<'a> {
    pub employee_id: &'a str,
    pub date: NaiveDate,
    pub clock: &'a LocalClock,
    /// Output of the candidate resolver for this employee and date.
    pub candidates: &'a [ShiftCandidate],
    pub on_duty: &'a [OnDutyInterval],
    /// Existing confused-shift records of the day.
    pub confused: &'a [ConfusedShiftRecord],
    pub overrides: GraceOverrides,
    pub tolerance_minutes: f64,
}

/// A shift picked for a segment, to be written back to the roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentAssignment {
    pub shift_number: u8,
    pub shift_id: ShiftId,
    pub method: MatchMethod,
}

#[derive(Debug, Default)]
pub struct Segmentation {
    pub segments: Vec<ShiftSegment>,
    pub assignments: Vec<SegmentAssignment>,
    /// Pending records for punch pairs that could not be assigned.
    pub confusions: Vec<ConfusedShiftRecord>,
    /// Non-fatal problems met along the way.
    pub errors: Vec<AttendanceError>,
}

/// Sorts punches chronologically and drops duplicates at the same instant.
pub fn normalize_punches(punches: &[PunchEvent]) -> Vec<PunchEvent> {
    let mut sorted = punches.to_vec();
    sorted.sort_by(|a, b| {
        a.instant
            .cmp(&b.instant)
            .then_with(|| a.direction.cmp(&b.direction))
    });
    sorted.dedup_by(|later, earlier| {
        later.employee_id == earlier.employee_id && later.instant == earlier.instant
    });
    sorted
}

struct Assignment {
    candidate: ShiftCandidate,
    method: MatchMethod,
    window: Option<ShiftWindow>,
}

impl Assignment {
    fn anchor(&self, date: NaiveDate) -> NaiveDate {
        self.candidate.anchor_date.unwrap_or(date)
    }
}

#[derive(Default)]
struct SegmenterState {
    block_until: Option<DateTime<Utc>>,
    out: Segmentation,
}

impl SegmenterState {
    fn next_number(&self) -> u8 {
        // Bounded by MAX_SEGMENTS_PER_DAY.
        (self.out.segments.len() + 1) as u8
    }

    fn remaining(&self) -> usize {
        MAX_SEGMENTS_PER_DAY.saturating_sub(self.out.segments.len())
    }

    fn step(mut self, ctx: &DayContext<'_>, punches: &[PunchEvent], in_time: DateTime<Utc>) -> Self {
        if self.remaining() == 0 {
            return self;
        }
        if self.block_until.is_some_and(|block| in_time < block) {
            debug!(employee_id = %ctx.employee_id, %in_time, "in-punch inside an assigned shift window, skipped");
            return self;
        }

        let out_time = find_out(punches, in_time);

        if let Some(out) = out_time {
            if hours_between(in_time, out) > LONG_PUNCH_HOURS && self.remaining() >= 2 {
                if let Some((first, second)) = long_punch_split(ctx, in_time, out) {
                    info!(
                        employee_id = %ctx.employee_id,
                        date = %ctx.date,
                        first = %first.candidate.shift.id,
                        second = %second.candidate.shift.id,
                        "splitting long punch into two shifts"
                    );
                    self.push_split(ctx, in_time, out, first, second);
                    return self;
                }
            }
        }

        let assignment = self.detect(ctx, in_time, out_time);
        let window_end = assignment
            .as_ref()
            .and_then(|a| a.window)
            .map(|w| w.end)
            .unwrap_or(in_time + Duration::hours(UNASSIGNED_BLOCK_HOURS));
        self.push_segment(ctx, in_time, out_time, assignment, true, true);
        self.block_until = Some(covering(window_end, out_time));
        self
    }

    /// Runs manual resolution, matching and disambiguation for one pair.
    fn detect(
        &mut self,
        ctx: &DayContext<'_>,
        in_time: DateTime<Utc>,
        out_time: Option<DateTime<Utc>>,
    ) -> Option<Assignment> {
        if let Some(record) = ctx.confused.iter().find(|r| r.in_time == in_time) {
            if record.is_pending() {
                if record.out_time == out_time {
                    debug!(employee_id = %ctx.employee_id, %in_time, "punch pair awaiting manual resolution");
                    self.out.confusions.push(record.clone());
                    return None;
                }
                // The pair gained or changed its OUT since the record was
                // raised; detect again and let the result supersede it.
                debug!(employee_id = %ctx.employee_id, %in_time, "punch pair changed, re-running detection");
            } else if let Some(candidate) = manual_candidate(ctx, record, in_time) {
                return Some(self.with_window(ctx, candidate, MatchMethod::Manual));
            }
        }

        let mut matched = match_candidates(
            ctx.clock,
            in_time,
            ctx.candidates,
            ctx.date,
            ctx.tolerance_minutes,
        );
        let mut fallback = false;
        if matched.is_empty() {
            if let Some(nearest) = nearest_candidate(ctx.clock, in_time, ctx.candidates, ctx.date) {
                debug!(employee_id = %ctx.employee_id, shift_id = %nearest.shift.id, "no candidate within tolerance, using nearest");
                matched.push(nearest);
                fallback = true;
            }
        }

        match detect_shift(ctx.clock, &matched, in_time, out_time, ctx.date) {
            Detection::Assigned { candidate, method } => {
                let method = if fallback {
                    MatchMethod::NearestFallback
                } else {
                    method
                };
                Some(self.with_window(ctx, candidate, method))
            }
            Detection::Ambiguous { candidates } => {
                info!(
                    employee_id = %ctx.employee_id,
                    date = %ctx.date,
                    %in_time,
                    candidates = candidates.len(),
                    "ambiguous shift match queued for review"
                );
                self.out.confusions.push(ConfusedShiftRecord {
                    employee_id: ctx.employee_id.to_string(),
                    date: ctx.date,
                    in_time,
                    out_time,
                    candidates,
                    status: ConfusedStatus::Pending,
                    resolved_shift_id: None,
                });
                None
            }
            Detection::Failed { reason } => {
                warn!(employee_id = %ctx.employee_id, %in_time, %reason, "shift detection failed");
                None
            }
        }
    }

    fn with_window(
        &mut self,
        ctx: &DayContext<'_>,
        candidate: ShiftCandidate,
        method: MatchMethod,
    ) -> Assignment {
        let anchor = candidate.anchor_date.unwrap_or(ctx.date);
        let window = match ctx.clock.shift_window(&candidate.shift, anchor) {
            Ok(window) => Some(window),
            Err(err) => {
                warn!(shift_id = %candidate.shift.id, error = %err, "cannot place shift window");
                self.out.errors.push(err);
                None
            }
        };
        Assignment {
            candidate,
            method,
            window,
        }
    }

    fn push_split(
        &mut self,
        ctx: &DayContext<'_>,
        in_time: DateTime<Utc>,
        out_time: DateTime<Utc>,
        first: Assignment,
        second: Assignment,
    ) {
        let boundary = first.window.map(|w| w.end).unwrap_or(in_time);
        let block_until = covering(second.window.map(|w| w.end).unwrap_or(out_time), Some(out_time));
        self.push_segment(ctx, in_time, Some(boundary), Some(first), true, false);
        self.push_segment(ctx, boundary, Some(out_time), Some(second), false, true);
        self.block_until = Some(block_until);
    }

    fn push_segment(
        &mut self,
        ctx: &DayContext<'_>,
        in_time: DateTime<Utc>,
        out_time: Option<DateTime<Utc>>,
        assignment: Option<Assignment>,
        with_late: bool,
        with_early: bool,
    ) {
        let shift_number = self.next_number();
        if let Some(assignment) = &assignment {
            self.out.assignments.push(SegmentAssignment {
                shift_number,
                shift_id: assignment.candidate.shift.id.clone(),
                method: assignment.method,
            });
        }
        let (segment, error) = build_segment(
            ctx,
            shift_number,
            in_time,
            out_time,
            assignment.as_ref(),
            with_late,
            with_early,
        );
        if let Some(err) = error {
            self.out.errors.push(err);
        }
        self.out.segments.push(segment);
    }
}

fn manual_candidate(
    ctx: &DayContext<'_>,
    record: &ConfusedShiftRecord,
    in_time: DateTime<Utc>,
) -> Option<ShiftCandidate> {
    let shift_id = record.resolved_shift_id.as_ref()?;
    let mut candidate = record
        .candidates
        .iter()
        .chain(ctx.candidates.iter())
        .find(|c| &c.shift.id == shift_id)
        .cloned();
    if candidate.is_none() {
        warn!(employee_id = %ctx.employee_id, shift_id = %shift_id, "manually chosen shift is not a candidate");
    }
    if let Some(candidate) = candidate.as_mut() {
        match start_proximity(ctx.clock, in_time, &candidate.shift, ctx.date) {
            Ok(proximity) => {
                candidate.difference_minutes = Some(proximity.difference_minutes);
                candidate.anchor_date = Some(proximity.anchor_date);
            }
            Err(err) => warn!(shift_id = %shift_id, error = %err, "manually chosen shift has malformed times"),
        }
    }
    candidate
}

/// Later of a shift window end and the segment's own OUT, so no later
/// IN can open a segment overlapping this one.
fn covering(window_end: DateTime<Utc>, out_time: Option<DateTime<Utc>>) -> DateTime<Utc> {
    out_time.map_or(window_end, |out| window_end.max(out))
}

/// First OUT after `in_time` within 24 hours.
fn find_out(punches: &[PunchEvent], in_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let limit = in_time + Duration::hours(OUT_SEARCH_HOURS);
    punches
        .iter()
        .filter(|p| p.direction == Direction::Out)
        .map(|p| p.instant)
        .find(|&instant| instant > in_time && instant <= limit)
}

/// Finds an organisational shift starting near the in-time and a second
/// one starting near the end of the first.
fn long_punch_split(
    ctx: &DayContext<'_>,
    in_time: DateTime<Utc>,
    out_time: DateTime<Utc>,
) -> Option<(Assignment, Assignment)> {
    let nearest_start = |at: DateTime<Utc>, date: NaiveDate, exclude: Option<&str>| {
        ctx.candidates
            .iter()
            .filter(|c| Some(c.shift.id.as_str()) != exclude)
            .filter_map(|c| {
                let proximity = start_proximity(ctx.clock, at, &c.shift, date).ok()?;
                let window = ctx.clock.shift_window(&c.shift, proximity.anchor_date).ok()?;
                (proximity.difference_minutes <= LONG_PUNCH_MATCH_MINUTES).then(|| {
                    let mut candidate = c.clone();
                    candidate.difference_minutes = Some(proximity.difference_minutes);
                    candidate.anchor_date = Some(proximity.anchor_date);
                    (proximity.difference_minutes, candidate, window)
                })
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.source.cmp(&b.1.source)))
    };

    let (_, first, first_window) = nearest_start(in_time, ctx.date, None)?;
    if first_window.end <= in_time || first_window.end >= out_time {
        return None;
    }
    let (_, second, second_window) = nearest_start(
        first_window.end,
        ctx.clock.local_date(first_window.end),
        Some(first.shift.id.as_str()),
    )?;
    Some((
        Assignment {
            candidate: first,
            method: MatchMethod::LongPunchSplit,
            window: Some(first_window),
        },
        Assignment {
            candidate: second,
            method: MatchMethod::LongPunchSplit,
            window: Some(second_window),
        },
    ))
}

/// Hours of approved on-duty time inside the shift window that the
/// punches themselves do not already cover.
fn on_duty_fill(
    window: &ShiftWindow,
    in_time: DateTime<Utc>,
    out_time: Option<DateTime<Utc>>,
    on_duty: &[OnDutyInterval],
) -> f64 {
    on_duty
        .iter()
        .filter(|od| od.hour_based)
        .map(|od| {
            let start = od.from.max(window.start);
            let end = od.to.min(window.end);
            if end <= start {
                return 0.0;
            }
            let covered = out_time
                .map(|out| overlap_hours(start, end, in_time, out))
                .unwrap_or(0.0);
            (hours_between(start, end) - covered).max(0.0)
        })
        .sum()
}

fn covers(on_duty: &[OnDutyInterval], from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    on_duty
        .iter()
        .any(|od| od.hour_based && od.from <= from && od.to >= to)
}

/// Computes hours, punctuality and status for one segment.
fn build_segment(
    ctx: &DayContext<'_>,
    shift_number: u8,
    in_time: DateTime<Utc>,
    out_time: Option<DateTime<Utc>>,
    assignment: Option<&Assignment>,
    with_late: bool,
    with_early: bool,
) -> (ShiftSegment, Option<AttendanceError>) {
    let punch_hours = out_time
        .map(|out| hours_between(in_time, out).max(0.0))
        .unwrap_or(0.0);

    let mut segment = ShiftSegment {
        shift_number,
        in_time,
        out_time,
        shift_id: None,
        shift_name: None,
        match_method: None,
        late_in_minutes: None,
        early_out_minutes: None,
        is_late: false,
        is_early_out: false,
        punch_hours: round2(punch_hours),
        od_hours: 0.0,
        working_hours: round2(punch_hours),
        extra_hours: 0.0,
        ot_hours: 0.0,
        expected_hours: 0.0,
        payable_fraction: 0.0,
        status: SegmentStatus::Incomplete,
    };

    let Some(assignment) = assignment else {
        return (segment, None);
    };
    let shift = &assignment.candidate.shift;
    segment.shift_id = Some(shift.id.clone());
    segment.shift_name = Some(shift.name.clone());
    segment.match_method = Some(assignment.method);

    let anchor = assignment.anchor(ctx.date);
    let mut error = None;
    match punctuality(ctx.clock, shift, anchor, in_time, out_time, &ctx.overrides) {
        Ok(result) => {
            segment.late_in_minutes = Some(if with_late { result.late_in_minutes } else { 0.0 });
            segment.early_out_minutes = if with_early {
                result.early_out_minutes
            } else {
                out_time.map(|_| 0.0)
            };
        }
        Err(err) => {
            warn!(shift_id = %shift.id, error = %err, "lateness not computed");
            error = Some(err);
        }
    }

    let od_hours = assignment
        .window
        .map(|window| on_duty_fill(&window, in_time, out_time, ctx.on_duty))
        .unwrap_or(0.0);
    if let Some(window) = assignment.window {
        if segment.late_in_minutes.is_some_and(|late| late > 0.0) && covers(ctx.on_duty, window.start, in_time) {
            debug!(shift_id = %shift.id, "late arrival covered by on-duty");
            segment.late_in_minutes = Some(0.0);
        }
        if let Some(out) = out_time {
            if segment.early_out_minutes.is_some_and(|early| early > 0.0) && covers(ctx.on_duty, out, window.end) {
                debug!(shift_id = %shift.id, "early departure covered by on-duty");
                segment.early_out_minutes = Some(0.0);
            }
        }
    }
    segment.is_late = segment.late_in_minutes.is_some_and(|late| late > 0.0);
    segment.is_early_out = segment.early_out_minutes.is_some_and(|early| early > 0.0);

    let working_hours = round2(punch_hours + od_hours);
    let expected_hours = shift.expected_hours.unwrap_or(DEFAULT_EXPECTED_HOURS);
    let mut extra_hours = round2((working_hours - expected_hours).max(0.0));
    if extra_hours > MAX_EXTRA_HOURS {
        warn!(
            employee_id = %ctx.employee_id,
            date = %ctx.date,
            extra_hours,
            "discarding implausible extra hours"
        );
        extra_hours = 0.0;
    }

    segment.od_hours = round2(od_hours);
    segment.working_hours = working_hours;
    segment.expected_hours = round2(expected_hours);
    segment.extra_hours = extra_hours;

    let (status, payable) = if out_time.is_none() && od_hours <= 0.0 {
        (SegmentStatus::Incomplete, 0.0)
    } else if working_hours >= PRESENT_RATIO * expected_hours {
        (SegmentStatus::Present, shift.payable_value)
    } else if working_hours >= HALF_DAY_RATIO * expected_hours {
        (SegmentStatus::HalfDay, 0.5 * shift.payable_value)
    } else {
        (SegmentStatus::Absent, 0.0)
    };
    segment.status = status;
    segment.payable_fraction = payable;

    (segment, error)
}

/// Splits a day's punches into at most three shift segments.
///
/// `punches` should cover the day before through the day after the
/// attendance date so overnight shifts find their OUT; only IN punches
/// on the attendance date start segments.
pub fn segment_day(ctx: &DayContext<'_>, punches: &[PunchEvent]) -> Segmentation {
    if ctx.candidates.is_empty() {
        return Segmentation {
            errors: vec![AttendanceError::NotFound {
                employee_id: ctx.employee_id.to_string(),
                date: ctx.date,
            }],
            ..Segmentation::default()
        };
    }

    let punches = normalize_punches(punches);
    punches
        .iter()
        .filter(|p| p.direction == Direction::In && ctx.clock.local_date(p.instant) == ctx.date)
        .map(|p| p.instant)
        .fold(SegmenterState::default(), |state, in_time| {
            state.step(ctx, &punches, in_time)
        })
        .out
}
