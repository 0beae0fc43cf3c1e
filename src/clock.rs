//! Local wall-clock arithmetic.
//!
//! Shift boundaries are local `HH:MM` values in the organisation's single
//! timezone.  [`LocalClock`] turns them into absolute instants using a
//! fixed offset, never the timezone of the executing process, and turns
//! punch instants back into local components for comparisons.

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{parse_wall_clock, ShiftDefinition};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};

/// Local calendar and clock components of an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn from_offset_minutes(minutes: i32) -> AttendanceResult<Self> {
        FixedOffset::east_opt(minutes * 60)
            .map(|offset| Self { offset })
            .ok_or_else(|| AttendanceError::Config(format!("utc offset {minutes} minutes")))
    }

    /// Absolute instant of a local wall-clock time on a local date.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// Absolute instant of an `HH:MM` string on a local date.
    pub fn instant(&self, date: NaiveDate, hhmm: &str) -> AttendanceResult<DateTime<Utc>> {
        let time = parse_wall_clock("", hhmm)?;
        Ok(self.at(date, time))
    }

    pub fn local_parts(&self, instant: DateTime<Utc>) -> LocalParts {
        let local = instant.with_timezone(&self.offset);
        LocalParts {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        }
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Minutes since local midnight, `0..1440`.
    pub fn minute_of_day(&self, instant: DateTime<Utc>) -> i64 {
        let local = instant.with_timezone(&self.offset);
        i64::from(local.hour()) * 60 + i64::from(local.minute())
    }

    /// Start and end instants of the occurrence of `shift` that starts
    /// on `anchor_date`.  Overnight shifts end on the following day.
    pub fn shift_window(
        &self,
        shift: &ShiftDefinition,
        anchor_date: NaiveDate,
    ) -> AttendanceResult<ShiftWindow> {
        let times = shift.times()?;
        let start = self.at(anchor_date, times.start);
        let mut end = self.at(anchor_date, times.end);
        if times.is_overnight() {
            end += Duration::days(1);
        }
        Ok(ShiftWindow { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    pub fn hours(&self) -> f64 {
        hours_between(self.start, self.end)
    }
}

/// Length in hours of the overlap of two half-open intervals.
pub fn overlap_hours(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> f64 {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    if end > start {
        hours_between(start, end)
    } else {
        0.0
    }
}

/// Distance between two minute-of-day values on a 24 hour circle.
pub fn circular_minutes(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(MINUTES_PER_DAY);
    d.min(MINUTES_PER_DAY - d)
}

pub const MINUTES_PER_DAY: f64 = 1440.0;

pub fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Signed span `later - earlier` in fractional minutes.
pub fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 60.0
}

pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    minutes_between(earlier, later) / 60.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
