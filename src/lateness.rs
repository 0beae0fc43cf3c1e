//! Grace-aware lateness and early-departure calculation.
//!
//! Both results are in minutes, rounded to two decimals and never
//! negative.  Overrides from the global settings are passed in
//! explicitly through [`GraceOverrides`].

use crate::clock::{minutes_between, round2, LocalClock};
use crate::config::GraceOverrides;
use crate::error::AttendanceResult;
use crate::models::ShiftDefinition;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

pub const DEFAULT_GRACE_MINUTES: f64 = 15.0;

/// A night-shift arrival is measured against yesterday's start when it
/// falls within this many minutes after it.
const NIGHT_LOOKBACK_MINUTES: f64 = 16.0 * 60.0;

/// Minutes late after grace.
///
/// Grace is the global override if set, else the shift's own grace,
/// else 15 minutes.
pub fn late_in_minutes(
    clock: &LocalClock,
    in_time: DateTime<Utc>,
    shift_start: NaiveTime,
    shift_grace: Option<f64>,
    date: NaiveDate,
    global_override: Option<f64>,
) -> f64 {
    let grace = global_override
        .or(shift_grace)
        .unwrap_or(DEFAULT_GRACE_MINUTES);
    let mut diff = minutes_between(clock.at(date, shift_start), in_time);
    if shift_start.hour() >= 20 {
        let previous = minutes_between(clock.at(date - Duration::days(1), shift_start), in_time);
        if (0.0..NIGHT_LOOKBACK_MINUTES).contains(&previous) {
            diff = previous;
        }
    }
    round2((diff - grace).max(0.0))
}

/// Minutes left before the shift end after grace.  The shift end moves
/// to the next day for overnight shifts.
pub fn early_out_minutes(
    clock: &LocalClock,
    out_time: DateTime<Utc>,
    shift_end: NaiveTime,
    shift_start: NaiveTime,
    date: NaiveDate,
    grace: f64,
) -> f64 {
    let mut end = clock.at(date, shift_end);
    if shift_end < shift_start {
        end += Duration::days(1);
    }
    let diff = minutes_between(out_time, end);
    round2((diff - grace).max(0.0))
}

/// Early-out grace: the global override, optionally the shift's own
/// grace, then the default.
pub fn early_out_grace(overrides: &GraceOverrides, shift_grace: Option<f64>) -> f64 {
    overrides
        .early_out
        .or(if overrides.early_out_uses_shift_grace {
            shift_grace
        } else {
            None
        })
        .unwrap_or(DEFAULT_GRACE_MINUTES)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Punctuality {
    pub late_in_minutes: f64,
    pub early_out_minutes: Option<f64>,
}

/// Lateness and earliness of a punch pair against one occurrence of a
/// shift.  `anchor_date` is the date that occurrence starts on.
pub fn punctuality(
    clock: &LocalClock,
    shift: &ShiftDefinition,
    anchor_date: NaiveDate,
    in_time: DateTime<Utc>,
    out_time: Option<DateTime<Utc>>,
    overrides: &GraceOverrides,
) -> AttendanceResult<Punctuality> {
    let times = shift.times()?;
    let late = late_in_minutes(
        clock,
        in_time,
        times.start,
        shift.grace_period,
        anchor_date,
        overrides.late_in,
    );
    let early = out_time.map(|out| {
        early_out_minutes(
            clock,
            out,
            times.end,
            times.start,
            anchor_date,
            early_out_grace(overrides, shift.grace_period),
        )
    });
    Ok(Punctuality {
        late_in_minutes: late,
        early_out_minutes: early,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, clock, day, shift};

    fn t(hhmm: &str) -> NaiveTime {
        NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
    }

    #[test]
    fn test_on_time_is_never_late() {
        let late = late_in_minutes(&clock(), at("2024-03-01", "09:00"), t("09:00"), Some(0.0), day("2024-03-01"), None);
        assert_eq!(late, 0.0);
    }

    #[test]
    fn test_lateness_within_and_beyond_grace() {
        for grace in [0.0, 5.0, 15.0, 30.0] {
            for minutes in [0u32, 3, 10, 15, 29, 31, 47] {
                let in_time = at("2024-03-01", "09:00") + Duration::minutes(i64::from(minutes));
                let late = late_in_minutes(&clock(), in_time, t("09:00"), Some(grace), day("2024-03-01"), None);
                let expected = if f64::from(minutes) <= grace {
                    0.0
                } else {
                    round2(f64::from(minutes) - grace)
                };
                assert_eq!(late, expected, "grace {grace} minutes {minutes}");
            }
        }
    }

    #[test]
    fn test_global_override_beats_shift_grace() {
        let late = late_in_minutes(&clock(), at("2024-03-01", "09:40"), t("09:00"), Some(30.0), day("2024-03-01"), Some(5.0));
        assert_eq!(late, 35.0);
        let late = late_in_minutes(&clock(), at("2024-03-01", "09:40"), t("09:00"), None, day("2024-03-01"), None);
        assert_eq!(late, 25.0);
    }

    #[test]
    fn test_night_shift_lateness_uses_previous_day() {
        let late = late_in_minutes(&clock(), at("2024-03-02", "00:30"), t("22:00"), Some(15.0), day("2024-03-02"), None);
        assert_eq!(late, 135.0);
    }

    #[test]
    fn test_early_out_overnight_pushes_end() {
        let early = early_out_minutes(&clock(), at("2024-03-02", "05:00"), t("06:00"), t("22:00"), day("2024-03-01"), 15.0);
        assert_eq!(early, 45.0);
        let early = early_out_minutes(&clock(), at("2024-03-02", "06:10"), t("06:00"), t("22:00"), day("2024-03-01"), 15.0);
        assert_eq!(early, 0.0);
    }

    #[test]
    fn test_early_out_grace_ignores_shift_grace_by_default() {
        let overrides = GraceOverrides::default();
        assert_eq!(early_out_grace(&overrides, Some(30.0)), 15.0);
        let overrides = GraceOverrides {
            early_out_uses_shift_grace: true,
            ..GraceOverrides::default()
        };
        assert_eq!(early_out_grace(&overrides, Some(30.0)), 30.0);
        let overrides = GraceOverrides {
            early_out: Some(0.0),
            early_out_uses_shift_grace: true,
            ..GraceOverrides::default()
        };
        assert_eq!(early_out_grace(&overrides, Some(30.0)), 0.0);
    }

    #[test]
    fn test_punctuality_scenario() {
        let general = shift("GEN", "09:00", "18:00");
        let result = punctuality(
            &clock(),
            &general,
            day("2024-03-01"),
            at("2024-03-01", "09:10"),
            Some(at("2024-03-01", "18:05")),
            &GraceOverrides::default(),
        )
        .unwrap();
        assert_eq!(result.late_in_minutes, 0.0);
        assert_eq!(result.early_out_minutes, Some(0.0));
    }

    #[test]
    fn test_punctuality_reports_malformed_shift() {
        let broken = shift("BAD", "09:00", "6pm");
        let result = punctuality(&clock(), &broken, day("2024-03-01"), at("2024-03-01", "09:10"), None, &GraceOverrides::default());
        assert!(result.is_err());
    }
}
