//! Rolls a day's shift segments up into the [`DailyAttendance`] aggregate.

use crate::clock::round2;
use crate::models::{
    DailyAttendance, DayStatus, DayType, RosterAssignment, SegmentStatus, ShiftSegment,
};
use chrono::NaiveDate;

/// Payable sums are compared with a little slack for float error.
pub const PRESENT_PAYABLE_THRESHOLD: f64 = 0.95;
pub const HALF_DAY_PAYABLE_THRESHOLD: f64 = 0.45;
pub const WORKED_ON_OFF_DAY: &str = "Worked on Holiday/Week Off";

fn day_status(segments: &[ShiftSegment], payable: f64, day_type: DayType) -> DayStatus {
    let any = |status: SegmentStatus| segments.iter().any(|s| s.status == status);
    if any(SegmentStatus::Present) || payable >= PRESENT_PAYABLE_THRESHOLD {
        DayStatus::Present
    } else if any(SegmentStatus::HalfDay) || payable >= HALF_DAY_PAYABLE_THRESHOLD {
        DayStatus::HalfDay
    } else if segments.is_empty() {
        match day_type {
            DayType::Holiday => DayStatus::Holiday,
            DayType::WeekOff => DayStatus::WeekOff,
            DayType::Normal => DayStatus::Absent,
        }
    } else {
        DayStatus::Partial
    }
}

/// Builds the day aggregate.  `has_punches` is whether any punch was
/// recorded on the date, segmented or not.
pub fn aggregate_day(
    employee_id: &str,
    date: NaiveDate,
    segments: Vec<ShiftSegment>,
    roster: Option<&RosterAssignment>,
    has_punches: bool,
) -> DailyAttendance {
    let day_type = roster.map(|r| r.day_type).unwrap_or_default();
    let sum = |value: fn(&ShiftSegment) -> f64| round2(segments.iter().map(value).sum());

    let working_hours = sum(|s| s.working_hours);
    let ot_hours = sum(|s| s.ot_hours);
    let extra_hours = sum(|s| s.extra_hours);
    let late_minutes = sum(|s| s.late_in_minutes.unwrap_or(0.0));
    let early_minutes = sum(|s| s.early_out_minutes.unwrap_or(0.0));
    let expected_hours = sum(|s| s.expected_hours);
    let payable_shifts = sum(|s| s.payable_fraction);

    let status = day_status(&segments, payable_shifts, day_type);
    let remarks = (has_punches && matches!(day_type, DayType::Holiday | DayType::WeekOff))
        .then(|| WORKED_ON_OFF_DAY.to_string());

    DailyAttendance {
        employee_id: employee_id.to_string(),
        date,
        segments,
        working_hours,
        ot_hours,
        extra_hours,
        late_minutes,
        early_minutes,
        expected_hours,
        payable_shifts,
        status,
        remarks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, day};

    fn segment(status: SegmentStatus, payable: f64, working: f64) -> ShiftSegment {
        ShiftSegment {
            shift_number: 1,
            in_time: at("2024-03-01", "09:00"),
            out_time: Some(at("2024-03-01", "18:00")),
            shift_id: Some("GEN".into()),
            shift_name: Some("General".into()),
            match_method: None,
            late_in_minutes: Some(10.0),
            early_out_minutes: Some(5.0),
            is_late: true,
            is_early_out: true,
            punch_hours: working,
            od_hours: 0.0,
            working_hours: working,
            extra_hours: 0.0,
            ot_hours: 0.0,
            expected_hours: 9.0,
            payable_fraction: payable,
            status,
        }
    }

    fn roster(day_type: DayType) -> RosterAssignment {
        RosterAssignment {
            employee_id: "E1".into(),
            date: day("2024-03-01"),
            shift_id: None,
            day_type,
            actual_shift_id: None,
            is_deviation: false,
        }
    }

    #[test]
    fn test_sums_and_present_status() {
        let segments = vec![
            segment(SegmentStatus::Present, 1.0, 9.0),
            segment(SegmentStatus::Absent, 0.0, 2.0),
        ];
        let day = aggregate_day("E1", day("2024-03-01"), segments, None, true);
        assert_eq!(day.status, DayStatus::Present);
        assert_eq!(day.working_hours, 11.0);
        assert_eq!(day.late_minutes, 20.0);
        assert_eq!(day.early_minutes, 10.0);
        assert_eq!(day.expected_hours, 18.0);
        assert_eq!(day.payable_shifts, 1.0);
        assert_eq!(day.remarks, None);
    }

    #[test]
    fn test_two_half_days_sum_to_present() {
        let segments = vec![
            segment(SegmentStatus::HalfDay, 0.5, 5.0),
            segment(SegmentStatus::HalfDay, 0.5, 5.0),
        ];
        let day = aggregate_day("E1", day("2024-03-01"), segments, None, true);
        assert_eq!(day.status, DayStatus::Present);
    }

    #[test]
    fn test_half_day_and_partial() {
        let day_half = aggregate_day(
            "E1",
            day("2024-03-01"),
            vec![segment(SegmentStatus::HalfDay, 0.5, 5.0)],
            None,
            true,
        );
        assert_eq!(day_half.status, DayStatus::HalfDay);

        let day_partial = aggregate_day(
            "E1",
            day("2024-03-01"),
            vec![segment(SegmentStatus::Absent, 0.0, 3.33)],
            None,
            true,
        );
        assert_eq!(day_partial.status, DayStatus::Partial);
    }

    #[test]
    fn test_empty_day_follows_roster_day_type() {
        let holiday = roster(DayType::Holiday);
        let result = aggregate_day("E1", day("2024-03-01"), Vec::new(), Some(&holiday), false);
        assert_eq!(result.status, DayStatus::Holiday);

        let week_off = roster(DayType::WeekOff);
        let result = aggregate_day("E1", day("2024-03-01"), Vec::new(), Some(&week_off), false);
        assert_eq!(result.status, DayStatus::WeekOff);

        let result = aggregate_day("E1", day("2024-03-01"), Vec::new(), None, false);
        assert_eq!(result.status, DayStatus::Absent);
    }

    #[test]
    fn test_work_on_holiday_is_noted() {
        let holiday = roster(DayType::Holiday);
        let result = aggregate_day(
            "E1",
            day("2024-03-01"),
            vec![segment(SegmentStatus::Present, 1.0, 9.0)],
            Some(&holiday),
            true,
        );
        assert_eq!(result.status, DayStatus::Present);
        assert_eq!(result.remarks.as_deref(), Some(WORKED_ON_OFF_DAY));
    }
}
