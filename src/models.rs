//! Data models for the Attendance Engine.
//!
//! The `models` module defines the serialisable structs and enums the
//! engine reads (employees, shift definitions, rosters, punches,
//! on-duty intervals) and the ones it produces (shift segments, the
//! daily attendance aggregate and confused-shift records).  All of them
//! derive `Serialize` and `Deserialize` so they can be loaded from the
//! reference-data directory or returned over HTTP unchanged.
//!
//! Instants are stored in UTC.  Shift boundaries are kept as local
//! wall-clock `HH:MM` strings and only become instants through a
//! [`LocalClock`](crate::clock::LocalClock).

use crate::error::{AttendanceError, AttendanceResult};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub type EmployeeId = String;
pub type ShiftId = String;

/// Gender as recorded in the employee directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "Male")]
    Male,
    #[serde(alias = "Female")]
    Female,
    #[serde(alias = "Other")]
    Other,
}

/// An employee together with the organisational links used to look up
/// shift configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub division_id: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub designation_id: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

/// Immutable reference data describing one shift.
///
/// `expected_hours` is always in hours.  Incoming JSON may instead carry
/// a `duration` expressed either in hours or in minutes; values above 20
/// are taken to be minutes and converted when the definition is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawShiftDefinition")]
pub struct ShiftDefinition {
    pub id: ShiftId,
    pub name: String,
    /// Local wall-clock start, `HH:MM`.
    pub start_time: String,
    /// Local wall-clock end, `HH:MM`.  Earlier than `start_time` for
    /// shifts that cross midnight.
    pub end_time: String,
    pub expected_hours: Option<f64>,
    /// Minutes of tolerance after the start before lateness accrues.
    pub grace_period: Option<f64>,
    pub payable_value: f64,
    pub active: bool,
}

#[derive(Deserialize)]
struct RawShiftDefinition {
    id: ShiftId,
    #[serde(default)]
    name: String,
    start_time: String,
    end_time: String,
    #[serde(default)]
    expected_hours: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    grace_period: Option<f64>,
    #[serde(default)]
    payable_value: Option<f64>,
    #[serde(default)]
    active: Option<bool>,
}

impl From<RawShiftDefinition> for ShiftDefinition {
    fn from(raw: RawShiftDefinition) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            start_time: raw.start_time,
            end_time: raw.end_time,
            expected_hours: raw
                .expected_hours
                .or_else(|| raw.duration.map(normalize_duration_hours)),
            grace_period: raw.grace_period,
            payable_value: raw.payable_value.unwrap_or(1.0),
            active: raw.active.unwrap_or(true),
        }
    }
}

/// Shift durations above this are minutes, not hours.
const DURATION_MINUTES_THRESHOLD: f64 = 20.0;

fn normalize_duration_hours(duration: f64) -> f64 {
    if duration > DURATION_MINUTES_THRESHOLD {
        duration / 60.0
    } else {
        duration
    }
}

/// Parsed start and end of a shift in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftTimes {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ShiftTimes {
    /// True when the end wraps past midnight.
    pub fn is_overnight(&self) -> bool {
        self.end < self.start
    }

    /// Night shifts (start at or after 20:00) are also compared against
    /// the previous day's occurrence of their start.
    pub fn starts_at_night(&self) -> bool {
        self.start.hour() >= 20
    }
}

impl ShiftDefinition {
    /// Parses the `HH:MM` boundaries of this shift.
    pub fn times(&self) -> AttendanceResult<ShiftTimes> {
        Ok(ShiftTimes {
            start: parse_wall_clock(&self.id, &self.start_time)?,
            end: parse_wall_clock(&self.id, &self.end_time)?,
        })
    }

    pub fn is_overnight(&self) -> bool {
        self.times().map(|t| t.is_overnight()).unwrap_or(false)
    }
}

/// Parses a local `HH:MM` (or `HH:MM:SS`) wall-clock value.
pub fn parse_wall_clock(shift_id: &str, value: &str) -> AttendanceResult<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| AttendanceError::Calculation {
            shift_id: shift_id.to_string(),
            value: value.to_string(),
        })
}

/// Where a candidate shift came from.  Earlier variants win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePriority {
    Roster = 1,
    Designation = 2,
    Department = 3,
    Division = 4,
    Global = 5,
}

/// A shift definition annotated while resolving and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftCandidate {
    pub shift: ShiftDefinition,
    pub source: SourcePriority,
    /// Distance in minutes between the in-time and the closest
    /// occurrence of the shift start.  Set by the proximity matcher.
    #[serde(default)]
    pub difference_minutes: Option<f64>,
    #[serde(default)]
    pub is_start_before_log: bool,
    #[serde(default)]
    pub is_preferred: bool,
    /// Calendar date of the shift occurrence the in-time was matched
    /// against: the attendance date, or the day before for a night
    /// shift reached after midnight.
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
}

impl ShiftCandidate {
    pub fn new(shift: ShiftDefinition, source: SourcePriority) -> Self {
        Self {
            shift,
            source,
            difference_minutes: None,
            is_start_before_log: false,
            is_preferred: false,
            anchor_date: None,
        }
    }

    pub fn is_roster(&self) -> bool {
        self.source == SourcePriority::Roster
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayType {
    #[default]
    Normal,
    WeekOff,
    Holiday,
}

/// A pre-scheduled (employee, date) assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterAssignment {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    #[serde(default)]
    pub shift_id: Option<ShiftId>,
    #[serde(default)]
    pub day_type: DayType,
    /// The shift actually detected from punches, written back after a run.
    #[serde(default)]
    pub actual_shift_id: Option<ShiftId>,
    #[serde(default)]
    pub is_deviation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    In,
    Out,
}

/// A raw biometric punch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunchEvent {
    pub employee_id: EmployeeId,
    pub instant: DateTime<Utc>,
    pub direction: Direction,
}

/// An approved on-duty window counted as worked time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDutyInterval {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Full-day ODs are settled by leave reconciliation, not here.
    #[serde(default = "default_true")]
    pub hour_based: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentStatus {
    Present,
    HalfDay,
    Absent,
    Incomplete,
}

/// How a segment got its shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Single,
    RosterBlind,
    RosterOverride,
    OutTimeScore,
    ProximityClosest,
    NearestFallback,
    LongPunchSplit,
    Manual,
}

/// One worked shift within a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSegment {
    /// 1-based position within the day, at most 3.
    pub shift_number: u8,
    pub in_time: DateTime<Utc>,
    pub out_time: Option<DateTime<Utc>>,
    pub shift_id: Option<ShiftId>,
    pub shift_name: Option<String>,
    pub match_method: Option<MatchMethod>,
    /// `None` when the shift times could not be parsed.
    pub late_in_minutes: Option<f64>,
    pub early_out_minutes: Option<f64>,
    pub is_late: bool,
    pub is_early_out: bool,
    pub punch_hours: f64,
    pub od_hours: f64,
    pub working_hours: f64,
    pub extra_hours: f64,
    pub ot_hours: f64,
    pub expected_hours: f64,
    pub payable_fraction: f64,
    pub status: SegmentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayStatus {
    Present,
    HalfDay,
    Partial,
    Absent,
    Holiday,
    WeekOff,
}

/// The per-(employee, date) attendance aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAttendance {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub segments: Vec<ShiftSegment>,
    pub working_hours: f64,
    pub ot_hours: f64,
    pub extra_hours: f64,
    pub late_minutes: f64,
    pub early_minutes: f64,
    pub expected_hours: f64,
    pub payable_shifts: f64,
    pub status: DayStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfusedStatus {
    Pending,
    Resolved,
}

/// A punch pair that could not be confidently assigned to one shift.
/// Keyed by (employee, date, in-time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusedShiftRecord {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub in_time: DateTime<Utc>,
    pub out_time: Option<DateTime<Utc>>,
    pub candidates: Vec<ShiftCandidate>,
    pub status: ConfusedStatus,
    #[serde(default)]
    pub resolved_shift_id: Option<ShiftId>,
}

impl ConfusedShiftRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ConfusedStatus::Pending
    }
}

/// Organisation-wide settings.  Grace overrides replace the per-shift
/// grace period when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub late_in_grace_minutes: Option<f64>,
    #[serde(default)]
    pub early_out_grace_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_in_minutes_is_normalized_to_hours() {
        let shift: ShiftDefinition = serde_json::from_value(json!({
            "id": "S1",
            "name": "General",
            "start_time": "09:00",
            "end_time": "18:00",
            "duration": 540
        }))
        .unwrap();
        assert_eq!(shift.expected_hours, Some(9.0));
        assert_eq!(shift.payable_value, 1.0);
        assert!(shift.active);
    }

    #[test]
    fn test_duration_in_hours_is_kept() {
        let shift: ShiftDefinition = serde_json::from_value(json!({
            "id": "S1",
            "start_time": "22:00",
            "end_time": "06:00",
            "duration": 8,
            "payable_value": 1.5
        }))
        .unwrap();
        assert_eq!(shift.expected_hours, Some(8.0));
        assert_eq!(shift.payable_value, 1.5);
        assert!(shift.is_overnight());
    }

    #[test]
    fn test_expected_hours_survive_a_round_trip() {
        let shift: ShiftDefinition = serde_json::from_value(json!({
            "id": "DOUBLE",
            "start_time": "06:00",
            "end_time": "06:00",
            "expected_hours": 24
        }))
        .unwrap();
        assert_eq!(shift.expected_hours, Some(24.0));

        let stored = serde_json::to_value(&shift).unwrap();
        let reread: ShiftDefinition = serde_json::from_value(stored).unwrap();
        assert_eq!(reread.expected_hours, Some(24.0));
        assert_eq!(reread, shift);
    }

    #[test]
    fn test_malformed_wall_clock_is_calculation_error() {
        let err = parse_wall_clock("S9", "9am").unwrap_err();
        assert!(matches!(err, AttendanceError::Calculation { .. }));
        assert_eq!(
            parse_wall_clock("S9", "07:30:00").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_night_start_detection() {
        let times = ShiftTimes {
            start: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
        };
        assert!(times.starts_at_night());
        assert!(!times.is_overnight());
    }
}
