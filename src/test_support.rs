//! Builders shared by the unit tests.

use crate::clock::LocalClock;
use crate::models::{
    parse_wall_clock, Direction, Employee, PunchEvent, ShiftCandidate, ShiftDefinition,
    SourcePriority,
};
use crate::store::InMemoryStore;
use chrono::{DateTime, NaiveDate, Utc};

pub fn clock() -> LocalClock {
    LocalClock::from_offset_minutes(330).unwrap()
}

pub fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

/// Instant of a local `HH:MM` on a local `YYYY-MM-DD`.
pub fn at(date: &str, hhmm: &str) -> DateTime<Utc> {
    clock().instant(day(date), hhmm).unwrap()
}

/// A shift whose expected hours equal its span.  Malformed times are
/// kept as-is so tests can exercise the error paths.
pub fn shift(id: &str, start: &str, end: &str) -> ShiftDefinition {
    let expected_hours = match (parse_wall_clock(id, start), parse_wall_clock(id, end)) {
        (Ok(s), Ok(e)) => {
            let mut minutes = (e - s).num_minutes();
            if minutes < 0 {
                minutes += 24 * 60;
            }
            Some(minutes as f64 / 60.0)
        }
        _ => None,
    };
    ShiftDefinition {
        id: id.to_string(),
        name: id.to_string(),
        start_time: start.to_string(),
        end_time: end.to_string(),
        expected_hours,
        grace_period: None,
        payable_value: 1.0,
        active: true,
    }
}

pub fn candidate(shift: ShiftDefinition, source: SourcePriority) -> ShiftCandidate {
    ShiftCandidate::new(shift, source)
}

pub fn employee(id: &str) -> Employee {
    Employee {
        id: id.to_string(),
        name: format!("Employee {id}"),
        division_id: None,
        department_id: None,
        designation_id: None,
        gender: None,
    }
}

pub fn punch(date: &str, hhmm: &str, direction: Direction) -> PunchEvent {
    PunchEvent {
        employee_id: "E1".to_string(),
        instant: at(date, hhmm),
        direction,
    }
}

pub fn store_with_shifts(shifts: Vec<ShiftDefinition>) -> InMemoryStore {
    let store = InMemoryStore::new();
    for shift in shifts {
        store.add_shift(shift).unwrap();
    }
    store
}
