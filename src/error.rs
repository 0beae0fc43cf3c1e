//! Error types for the Attendance Engine.
//!
//! An ambiguous shift match is deliberately absent from this list: it
//! is a normal outcome of detection and is carried by
//! [`Detection::Ambiguous`](crate::disambiguation::Detection).

use chrono::NaiveDate;
use thiserror::Error;

pub type AttendanceResult<T> = Result<T, AttendanceError>;

#[derive(Debug, Error)]
pub enum AttendanceError {
    /// A punch pair without an in-time.  The pair is skipped and the
    /// rest of the day is still processed.
    #[error("missing in-time for employee {employee_id} on {date}")]
    Input { employee_id: String, date: NaiveDate },

    /// No candidate shifts exist at all for the employee and date.
    #[error("no candidate shifts for employee {employee_id} on {date}")]
    NotFound { employee_id: String, date: NaiveDate },

    /// A shift boundary could not be parsed as `HH:MM`.
    #[error("malformed time `{value}` on shift {shift_id}")]
    Calculation { shift_id: String, value: String },

    #[error("unknown employee {0}")]
    UnknownEmployee(String),

    #[error("unknown shift {0}")]
    UnknownShift(String),

    #[error("no confused shift record for employee {employee_id} on {date} at {in_time}")]
    UnknownConfusedRecord {
        employee_id: String,
        date: NaiveDate,
        in_time: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),
}

impl AttendanceError {
    /// Whether the error describes bad caller input rather than a fault
    /// in the engine or its stores.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AttendanceError::Input { .. } | AttendanceError::Config(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AttendanceError::NotFound { .. }
                | AttendanceError::UnknownEmployee(_)
                | AttendanceError::UnknownShift(_)
                | AttendanceError::UnknownConfusedRecord { .. }
        )
    }
}
