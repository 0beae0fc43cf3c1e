//! Attendance processing engine.
//!
//! The [`AttendanceEngine`] turns one employee's punches for one local
//! date into a [`DailyAttendance`].  Each run takes a lock on its
//! (employee, date) pair, reads a snapshot of everything it needs from
//! the store, runs the pure segmentation and aggregation steps and only
//! then writes the results back.  Batch reprocessing uses [`rayon`] to
//! spread independent pairs across CPU cores.

use crate::aggregator::aggregate_day;
use crate::clock::LocalClock;
use crate::config::{EngineConfig, GraceOverrides};
use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{
    ConfusedShiftRecord, ConfusedStatus, DailyAttendance, Direction, EmployeeId, PunchEvent,
    ShiftCandidate, ShiftId, SourcePriority,
};
use crate::resolver::resolve_candidates;
use crate::segmenter::{segment_day, DayContext, SegmentAssignment};
use crate::store::AttendanceStore;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Days of punches read on either side of the attendance date, so that
/// overnight shifts and early arrivals are visible.
const PUNCH_LOOKBEHIND_DAYS: i64 = 1;
const PUNCH_LOOKAHEAD_DAYS: i64 = 2;

/// One (employee, date) pair to process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(employee_id: impl Into<EmployeeId>, date: NaiveDate) -> Self {
        Self {
            employee_id: employee_id.into(),
            date,
        }
    }
}

/// Result of processing a single day.
#[derive(Debug, Clone, Serialize)]
pub struct DayOutcome {
    pub attendance: DailyAttendance,
    pub assignments: Vec<SegmentAssignment>,
    /// Punch pairs left for manual review.
    pub confusions: Vec<ConfusedShiftRecord>,
    /// Non-fatal problems, already logged.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub confusions: usize,
    pub failed: Vec<BatchFailure>,
}

/// Hook for recomputing figures derived from attendance (overtime,
/// payroll inputs) once a day has been written.
///
/// Failures are reported to the caller, which logs them; they never
/// undo the attendance write.
pub trait DownstreamRecalc: Send + Sync {
    fn attendance_changed(&self, attendance: &DailyAttendance) -> Result<()>;
}

/// Recalculation hook that only records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecalc;

impl DownstreamRecalc for LogRecalc {
    fn attendance_changed(&self, attendance: &DailyAttendance) -> Result<()> {
        info!(
            employee_id = %attendance.employee_id,
            date = %attendance.date,
            working_hours = attendance.working_hours,
            "downstream recalculation requested"
        );
        Ok(())
    }
}

/// Serialises runs for the same (employee, date) pair.
#[derive(Debug, Default)]
struct DayLocks {
    inner: Mutex<HashMap<DayKey, Arc<Mutex<()>>>>,
}

impl DayLocks {
    fn lease(&self, key: &DayKey) -> AttendanceResult<Arc<Mutex<()>>> {
        let mut locks = self
            .inner
            .lock()
            .map_err(|_| AttendanceError::Store("day lock table poisoned".to_string()))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    /// Drops the entry once nobody else holds a lease on it.
    fn release(&self, key: &DayKey) {
        if let Ok(mut locks) = self.inner.lock() {
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

pub struct AttendanceEngine<S: AttendanceStore> {
    store: Arc<S>,
    config: EngineConfig,
    clock: LocalClock,
    locks: DayLocks,
}

impl<S: AttendanceStore> AttendanceEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> AttendanceResult<Self> {
        let clock = LocalClock::from_offset_minutes(config.utc_offset_minutes)?;
        Ok(Self {
            store,
            config,
            clock,
            locks: DayLocks::default(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Detects shifts and aggregates attendance for one day.
    pub fn process_day(&self, employee_id: &str, date: NaiveDate) -> AttendanceResult<DayOutcome> {
        self.with_day_lock(&DayKey::new(employee_id, date), || {
            self.process_locked(employee_id, date)
        })
    }

    fn with_day_lock<T>(
        &self,
        key: &DayKey,
        run: impl FnOnce() -> AttendanceResult<T>,
    ) -> AttendanceResult<T> {
        let lease = self.locks.lease(key)?;
        let result = match lease.lock() {
            Ok(_guard) => run(),
            Err(_) => Err(AttendanceError::Store(format!(
                "lock for {} on {} poisoned",
                key.employee_id, key.date
            ))),
        };
        drop(lease);
        self.locks.release(key);
        result
    }

    fn process_locked(&self, employee_id: &str, date: NaiveDate) -> AttendanceResult<DayOutcome> {
        let employee = self
            .store
            .employee(employee_id)?
            .ok_or_else(|| AttendanceError::UnknownEmployee(employee_id.to_string()))?;
        let roster = self.store.roster(employee_id, date)?;
        let candidates = resolve_candidates(&*self.store, &employee, roster.as_ref())?.to_vec();

        let midnight = NaiveTime::MIN;
        let from = self
            .clock
            .at(date - Duration::days(PUNCH_LOOKBEHIND_DAYS), midnight);
        let to = self
            .clock
            .at(date + Duration::days(PUNCH_LOOKAHEAD_DAYS), midnight);
        let punches = self.store.punches(employee_id, from, to)?;
        let on_duty = self.store.approved_on_duty(employee_id, date)?;
        let confused = self.store.confused_records(employee_id, date)?;
        let overrides = GraceOverrides::resolve(&self.store.global_settings()?, &self.config);

        debug!(
            employee_id,
            %date,
            candidates = candidates.len(),
            punches = punches.len(),
            "processing attendance day"
        );

        let ctx = DayContext {
            employee_id,
            date,
            clock: &self.clock,
            candidates: &candidates,
            on_duty: &on_duty,
            confused: &confused,
            overrides,
            tolerance_minutes: self.config.tolerance_minutes,
        };
        let segmentation = segment_day(&ctx, &punches);
        for err in &segmentation.errors {
            warn!(employee_id, %date, error = %err, "attendance run reported a problem");
        }

        let has_punches = punches
            .iter()
            .any(|p| self.clock.local_date(p.instant) == date);
        let attendance = aggregate_day(
            employee_id,
            date,
            segmentation.segments,
            roster.as_ref(),
            has_punches,
        );

        self.store.upsert_attendance(attendance.clone())?;
        self.store
            .replace_pending_confused(employee_id, date, segmentation.confusions.clone())?;
        if let (Some(roster), Some(primary)) = (&roster, segmentation.assignments.first()) {
            let is_deviation = roster.shift_id.as_deref() != Some(primary.shift_id.as_str());
            self.store
                .record_actual_shift(employee_id, date, &primary.shift_id, is_deviation)?;
            if is_deviation {
                info!(
                    employee_id,
                    %date,
                    scheduled = ?roster.shift_id,
                    actual = %primary.shift_id,
                    "worked shift deviates from roster"
                );
            }
        }

        info!(
            employee_id,
            %date,
            status = ?attendance.status,
            segments = attendance.segments.len(),
            working_hours = attendance.working_hours,
            "attendance processed"
        );

        Ok(DayOutcome {
            attendance,
            assignments: segmentation.assignments,
            confusions: segmentation.confusions,
            errors: segmentation.errors.iter().map(|e| e.to_string()).collect(),
        })
    }

    /// Reprocesses many pairs in parallel.  A failing pair is recorded
    /// in the report and does not stop the others.
    pub fn reprocess(&self, pairs: &[DayKey]) -> BatchReport {
        let results: Vec<(&DayKey, AttendanceResult<DayOutcome>)> = pairs
            .par_iter()
            .map(|key| (key, self.process_day(&key.employee_id, key.date)))
            .collect();

        let mut report = BatchReport::default();
        for (key, result) in results {
            match result {
                Ok(outcome) => {
                    report.processed += 1;
                    report.confusions += outcome.confusions.len();
                }
                Err(err) => {
                    warn!(employee_id = %key.employee_id, date = %key.date, error = %err, "reprocessing failed");
                    report.failed.push(BatchFailure {
                        employee_id: key.employee_id.clone(),
                        date: key.date,
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            processed = report.processed,
            failed = report.failed.len(),
            "batch reprocessing finished"
        );
        report
    }

    /// Reprocesses every day in `from..=to` for each employee.
    pub fn reprocess_range(
        &self,
        employee_ids: &[EmployeeId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> BatchReport {
        let pairs: Vec<DayKey> = employee_ids
            .iter()
            .flat_map(|id| {
                from.iter_days()
                    .take_while(move |d| *d <= to)
                    .map(move |d| DayKey::new(id.clone(), d))
            })
            .collect();
        self.reprocess(&pairs)
    }

    /// Stores an incoming punch and reprocesses the days it can affect.
    ///
    /// An OUT punch may close a shift that started the previous day, so
    /// that day is reprocessed as well.
    pub fn record_punch(&self, punch: PunchEvent) -> AttendanceResult<Vec<DayOutcome>> {
        let date = self.clock.local_date(punch.instant);
        let employee_id = punch.employee_id.clone();
        let direction = punch.direction;
        if !self.store.record_punch(punch)? {
            debug!(employee_id = %employee_id, %date, "punch already recorded");
        }
        let mut dates = vec![date];
        if direction == Direction::Out {
            dates.insert(0, date - Duration::days(1));
        }
        dates
            .into_iter()
            .map(|d| self.process_day(&employee_id, d))
            .collect()
    }

    /// Applies a human's choice for a confused punch pair and re-runs
    /// the day so lateness and earliness follow the chosen shift.
    pub fn resolve_confused(
        &self,
        employee_id: &str,
        date: NaiveDate,
        in_time: DateTime<Utc>,
        shift_id: &ShiftId,
    ) -> AttendanceResult<DayOutcome> {
        self.with_day_lock(&DayKey::new(employee_id, date), || {
            let mut record = self
                .store
                .confused_records(employee_id, date)?
                .into_iter()
                .find(|r| r.in_time == in_time)
                .ok_or_else(|| AttendanceError::UnknownConfusedRecord {
                    employee_id: employee_id.to_string(),
                    date,
                    in_time: in_time.to_rfc3339(),
                })?;
            let shift = self
                .store
                .shift(shift_id)?
                .ok_or_else(|| AttendanceError::UnknownShift(shift_id.clone()))?;

            if !record.candidates.iter().any(|c| &c.shift.id == shift_id) {
                record
                    .candidates
                    .push(ShiftCandidate::new(shift, SourcePriority::Global));
            }
            record.status = ConfusedStatus::Resolved;
            record.resolved_shift_id = Some(shift_id.clone());
            self.store.upsert_confused(record)?;
            info!(employee_id, %date, %in_time, %shift_id, "confused shift resolved");

            self.process_locked(employee_id, date)
        })
    }
}
