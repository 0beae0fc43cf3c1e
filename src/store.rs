//! Read and write interfaces consumed by the engine.
//!
//! Each external collaborator (employee directory, shift catalog,
//! roster, on-duty approvals, punch store, global settings, attendance
//! output) is a trait so deployments can plug in their own persistence.
//! [`InMemoryStore`] implements all of them and can be populated from a
//! directory of JSON files with [`load_store_from_dir`].
//!
//! Stores must be thread-safe (`Send + Sync`) because batch
//! reprocessing fans out across threads.

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::{
    ConfusedShiftRecord, DailyAttendance, Employee, EmployeeId, Gender, GlobalSettings,
    OnDutyInterval, PunchEvent, RosterAssignment, ShiftDefinition, ShiftId,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Gender restriction on a configured shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderTag {
    #[default]
    #[serde(alias = "All")]
    All,
    #[serde(alias = "Male")]
    Male,
    #[serde(alias = "Female")]
    Female,
    #[serde(alias = "Other")]
    Other,
}

impl GenderTag {
    fn admits(self, gender: Option<Gender>) -> bool {
        match (self, gender) {
            (GenderTag::All, _) => true,
            (GenderTag::Male, Some(Gender::Male)) => true,
            (GenderTag::Female, Some(Gender::Female)) => true,
            (GenderTag::Other, Some(Gender::Other)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftConfigEntry {
    pub shift_id: ShiftId,
    #[serde(default)]
    pub gender: Option<GenderTag>,
}

/// A list of shifts configured for one organisational scope.
///
/// Two JSON shapes are accepted: legacy bare id arrays (`["S1", 2]`)
/// and gender-tagged objects (`[{"shift_id": "S1", "gender": "female"}]`).
/// Legacy lists are never gender-filtered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawShiftConfigList")]
pub struct ShiftConfigList {
    pub entries: Vec<ShiftConfigEntry>,
    pub legacy: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyShiftId {
    Text(String),
    Number(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawShiftConfigList {
    Tagged(Vec<ShiftConfigEntry>),
    Legacy(Vec<LegacyShiftId>),
    Normalized {
        entries: Vec<ShiftConfigEntry>,
        #[serde(default)]
        legacy: bool,
    },
}

impl From<RawShiftConfigList> for ShiftConfigList {
    fn from(raw: RawShiftConfigList) -> Self {
        match raw {
            RawShiftConfigList::Tagged(entries) => Self {
                entries,
                legacy: false,
            },
            RawShiftConfigList::Legacy(ids) => Self {
                entries: ids
                    .into_iter()
                    .map(|id| ShiftConfigEntry {
                        shift_id: match id {
                            LegacyShiftId::Text(text) => text,
                            LegacyShiftId::Number(number) => number.to_string(),
                        },
                        gender: None,
                    })
                    .collect(),
                legacy: true,
            },
            RawShiftConfigList::Normalized { entries, legacy } => Self { entries, legacy },
        }
    }
}

impl ShiftConfigList {
    /// Shift ids visible to an employee of the given gender.
    pub fn shift_ids_for(&self, gender: Option<Gender>) -> Vec<ShiftId> {
        self.entries
            .iter()
            .filter(|entry| self.legacy || entry.gender.unwrap_or_default().admits(gender))
            .map(|entry| entry.shift_id.clone())
            .collect()
    }
}

pub trait EmployeeDirectory {
    fn employee(&self, employee_id: &str) -> AttendanceResult<Option<Employee>>;
}

/// Shift definitions plus the per-scope shift configuration lists.
pub trait ShiftCatalog {
    fn active_shifts(&self) -> AttendanceResult<Vec<ShiftDefinition>>;
    fn shift(&self, shift_id: &str) -> AttendanceResult<Option<ShiftDefinition>>;
    /// Division + department specific designation override.
    fn designation_override(
        &self,
        division_id: &str,
        department_id: &str,
        designation_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>>;
    fn designation_default(
        &self,
        division_id: &str,
        designation_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>>;
    fn legacy_designation(&self, designation_id: &str) -> AttendanceResult<Option<ShiftConfigList>>;
    fn department_default(
        &self,
        division_id: &str,
        department_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>>;
    fn legacy_department(&self, department_id: &str) -> AttendanceResult<Option<ShiftConfigList>>;
    fn division_baseline(&self, division_id: &str) -> AttendanceResult<Option<ShiftConfigList>>;
}

pub trait RosterStore {
    fn roster(&self, employee_id: &str, date: NaiveDate)
        -> AttendanceResult<Option<RosterAssignment>>;
    /// Writes back the detected shift and whether it deviates from the
    /// scheduled one.
    fn record_actual_shift(
        &self,
        employee_id: &str,
        date: NaiveDate,
        actual_shift_id: &str,
        is_deviation: bool,
    ) -> AttendanceResult<()>;
}

pub trait OnDutyStore {
    fn approved_on_duty(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Vec<OnDutyInterval>>;
}

pub trait PunchStore {
    /// Punches with `from <= instant < to`, oldest first.
    fn punches(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AttendanceResult<Vec<PunchEvent>>;
    /// Appends a punch.  Returns `false` when one already exists at the
    /// same instant for that employee.
    fn record_punch(&self, punch: PunchEvent) -> AttendanceResult<bool>;
}

pub trait SettingsStore {
    fn global_settings(&self) -> AttendanceResult<GlobalSettings>;
}

/// Outputs of a run.
pub trait AttendanceRepository {
    fn upsert_attendance(&self, attendance: DailyAttendance) -> AttendanceResult<()>;
    fn attendance(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Option<DailyAttendance>>;
    fn confused_records(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Vec<ConfusedShiftRecord>>;
    /// Inserts or replaces the record with the same in-time.
    fn upsert_confused(&self, record: ConfusedShiftRecord) -> AttendanceResult<()>;
    /// Replaces every pending record of the day with `pending`; resolved
    /// records are kept.
    fn replace_pending_confused(
        &self,
        employee_id: &str,
        date: NaiveDate,
        pending: Vec<ConfusedShiftRecord>,
    ) -> AttendanceResult<()>;
}

/// Everything the engine needs from its surroundings.
pub trait AttendanceStore:
    EmployeeDirectory
    + ShiftCatalog
    + RosterStore
    + OnDutyStore
    + PunchStore
    + SettingsStore
    + AttendanceRepository
    + Send
    + Sync
{
}

impl<T> AttendanceStore for T where
    T: EmployeeDirectory
        + ShiftCatalog
        + RosterStore
        + OnDutyStore
        + PunchStore
        + SettingsStore
        + AttendanceRepository
        + Send
        + Sync
{
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignationOverride {
    pub division_id: String,
    pub department_id: String,
    pub designation_id: String,
    pub shifts: ShiftConfigList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignationDefault {
    pub division_id: String,
    pub designation_id: String,
    pub shifts: ShiftConfigList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentDefault {
    pub division_id: String,
    pub department_id: String,
    pub shifts: ShiftConfigList,
}

/// Contents of `shift_configs.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShiftConfigs {
    #[serde(default)]
    pub designation_overrides: Vec<DesignationOverride>,
    #[serde(default)]
    pub designation_defaults: Vec<DesignationDefault>,
    #[serde(default)]
    pub legacy_designations: HashMap<String, ShiftConfigList>,
    #[serde(default)]
    pub department_defaults: Vec<DepartmentDefault>,
    #[serde(default)]
    pub legacy_departments: HashMap<String, ShiftConfigList>,
    #[serde(default)]
    pub division_baselines: HashMap<String, ShiftConfigList>,
}

type DayKey = (EmployeeId, NaiveDate);

/// A store kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    employees: RwLock<HashMap<EmployeeId, Employee>>,
    shifts: RwLock<HashMap<ShiftId, ShiftDefinition>>,
    shift_configs: RwLock<ShiftConfigs>,
    rosters: RwLock<HashMap<DayKey, RosterAssignment>>,
    on_duty: RwLock<HashMap<DayKey, Vec<OnDutyInterval>>>,
    punches: RwLock<HashMap<EmployeeId, Vec<PunchEvent>>>,
    settings: RwLock<GlobalSettings>,
    attendance: RwLock<HashMap<DayKey, DailyAttendance>>,
    confused: RwLock<HashMap<DayKey, Vec<ConfusedShiftRecord>>>,
}

fn read<T>(lock: &RwLock<T>) -> AttendanceResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| AttendanceError::Store("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> AttendanceResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| AttendanceError::Store("lock poisoned".to_string()))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_employee(&self, employee: Employee) -> AttendanceResult<()> {
        write(&self.employees)?.insert(employee.id.clone(), employee);
        Ok(())
    }

    pub fn add_shift(&self, shift: ShiftDefinition) -> AttendanceResult<()> {
        write(&self.shifts)?.insert(shift.id.clone(), shift);
        Ok(())
    }

    pub fn set_shift_configs(&self, configs: ShiftConfigs) -> AttendanceResult<()> {
        *write(&self.shift_configs)? = configs;
        Ok(())
    }

    pub fn add_roster(&self, roster: RosterAssignment) -> AttendanceResult<()> {
        write(&self.rosters)?.insert((roster.employee_id.clone(), roster.date), roster);
        Ok(())
    }

    pub fn add_on_duty(&self, interval: OnDutyInterval) -> AttendanceResult<()> {
        write(&self.on_duty)?
            .entry((interval.employee_id.clone(), interval.date))
            .or_default()
            .push(interval);
        Ok(())
    }

    pub fn set_settings(&self, settings: GlobalSettings) -> AttendanceResult<()> {
        *write(&self.settings)? = settings;
        Ok(())
    }

    fn config_lookup<F>(&self, pick: F) -> AttendanceResult<Option<ShiftConfigList>>
    where
        F: FnOnce(&ShiftConfigs) -> Option<ShiftConfigList>,
    {
        let configs = read(&self.shift_configs)?;
        Ok(pick(&configs))
    }
}

impl EmployeeDirectory for InMemoryStore {
    fn employee(&self, employee_id: &str) -> AttendanceResult<Option<Employee>> {
        Ok(read(&self.employees)?.get(employee_id).cloned())
    }
}

impl ShiftCatalog for InMemoryStore {
    fn active_shifts(&self) -> AttendanceResult<Vec<ShiftDefinition>> {
        let mut shifts: Vec<ShiftDefinition> = read(&self.shifts)?
            .values()
            .filter(|shift| shift.active)
            .cloned()
            .collect();
        shifts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(shifts)
    }

    fn shift(&self, shift_id: &str) -> AttendanceResult<Option<ShiftDefinition>> {
        Ok(read(&self.shifts)?.get(shift_id).cloned())
    }

    fn designation_override(
        &self,
        division_id: &str,
        department_id: &str,
        designation_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| {
            configs
                .designation_overrides
                .iter()
                .find(|o| {
                    o.division_id == division_id
                        && o.department_id == department_id
                        && o.designation_id == designation_id
                })
                .map(|o| o.shifts.clone())
        })
    }

    fn designation_default(
        &self,
        division_id: &str,
        designation_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| {
            configs
                .designation_defaults
                .iter()
                .find(|d| d.division_id == division_id && d.designation_id == designation_id)
                .map(|d| d.shifts.clone())
        })
    }

    fn legacy_designation(&self, designation_id: &str) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| configs.legacy_designations.get(designation_id).cloned())
    }

    fn department_default(
        &self,
        division_id: &str,
        department_id: &str,
    ) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| {
            configs
                .department_defaults
                .iter()
                .find(|d| d.division_id == division_id && d.department_id == department_id)
                .map(|d| d.shifts.clone())
        })
    }

    fn legacy_department(&self, department_id: &str) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| configs.legacy_departments.get(department_id).cloned())
    }

    fn division_baseline(&self, division_id: &str) -> AttendanceResult<Option<ShiftConfigList>> {
        self.config_lookup(|configs| configs.division_baselines.get(division_id).cloned())
    }
}

impl RosterStore for InMemoryStore {
    fn roster(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Option<RosterAssignment>> {
        Ok(read(&self.rosters)?
            .get(&(employee_id.to_string(), date))
            .cloned())
    }

    fn record_actual_shift(
        &self,
        employee_id: &str,
        date: NaiveDate,
        actual_shift_id: &str,
        is_deviation: bool,
    ) -> AttendanceResult<()> {
        let mut rosters = write(&self.rosters)?;
        if let Some(roster) = rosters.get_mut(&(employee_id.to_string(), date)) {
            roster.actual_shift_id = Some(actual_shift_id.to_string());
            roster.is_deviation = is_deviation;
        }
        Ok(())
    }
}

impl OnDutyStore for InMemoryStore {
    fn approved_on_duty(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Vec<OnDutyInterval>> {
        Ok(read(&self.on_duty)?
            .get(&(employee_id.to_string(), date))
            .cloned()
            .unwrap_or_default())
    }
}

impl PunchStore for InMemoryStore {
    fn punches(
        &self,
        employee_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AttendanceResult<Vec<PunchEvent>> {
        Ok(read(&self.punches)?
            .get(employee_id)
            .map(|punches| {
                punches
                    .iter()
                    .filter(|p| p.instant >= from && p.instant < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn record_punch(&self, punch: PunchEvent) -> AttendanceResult<bool> {
        let mut punches = write(&self.punches)?;
        let list = punches.entry(punch.employee_id.clone()).or_default();
        if list.iter().any(|p| p.instant == punch.instant) {
            debug!(employee_id = %punch.employee_id, instant = %punch.instant, "duplicate punch ignored");
            return Ok(false);
        }
        let position = list.partition_point(|p| p.instant < punch.instant);
        list.insert(position, punch);
        Ok(true)
    }
}

impl SettingsStore for InMemoryStore {
    fn global_settings(&self) -> AttendanceResult<GlobalSettings> {
        Ok(read(&self.settings)?.clone())
    }
}

impl AttendanceRepository for InMemoryStore {
    fn upsert_attendance(&self, attendance: DailyAttendance) -> AttendanceResult<()> {
        write(&self.attendance)?.insert(
            (attendance.employee_id.clone(), attendance.date),
            attendance,
        );
        Ok(())
    }

    fn attendance(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Option<DailyAttendance>> {
        Ok(read(&self.attendance)?
            .get(&(employee_id.to_string(), date))
            .cloned())
    }

    fn confused_records(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> AttendanceResult<Vec<ConfusedShiftRecord>> {
        Ok(read(&self.confused)?
            .get(&(employee_id.to_string(), date))
            .cloned()
            .unwrap_or_default())
    }

    fn upsert_confused(&self, record: ConfusedShiftRecord) -> AttendanceResult<()> {
        let mut confused = write(&self.confused)?;
        let records = confused
            .entry((record.employee_id.clone(), record.date))
            .or_default();
        match records.iter_mut().find(|r| r.in_time == record.in_time) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    fn replace_pending_confused(
        &self,
        employee_id: &str,
        date: NaiveDate,
        pending: Vec<ConfusedShiftRecord>,
    ) -> AttendanceResult<()> {
        let mut confused = write(&self.confused)?;
        let records = confused.entry((employee_id.to_string(), date)).or_default();
        records.retain(|r| !r.is_pending());
        for record in pending {
            if !records.iter().any(|r| r.in_time == record.in_time) {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.in_time);
        Ok(())
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>> {
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(&path)?;
    match serde_json::from_str::<T>(&data) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to parse reference data file");
            Ok(None)
        }
    }
}

/// Load reference data from a directory.
///
/// Recognised files are `employees.json`, `shifts.json`,
/// `shift_configs.json`, `rosters.json`, `on_duty.json`, `punches.json`
/// and `settings.json`.  Every file is optional; files that fail to
/// parse are logged and skipped.
pub fn load_store_from_dir(path: &Path) -> Result<InMemoryStore> {
    let store = InMemoryStore::new();
    if !path.is_dir() {
        warn!(path = %path.display(), "reference data directory not found, starting empty");
        return Ok(store);
    }
    for employee in read_json_file::<Vec<Employee>>(path, "employees.json")?.unwrap_or_default() {
        store.add_employee(employee)?;
    }
    for shift in read_json_file::<Vec<ShiftDefinition>>(path, "shifts.json")?.unwrap_or_default() {
        store.add_shift(shift)?;
    }
    if let Some(configs) = read_json_file::<ShiftConfigs>(path, "shift_configs.json")? {
        store.set_shift_configs(configs)?;
    }
    for roster in read_json_file::<Vec<RosterAssignment>>(path, "rosters.json")?.unwrap_or_default() {
        store.add_roster(roster)?;
    }
    for interval in read_json_file::<Vec<OnDutyInterval>>(path, "on_duty.json")?.unwrap_or_default() {
        store.add_on_duty(interval)?;
    }
    for punch in read_json_file::<Vec<PunchEvent>>(path, "punches.json")?.unwrap_or_default() {
        store.record_punch(punch)?;
    }
    if let Some(settings) = read_json_file::<GlobalSettings>(path, "settings.json")? {
        store.set_settings(settings)?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use serde_json::json;

    #[test]
    fn test_legacy_config_list_is_not_gender_filtered() {
        let list: ShiftConfigList = serde_json::from_value(json!(["S1", 7])).unwrap();
        assert!(list.legacy);
        assert_eq!(
            list.shift_ids_for(Some(Gender::Female)),
            vec!["S1".to_string(), "7".to_string()]
        );
    }

    #[test]
    fn test_tagged_config_list_filters_by_gender() {
        let list: ShiftConfigList = serde_json::from_value(json!([
            {"shift_id": "S1", "gender": "All"},
            {"shift_id": "S2", "gender": "female"},
            {"shift_id": "S3", "gender": "male"},
            {"shift_id": "S4"}
        ]))
        .unwrap();
        assert!(!list.legacy);
        assert_eq!(
            list.shift_ids_for(Some(Gender::Female)),
            vec!["S1".to_string(), "S2".to_string(), "S4".to_string()]
        );
        assert_eq!(
            list.shift_ids_for(None),
            vec!["S1".to_string(), "S4".to_string()]
        );
    }

    #[test]
    fn test_record_punch_deduplicates_and_sorts() {
        let store = InMemoryStore::new();
        let late: DateTime<Utc> = "2024-03-01T12:00:00Z".parse().unwrap();
        let early: DateTime<Utc> = "2024-03-01T03:00:00Z".parse().unwrap();
        let punch = |instant, direction| PunchEvent {
            employee_id: "E1".into(),
            instant,
            direction,
        };
        assert!(store.record_punch(punch(late, Direction::Out)).unwrap());
        assert!(store.record_punch(punch(early, Direction::In)).unwrap());
        assert!(!store.record_punch(punch(early, Direction::In)).unwrap());

        let all = store
            .punches("E1", early, late + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].instant, early);
    }

    #[test]
    fn test_replace_pending_keeps_resolved() {
        let store = InMemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let record = |minute: u32, status| ConfusedShiftRecord {
            employee_id: "E1".into(),
            date,
            in_time: format!("2024-03-01T03:{minute:02}:00Z").parse().unwrap(),
            out_time: None,
            candidates: Vec::new(),
            status,
            resolved_shift_id: None,
        };
        store
            .upsert_confused(record(0, crate::models::ConfusedStatus::Resolved))
            .unwrap();
        store
            .upsert_confused(record(10, crate::models::ConfusedStatus::Pending))
            .unwrap();
        store
            .replace_pending_confused("E1", date, vec![record(20, crate::models::ConfusedStatus::Pending)])
            .unwrap();

        let records = store.confused_records("E1", date).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_pending());
        assert!(records[1].is_pending());
    }

    #[test]
    fn test_missing_directory_yields_empty_store() {
        let store = load_store_from_dir(Path::new("/nonexistent/attendance-data")).unwrap();
        assert!(store.active_shifts().unwrap().is_empty());
    }
}
