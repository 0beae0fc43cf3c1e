//! Shift candidate resolution.
//!
//! Collects the shifts an employee could be working on a date from the
//! roster and the organisational configuration tiers, in priority
//! order, keyed by shift id so the highest-priority tier wins.

use crate::error::AttendanceResult;
use crate::models::{Employee, RosterAssignment, ShiftCandidate, ShiftId, SourcePriority};
use crate::store::{ShiftCatalog, ShiftConfigList};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Deduplicated candidates for one (employee, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedCandidates {
    pub candidates: BTreeMap<ShiftId, ShiftCandidate>,
    pub has_roster: bool,
}

impl ResolvedCandidates {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn to_vec(&self) -> Vec<ShiftCandidate> {
        self.candidates.values().cloned().collect()
    }

    pub fn roster_candidate(&self) -> Option<&ShiftCandidate> {
        self.candidates.values().find(|c| c.is_roster())
    }

    /// Inserts every active shift of `ids` not already present.
    fn merge<C: ShiftCatalog + ?Sized>(
        &mut self,
        catalog: &C,
        ids: &[ShiftId],
        source: SourcePriority,
    ) -> AttendanceResult<()> {
        for id in ids {
            if self.candidates.contains_key(id) {
                continue;
            }
            match catalog.shift(id)? {
                Some(shift) if shift.active => {
                    self.candidates
                        .insert(id.clone(), ShiftCandidate::new(shift, source));
                }
                Some(_) => debug!(shift_id = %id, "configured shift is inactive"),
                None => warn!(shift_id = %id, "configured shift does not exist"),
            }
        }
        Ok(())
    }
}

fn designation_tier<C: ShiftCatalog + ?Sized>(
    catalog: &C,
    employee: &Employee,
) -> AttendanceResult<Option<ShiftConfigList>> {
    let Some(designation) = employee.designation_id.as_deref() else {
        return Ok(None);
    };
    match employee.division_id.as_deref() {
        Some(division) => {
            if let Some(department) = employee.department_id.as_deref() {
                if let Some(list) = catalog.designation_override(division, department, designation)? {
                    return Ok(Some(list));
                }
            }
            catalog.designation_default(division, designation)
        }
        None => catalog.legacy_designation(designation),
    }
}

fn department_tier<C: ShiftCatalog + ?Sized>(
    catalog: &C,
    employee: &Employee,
) -> AttendanceResult<Option<ShiftConfigList>> {
    let Some(department) = employee.department_id.as_deref() else {
        return Ok(None);
    };
    if let Some(division) = employee.division_id.as_deref() {
        if let Some(list) = catalog.department_default(division, department)? {
            return Ok(Some(list));
        }
    }
    catalog.legacy_department(department)
}

/// Resolves the candidate shifts for an employee on a date.
///
/// The roster shift (if any) comes first, then designation and
/// department shifts filtered by gender.  Only when those yield nothing
/// does the division baseline apply, and after that every active shift.
pub fn resolve_candidates<C: ShiftCatalog + ?Sized>(
    catalog: &C,
    employee: &Employee,
    roster: Option<&RosterAssignment>,
) -> AttendanceResult<ResolvedCandidates> {
    let mut resolved = ResolvedCandidates::default();

    if let Some(shift_id) = roster.and_then(|r| r.shift_id.as_ref()) {
        match catalog.shift(shift_id)? {
            Some(shift) => {
                resolved
                    .candidates
                    .insert(shift_id.clone(), ShiftCandidate::new(shift, SourcePriority::Roster));
                resolved.has_roster = true;
            }
            None => warn!(
                employee_id = %employee.id,
                shift_id = %shift_id,
                "rostered shift does not exist"
            ),
        }
    }

    if let Some(list) = designation_tier(catalog, employee)? {
        let ids = list.shift_ids_for(employee.gender);
        resolved.merge(catalog, &ids, SourcePriority::Designation)?;
    }
    if let Some(list) = department_tier(catalog, employee)? {
        let ids = list.shift_ids_for(employee.gender);
        resolved.merge(catalog, &ids, SourcePriority::Department)?;
    }

    if resolved.is_empty() {
        if let Some(division) = employee.division_id.as_deref() {
            if let Some(list) = catalog.division_baseline(division)? {
                debug!(employee_id = %employee.id, division_id = %division, "falling back to division shifts");
                let ids = list.shift_ids_for(employee.gender);
                resolved.merge(catalog, &ids, SourcePriority::Division)?;
            }
        }
    }

    if resolved.is_empty() {
        debug!(employee_id = %employee.id, "falling back to all active shifts");
        let ids: Vec<ShiftId> = catalog
            .active_shifts()?
            .into_iter()
            .map(|shift| shift.id)
            .collect();
        resolved.merge(catalog, &ids, SourcePriority::Global)?;
    }

    Ok(resolved)
}
