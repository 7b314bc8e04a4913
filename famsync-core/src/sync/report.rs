//! Per-target results of group operations.

use std::fmt;

use uuid::Uuid;

use crate::driver::TravelOutcome;
use crate::error::{SyncError, SyncResult};
use crate::store::Removal;

/// What happened to one calendar copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetApplied {
    Created { external_id: String },
    Updated,
    Deleted(Removal),
    /// The copy was already gone; counts as satisfied
    AlreadyGone,
}

#[derive(Debug)]
pub struct TargetOutcome {
    pub calendar_id: String,
    pub result: Result<TargetApplied, SyncError>,
    /// The calendar write went through but the registry did not follow it
    pub registry_error: Option<SyncError>,
}

impl TargetOutcome {
    pub fn applied(calendar_id: impl Into<String>, applied: TargetApplied) -> Self {
        TargetOutcome {
            calendar_id: calendar_id.into(),
            result: Ok(applied),
            registry_error: None,
        }
    }

    pub fn failed(calendar_id: impl Into<String>, err: SyncError) -> Self {
        TargetOutcome {
            calendar_id: calendar_id.into(),
            result: Err(err),
            registry_error: None,
        }
    }

    pub fn with_registry_error(mut self, err: SyncError) -> Self {
        self.registry_error = Some(err);
        self
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(TargetApplied::Created { external_id }) => {
                write!(f, "{}: created {external_id}", self.calendar_id)
            }
            Ok(TargetApplied::Updated) => write!(f, "{}: updated", self.calendar_id),
            Ok(TargetApplied::Deleted(Removal::Event)) => write!(f, "{}: deleted", self.calendar_id),
            Ok(TargetApplied::Deleted(Removal::Occurrences)) => {
                write!(f, "{}: occurrences deleted", self.calendar_id)
            }
            Ok(TargetApplied::AlreadyGone) => write!(f, "{}: already gone", self.calendar_id),
            Err(e) => write!(f, "{}: {e}", self.calendar_id),
        }?;
        match &self.registry_error {
            Some(e) => write!(f, " ({e})"),
            None => Ok(()),
        }
    }
}

/// Result of a group operation. Aggregate errors carry it too.
#[derive(Debug)]
pub struct GroupReport {
    pub group_id: Uuid,
    pub outcomes: Vec<TargetOutcome>,
    /// Display names of sibling calendars edited outside famsync
    pub externally_edited: Vec<String>,
    pub travel: Option<TravelOutcome>,
}

impl GroupReport {
    pub fn new(group_id: Uuid) -> Self {
        GroupReport {
            group_id,
            outcomes: Vec::new(),
            externally_edited: Vec::new(),
            travel: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Satisfied targets whose link records could not be brought in line.
    pub fn registry_errors(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.registry_error.is_some())
    }

    /// External ids of copies created by this operation.
    pub fn created_ids(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(TargetApplied::Created { external_id }) => {
                Some((o.calendar_id.as_str(), external_id.as_str()))
            }
            _ => None,
        })
    }

    /// Create/update policy: everything succeeded, or an aggregate error
    /// carrying the whole report.
    pub(crate) fn into_write_result(mut self) -> SyncResult<GroupReport> {
        let total = self.outcomes.len();
        let succeeded = self.succeeded();

        if succeeded == total {
            return Ok(self);
        }
        if succeeded == 0 && total == 1 {
            // The copy exists even though it is unlinked
            if matches!(
                self.outcomes.first().map(|o| &o.result),
                Some(Err(SyncError::Unlinked { .. }))
            ) {
                return Err(SyncError::PartialGroupFailure {
                    report: Box::new(self),
                });
            }
            if let Some(TargetOutcome {
                result: Err(err), ..
            }) = self.outcomes.pop()
            {
                return Err(err);
            }
        }
        if succeeded == 0 {
            return Err(SyncError::GroupFailed {
                report: Box::new(self),
            });
        }
        Err(SyncError::PartialGroupFailure {
            report: Box::new(self),
        })
    }

    /// Delete policy: success when at least one copy is removed or already gone.
    pub(crate) fn into_delete_result(self) -> SyncResult<GroupReport> {
        if self.succeeded() > 0 {
            Ok(self)
        } else {
            Err(SyncError::GroupFailed {
                report: Box::new(self),
            })
        }
    }
}

/// Lifecycle state of one link group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Exactly one record
    Unlinked,
    /// Several records, none edited elsewhere
    Linked,
    /// Several records, at least one edited elsewhere
    LinkedDivergent,
    /// Some copies could not be removed or no longer resolve
    PartiallyDeleted,
    /// No records left
    Gone,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GroupState::Unlinked => "unlinked",
            GroupState::Linked => "linked",
            GroupState::LinkedDivergent => "linked (diverged)",
            GroupState::PartiallyDeleted => "partially deleted",
            GroupState::Gone => "gone",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: Vec<Result<TargetApplied, SyncError>>) -> GroupReport {
        let mut report = GroupReport::new(Uuid::new_v4());
        for (i, result) in results.into_iter().enumerate() {
            report.outcomes.push(TargetOutcome {
                calendar_id: format!("cal-{i}"),
                result,
                registry_error: None,
            });
        }
        report
    }

    fn write_failed() -> SyncError {
        SyncError::WriteFailed {
            calendar_id: "x".into(),
            reason: "offline".into(),
        }
    }

    #[test]
    fn test_mixed_outcomes_are_partial_failure() {
        let r = report(vec![Ok(TargetApplied::Updated), Err(write_failed())]);
        let err = r.into_write_result().unwrap_err();
        assert!(matches!(err, SyncError::PartialGroupFailure { ref report } if report.outcomes.len() == 2));
    }

    #[test]
    fn test_lone_failure_surfaces_its_own_error() {
        let r = report(vec![Err(write_failed())]);
        assert!(matches!(
            r.into_write_result().unwrap_err(),
            SyncError::WriteFailed { .. }
        ));
    }

    #[test]
    fn test_lone_unlinked_copy_is_partial_failure() {
        let r = report(vec![Err(SyncError::Unlinked {
            calendar_id: "cal-0".into(),
            reason: "registry offline".into(),
        })]);
        assert!(matches!(
            r.into_write_result().unwrap_err(),
            SyncError::PartialGroupFailure { .. }
        ));
    }

    #[test]
    fn test_aggregate_error_keeps_group_and_travel() {
        let mut r = report(vec![Ok(TargetApplied::Updated), Err(write_failed())]);
        let group_id = r.group_id;
        r.travel = Some(TravelOutcome::Removed);
        r.externally_edited = vec!["Ben".into()];

        let err = r.into_write_result().unwrap_err();
        let kept = err.report().unwrap();

        assert_eq!(kept.group_id, group_id);
        assert_eq!(kept.travel, Some(TravelOutcome::Removed));
        assert_eq!(kept.externally_edited, ["Ben"]);
    }

    #[test]
    fn test_removed_copy_with_registry_error_still_counts() {
        let mut r = GroupReport::new(Uuid::new_v4());
        r.outcomes.push(
            TargetOutcome::applied("cal-0", TargetApplied::Deleted(Removal::Event))
                .with_registry_error(SyncError::StaleLink {
                    calendar_id: "cal-0".into(),
                    reason: "database is locked".into(),
                }),
        );

        let ok = r.into_delete_result().unwrap();
        assert_eq!(ok.registry_errors().count(), 1);
        assert!(ok.outcomes[0].to_string().starts_with("cal-0: deleted ("));
    }

    #[test]
    fn test_delete_with_one_satisfied_target_succeeds() {
        let r = report(vec![Err(write_failed()), Ok(TargetApplied::AlreadyGone)]);
        let ok = r.into_delete_result().unwrap();
        assert_eq!(ok.failures().count(), 1);

        let none = report(vec![Err(write_failed())]);
        assert!(matches!(
            none.into_delete_result().unwrap_err(),
            SyncError::GroupFailed { .. }
        ));
    }
}
