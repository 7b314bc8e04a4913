use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{GroupState, SyncCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::registry::LinkedEventRecord;

/// A copy is externally edited when the store saw a modification later than
/// our last write by more than `skew`.
pub fn is_externally_edited(
    last_modified: DateTime<Utc>,
    last_synced_at: DateTime<Utc>,
    skew: Duration,
) -> bool {
    last_modified > last_synced_at + skew
}

impl SyncCoordinator {
    /// Display names of the calendars holding linked siblings of this copy
    /// that were edited outside famsync. Advisory only.
    pub async fn detect_external_edits(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Vec<String>> {
        let Some(record) = self
            .registry
            .get_by_external_id(calendar_id, external_id)
            .await?
        else {
            return Ok(Vec::new());
        };
        let siblings: Vec<LinkedEventRecord> = self
            .registry
            .get(record.group_id)
            .await?
            .into_iter()
            .filter(|r| r.id != record.id)
            .collect();
        Ok(self.external_edits(&siblings).await)
    }

    pub async fn group_state(&self, group_id: Uuid) -> SyncResult<GroupState> {
        let records = self.registry.get(group_id).await?;
        if records.is_empty() {
            return Ok(GroupState::Gone);
        }
        if records.iter().any(|r| r.is_orphaned()) {
            return Ok(GroupState::PartiallyDeleted);
        }
        if records.len() == 1 {
            return Ok(GroupState::Unlinked);
        }
        if self.external_edits(&records).await.is_empty() {
            Ok(GroupState::Linked)
        } else {
            Ok(GroupState::LinkedDivergent)
        }
    }

    /// Calendar display names among `records` whose copy was edited elsewhere.
    ///
    /// Copies that cannot be read are not reported here; the write that
    /// follows surfaces them.
    pub(crate) async fn external_edits(&self, records: &[LinkedEventRecord]) -> Vec<String> {
        let names: HashMap<String, String> = match self.store.calendars().await {
            Ok(calendars) => calendars.into_iter().map(|c| (c.id, c.name)).collect(),
            Err(_) => HashMap::new(),
        };

        let mut edited = Vec::new();
        for record in records.iter().filter(|r| !r.is_orphaned()) {
            let last_modified = match self
                .store
                .last_modified(&record.calendar_id, &record.external_event_id)
                .await
            {
                Ok(Some(at)) => at,
                Ok(None) => continue,
                Err(SyncError::EventNotFound { .. } | SyncError::CalendarUnavailable(_)) => {
                    debug!(calendar = %record.calendar_id, "linked copy not readable");
                    continue;
                }
                Err(e) => {
                    warn!(calendar = %record.calendar_id, error = %e, "could not read last_modified");
                    continue;
                }
            };

            if is_externally_edited(last_modified, record.last_synced_at, self.skew) {
                let name = names
                    .get(&record.calendar_id)
                    .cloned()
                    .unwrap_or_else(|| record.calendar_id.clone());
                if !edited.contains(&name) {
                    edited.push(name);
                }
            }
        }
        edited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_edit_beyond_skew_is_external() {
        let t = Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap();
        let skew = Duration::seconds(2);

        assert!(is_externally_edited(t + Duration::hours(1), t, skew));
        assert!(!is_externally_edited(t, t, skew));
        assert!(!is_externally_edited(t + Duration::seconds(2), t, skew));
    }
}
