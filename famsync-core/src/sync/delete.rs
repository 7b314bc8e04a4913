use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{GroupReport, SyncCoordinator, TargetApplied, TargetOutcome};
use crate::driver::{TravelDeriver, TravelOutcome};
use crate::error::{SyncError, SyncResult};
use crate::notify::Notification;
use crate::registry::LinkedEventRecord;
use crate::store::{Removal, Span};

/// Temporal reach of a delete on a recurring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteSpan {
    ThisOccurrence,
    ThisAndFuture,
}

impl From<DeleteSpan> for Span {
    fn from(span: DeleteSpan) -> Self {
        match span {
            DeleteSpan::ThisOccurrence => Span::ThisEvent,
            DeleteSpan::ThisAndFuture => Span::FutureEvents,
        }
    }
}

/// Calendar breadth of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// Only the copy the user is looking at
    SingleCalendar,
    /// Every copy in the link group
    AllLinked,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub calendar_id: String,
    pub external_id: String,
    /// Original start of the addressed occurrence, for recurring events
    pub occurrence: Option<DateTime<Utc>>,
    pub span: Option<DeleteSpan>,
    pub scope: Option<DeleteScope>,
}

impl DeleteRequest {
    pub fn new(calendar_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        DeleteRequest {
            calendar_id: calendar_id.into(),
            external_id: external_id.into(),
            occurrence: None,
            span: None,
            scope: None,
        }
    }

    pub fn at_occurrence(mut self, occurrence: DateTime<Utc>) -> Self {
        self.occurrence = Some(occurrence);
        self
    }

    pub fn with_span(mut self, span: DeleteSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_scope(mut self, scope: DeleteScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Which choices a delete needs from the user before it may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOptions {
    /// The event recurs: this occurrence or this and future?
    pub needs_span: bool,
    /// The event is linked: this calendar or all copies?
    pub needs_scope: bool,
    /// Calendars holding a linked copy, the addressed one included
    pub linked_calendars: Vec<String>,
}

impl SyncCoordinator {
    pub async fn delete_options(&self, calendar_id: &str, external_id: &str) -> SyncResult<DeleteOptions> {
        let needs_span = match self.store.find_event(calendar_id, external_id, None).await {
            Ok(Some(event)) => event.has_recurrence(),
            Ok(None) | Err(SyncError::EventNotFound { .. }) => false,
            Err(e) => return Err(e),
        };
        let linked = self.group_of(calendar_id, external_id).await?;

        Ok(DeleteOptions {
            needs_span,
            needs_scope: linked.len() > 1,
            linked_calendars: linked.into_iter().map(|r| r.calendar_id).collect(),
        })
    }

    /// Delete one copy or the whole group.
    ///
    /// Deletion is idempotent: a copy that is already gone counts as
    /// satisfied. The delete succeeds when at least one copy was removed or
    /// already gone; copies that could not be removed are marked orphaned.
    /// A removed copy whose record could not be dropped still counts, with
    /// the registry error attached to its outcome.
    #[instrument(skip(self, request), fields(calendar = %request.calendar_id, external_id = %request.external_id))]
    pub async fn delete(&self, request: DeleteRequest) -> SyncResult<GroupReport> {
        let options = self
            .delete_options(&request.calendar_id, &request.external_id)
            .await?;
        if options.needs_span && request.span.is_none() {
            return Err(SyncError::ScopeRequired("span"));
        }
        if options.needs_scope && request.scope.is_none() {
            return Err(SyncError::ScopeRequired("scope"));
        }
        if options.needs_span
            && request.span == Some(DeleteSpan::ThisOccurrence)
            && request.occurrence.is_none()
        {
            return Err(SyncError::InvalidEvent(
                "deleting one occurrence requires its start time".into(),
            ));
        }

        let _gate = self.write_gate.write().await;

        let group = self
            .group_of(&request.calendar_id, &request.external_id)
            .await?;
        let group_id = group.first().map_or_else(Uuid::new_v4, |r| r.group_id);
        let travel = group.iter().find_map(|r| r.travel_event.clone());

        let targets: Vec<(String, String, Option<LinkedEventRecord>)> =
            match (request.scope, group.is_empty()) {
                (Some(DeleteScope::AllLinked), false) => group
                    .into_iter()
                    .map(|r| (r.calendar_id.clone(), r.external_event_id.clone(), Some(r)))
                    .collect(),
                _ => {
                    let record = group.into_iter().find(|r| {
                        r.calendar_id == request.calendar_id
                            && r.external_event_id == request.external_id
                    });
                    vec![(
                        request.calendar_id.clone(),
                        request.external_id.clone(),
                        record,
                    )]
                }
            };

        // Without a span the whole copy goes, series included.
        let (occurrence, span) = match request.span {
            Some(span) => (request.occurrence, Span::from(span)),
            None => (None, Span::FutureEvents),
        };

        let mut report = GroupReport::new(group_id);
        for (calendar_id, external_id, record) in targets {
            let outcome = self
                .delete_copy(&calendar_id, &external_id, record, occurrence, span)
                .await;
            report.outcomes.push(outcome);
        }

        if let Some(travel) = travel {
            match self.registry.get(group_id).await {
                Ok(remaining) if remaining.is_empty() => {
                    report.travel = Some(
                        match TravelDeriver::new(self.store.as_ref())
                            .remove_travel_event(&travel)
                            .await
                        {
                            Ok(()) => TravelOutcome::Removed,
                            Err(e) => TravelOutcome::Failed(e.to_string()),
                        },
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%group_id, error = %e, "could not load group, travel event left in place");
                    report.travel = Some(TravelOutcome::Failed(e.to_string()));
                }
            }
        }

        info!(
            %group_id,
            succeeded = report.succeeded(),
            total = report.outcomes.len(),
            "group delete finished"
        );
        report.into_delete_result()
    }

    async fn delete_copy(
        &self,
        calendar_id: &str,
        external_id: &str,
        record: Option<LinkedEventRecord>,
        occurrence: Option<DateTime<Utc>>,
        span: Span,
    ) -> TargetOutcome {
        let applied = match self
            .store
            .delete_event(calendar_id, external_id, occurrence, span)
            .await
        {
            Ok(removal) => TargetApplied::Deleted(removal),
            Err(SyncError::EventNotFound { .. }) => TargetApplied::AlreadyGone,
            Err(e) => {
                warn!(calendar = %calendar_id, error = %e, "delete failed");
                if let Some(record) = &record {
                    if let Err(err) = self.registry.mark_orphaned(record.id).await {
                        warn!(error = %err, "could not mark record orphaned");
                    }
                }
                return TargetOutcome::failed(calendar_id, e);
            }
        };

        let record_id = record.as_ref().map(|r| r.id);
        let registry_result = match (&applied, record) {
            (TargetApplied::Deleted(Removal::Occurrences), Some(mut record)) => {
                // The series copy remains; its own write is not an external edit.
                match self.store.last_modified(calendar_id, external_id).await {
                    Ok(Some(at)) => record.last_synced_at = at,
                    _ => record.last_synced_at = Utc::now(),
                }
                self.registry.upsert(&record).await
            }
            (_, Some(record)) => self.registry.delete(&record).await,
            (_, None) => Ok(()),
        };

        if applied != TargetApplied::Deleted(Removal::Occurrences) {
            self.notify(Notification::cancelled(external_id));
        }

        match registry_result {
            Ok(()) => TargetOutcome::applied(calendar_id, applied),
            Err(e) => {
                warn!(calendar = %calendar_id, error = %e, "copy removed but registry not updated");
                if let Some(id) = record_id {
                    if let Err(err) = self.registry.mark_orphaned(id).await {
                        warn!(error = %err, "could not mark record orphaned");
                    }
                }
                TargetOutcome::applied(calendar_id, applied).with_registry_error(
                    SyncError::StaleLink {
                        calendar_id: calendar_id.to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Every record in the group of a copy, oldest first. Empty when the
    /// copy is not linked.
    async fn group_of(&self, calendar_id: &str, external_id: &str) -> SyncResult<Vec<LinkedEventRecord>> {
        match self
            .registry
            .get_by_external_id(calendar_id, external_id)
            .await?
        {
            Some(record) => self.registry.get(record.group_id).await,
            None => Ok(Vec::new()),
        }
    }
}
