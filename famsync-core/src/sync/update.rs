use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{GroupReport, SyncCoordinator, TargetApplied, TargetOutcome, recorded_assignment};
use crate::driver::{DriverAssignment, TravelOutcome};
use crate::error::{SyncError, SyncResult};
use crate::event::CalendarEvent;
use crate::notify::Notification;
use crate::registry::LinkedEventRecord;
use crate::store::Span;

/// Which copies an update is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Every linked copy, including ones edited elsewhere
    AllLinked,
    /// Only the copy being edited
    ThisCalendarOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverUpdate {
    /// Keep the current driver; the travel window follows the new start time
    Keep,
    Clear,
    Set(DriverAssignment),
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// The edited event as the caller sees it. For an occurrence of a
    /// series, `occurrence` still holds the original occurrence start.
    pub event: CalendarEvent,
    pub driver: DriverUpdate,
    /// Explicit span. When absent the span follows the edit: a rule change
    /// or an occurrence in a store without overrides edits future events.
    pub span: Option<Span>,
}

impl UpdateRequest {
    pub fn new(event: CalendarEvent) -> Self {
        UpdateRequest {
            event,
            driver: DriverUpdate::Keep,
            span: None,
        }
    }

    pub fn with_driver(mut self, driver: DriverUpdate) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// What an update would touch, computed before asking the user anything.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub record: Option<LinkedEventRecord>,
    pub siblings: Vec<LinkedEventRecord>,
    /// Display names of sibling calendars edited outside famsync
    pub externally_edited: Vec<String>,
}

impl UpdatePlan {
    pub fn is_linked(&self) -> bool {
        !self.siblings.is_empty()
    }

    /// Whether the caller should choose between propagating and keeping
    /// the edit local.
    pub fn needs_decision(&self) -> bool {
        !self.externally_edited.is_empty()
    }
}

/// Span for writing `edited` over `original`.
pub(crate) fn choose_span(
    original: &CalendarEvent,
    edited: &CalendarEvent,
    supports_overrides: bool,
) -> Span {
    if original.recurrence != edited.recurrence {
        return Span::FutureEvents;
    }
    if edited.occurrence.is_some() && original.has_recurrence() && !supports_overrides {
        return Span::FutureEvents;
    }
    Span::ThisEvent
}

impl SyncCoordinator {
    /// Load the group of a copy and check its siblings for external edits.
    pub async fn prepare_update(&self, calendar_id: &str, external_id: &str) -> SyncResult<UpdatePlan> {
        let Some(record) = self
            .registry
            .get_by_external_id(calendar_id, external_id)
            .await?
        else {
            return Ok(UpdatePlan {
                record: None,
                siblings: Vec::new(),
                externally_edited: Vec::new(),
            });
        };

        let siblings: Vec<LinkedEventRecord> = self
            .registry
            .get(record.group_id)
            .await?
            .into_iter()
            .filter(|r| r.id != record.id)
            .collect();
        let externally_edited = self.external_edits(&siblings).await;

        Ok(UpdatePlan {
            record: Some(record),
            siblings,
            externally_edited,
        })
    }

    /// Write an edit to the edited copy and, per `propagation`, its siblings.
    ///
    /// External edits on siblings are reported, never silently resolved:
    /// with [`Propagation::AllLinked`] they are overwritten because the
    /// caller chose so.
    #[instrument(skip(self, request), fields(calendar = %request.event.calendar_id, external_id = %request.event.external_id))]
    pub async fn update(
        &self,
        request: UpdateRequest,
        propagation: Propagation,
    ) -> SyncResult<GroupReport> {
        let edited = &request.event;
        edited.to_draft().validate()?;
        if let Some(rule) = &edited.recurrence {
            rule.validate()?;
        }

        let _gate = self.write_gate.write().await;

        let original = self
            .store
            .find_event(&edited.calendar_id, &edited.external_id, edited.occurrence)
            .await?
            .ok_or_else(|| SyncError::EventNotFound {
                calendar_id: edited.calendar_id.clone(),
                external_id: edited.external_id.clone(),
            })?;

        let plan = self
            .prepare_update(&edited.calendar_id, &edited.external_id)
            .await?;
        if plan.needs_decision() {
            warn!(calendars = ?plan.externally_edited, "siblings edited elsewhere");
        }

        let group_id = plan.record.as_ref().map_or_else(Uuid::new_v4, |r| r.group_id);
        let mut report = GroupReport::new(group_id);
        report.externally_edited = plan.externally_edited.clone();

        let supports_overrides = self.store.supports_occurrence_overrides();
        let primary_span = request
            .span
            .unwrap_or_else(|| choose_span(&original, edited, supports_overrides));

        // Primary copy first; it is what the user is looking at.
        let primary_written = match self.store.update_event(edited, primary_span).await {
            Ok(written) => {
                let outcome = self.relink(plan.record.clone(), group_id, &written).await;
                report.outcomes.push(outcome);
                Some(written)
            }
            Err(e) => {
                warn!(error = %e, "update failed on the edited copy");
                report
                    .outcomes
                    .push(TargetOutcome::failed(&edited.calendar_id, e));
                None
            }
        };

        if propagation == Propagation::AllLinked {
            for sibling in plan.siblings.iter().filter(|s| !s.is_orphaned()) {
                let outcome = self.update_sibling(sibling, edited, request.span).await;
                report.outcomes.push(outcome);
            }
        }

        if let Some(primary) = &primary_written {
            match self.registry.get(group_id).await {
                Ok(records) => {
                    let assignment = match request.driver {
                        DriverUpdate::Keep => recorded_assignment(&records),
                        DriverUpdate::Clear => None,
                        DriverUpdate::Set(assignment) => Some(assignment),
                    };
                    let has_travel = records.iter().any(|r| r.travel_event.is_some());
                    let had_driver = records.iter().any(|r| r.driver.is_some());
                    if assignment.is_some() || has_travel || had_driver {
                        report.travel = self.sync_travel(group_id, primary, assignment).await;
                    }
                }
                Err(e) => {
                    warn!(%group_id, error = %e, "could not load group, travel not re-derived");
                    report.travel = Some(TravelOutcome::Failed(e.to_string()));
                }
            }
        }

        info!(
            %group_id,
            succeeded = report.succeeded(),
            total = report.outcomes.len(),
            ?propagation,
            "group updated"
        );
        report.into_write_result()
    }

    async fn update_sibling(
        &self,
        sibling: &LinkedEventRecord,
        edited: &CalendarEvent,
        explicit_span: Option<Span>,
    ) -> TargetOutcome {
        let found = self
            .store
            .find_event(&sibling.calendar_id, &sibling.external_event_id, edited.occurrence)
            .await;
        let original = match found {
            Ok(Some(event)) => event,
            Ok(None) | Err(SyncError::EventNotFound { .. }) => {
                warn!(calendar = %sibling.calendar_id, "linked copy is missing, marking orphaned");
                if let Err(e) = self.registry.mark_orphaned(sibling.id).await {
                    warn!(error = %e, "could not mark record orphaned");
                }
                return TargetOutcome::failed(
                    &sibling.calendar_id,
                    SyncError::EventNotFound {
                        calendar_id: sibling.calendar_id.clone(),
                        external_id: sibling.external_event_id.clone(),
                    },
                );
            }
            Err(e) => return TargetOutcome::failed(&sibling.calendar_id, e),
        };

        let mut target = original.clone();
        target.apply_draft(&edited.to_draft());
        target.recurrence = edited.recurrence;
        let span = explicit_span.unwrap_or_else(|| {
            choose_span(&original, &target, self.store.supports_occurrence_overrides())
        });

        match self.store.update_event(&target, span).await {
            Ok(written) => self.relink(Some(sibling.clone()), sibling.group_id, &written).await,
            Err(e) => {
                warn!(calendar = %sibling.calendar_id, error = %e, "sibling update failed");
                TargetOutcome::failed(&sibling.calendar_id, e)
            }
        }
    }

    /// Record a successful write: refresh `last_synced_at`, or adopt a copy
    /// that was not linked yet.
    async fn relink(
        &self,
        record: Option<LinkedEventRecord>,
        group_id: Uuid,
        written: &CalendarEvent,
    ) -> TargetOutcome {
        let synced_at = self.synced_at(written).await;
        let record = match record {
            Some(mut record) => {
                if record.external_event_id != written.external_id {
                    debug!(
                        calendar = %written.calendar_id,
                        from = %record.external_event_id,
                        to = %written.external_id,
                        "copy moved to split series"
                    );
                    record.external_event_id = written.external_id.clone();
                }
                record.last_synced_at = synced_at;
                record
            }
            None => {
                debug!(calendar = %written.calendar_id, "adopting unlinked event");
                LinkedEventRecord::new(
                    group_id,
                    &written.calendar_id,
                    &written.external_id,
                    synced_at,
                )
            }
        };

        self.notify(Notification::scheduled(written));

        match self.registry.upsert(&record).await {
            Ok(()) => TargetOutcome::applied(&written.calendar_id, TargetApplied::Updated),
            Err(e) => TargetOutcome::failed(
                &written.calendar_id,
                SyncError::Unlinked {
                    calendar_id: written.calendar_id.clone(),
                    reason: e.to_string(),
                },
            ),
        }
    }
}
