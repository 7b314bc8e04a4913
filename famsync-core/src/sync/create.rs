use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{GroupReport, SyncCoordinator, TargetApplied, TargetOutcome};
use crate::driver::DriverAssignment;
use crate::error::{SyncError, SyncResult};
use crate::event::{CalendarEvent, EventDraft};
use crate::notify::Notification;
use crate::recurrence::RecurrenceRule;
use crate::registry::LinkedEventRecord;

/// A new family event and the calendars that should hold a copy.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub draft: EventDraft,
    /// Target calendars, processed in this order
    pub calendars: Vec<String>,
    pub recurrence: Option<RecurrenceRule>,
    pub driver: Option<DriverAssignment>,
}

impl CreateRequest {
    pub fn new(draft: EventDraft, calendars: Vec<String>) -> Self {
        CreateRequest {
            draft,
            calendars,
            recurrence: None,
            driver: None,
        }
    }

    pub fn with_recurrence(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = Some(rule);
        self
    }

    pub fn with_driver(mut self, driver: DriverAssignment) -> Self {
        self.driver = Some(driver);
        self
    }
}

impl SyncCoordinator {
    /// Create one copy per target calendar, all sharing a fresh group id.
    ///
    /// Already created copies are never rolled back when a later target
    /// fails; the per-target outcomes say which copies exist.
    #[instrument(skip(self, request), fields(title = %request.draft.title, targets = request.calendars.len()))]
    pub async fn create(&self, request: CreateRequest) -> SyncResult<GroupReport> {
        request.draft.validate()?;
        if let Some(rule) = &request.recurrence {
            rule.validate()?;
        }
        if request.calendars.is_empty() {
            return Err(SyncError::InvalidEvent("no target calendars".into()));
        }

        let _gate = self.write_gate.write().await;

        let shared: HashSet<String> = match self.store.calendars().await {
            Ok(calendars) => calendars
                .into_iter()
                .filter(|c| c.shared)
                .map(|c| c.id)
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not list calendars; copies recorded as personal");
                HashSet::new()
            }
        };

        let group_id = Uuid::new_v4();
        let mut report = GroupReport::new(group_id);
        let mut primary: Option<CalendarEvent> = None;
        let mut seen = HashSet::new();

        for calendar_id in &request.calendars {
            if !seen.insert(calendar_id.as_str()) {
                debug!(calendar = %calendar_id, "duplicate target skipped");
                continue;
            }

            let written = match &request.recurrence {
                Some(rule) => {
                    self.store
                        .create_recurring_event(calendar_id, &request.draft, rule)
                        .await
                }
                None => self.store.create_event(calendar_id, &request.draft).await,
            };
            let event = match written {
                Ok(event) => event,
                Err(e) => {
                    warn!(calendar = %calendar_id, error = %e, "create failed");
                    report.outcomes.push(TargetOutcome::failed(calendar_id, e));
                    continue;
                }
            };

            let mut record = LinkedEventRecord::new(
                group_id,
                calendar_id,
                &event.external_id,
                self.synced_at(&event).await,
            );
            record.is_shared_calendar_copy = shared.contains(calendar_id);
            record.driver = request.driver.map(|d| d.driver);
            record.driver_travel_minutes = request.driver.and_then(|d| d.travel_minutes);

            self.notify(Notification::scheduled(&event));

            match self.registry.upsert(&record).await {
                Ok(()) => {
                    debug!(calendar = %calendar_id, external_id = %event.external_id, "copy created");
                    report.outcomes.push(TargetOutcome::applied(
                        calendar_id,
                        TargetApplied::Created {
                            external_id: event.external_id.clone(),
                        },
                    ));
                    primary.get_or_insert(event);
                }
                Err(e) => {
                    warn!(calendar = %calendar_id, error = %e, "copy created but not linked");
                    report.outcomes.push(TargetOutcome::failed(
                        calendar_id,
                        SyncError::Unlinked {
                            calendar_id: calendar_id.clone(),
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }

        if let (Some(primary), Some(_)) = (&primary, request.driver) {
            report.travel = self.sync_travel(group_id, primary, request.driver).await;
        }

        info!(
            %group_id,
            succeeded = report.succeeded(),
            total = report.outcomes.len(),
            "group created"
        );
        report.into_write_result()
    }
}
