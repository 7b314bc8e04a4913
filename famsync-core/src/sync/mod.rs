//! Group operations across linked calendar copies.
//!
//! Every create, update and delete writes the target calendars one at a
//! time in a stable order, and touches the registry immediately after each
//! successful external write. Nothing is rolled back: a partial result is
//! reported per target instead.

mod create;
mod delete;
mod detect;
mod report;
mod update;

pub use create::CreateRequest;
pub use delete::{DeleteOptions, DeleteRequest, DeleteScope, DeleteSpan};
pub use detect::is_externally_edited;
pub use report::{GroupReport, GroupState, TargetApplied, TargetOutcome};
pub use update::{DriverUpdate, Propagation, UpdatePlan, UpdateRequest};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{RwLock, mpsc::UnboundedSender};
use tracing::warn;
use uuid::Uuid;

use crate::driver::{DriverAssignment, TravelDeriver, TravelOutcome};
use crate::event::{CalendarEvent, home_calendar_for};
use crate::notify::{Notification, Notifier};
use crate::registry::{DriverRef, LinkRegistry, LinkedEventRecord, TravelEventRef};
use crate::store::CalendarStore;

/// Default tolerance, in seconds, before a newer `last_modified` counts as
/// an external edit.
pub const DEFAULT_SKEW_SECS: i64 = 2;

pub struct SyncCoordinator {
    store: Arc<dyn CalendarStore>,
    registry: Arc<dyn LinkRegistry>,
    skew: Duration,
    notifier: Option<Notifier>,
    write_gate: Arc<RwLock<()>>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn CalendarStore>, registry: Arc<dyn LinkRegistry>) -> Self {
        SyncCoordinator {
            store,
            registry,
            skew: Duration::seconds(DEFAULT_SKEW_SECS),
            notifier: None,
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn with_skew_tolerance(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_notifications(mut self, tx: UnboundedSender<Notification>) -> Self {
        self.notifier = Some(Notifier::new(tx));
        self
    }

    pub fn store(&self) -> &Arc<dyn CalendarStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn LinkRegistry> {
        &self.registry
    }

    /// Held exclusively for the duration of every group operation.
    /// Readers that must not observe a half-finished write take it shared.
    pub fn write_gate(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.write_gate)
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.send(notification);
        }
    }

    /// The `last_modified` to record for a copy we just wrote.
    async fn synced_at(&self, written: &CalendarEvent) -> DateTime<Utc> {
        match self
            .store
            .last_modified(&written.calendar_id, &written.external_id)
            .await
        {
            Ok(Some(at)) => at,
            _ => written.last_modified.unwrap_or_else(Utc::now),
        }
    }

    /// Bring the derived travel event in line with `assignment` and store
    /// the result on every record of the group.
    ///
    /// Travel problems never fail the primary operation; they are reported
    /// in the returned outcome.
    async fn sync_travel(
        &self,
        group_id: Uuid,
        primary: &CalendarEvent,
        assignment: Option<DriverAssignment>,
    ) -> Option<TravelOutcome> {
        let records = match self.registry.get(group_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, %group_id, "could not load group for travel derivation");
                return Some(TravelOutcome::Failed(e.to_string()));
            }
        };
        let previous_driver = records.iter().find_map(|r| r.driver);
        let previous_travel = records.iter().find_map(|r| r.travel_event.clone());
        let deriver = TravelDeriver::new(self.store.as_ref());

        let outcome = match assignment {
            Some(DriverAssignment {
                driver: DriverRef::Person(person),
                travel_minutes: Some(minutes),
            }) => {
                let existing = match previous_driver {
                    Some(DriverRef::Person(p)) if p == person => previous_travel.as_ref(),
                    _ => {
                        if let Some(old) = &previous_travel {
                            if let Err(e) = deriver.remove_travel_event(old).await {
                                warn!(error = %e, "could not remove previous driver's travel event");
                            }
                        }
                        None
                    }
                };
                let home = match self.store.calendars().await {
                    Ok(calendars) => home_calendar_for(person, &calendars).map(|c| c.id.clone()),
                    Err(e) => {
                        warn!(error = %e, "could not list calendars for travel derivation");
                        None
                    }
                };
                Some(
                    deriver
                        .ensure_travel_event(primary, minutes, home.as_deref(), existing)
                        .await
                        .unwrap_or_else(|e| TravelOutcome::Failed(e.to_string())),
                )
            }
            _ => match &previous_travel {
                Some(old) => Some(match deriver.remove_travel_event(old).await {
                    Ok(()) => TravelOutcome::Removed,
                    Err(e) => TravelOutcome::Failed(e.to_string()),
                }),
                None => None,
            },
        };

        if let Some(TravelOutcome::Failed(reason)) = &outcome {
            warn!(%group_id, reason = %reason, "travel event not derived");
        }

        let travel_event: Option<TravelEventRef> = match &outcome {
            Some(TravelOutcome::Failed(_)) => previous_travel.clone(),
            Some(o) => o.travel_ref().cloned(),
            None => None,
        };
        self.store_assignment(records, assignment, travel_event).await;
        outcome
    }

    async fn store_assignment(
        &self,
        records: Vec<LinkedEventRecord>,
        assignment: Option<DriverAssignment>,
        travel_event: Option<TravelEventRef>,
    ) {
        for mut record in records {
            record.driver = assignment.map(|a| a.driver);
            record.driver_travel_minutes = assignment.and_then(|a| a.travel_minutes);
            record.travel_event = travel_event.clone();
            if let Err(e) = self.registry.upsert(&record).await {
                warn!(error = %e, calendar = %record.calendar_id, "could not store driver assignment");
            }
        }
    }
}

/// The driver assignment recorded on a group.
fn recorded_assignment(records: &[LinkedEventRecord]) -> Option<DriverAssignment> {
    records.iter().find_map(|r| {
        r.driver.map(|driver| DriverAssignment {
            driver,
            travel_minutes: r.driver_travel_minutes,
        })
    })
}
