//! Travel events derived from a primary event and its driver.
//!
//! A family member who drives to an event gets a "Travel to ..." event in
//! their home calendar. It always ends when the primary event starts.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::event::{CalendarEvent, EventDraft};
use crate::registry::{DriverRef, TravelEventRef};
use crate::store::{CalendarStore, Span};

/// Who drives and how long the trip takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverAssignment {
    pub driver: DriverRef,
    /// Only meaningful for family-member drivers
    pub travel_minutes: Option<u32>,
}

/// What happened to the derived travel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TravelOutcome {
    Created(TravelEventRef),
    Updated(TravelEventRef),
    Removed,
    /// Travel was not derived; the primary event is unaffected
    Skipped(String),
    Failed(String),
}

impl TravelOutcome {
    /// The travel event that exists after this outcome, if any.
    pub fn travel_ref(&self) -> Option<&TravelEventRef> {
        match self {
            TravelOutcome::Created(r) | TravelOutcome::Updated(r) => Some(r),
            _ => None,
        }
    }
}

pub fn travel_window(primary_start: DateTime<Utc>, minutes: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        primary_start - Duration::minutes(i64::from(minutes)),
        primary_start,
    )
}

pub fn travel_title(primary_title: &str) -> String {
    format!("Travel to {primary_title}")
}

pub struct TravelDeriver<'a> {
    store: &'a dyn CalendarStore,
}

impl<'a> TravelDeriver<'a> {
    pub fn new(store: &'a dyn CalendarStore) -> Self {
        TravelDeriver { store }
    }

    /// Create or update the travel event for `primary`.
    ///
    /// An existing travel event in the same home calendar is updated in
    /// place. One in a different calendar belongs to a previous driver and
    /// is replaced.
    pub async fn ensure_travel_event(
        &self,
        primary: &CalendarEvent,
        travel_minutes: u32,
        home_calendar_id: Option<&str>,
        existing: Option<&TravelEventRef>,
    ) -> SyncResult<TravelOutcome> {
        let Some(home) = home_calendar_id else {
            if let Some(old) = existing {
                self.remove_travel_event(old).await?;
            }
            return Ok(TravelOutcome::Skipped(
                "driver has no auto-linked home calendar".into(),
            ));
        };

        let (start, end) = travel_window(primary.start, travel_minutes);

        if let Some(old) = existing {
            if old.calendar_id == home {
                if let Some(mut travel) = self.store.find_event(home, &old.external_id, None).await? {
                    travel.title = travel_title(&primary.title);
                    travel.start = start;
                    travel.end = end;
                    travel.location = primary.location.clone();
                    self.store.update_event(&travel, Span::ThisEvent).await?;
                    debug!(travel = %old.external_id, "travel event updated in place");
                    return Ok(TravelOutcome::Updated(old.clone()));
                }
            } else {
                self.remove_travel_event(old).await?;
            }
        }

        let mut draft = EventDraft::new(travel_title(&primary.title), start, end);
        draft.location = primary.location.clone();
        let created = self.store.create_event(home, &draft).await?;
        info!(calendar = home, travel = %created.external_id, "travel event created");

        Ok(TravelOutcome::Created(TravelEventRef {
            calendar_id: home.to_string(),
            external_id: created.external_id,
        }))
    }

    /// Delete a travel event. An already missing one is fine.
    pub async fn remove_travel_event(&self, travel: &TravelEventRef) -> SyncResult<()> {
        match self
            .store
            .delete_event(&travel.calendar_id, &travel.external_id, None, Span::ThisEvent)
            .await
        {
            Ok(_) | Err(SyncError::EventNotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
