//! In-process calendar store.
//!
//! Holds everything in memory behind one lock. Every write advances an
//! internal clock by one second, so `last_modified` values are deterministic
//! and strictly increasing. Failure injection and "edited elsewhere"
//! simulation make it the store of choice for exercising the sync engine.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::event::{CalendarEvent, CalendarInfo, EventDraft};
use crate::recurrence::RecurrenceRule;
use crate::store::{CalendarStore, Removal, Span, StoredSeries};

struct MemoryCalendar {
    info: CalendarInfo,
    events: BTreeMap<String, StoredSeries>,
}

struct MemoryState {
    calendars: Vec<MemoryCalendar>,
    failing: HashSet<String>,
    clock: DateTime<Utc>,
}

impl MemoryState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn calendar(&self, calendar_id: &str) -> SyncResult<&MemoryCalendar> {
        self.calendars
            .iter()
            .find(|c| c.info.id == calendar_id)
            .ok_or_else(|| SyncError::CalendarUnavailable(calendar_id.to_string()))
    }

    /// Resolve a calendar for writing, honoring injected failures.
    fn writable(&mut self, calendar_id: &str) -> SyncResult<&mut MemoryCalendar> {
        if self.failing.contains(calendar_id) {
            return Err(SyncError::WriteFailed {
                calendar_id: calendar_id.to_string(),
                reason: "store rejected the write".into(),
            });
        }
        self.calendars
            .iter_mut()
            .find(|c| c.info.id == calendar_id)
            .ok_or_else(|| SyncError::CalendarUnavailable(calendar_id.to_string()))
    }
}

pub struct InMemoryCalendarStore {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryCalendarStore {
    fn default() -> Self {
        Self::with_clock(Utc::now())
    }
}

impl InMemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the write clock at a fixed instant.
    pub fn with_clock(start: DateTime<Utc>) -> Self {
        InMemoryCalendarStore {
            state: Mutex::new(MemoryState {
                calendars: Vec::new(),
                failing: HashSet::new(),
                clock: start,
            }),
        }
    }

    /// Convenience constructor used by tests: calendars named after their ids.
    pub fn with_calendars(ids: &[&str]) -> Self {
        let store = Self::with_clock(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default());
        for id in ids {
            store.add_calendar(CalendarInfo::new(*id, *id));
        }
        store
    }

    pub fn add_calendar(&self, info: CalendarInfo) {
        self.state.lock().calendars.push(MemoryCalendar {
            info,
            events: BTreeMap::new(),
        });
    }

    /// Make the calendar stop resolving, as if it was removed on the device.
    pub fn remove_calendar(&self, calendar_id: &str) {
        self.state.lock().calendars.retain(|c| c.info.id != calendar_id);
    }

    /// Make every subsequent write to `calendar_id` fail (or succeed again).
    pub fn fail_writes_for(&self, calendar_id: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(calendar_id.to_string());
        } else {
            state.failing.remove(calendar_id);
        }
    }

    /// Simulate another tool editing an event at `at`.
    pub fn touch_externally(&self, calendar_id: &str, external_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(series) = state
            .calendars
            .iter_mut()
            .find(|c| c.info.id == calendar_id)
            .and_then(|c| c.events.get_mut(external_id))
        {
            series.master.last_modified = Some(at);
        }
    }

    /// Simulate another tool deleting an event.
    pub fn delete_externally(&self, calendar_id: &str, external_id: &str) {
        let mut state = self.state.lock();
        if let Some(calendar) = state.calendars.iter_mut().find(|c| c.info.id == calendar_id) {
            calendar.events.remove(external_id);
        }
    }

    /// Number of events (series count once) held in a calendar.
    pub fn event_count(&self, calendar_id: &str) -> usize {
        let state = self.state.lock();
        state
            .calendar(calendar_id)
            .map(|c| c.events.len())
            .unwrap_or(0)
    }

    fn insert(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
        rule: Option<&RecurrenceRule>,
    ) -> SyncResult<CalendarEvent> {
        draft.validate()?;
        let mut state = self.state.lock();
        let now = state.tick();
        let calendar = state.writable(calendar_id)?;

        let event = CalendarEvent {
            external_id: Uuid::new_v4().to_string(),
            calendar_id: calendar_id.to_string(),
            title: draft.title.clone(),
            start: draft.start,
            end: draft.end,
            location: draft.location.clone(),
            notes: draft.notes.clone(),
            is_all_day: draft.is_all_day,
            recurrence: rule.copied(),
            occurrence: None,
            alarms: draft.alarms.clone(),
            last_modified: Some(now),
        };
        calendar
            .events
            .insert(event.external_id.clone(), StoredSeries::new(event.clone()));
        Ok(event)
    }
}

#[async_trait]
impl CalendarStore for InMemoryCalendarStore {
    async fn calendars(&self) -> SyncResult<Vec<CalendarInfo>> {
        Ok(self
            .state
            .lock()
            .calendars
            .iter()
            .map(|c| c.info.clone())
            .collect())
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
    ) -> SyncResult<CalendarEvent> {
        self.insert(calendar_id, draft, None)
    }

    async fn create_recurring_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
        rule: &RecurrenceRule,
    ) -> SyncResult<CalendarEvent> {
        rule.validate()?;
        self.insert(calendar_id, draft, Some(rule))
    }

    async fn update_event(&self, event: &CalendarEvent, span: Span) -> SyncResult<CalendarEvent> {
        let mut state = self.state.lock();
        let now = state.tick();
        let calendar = state.writable(&event.calendar_id)?;
        let series = calendar
            .events
            .get_mut(&event.external_id)
            .ok_or_else(|| SyncError::EventNotFound {
                calendar_id: event.calendar_id.clone(),
                external_id: event.external_id.clone(),
            })?;
        let applied = series.apply_update(event, span, now);
        if let Some(tail) = applied.split {
            calendar
                .events
                .insert(tail.master.external_id.clone(), tail);
        }
        Ok(applied.written)
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        external_id: &str,
        occurrence: Option<DateTime<Utc>>,
        span: Span,
    ) -> SyncResult<Removal> {
        let mut state = self.state.lock();
        let now = state.tick();
        let calendar = state.writable(calendar_id)?;
        let not_found = || SyncError::EventNotFound {
            calendar_id: calendar_id.to_string(),
            external_id: external_id.to_string(),
        };

        let series = calendar.events.get_mut(external_id).ok_or_else(not_found)?;
        match series.apply_delete(occurrence, span, now) {
            Some(removal) => Ok(removal),
            None => {
                calendar.events.remove(external_id);
                Ok(Removal::Event)
            }
        }
    }

    async fn find_event(
        &self,
        calendar_id: &str,
        external_id: &str,
        occurrence_hint: Option<DateTime<Utc>>,
    ) -> SyncResult<Option<CalendarEvent>> {
        let state = self.state.lock();
        let calendar = state.calendar(calendar_id)?;
        Ok(calendar
            .events
            .get(external_id)
            .and_then(|series| series.find(occurrence_hint)))
    }

    async fn events_in_range(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<CalendarEvent>> {
        let state = self.state.lock();
        let mut events = Vec::new();
        for id in calendar_ids {
            let calendar = state.calendar(id)?;
            for series in calendar.events.values() {
                events.extend(series.in_range(start, end));
            }
        }
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn last_modified(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        let state = self.state.lock();
        let calendar = state.calendar(calendar_id)?;
        calendar
            .events
            .get(external_id)
            .map(StoredSeries::last_modified)
            .ok_or_else(|| SyncError::EventNotFound {
                calendar_id: calendar_id.to_string(),
                external_id: external_id.to_string(),
            })
    }

    fn supports_occurrence_overrides(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Frequency;
    use chrono::TimeZone;

    fn draft() -> EventDraft {
        let start = Utc.with_ymd_and_hms(2025, 3, 20, 10, 0, 0).unwrap();
        EventDraft::new("Soccer", start, start + Duration::hours(1))
    }

    #[tokio::test]
    async fn test_writes_advance_last_modified() {
        let store = InMemoryCalendarStore::with_calendars(&["a"]);
        let created = store.create_event("a", &draft()).await.unwrap();

        let mut edited = created.clone();
        edited.title = "Soccer practice".into();
        let updated = store.update_event(&edited, Span::ThisEvent).await.unwrap();

        assert!(updated.last_modified > created.last_modified);
        assert_eq!(
            store.last_modified("a", &created.external_id).await.unwrap(),
            updated.last_modified
        );
    }

    #[tokio::test]
    async fn test_failing_calendar_rejects_writes() {
        let store = InMemoryCalendarStore::with_calendars(&["a"]);
        store.fail_writes_for("a", true);

        let err = store.create_event("a", &draft()).await.unwrap_err();
        assert!(matches!(err, SyncError::WriteFailed { .. }));
        assert_eq!(store.event_count("a"), 0);
    }

    #[tokio::test]
    async fn test_removed_calendar_is_unavailable() {
        let store = InMemoryCalendarStore::with_calendars(&["a"]);
        store.remove_calendar("a");

        let err = store.create_event("a", &draft()).await.unwrap_err();
        assert!(matches!(err, SyncError::CalendarUnavailable(_)));
    }

    #[tokio::test]
    async fn test_occurrence_override_leaves_series_intact() {
        let store = InMemoryCalendarStore::with_calendars(&["a"]);
        let rule = RecurrenceRule::new(Frequency::Weekly, 1);
        let series = store
            .create_recurring_event("a", &draft(), &rule)
            .await
            .unwrap();

        let second = series.start + Duration::weeks(1);
        let mut occurrence = store
            .find_event("a", &series.external_id, Some(second))
            .await
            .unwrap()
            .unwrap();
        occurrence.location = Some("Field 2".into());
        store
            .update_event(&occurrence, Span::ThisEvent)
            .await
            .unwrap();

        let window = store
            .events_in_range(&["a".to_string()], series.start, series.start + Duration::weeks(3))
            .await
            .unwrap();
        let locations: Vec<_> = window.iter().map(|e| e.location.as_deref()).collect();
        assert_eq!(locations, vec![None, Some("Field 2"), None]);
    }

    #[tokio::test]
    async fn test_delete_missing_event_is_not_found() {
        let store = InMemoryCalendarStore::with_calendars(&["a"]);
        let err = store
            .delete_event("a", "nope", None, Span::ThisEvent)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EventNotFound { .. }));
    }
}
