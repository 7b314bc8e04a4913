//! Calendar store adapter contract.
//!
//! A calendar store physically owns events (one store may hold many
//! calendars). famsync never assumes it is the only writer: every store
//! reports `last_modified` so edits made by other tools can be detected.

mod dir;
mod memory;

pub use dir::DirectoryCalendarStore;
pub use memory::InMemoryCalendarStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::event::{CalendarEvent, CalendarInfo, EventDraft};
use crate::recurrence::{self, RecurrenceRule};

/// Upper bound on occurrences materialized for one series in one range query.
pub const MAX_OCCURRENCES_PER_QUERY: usize = 10_000;

/// Temporal reach of an edit or delete on a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
    /// Only the addressed occurrence
    ThisEvent,
    /// The addressed occurrence and every later one
    FutureEvents,
}

/// What a delete actually removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The whole event (or series) is gone from the calendar
    Event,
    /// Some occurrences were removed; the series itself remains
    Occurrences,
}

#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Snapshot of every calendar this store can currently resolve.
    async fn calendars(&self) -> SyncResult<Vec<CalendarInfo>>;

    async fn create_event(&self, calendar_id: &str, draft: &EventDraft)
    -> SyncResult<CalendarEvent>;

    /// Create a series. Each store owns its own copy of the series.
    async fn create_recurring_event(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
        rule: &RecurrenceRule,
    ) -> SyncResult<CalendarEvent>;

    /// Write `event` back. For an occurrence (`event.occurrence` set) the span
    /// picks between an override of that occurrence and an edit of the series.
    async fn update_event(&self, event: &CalendarEvent, span: Span) -> SyncResult<CalendarEvent>;

    async fn delete_event(
        &self,
        calendar_id: &str,
        external_id: &str,
        occurrence: Option<DateTime<Utc>>,
        span: Span,
    ) -> SyncResult<Removal>;

    /// Look up an event, materialized at `occurrence_hint` when it is a series.
    async fn find_event(
        &self,
        calendar_id: &str,
        external_id: &str,
        occurrence_hint: Option<DateTime<Utc>>,
    ) -> SyncResult<Option<CalendarEvent>>;

    /// Every event or occurrence overlapping `[start, end)` in the given calendars.
    async fn events_in_range(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<CalendarEvent>>;

    async fn last_modified(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<DateTime<Utc>>>;

    /// Whether a single occurrence of a series can be edited on its own.
    fn supports_occurrence_overrides(&self) -> bool;
}

/// An update as applied to a stored series.
#[derive(Debug)]
pub(crate) struct Applied {
    pub written: CalendarEvent,
    /// Series split off at the edited occurrence, to be stored under its own id
    pub split: Option<StoredSeries>,
}

/// A stored series (or single event) plus its exceptions.
#[derive(Debug, Clone)]
pub(crate) struct StoredSeries {
    pub master: CalendarEvent,
    pub exdates: BTreeSet<DateTime<Utc>>,
    pub overrides: BTreeMap<DateTime<Utc>, CalendarEvent>,
}

impl StoredSeries {
    pub fn new(master: CalendarEvent) -> Self {
        StoredSeries {
            master,
            exdates: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }

    fn duration(&self) -> Duration {
        self.master.end - self.master.start
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.overrides
            .values()
            .filter_map(|o| o.last_modified)
            .chain(self.master.last_modified)
            .max()
    }

    /// Whether `at` is a live occurrence of this series.
    pub fn is_occurrence(&self, at: DateTime<Utc>) -> bool {
        let Some(rule) = &self.master.recurrence else {
            return at == self.master.start;
        };
        if self.exdates.contains(&at) {
            return false;
        }
        recurrence::expand(
            rule,
            self.master.start,
            at - Duration::seconds(1),
            1,
            Some(at + Duration::seconds(1)),
        )
        .is_ok_and(|found| found.first() == Some(&at))
    }

    /// The event as seen at `occurrence` (an override if one exists).
    pub fn occurrence(&self, at: DateTime<Utc>) -> CalendarEvent {
        if let Some(over) = self.overrides.get(&at) {
            return over.clone();
        }
        let mut event = self.master.clone();
        event.start = at;
        event.end = at + self.duration();
        event.occurrence = Some(at);
        event
    }

    pub fn find(&self, hint: Option<DateTime<Utc>>) -> Option<CalendarEvent> {
        match (hint, self.master.recurrence.is_some()) {
            (Some(at), true) => self.is_occurrence(at).then(|| self.occurrence(at)),
            _ => Some(self.master.clone()),
        }
    }

    pub fn in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CalendarEvent> {
        let Some(rule) = &self.master.recurrence else {
            return overlaps(&self.master, start, end)
                .then(|| self.master.clone())
                .into_iter()
                .collect();
        };

        let from = start - self.duration() - Duration::seconds(1);
        let Ok(starts) = recurrence::expand(
            rule,
            self.master.start,
            from,
            MAX_OCCURRENCES_PER_QUERY,
            Some(end),
        ) else {
            return Vec::new();
        };

        let mut events: Vec<CalendarEvent> = starts
            .into_iter()
            .filter(|at| !self.exdates.contains(at))
            .map(|at| self.occurrence(at))
            .filter(|e| overlaps(e, start, end))
            .collect();
        events.sort_by_key(|e| e.start);
        events
    }

    /// Apply an update per `span`.
    ///
    /// A future-events edit from a later occurrence leaves the earlier
    /// occurrences untouched: the series ends just before `at` and the edit
    /// lands on a new series starting there, returned in [`Applied::split`].
    pub fn apply_update(&mut self, event: &CalendarEvent, span: Span, now: DateTime<Utc>) -> Applied {
        match (event.occurrence, self.master.recurrence.is_some(), span) {
            (Some(at), true, Span::ThisEvent) => {
                let mut over = event.clone();
                over.recurrence = self.master.recurrence;
                over.occurrence = Some(at);
                over.last_modified = Some(now);
                self.overrides.insert(at, over.clone());
                Applied::in_place(over)
            }
            (Some(at), true, Span::FutureEvents) if at > self.master.start => {
                let rule_unchanged = event.recurrence == self.master.recurrence;
                let mut tail = self.split_off(at, now);
                let mut anchored = event.clone();
                anchored.external_id = tail.master.external_id.clone();
                if rule_unchanged {
                    anchored.recurrence = tail.master.recurrence;
                }
                let written = tail.apply_update(&anchored, span, now).written;
                Applied {
                    written,
                    split: Some(tail),
                }
            }
            (Some(at), true, Span::FutureEvents) => {
                // The occurrence's time shift carries over to every occurrence.
                let shift = event.start - at;
                let duration = event.end - event.start;
                let anchor = self.master.start + shift;
                self.master.apply_draft(&event.to_draft());
                self.master.start = anchor;
                self.master.end = anchor + duration;
                self.master.recurrence = event.recurrence;
                self.master.last_modified = Some(now);
                self.overrides.retain(|k, _| *k < at);
                let mut written = self.occurrence_after_edit(at, shift);
                written.last_modified = Some(now);
                Applied::in_place(written)
            }
            _ => {
                self.master.apply_draft(&event.to_draft());
                self.master.recurrence = event.recurrence;
                self.master.occurrence = None;
                self.master.last_modified = Some(now);
                if self.master.recurrence.is_none() {
                    self.exdates.clear();
                    self.overrides.clear();
                }
                Applied::in_place(self.master.clone())
            }
        }
    }

    /// End this series just before `at` and return the rest of it as a new
    /// series with a fresh external id. A COUNT keeps its total across both.
    fn split_off(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> StoredSeries {
        let mut tail_rule = self.master.recurrence;
        if let Some(rule) = tail_rule.as_mut() {
            if let Some(recurrence::RecurrenceEnd::Count(count)) = rule.end {
                let before = recurrence::expand(
                    rule,
                    self.master.start,
                    self.master.start - Duration::seconds(1),
                    count as usize,
                    Some(at),
                )
                .map_or(0, |found| found.len());
                let remaining = count.saturating_sub(before as u32).max(1);
                rule.end = Some(recurrence::RecurrenceEnd::Count(remaining));
            }
        }

        let external_id = Uuid::new_v4().to_string();
        let mut master = self.master.clone();
        master.external_id = external_id.clone();
        master.start = at;
        master.end = at + self.duration();
        master.recurrence = tail_rule;
        master.occurrence = None;
        master.last_modified = Some(now);

        let exdates = self.exdates.split_off(&at);
        let mut overrides = self.overrides.split_off(&at);
        for over in overrides.values_mut() {
            over.external_id = external_id.clone();
        }

        if let Some(rule) = self.master.recurrence.as_mut() {
            rule.end = Some(recurrence::RecurrenceEnd::Until(at - Duration::seconds(1)));
        }
        self.master.last_modified = Some(now);

        StoredSeries {
            master,
            exdates,
            overrides,
        }
    }

    fn occurrence_after_edit(&self, at: DateTime<Utc>, shift: Duration) -> CalendarEvent {
        let mut event = self.master.clone();
        event.start = at + shift;
        event.end = event.start + self.duration();
        event.occurrence = Some(at + shift);
        event
    }

    /// Apply a delete per `span`. `None` means the whole series must go.
    pub fn apply_delete(
        &mut self,
        occurrence: Option<DateTime<Utc>>,
        span: Span,
        now: DateTime<Utc>,
    ) -> Option<Removal> {
        let (Some(at), Some(rule)) = (occurrence, self.master.recurrence.as_mut()) else {
            return None;
        };
        if at <= self.master.start && span == Span::FutureEvents {
            return None;
        }
        match span {
            Span::ThisEvent => {
                self.exdates.insert(at);
                self.overrides.remove(&at);
            }
            Span::FutureEvents => {
                rule.end = Some(recurrence::RecurrenceEnd::Until(at - Duration::seconds(1)));
                self.overrides.retain(|k, _| *k < at);
            }
        }
        self.master.last_modified = Some(now);
        Some(Removal::Occurrences)
    }
}

impl Applied {
    fn in_place(written: CalendarEvent) -> Self {
        Applied {
            written,
            split: None,
        }
    }
}

fn overlaps(event: &CalendarEvent, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    if event.start == event.end {
        return event.start >= start && event.start < end;
    }
    event.start < end && event.end > start
}
