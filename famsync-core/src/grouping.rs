//! Folding per-attendee occurrences into display-level events.
//!
//! Several attendees' calendars usually hold their own copy of the same
//! happening. Copies whose title, time range and location are identical
//! strings collapse into one [`AggregatedEvent`]; anything else, however
//! similar, stays separate.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::event::{CalendarEvent, CalendarInfo};
use crate::registry::{FamilyDirectory, LinkRegistry, Person};

/// Fallback color for calendars without an owner or color.
pub const DEFAULT_COLOR: &str = "#808080";

/// Name and color shown for one attendee on an aggregated card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttendeeTag {
    pub name: String,
    pub color: String,
}

impl AttendeeTag {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        AttendeeTag {
            name: name.into(),
            color: color.into(),
        }
    }

    /// The calendar owner's tag when known, else the calendar's own.
    pub fn for_calendar(calendar: &CalendarInfo, people: &[Person]) -> Self {
        match calendar
            .owner
            .and_then(|owner| people.iter().find(|p| p.id == owner))
        {
            Some(person) => AttendeeTag::new(&person.name, &person.color),
            None => AttendeeTag::new(
                &calendar.name,
                calendar.color.as_deref().unwrap_or(DEFAULT_COLOR),
            ),
        }
    }
}

/// A raw occurrence as seen through one attendee's calendar.
#[derive(Debug, Clone)]
pub struct RawOccurrence {
    pub event: CalendarEvent,
    pub attendee: AttendeeTag,
}

/// Where one merged copy came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub calendar_id: String,
    pub external_id: String,
    pub occurrence: Option<DateTime<Utc>>,
}

/// Display-only merge of copies of one happening. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedEvent {
    pub key: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_all_day: bool,
    pub location: Option<String>,
    pub attendees: Vec<AttendeeTag>,
    pub driver_name: Option<String>,
    pub has_recurrence: bool,
    pub sources: Vec<EventSource>,
}

impl AggregatedEvent {
    pub fn day(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Resolves the driver attached to a calendar copy, if any.
pub trait DriverLookup {
    fn driver_name(&self, calendar_id: &str, external_id: &str) -> Option<String>;
}

/// No drivers anywhere.
pub struct NoDrivers;

impl DriverLookup for NoDrivers {
    fn driver_name(&self, _calendar_id: &str, _external_id: &str) -> Option<String> {
        None
    }
}

/// Driver names keyed by `(calendar_id, external_id)`.
#[derive(Debug, Clone, Default)]
pub struct DriverNames(HashMap<(String, String), String>);

impl DriverNames {
    pub fn insert(&mut self, calendar_id: &str, external_id: &str, name: impl Into<String>) {
        self.0
            .insert((calendar_id.to_string(), external_id.to_string()), name.into());
    }

    /// Resolve driver names for every linked copy among `events`.
    pub async fn load(
        events: &[CalendarEvent],
        registry: &dyn LinkRegistry,
        directory: &dyn FamilyDirectory,
    ) -> SyncResult<Self> {
        let mut names = DriverNames::default();
        for event in events {
            let key = (event.calendar_id.clone(), event.external_id.clone());
            if names.0.contains_key(&key) {
                continue;
            }
            let Some(record) = registry
                .get_by_external_id(&event.calendar_id, &event.external_id)
                .await?
            else {
                continue;
            };
            let Some(driver) = record.driver else {
                continue;
            };
            if let Some(name) = directory.driver_name(driver).await? {
                names.0.insert(key, name);
            }
        }
        Ok(names)
    }
}

impl DriverLookup for DriverNames {
    fn driver_name(&self, calendar_id: &str, external_id: &str) -> Option<String> {
        self.0
            .get(&(calendar_id.to_string(), external_id.to_string()))
            .cloned()
    }
}

/// Exact-string merge key: title, formatted time range (or all-day date),
/// location.
pub fn group_key(
    title: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    is_all_day: bool,
    location: Option<&str>,
) -> String {
    let range = if is_all_day {
        format!("all-day {}", start.format("%Y-%m-%d"))
    } else {
        format!(
            "{} - {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        )
    };
    format!("{title}\u{1f}{range}\u{1f}{}", location.unwrap_or(""))
}

/// Group raw occurrences into aggregated events.
pub fn group(occurrences: Vec<RawOccurrence>, drivers: &dyn DriverLookup) -> Vec<AggregatedEvent> {
    let seeds = occurrences.into_iter().map(|raw| {
        let event = raw.event;
        let driver_name = drivers.driver_name(&event.calendar_id, &event.external_id);
        AggregatedEvent {
            key: group_key(
                &event.title,
                event.start,
                event.end,
                event.is_all_day,
                event.location.as_deref(),
            ),
            has_recurrence: event.has_recurrence(),
            sources: vec![EventSource {
                calendar_id: event.calendar_id,
                external_id: event.external_id,
                occurrence: event.occurrence,
            }],
            title: event.title,
            start: event.start,
            end: event.end,
            is_all_day: event.is_all_day,
            location: event.location,
            attendees: vec![raw.attendee],
            driver_name,
        }
    });
    fold(seeds)
}

/// Feed already-grouped events through the same merge pass again.
/// A no-op on the output of [`group`].
pub fn regroup(events: Vec<AggregatedEvent>) -> Vec<AggregatedEvent> {
    fold(events)
}

fn fold(items: impl IntoIterator<Item = AggregatedEvent>) -> Vec<AggregatedEvent> {
    let mut merged: Vec<AggregatedEvent> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        match index.get(&item.key) {
            Some(&at) => merge_into(&mut merged[at], item),
            None => {
                index.insert(item.key.clone(), merged.len());
                merged.push(item);
            }
        }
    }

    // Stable: ties keep encounter order
    merged.sort_by_key(|e| (e.day(), !e.is_all_day, e.start));
    merged
}

fn merge_into(target: &mut AggregatedEvent, other: AggregatedEvent) {
    for attendee in other.attendees {
        if !target.attendees.iter().any(|a| a.color == attendee.color) {
            target.attendees.push(attendee);
        }
    }
    for source in other.sources {
        if !target.sources.contains(&source) {
            target.sources.push(source);
        }
    }
    target.has_recurrence |= other.has_recurrence;
    if target.driver_name.is_none() {
        target.driver_name = other.driver_name;
    }
}
