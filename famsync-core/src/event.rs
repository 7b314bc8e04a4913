//! Store-neutral event types.
//!
//! Calendar stores convert their native records into these types, and the
//! engine works exclusively with them for linking, grouping and derivation.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::recurrence::RecurrenceRule;

pub type PersonId = Uuid;
pub type DriverId = Uuid;

/// A calendar event as the owning store sees it.
///
/// When the event is one occurrence of a recurring series, `occurrence`
/// holds the original start of that occurrence and `external_id` is the
/// series id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub external_id: String,
    pub calendar_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub is_all_day: bool,
    pub recurrence: Option<RecurrenceRule>,
    pub occurrence: Option<DateTime<Utc>>,
    pub alarms: Vec<Reminder>,
    /// Last modification as recorded by the store (any writer, not only us)
    pub last_modified: Option<DateTime<Utc>>,
}

impl CalendarEvent {
    pub fn has_recurrence(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Calendar day the event is filed under.
    pub fn day(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// The event's editable content, detached from its store identity.
    pub fn to_draft(&self) -> EventDraft {
        EventDraft {
            title: self.title.clone(),
            start: self.start,
            end: self.end,
            location: self.location.clone(),
            notes: self.notes.clone(),
            is_all_day: self.is_all_day,
            alarms: self.alarms.clone(),
        }
    }

    /// Overwrite content fields from a draft, keeping identity and recurrence.
    pub fn apply_draft(&mut self, draft: &EventDraft) {
        self.title = draft.title.clone();
        self.start = draft.start;
        self.end = draft.end;
        self.location = draft.location.clone();
        self.notes = draft.notes.clone();
        self.is_all_day = draft.is_all_day;
        self.alarms = draft.alarms.clone();
    }
}

impl fmt::Display for CalendarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)
    }
}

/// Content for an event that does not exist in any store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub is_all_day: bool,
    pub alarms: Vec<Reminder>,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        EventDraft {
            title: title.into(),
            start,
            end,
            location: None,
            notes: None,
            is_all_day: false,
            alarms: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_alarm(mut self, minutes: i64) -> Self {
        self.alarms.push(Reminder { minutes });
        self
    }

    pub fn all_day(mut self) -> Self {
        self.is_all_day = true;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.title.trim().is_empty() {
            return Err(SyncError::InvalidEvent("title is empty".into()));
        }
        if self.end < self.start {
            return Err(SyncError::InvalidEvent(format!(
                "'{}' ends before it starts",
                self.title
            )));
        }
        Ok(())
    }
}

/// A reminder/alarm for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Minutes before the event to trigger
    pub minutes: i64,
}

/// Snapshot of one calendar as its store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    /// Family member this calendar belongs to
    pub owner: Option<PersonId>,
    /// New events for the owner land here automatically (their "home" calendar)
    pub auto_link: bool,
    /// Shared family calendar rather than a personal one
    pub shared: bool,
}

impl CalendarInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        CalendarInfo {
            id: id.into(),
            name: name.into(),
            color: None,
            owner: None,
            auto_link: false,
            shared: false,
        }
    }
}

/// Find the candidate calendar whose name matches `name`, ignoring case and
/// surrounding whitespace.
pub fn find_matching_calendar<'a>(
    name: &str,
    candidates: &'a [CalendarInfo],
) -> Option<&'a CalendarInfo> {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|c| c.name.trim().to_lowercase() == wanted)
}

/// The calendar flagged as auto-linked for a person, if any.
pub fn home_calendar_for(person: PersonId, candidates: &[CalendarInfo]) -> Option<&CalendarInfo> {
    candidates
        .iter()
        .find(|c| c.auto_link && c.owner == Some(person))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_find_matching_calendar_ignores_case_and_whitespace() {
        let candidates = vec![
            CalendarInfo::new("a", "Work"),
            CalendarInfo::new("b", "Family"),
        ];
        let found = find_matching_calendar("  family ", &candidates).unwrap();
        assert_eq!(found.id, "b");
        assert!(find_matching_calendar("Fam", &candidates).is_none());
        assert!(find_matching_calendar("   ", &candidates).is_none());
    }

    #[test]
    fn test_home_calendar_requires_auto_link() {
        let person = Uuid::new_v4();
        let mut personal = CalendarInfo::new("p", "Personal");
        personal.owner = Some(person);
        let mut home = CalendarInfo::new("h", "Home");
        home.owner = Some(person);
        home.auto_link = true;

        let candidates = vec![personal, home];
        assert_eq!(home_calendar_for(person, &candidates).unwrap().id, "h");
        assert!(home_calendar_for(Uuid::new_v4(), &candidates).is_none());
    }

    #[test]
    fn test_draft_rejects_inverted_times() {
        let start = Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap();
        let draft = EventDraft::new("Dentist", start, start - chrono::Duration::minutes(5));
        assert!(matches!(draft.validate(), Err(SyncError::InvalidEvent(_))));
    }
}
