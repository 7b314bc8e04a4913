//! Calendar store backed by a directory of `.ics` files.
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   <calendar-slug>/
//!     .famsync/calendar.toml   calendar metadata
//!     <external-id>.ics        one event or series per file
//! ```
//!
//! Any tool may edit the files; the file modification time is the event's
//! `last_modified`. Single occurrences cannot be overridden here, so an
//! occurrence edit applies from that occurrence onward, splitting the
//! series into a new file when the occurrence is not the first.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::event::{CalendarEvent, CalendarInfo, EventDraft, PersonId};
use crate::ics::{generate_ics, parse_series};
use crate::recurrence::RecurrenceRule;
use crate::store::{CalendarStore, Removal, Span, StoredSeries};

const META_DIR: &str = ".famsync";
const META_FILE: &str = "calendar.toml";

/// Metadata stored in each calendar's .famsync/calendar.toml
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
struct CalendarMeta {
    name: String,
    color: Option<String>,
    owner: Option<PersonId>,
    #[serde(default)]
    auto_link: bool,
    #[serde(default)]
    shared: bool,
}

impl CalendarMeta {
    fn load(calendar_dir: &Path) -> SyncResult<Self> {
        let path = calendar_dir.join(META_DIR).join(META_FILE);
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))
    }

    fn save(&self, calendar_dir: &Path) -> SyncResult<()> {
        let dir = calendar_dir.join(META_DIR);
        std::fs::create_dir_all(&dir)?;

        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(dir.join(META_FILE), content)?;
        Ok(())
    }

    fn into_info(self, id: String) -> CalendarInfo {
        CalendarInfo {
            id,
            name: self.name,
            color: self.color,
            owner: self.owner,
            auto_link: self.auto_link,
            shared: self.shared,
        }
    }
}

impl From<&CalendarInfo> for CalendarMeta {
    fn from(info: &CalendarInfo) -> Self {
        CalendarMeta {
            name: info.name.clone(),
            color: info.color.clone(),
            owner: info.owner,
            auto_link: info.auto_link,
            shared: info.shared,
        }
    }
}

pub struct DirectoryCalendarStore {
    root: PathBuf,
}

impl DirectoryCalendarStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryCalendarStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a calendar directory named after `info.name`. The id in `info`
    /// is ignored; the returned info carries the slug actually used.
    pub fn create_calendar(&self, info: &CalendarInfo) -> SyncResult<CalendarInfo> {
        let slug = self.unique_slug_for(&info.name)?;
        let dir = self.root.join(&slug);
        std::fs::create_dir_all(&dir)?;
        CalendarMeta::from(info).save(&dir)?;
        debug!(calendar = %slug, "created calendar directory");

        let mut created = info.clone();
        created.id = slug;
        Ok(created)
    }

    /// Overwrite an existing calendar's metadata.
    pub fn save_calendar(&self, info: &CalendarInfo) -> SyncResult<()> {
        let dir = self.calendar_dir(&info.id)?;
        CalendarMeta::from(info).save(&dir)
    }

    /// Number of event files and the newest modification time among them.
    /// Any add, edit or removal by any tool changes it.
    pub fn fingerprint(&self) -> SyncResult<(usize, Option<SystemTime>)> {
        if !self.root.exists() {
            return Ok((0, None));
        }

        let mut files = 0;
        let mut newest: Option<SystemTime> = None;
        for calendar in std::fs::read_dir(&self.root)?.filter_map(|e| e.ok()) {
            let dir = calendar.path();
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)?.filter_map(|e| e.ok()) {
                if entry.path().extension().is_none_or(|e| e != "ics") {
                    continue;
                }
                files += 1;
                newest = newest.max(Some(entry.metadata()?.modified()?));
            }
        }
        Ok((files, newest))
    }

    /// Generate a directory name that doesn't collide with an existing calendar.
    /// If the base slug exists, tries slug-2, slug-3, etc.
    fn unique_slug_for(&self, name: &str) -> SyncResult<String> {
        let base = match slug::slugify(name) {
            s if s.is_empty() => "calendar".to_string(),
            s => s,
        };

        if !self.root.join(&base).exists() {
            return Ok(base);
        }

        for n in 2..=100 {
            let suffixed = format!("{base}-{n}");
            if !self.root.join(&suffixed).exists() {
                return Ok(suffixed);
            }
        }

        Err(SyncError::Config(format!(
            "Too many calendar name collisions for '{base}'"
        )))
    }

    fn calendar_dir(&self, calendar_id: &str) -> SyncResult<PathBuf> {
        let dir = self.root.join(calendar_id);
        if is_plain_name(calendar_id) && dir.join(META_DIR).join(META_FILE).is_file() {
            Ok(dir)
        } else {
            Err(SyncError::CalendarUnavailable(calendar_id.to_string()))
        }
    }

    /// Find the file holding `external_id`, falling back to a UID scan for
    /// files created by other tools under a different name.
    fn locate(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<(PathBuf, StoredSeries)>> {
        let dir = self.calendar_dir(calendar_id)?;

        if is_plain_name(external_id) {
            let path = dir.join(format!("{external_id}.ics"));
            match read_series(&path, calendar_id)? {
                Some(series) if series.master.external_id == external_id => {
                    return Ok(Some((path, series)));
                }
                _ => {}
            }
        }

        Ok(self
            .load_all(&dir, calendar_id)?
            .into_iter()
            .find(|(_, s)| s.master.external_id == external_id))
    }

    fn load_all(&self, dir: &Path, calendar_id: &str) -> SyncResult<Vec<(PathBuf, StoredSeries)>> {
        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "ics") {
                continue;
            }
            if let Some(series) = read_series(&path, calendar_id)? {
                loaded.push((path, series));
            }
        }
        Ok(loaded)
    }

    fn insert(
        &self,
        calendar_id: &str,
        draft: &EventDraft,
        rule: Option<&RecurrenceRule>,
    ) -> SyncResult<CalendarEvent> {
        draft.validate()?;
        let dir = self.calendar_dir(calendar_id)?;

        let external_id = Uuid::new_v4().to_string();
        let mut series = StoredSeries::new(CalendarEvent {
            external_id: external_id.clone(),
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
            last_modified: Some(Utc::now()),
        });

        let path = dir.join(format!("{external_id}.ics"));
        series.master.last_modified = write_series(&path, &series, calendar_id)?;
        Ok(series.master)
    }
}

#[async_trait]
impl CalendarStore for DirectoryCalendarStore {
    async fn calendars(&self) -> SyncResult<Vec<CalendarInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut calendars = Vec::new();
        for entry in std::fs::read_dir(&self.root)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.join(META_DIR).join(META_FILE).is_file() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            calendars.push(CalendarMeta::load(&path)?.into_info(id.to_string()));
        }
        calendars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(calendars)
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
        let (path, mut series) = self
            .locate(&event.calendar_id, &event.external_id)?
            .ok_or_else(|| SyncError::EventNotFound {
                calendar_id: event.calendar_id.clone(),
                external_id: event.external_id.clone(),
            })?;

        let span = match span {
            Span::ThisEvent if event.occurrence.is_some() && series.master.has_recurrence() => {
                debug!(
                    event = %event.external_id,
                    "occurrence overrides unsupported, editing the series"
                );
                Span::FutureEvents
            }
            other => other,
        };

        let applied = series.apply_update(event, span, Utc::now());
        let mut written = applied.written;
        let mut stamp = write_series(&path, &series, &event.calendar_id)?;
        if let Some(tail) = applied.split {
            let tail_path = path.with_file_name(format!("{}.ics", tail.master.external_id));
            stamp = write_series(&tail_path, &tail, &event.calendar_id)?;
            debug!(
                event = %event.external_id,
                split = %tail.master.external_id,
                "series split at edited occurrence"
            );
        }
        written.last_modified = stamp;
        Ok(written)
    }

    async fn delete_event(
        &self,
        calendar_id: &str,
        external_id: &str,
        occurrence: Option<DateTime<Utc>>,
        span: Span,
    ) -> SyncResult<Removal> {
        let (path, mut series) =
            self.locate(calendar_id, external_id)?
                .ok_or_else(|| SyncError::EventNotFound {
                    calendar_id: calendar_id.to_string(),
                    external_id: external_id.to_string(),
                })?;

        match series.apply_delete(occurrence, span, Utc::now()) {
            Some(removal) => {
                write_series(&path, &series, calendar_id)?;
                Ok(removal)
            }
            None => {
                std::fs::remove_file(&path).map_err(|e| SyncError::WriteFailed {
                    calendar_id: calendar_id.to_string(),
                    reason: e.to_string(),
                })?;
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
        Ok(self
            .locate(calendar_id, external_id)?
            .and_then(|(_, series)| series.find(occurrence_hint)))
    }

    async fn events_in_range(
        &self,
        calendar_ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<Vec<CalendarEvent>> {
        let mut events = Vec::new();
        for id in calendar_ids {
            let dir = self.calendar_dir(id)?;
            for (_, series) in self.load_all(&dir, id)? {
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
        self.locate(calendar_id, external_id)?
            .map(|(_, series)| series.last_modified())
            .ok_or_else(|| SyncError::EventNotFound {
                calendar_id: calendar_id.to_string(),
                external_id: external_id.to_string(),
            })
    }

    fn supports_occurrence_overrides(&self) -> bool {
        false
    }
}

/// A single path component: no separators, not `.`/`..`.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn modified_at(path: &Path) -> SyncResult<Option<DateTime<Utc>>> {
    let modified: SystemTime = std::fs::metadata(path)?.modified()?;
    Ok(Some(DateTime::<Utc>::from(modified)))
}

fn read_series(path: &Path, calendar_id: &str) -> SyncResult<Option<StoredSeries>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let Some(mut series) = parse_series(&content, calendar_id) else {
        debug!(path = %path.display(), "skipping unreadable event file");
        return Ok(None);
    };
    series.master.last_modified = modified_at(path)?;
    Ok(Some(series))
}

/// Write the series and return the file's new modification time.
fn write_series(
    path: &Path,
    series: &StoredSeries,
    calendar_id: &str,
) -> SyncResult<Option<DateTime<Utc>>> {
    let content = generate_ics(series)?;
    std::fs::write(path, content).map_err(|e| SyncError::WriteFailed {
        calendar_id: calendar_id.to_string(),
        reason: e.to_string(),
    })?;
    modified_at(path)
}
