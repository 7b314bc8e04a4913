//! Everything a command needs, opened once per invocation.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use famsync_core::config::Settings;
use famsync_core::event::find_matching_calendar;
use famsync_core::notify::Notification;
use famsync_core::refresh::Refresher;
use famsync_core::registry::{Driver, FamilyDirectory, Person, SqliteRegistry};
use famsync_core::store::{CalendarStore, DirectoryCalendarStore};
use famsync_core::{CalendarInfo, SyncCoordinator};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;
use uuid::Uuid;

pub struct Context {
    pub settings: Settings,
    pub store: Arc<DirectoryCalendarStore>,
    pub registry: Arc<SqliteRegistry>,
    pub coordinator: SyncCoordinator,
    reminders: UnboundedReceiver<Notification>,
}

impl Context {
    pub fn open(settings: Settings) -> Result<Self> {
        let store_path = settings.store_path();
        std::fs::create_dir_all(&store_path)
            .with_context(|| format!("Failed to create {}", store_path.display()))?;
        let store = Arc::new(DirectoryCalendarStore::new(store_path));

        let db_path = settings.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = Arc::new(
            SqliteRegistry::open(&db_path)
                .with_context(|| format!("Failed to open link registry at {}", db_path.display()))?,
        );
        debug!(store = %store.root().display(), registry = %db_path.display(), "opened famsync");

        let (tx, reminders) = mpsc::unbounded_channel();
        let coordinator = SyncCoordinator::new(store.clone(), registry.clone())
            .with_skew_tolerance(settings.skew_tolerance()?)
            .with_notifications(tx);

        Ok(Context {
            settings,
            store,
            registry,
            coordinator,
            reminders,
        })
    }

    pub async fn calendars(&self) -> Result<Vec<CalendarInfo>> {
        Ok(self.store.calendars().await?)
    }

    /// Calendars matching `filters` (by id or name), or all of them when
    /// no filter is given. Fails when there are no calendars at all.
    pub async fn require_calendars(&self, filters: &[String]) -> Result<Vec<CalendarInfo>> {
        let all = self.calendars().await?;
        if all.is_empty() {
            anyhow::bail!(
                "No calendars found in {}.\n\n\
                Add your first calendar with:\n  \
                famsync calendars add <name>",
                self.store.root().display()
            );
        }
        if filters.is_empty() {
            return Ok(all);
        }
        filters
            .iter()
            .map(|filter| resolve_calendar(filter, &all).cloned())
            .collect()
    }

    pub async fn calendar(&self, filter: &str) -> Result<CalendarInfo> {
        let all = self.calendars().await?;
        resolve_calendar(filter, &all).cloned()
    }

    pub async fn person(&self, name_or_id: &str) -> Result<Person> {
        let people = self.registry.people().await?;
        let wanted = name_or_id.trim().to_lowercase();
        let id = Uuid::parse_str(name_or_id).ok();

        people
            .iter()
            .find(|p| Some(p.id) == id || p.name.to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| {
                let available: Vec<_> = people.iter().map(|p| p.name.as_str()).collect();
                anyhow::anyhow!(
                    "Person '{}' not found. Available: {}",
                    name_or_id,
                    available.join(", ")
                )
            })
    }

    pub async fn driver(&self, name_or_id: &str) -> Result<Driver> {
        let drivers = self.registry.drivers().await?;
        let wanted = name_or_id.trim().to_lowercase();
        let id = Uuid::parse_str(name_or_id).ok();

        drivers
            .iter()
            .find(|d| Some(d.id) == id || d.name.to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| {
                let available: Vec<_> = drivers.iter().map(|d| d.name.as_str()).collect();
                anyhow::anyhow!(
                    "Driver '{}' not found. Available: {}",
                    name_or_id,
                    available.join(", ")
                )
            })
    }

    pub fn refresher(&self) -> Refresher {
        Refresher::new(
            self.store.clone(),
            self.registry.clone(),
            self.registry.clone(),
            self.coordinator.write_gate(),
        )
    }

    /// Reminder changes the coordinator queued during the last operation.
    pub fn take_reminders(&mut self) -> Vec<Notification> {
        let mut taken = Vec::new();
        while let Ok(notification) = self.reminders.try_recv() {
            taken.push(notification);
        }
        taken
    }
}

/// Match a calendar by exact id first, then by name.
fn resolve_calendar<'a>(filter: &str, calendars: &'a [CalendarInfo]) -> Result<&'a CalendarInfo> {
    calendars
        .iter()
        .find(|c| c.id == filter)
        .or_else(|| find_matching_calendar(filter, calendars))
        .ok_or_else(|| {
            let available: Vec<_> = calendars.iter().map(|c| c.id.as_str()).collect();
            anyhow::anyhow!(
                "Calendar '{}' not found. Available: {}",
                filter,
                available.join(", ")
            )
        })
}
