#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use famsync_core::SyncError;
use famsync_core::error::SyncResult;
use famsync_core::event::EventDraft;
use famsync_core::registry::{LinkRegistry, LinkedEventRecord, SqliteRegistry};
use famsync_core::store::InMemoryCalendarStore;
use famsync_core::sync::{GroupReport, SyncCoordinator};
use uuid::Uuid;

/// In-memory store, in-memory registry and a coordinator over both.
pub struct Harness {
    pub store: Arc<InMemoryCalendarStore>,
    pub registry: Arc<SqliteRegistry>,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub fn new(calendars: &[&str]) -> Self {
        let store = Arc::new(InMemoryCalendarStore::with_calendars(calendars));
        let registry =
            Arc::new(SqliteRegistry::open_in_memory().expect("failed to open in-memory registry"));
        let coordinator = SyncCoordinator::new(store.clone(), registry.clone());
        Harness {
            store,
            registry,
            coordinator,
        }
    }
}

/// Registry that refuses to delete records; everything else goes to `inner`.
pub struct DeleteRefusingRegistry {
    pub inner: Arc<SqliteRegistry>,
}

#[async_trait]
impl LinkRegistry for DeleteRefusingRegistry {
    async fn upsert(&self, record: &LinkedEventRecord) -> SyncResult<()> {
        self.inner.upsert(record).await
    }

    async fn get(&self, group_id: Uuid) -> SyncResult<Vec<LinkedEventRecord>> {
        self.inner.get(group_id).await
    }

    async fn get_by_external_id(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<LinkedEventRecord>> {
        self.inner.get_by_external_id(calendar_id, external_id).await
    }

    async fn delete(&self, _record: &LinkedEventRecord) -> SyncResult<()> {
        Err(SyncError::Registry("database is locked".into()))
    }

    async fn group_for(&self, external_id: &str) -> SyncResult<Option<Uuid>> {
        self.inner.group_for(external_id).await
    }

    async fn mark_orphaned(&self, record_id: Uuid) -> SyncResult<()> {
        self.inner.mark_orphaned(record_id).await
    }

    async fn all_groups(&self) -> SyncResult<Vec<Uuid>> {
        self.inner.all_groups().await
    }
}

/// Registry that answers `get` a fixed number of times, then fails it.
pub struct GetLimitedRegistry {
    pub inner: Arc<SqliteRegistry>,
    pub gets_left: AtomicUsize,
}

impl GetLimitedRegistry {
    pub fn new(inner: Arc<SqliteRegistry>, gets: usize) -> Self {
        GetLimitedRegistry {
            inner,
            gets_left: AtomicUsize::new(gets),
        }
    }
}

#[async_trait]
impl LinkRegistry for GetLimitedRegistry {
    async fn upsert(&self, record: &LinkedEventRecord) -> SyncResult<()> {
        self.inner.upsert(record).await
    }

    async fn get(&self, group_id: Uuid) -> SyncResult<Vec<LinkedEventRecord>> {
        let left = self.gets_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(SyncError::Registry("database is locked".into()));
        }
        self.gets_left.store(left - 1, Ordering::SeqCst);
        self.inner.get(group_id).await
    }

    async fn get_by_external_id(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<LinkedEventRecord>> {
        self.inner.get_by_external_id(calendar_id, external_id).await
    }

    async fn delete(&self, record: &LinkedEventRecord) -> SyncResult<()> {
        self.inner.delete(record).await
    }

    async fn group_for(&self, external_id: &str) -> SyncResult<Option<Uuid>> {
        self.inner.group_for(external_id).await
    }

    async fn mark_orphaned(&self, record_id: Uuid) -> SyncResult<()> {
        self.inner.mark_orphaned(record_id).await
    }

    async fn all_groups(&self) -> SyncResult<Vec<Uuid>> {
        self.inner.all_groups().await
    }
}

/// 2025-03-20 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 20, hour, minute, 0).unwrap()
}

/// One-hour event starting at `hour`:00.
pub fn draft(title: &str, hour: u32) -> EventDraft {
    EventDraft::new(title, at(hour, 0), at(hour, 0) + Duration::hours(1))
}

pub fn calendars(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// External id of the copy created in `calendar_id`.
pub fn created_in(report: &GroupReport, calendar_id: &str) -> String {
    report
        .created_ids()
        .find(|(calendar, _)| *calendar == calendar_id)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| panic!("no copy created in {calendar_id}"))
}
