//! Link registry: which calendar copies belong to the same family event.
//!
//! Records live in a local relational store. All group lookups go through
//! the external-id index; nothing scans the whole table.

pub mod migrations;
mod sqlite;

pub use sqlite::SqliteRegistry;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::event::{DriverId, PersonId};

/// Who drives to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DriverRef {
    /// A standalone driver (grandparent, carpool, ...)
    Driver(DriverId),
    /// A family member; gets a derived travel event in their home calendar
    Person(PersonId),
}

/// Where a derived travel event lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelEventRef {
    pub calendar_id: String,
    pub external_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Active,
    /// The external copy could not be removed or no longer resolves
    Orphaned,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Active => "active",
            LinkStatus::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LinkStatus::Active),
            "orphaned" => Ok(LinkStatus::Orphaned),
            other => Err(SyncError::Registry(format!("unknown link status '{other}'"))),
        }
    }
}

/// One calendar copy of a family event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedEventRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub calendar_id: String,
    pub external_event_id: String,
    pub driver: Option<DriverRef>,
    pub driver_travel_minutes: Option<u32>,
    pub travel_event: Option<TravelEventRef>,
    /// The copy's `last_modified` as of our last write
    pub last_synced_at: DateTime<Utc>,
    pub is_shared_calendar_copy: bool,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
}

impl LinkedEventRecord {
    pub fn new(
        group_id: Uuid,
        calendar_id: impl Into<String>,
        external_event_id: impl Into<String>,
        last_synced_at: DateTime<Utc>,
    ) -> Self {
        LinkedEventRecord {
            id: Uuid::new_v4(),
            group_id,
            calendar_id: calendar_id.into(),
            external_event_id: external_event_id.into(),
            driver: None,
            driver_travel_minutes: None,
            travel_event: None,
            last_synced_at,
            is_shared_calendar_copy: false,
            status: LinkStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.status == LinkStatus::Orphaned
    }
}

#[async_trait]
pub trait LinkRegistry: Send + Sync {
    /// Insert or replace by record id. A second record for the same
    /// calendar in one group is rejected with `DuplicateLink`.
    async fn upsert(&self, record: &LinkedEventRecord) -> SyncResult<()>;

    /// Every record of a group, oldest first.
    async fn get(&self, group_id: Uuid) -> SyncResult<Vec<LinkedEventRecord>>;

    async fn get_by_external_id(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<LinkedEventRecord>>;

    async fn delete(&self, record: &LinkedEventRecord) -> SyncResult<()>;

    async fn group_for(&self, external_id: &str) -> SyncResult<Option<Uuid>>;

    async fn mark_orphaned(&self, record_id: Uuid) -> SyncResult<()>;

    async fn all_groups(&self) -> SyncResult<Vec<Uuid>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
}

impl Driver {
    pub fn new(name: impl Into<String>) -> Self {
        Driver {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A family member / attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub color: String,
}

impl Person {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Person {
            id: Uuid::new_v4(),
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Persistence for drivers and people.
#[async_trait]
pub trait FamilyDirectory: Send + Sync {
    async fn save_driver(&self, driver: &Driver) -> SyncResult<()>;
    async fn driver(&self, id: DriverId) -> SyncResult<Option<Driver>>;
    async fn drivers(&self) -> SyncResult<Vec<Driver>>;
    async fn remove_driver(&self, id: DriverId) -> SyncResult<()>;

    async fn save_person(&self, person: &Person) -> SyncResult<()>;
    async fn person(&self, id: PersonId) -> SyncResult<Option<Person>>;
    async fn people(&self) -> SyncResult<Vec<Person>>;
    async fn remove_person(&self, id: PersonId) -> SyncResult<()>;

    /// Display name for a driver reference, whichever kind it is.
    async fn driver_name(&self, driver: DriverRef) -> SyncResult<Option<String>> {
        Ok(match driver {
            DriverRef::Driver(id) => self.driver(id).await?.map(|d| d.name),
            DriverRef::Person(id) => self.person(id).await?.map(|p| p.name),
        })
    }
}
