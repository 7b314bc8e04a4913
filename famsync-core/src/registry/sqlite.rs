//! SQLite-backed link registry and family directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use super::migrations::apply_migrations;
use super::{
    Driver, DriverRef, FamilyDirectory, LinkRegistry, LinkStatus, LinkedEventRecord, Person,
    TravelEventRef,
};
use crate::error::{SyncError, SyncResult};
use crate::event::{DriverId, PersonId};

const RECORD_SELECT_SQL: &str = "SELECT
    id,
    group_id,
    calendar_id,
    external_event_id,
    driver_kind,
    driver_id,
    driver_travel_minutes,
    travel_calendar_id,
    travel_external_id,
    last_synced_at,
    is_shared_calendar_copy,
    status,
    created_at
FROM linked_events";

/// Link registry over one SQLite connection.
///
/// The connection is guarded by a mutex so the process has a single writer;
/// every statement runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistry {
    /// Open (or create) a registry file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened link registry");
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> SyncResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_migrations(&mut conn)?;
        Ok(SqliteRegistry {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&Connection) -> SyncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

struct RawRecord {
    id: String,
    group_id: String,
    calendar_id: String,
    external_event_id: String,
    driver_kind: Option<String>,
    driver_id: Option<String>,
    driver_travel_minutes: Option<u32>,
    travel_calendar_id: Option<String>,
    travel_external_id: Option<String>,
    last_synced_at: i64,
    is_shared_calendar_copy: bool,
    status: String,
    created_at: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRecord {
            id: row.get(0)?,
            group_id: row.get(1)?,
            calendar_id: row.get(2)?,
            external_event_id: row.get(3)?,
            driver_kind: row.get(4)?,
            driver_id: row.get(5)?,
            driver_travel_minutes: row.get(6)?,
            travel_calendar_id: row.get(7)?,
            travel_external_id: row.get(8)?,
            last_synced_at: row.get(9)?,
            is_shared_calendar_copy: row.get(10)?,
            status: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_record(self) -> SyncResult<LinkedEventRecord> {
        let driver = match (self.driver_kind.as_deref(), self.driver_id) {
            (Some("driver"), Some(id)) => Some(DriverRef::Driver(parse_uuid(&id)?)),
            (Some("person"), Some(id)) => Some(DriverRef::Person(parse_uuid(&id)?)),
            (None, _) | (_, None) => None,
            (Some(other), Some(_)) => {
                return Err(SyncError::Registry(format!("unknown driver kind '{other}'")));
            }
        };
        let travel_event = match (self.travel_calendar_id, self.travel_external_id) {
            (Some(calendar_id), Some(external_id)) => Some(TravelEventRef {
                calendar_id,
                external_id,
            }),
            _ => None,
        };

        Ok(LinkedEventRecord {
            id: parse_uuid(&self.id)?,
            group_id: parse_uuid(&self.group_id)?,
            calendar_id: self.calendar_id,
            external_event_id: self.external_event_id,
            driver,
            driver_travel_minutes: self.driver_travel_minutes,
            travel_event,
            last_synced_at: from_millis(self.last_synced_at)?,
            is_shared_calendar_copy: self.is_shared_calendar_copy,
            status: self.status.parse()?,
            created_at: from_millis(self.created_at)?,
        })
    }
}

fn parse_uuid(s: &str) -> SyncResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| SyncError::Registry(format!("invalid id '{s}': {e}")))
}

fn from_millis(ms: i64) -> SyncResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SyncError::Registry(format!("timestamp out of range: {ms}")))
}

fn query_records(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> SyncResult<Vec<LinkedEventRecord>> {
    let sql = format!("{RECORD_SELECT_SQL} {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map(params, RawRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawRecord::into_record).collect()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl LinkRegistry for SqliteRegistry {
    async fn upsert(&self, record: &LinkedEventRecord) -> SyncResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let (driver_kind, driver_id) = match record.driver {
                Some(DriverRef::Driver(id)) => (Some("driver"), Some(id.to_string())),
                Some(DriverRef::Person(id)) => (Some("person"), Some(id.to_string())),
                None => (None, None),
            };
            let (travel_calendar_id, travel_external_id) = match &record.travel_event {
                Some(t) => (Some(t.calendar_id.as_str()), Some(t.external_id.as_str())),
                None => (None, None),
            };

            let result = conn.execute(
                "INSERT INTO linked_events (
                    id, group_id, calendar_id, external_event_id, driver_kind, driver_id,
                    driver_travel_minutes, travel_calendar_id, travel_external_id,
                    last_synced_at, is_shared_calendar_copy, status, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(id) DO UPDATE SET
                    group_id = excluded.group_id,
                    calendar_id = excluded.calendar_id,
                    external_event_id = excluded.external_event_id,
                    driver_kind = excluded.driver_kind,
                    driver_id = excluded.driver_id,
                    driver_travel_minutes = excluded.driver_travel_minutes,
                    travel_calendar_id = excluded.travel_calendar_id,
                    travel_external_id = excluded.travel_external_id,
                    last_synced_at = excluded.last_synced_at,
                    is_shared_calendar_copy = excluded.is_shared_calendar_copy,
                    status = excluded.status",
                params![
                    record.id.to_string(),
                    record.group_id.to_string(),
                    record.calendar_id,
                    record.external_event_id,
                    driver_kind,
                    driver_id,
                    record.driver_travel_minutes,
                    travel_calendar_id,
                    travel_external_id,
                    record.last_synced_at.timestamp_millis(),
                    record.is_shared_calendar_copy,
                    record.status.as_str(),
                    record.created_at.timestamp_millis(),
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(SyncError::DuplicateLink {
                    group_id: record.group_id,
                    calendar_id: record.calendar_id.clone(),
                }),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get(&self, group_id: Uuid) -> SyncResult<Vec<LinkedEventRecord>> {
        self.with_conn(move |conn| {
            query_records(
                conn,
                "WHERE group_id = ?1 ORDER BY created_at, rowid",
                params![group_id.to_string()],
            )
        })
        .await
    }

    async fn get_by_external_id(
        &self,
        calendar_id: &str,
        external_id: &str,
    ) -> SyncResult<Option<LinkedEventRecord>> {
        let calendar_id = calendar_id.to_string();
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let mut found = query_records(
                conn,
                "WHERE external_event_id = ?1 AND calendar_id = ?2 LIMIT 1",
                params![external_id, calendar_id],
            )?;
            Ok(found.pop())
        })
        .await
    }

    async fn delete(&self, record: &LinkedEventRecord) -> SyncResult<()> {
        let id = record.id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM linked_events WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn group_for(&self, external_id: &str) -> SyncResult<Option<Uuid>> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let group: Option<String> = conn
                .query_row(
                    "SELECT group_id FROM linked_events
                     WHERE external_event_id = ?1 ORDER BY created_at LIMIT 1",
                    params![external_id],
                    |row| row.get(0),
                )
                .optional()?;
            group.as_deref().map(parse_uuid).transpose()
        })
        .await
    }

    async fn mark_orphaned(&self, record_id: Uuid) -> SyncResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE linked_events SET status = ?1 WHERE id = ?2",
                params![LinkStatus::Orphaned.as_str(), record_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn all_groups(&self) -> SyncResult<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id FROM linked_events
                 GROUP BY group_id ORDER BY MIN(created_at)",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
        .await
    }
}

#[async_trait]
impl FamilyDirectory for SqliteRegistry {
    async fn save_driver(&self, driver: &Driver) -> SyncResult<()> {
        let driver = driver.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO drivers (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![driver.id.to_string(), driver.name],
            )?;
            Ok(())
        })
        .await
    }

    async fn driver(&self, id: DriverId) -> SyncResult<Option<Driver>> {
        self.with_conn(move |conn| {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM drivers WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name.map(|name| Driver { id, name }))
        })
        .await
    }

    async fn drivers(&self) -> SyncResult<Vec<Driver>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM drivers ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(id, name)| Ok(Driver { id: parse_uuid(&id)?, name }))
                .collect()
        })
        .await
    }

    async fn remove_driver(&self, id: DriverId) -> SyncResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM drivers WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
    }

    async fn save_person(&self, person: &Person) -> SyncResult<()> {
        let person = person.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO people (id, name, color) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, color = excluded.color",
                params![person.id.to_string(), person.name, person.color],
            )?;
            Ok(())
        })
        .await
    }

    async fn person(&self, id: PersonId) -> SyncResult<Option<Person>> {
        self.with_conn(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT name, color FROM people WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.map(|(name, color)| Person { id, name, color }))
        })
        .await
    }

    async fn people(&self) -> SyncResult<Vec<Person>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, color FROM people ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(id, name, color)| {
                    Ok(Person {
                        id: parse_uuid(&id)?,
                        name,
                        color,
                    })
                })
                .collect()
        })
        .await
    }

    async fn remove_person(&self, id: PersonId) -> SyncResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM people WHERE id = ?1", params![id.to_string()])?;
            Ok(())
        })
        .await
    }
}
