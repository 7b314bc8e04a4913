//! Link registry schema migrations.
//!
//! Migrations are applied in version order inside one transaction and the
//! applied version is mirrored to `PRAGMA user_version`.

use rusqlite::Connection;
use tracing::info;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("0001_init.sql"),
}];

/// Latest schema version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Apply all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> SyncResult<()> {
    let current = current_user_version(conn)?;
    let latest = latest_version();

    if current > latest {
        return Err(SyncError::Registry(format!(
            "database schema version {current} is newer than supported {latest}"
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!(from = current, to = latest, "link registry migrated");
    Ok(())
}

pub fn current_user_version(conn: &Connection) -> SyncResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}
