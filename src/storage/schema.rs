use rusqlite::Connection;
use tracing::info;

use crate::errors::{ClothError, Result};

/// Ordered schema migrations; entry `i` upgrades `user_version` `i` to `i + 1`.
/// Never edit an entry once released, append a new one.
pub const MIGRATIONS: &[&str] = &[
    // v1: items with embedded tag data
    "
    CREATE TABLE IF NOT EXISTS cloth_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_path TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        color TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cloth_items_created_at ON cloth_items(created_at);
    CREATE INDEX IF NOT EXISTS idx_cloth_items_category ON cloth_items(category);
    ",
    // v2: memo text
    "
    ALTER TABLE cloth_items ADD COLUMN memo TEXT;
    CREATE INDEX IF NOT EXISTS idx_cloth_items_size ON cloth_items(size);
    ",
];

pub fn current_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

pub fn latest_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Applies pending migrations, one transaction each.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    migrate_to(conn, latest_version())
}

pub(crate) fn migrate_to(conn: &mut Connection, target: i64) -> Result<()> {
    let current = current_version(conn)?;
    if current > latest_version() {
        return Err(ClothError::InvalidInput(format!(
            "Database schema version {} is newer than supported version {}",
            current,
            latest_version()
        )));
    }

    for version in current..target {
        let tx = conn.transaction()?;
        tx.execute_batch(MIGRATIONS[version as usize])?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", version + 1))?;
        tx.commit()?;
        info!(version = version + 1, "applied schema migration");
    }
    Ok(())
}
