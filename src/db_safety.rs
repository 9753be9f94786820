//! Destination store guards.
//!
//! The merge's backup-and-restore protocol is only sound while this process
//! is the sole writer of `places.sqlite`. These checks refuse the merge
//! when the destination browser still holds the store, and verify the store
//! is intact before any write begins.

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

/// Verify the destination store opens cleanly and passes a quick integrity
/// check before any write begins.
pub fn check_compatibility(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        return Err(anyhow!("Destination store does not exist: {:?}", db_path));
    }

    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
    )
    .context("Failed to open destination store for compatibility check")?;

    let schema_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to query schema version")?;
    debug!("Destination schema version: {}", schema_version);

    let integrity: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .context("Failed to run integrity check")?;
    if integrity != "ok" {
        return Err(anyhow!("Destination integrity check failed: {}", integrity));
    }

    Ok(())
}

/// True when another process (the destination browser) holds the store.
///
/// Checks the Firefox-family lock files first, then probes for an
/// exclusive transaction.
pub fn is_database_locked(db_path: &Path) -> bool {
    let parent = db_path.parent().unwrap_or_else(|| Path::new("."));
    for lock_file in ["lock", ".parentlock"] {
        let lock_path = parent.join(lock_file);
        if lock_path.exists() {
            debug!("Found browser lock file: {:?}", lock_path);
            return true;
        }
    }

    match Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE) {
        Ok(conn) => {
            if let Err(e) = conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;") {
                debug!("Store busy ({}), treating as locked", e);
                return true;
            }
            false
        }
        Err(e) => {
            debug!("Failed to open store for lock probe: {}", e);
            true
        }
    }
}
