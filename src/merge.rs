//! History merge into the Zen places store.
//!
//! Moves staged places/visits into a destination `places.sqlite` whose id
//! space is independent of the source. The merge runs as one transaction
//! under a file-level snapshot: either every row lands, or the destination
//! file is restored byte-for-byte from the snapshot.
//!
//! Identity rules: a place is identified by its URL — a URL already present
//! in the destination is never inserted again, its existing id absorbs all
//! incoming visits. Visit ancestry (`from_visit`) is not reconstructed
//! across stores; imported visits are recorded as direct navigations.

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::artifacts::SecureArtifactStore;
use crate::db_safety;
use crate::progress::{report, ProgressSink};

/// Row movement summary for one merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    pub places_inserted: usize,
    pub places_deduped: usize,
    pub visits_inserted: usize,
    pub visits_skipped: usize,
}

/// Merge a staged history database into the destination places store.
///
/// On any failure after the snapshot is taken, the destination file is
/// restored from it before the error propagates; a partial merge is never
/// left behind. On success the snapshot is discarded through the artifact
/// store (securely erased).
pub fn merge_history(
    staged_db: &Path,
    places_db: &Path,
    artifacts: &SecureArtifactStore,
    sink: &dyn ProgressSink,
) -> Result<MergeStats> {
    if !places_db.exists() {
        bail!("places.sqlite not found: {:?}", places_db);
    }
    if db_safety::is_database_locked(places_db) {
        bail!("Zen Browser is running and holds the places store. Close it and retry.");
    }
    db_safety::check_compatibility(places_db)?;

    report(sink, 40, 100, "Creating backup of destination history store")?;
    let snapshot = artifacts.acquire("places_backup");
    fs::copy(places_db, snapshot.path()).context("Failed to snapshot destination store")?;

    let result = apply_merge(staged_db, places_db, sink);

    match result {
        Ok(stats) => {
            // Snapshot no longer needed; drop erases it.
            drop(snapshot);
            info!(
                "✅ Merge complete: {} new places ({} deduplicated), {} visits ({} skipped)",
                stats.places_inserted,
                stats.places_deduped,
                stats.visits_inserted,
                stats.visits_skipped
            );
            Ok(stats)
        }
        Err(e) => {
            warn!("⚠️  Merge failed ({}), restoring destination from snapshot", e);
            fs::copy(snapshot.path(), places_db)
                .context("CRITICAL: failed to restore destination store from snapshot")?;
            Err(e)
        }
    }
}

fn apply_merge(staged_db: &Path, places_db: &Path, sink: &dyn ProgressSink) -> Result<MergeStats> {
    let staged = Connection::open_with_flags(
        staged_db,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .context("Failed to open staged history database")?;
    let mut dest = Connection::open(places_db).context("Failed to open destination store")?;

    report(sink, 50, 100, "Importing history data")?;

    let tx = dest.transaction()?;

    // Base offsets keep candidate ids clear of every pre-existing row.
    let base_place_id: i64 = tx
        .query_row("SELECT MAX(id) FROM moz_places", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?
        .unwrap_or(0);
    let base_visit_id: i64 = tx
        .query_row("SELECT MAX(id) FROM moz_historyvisits", [], |row| {
            row.get::<_, Option<i64>>(0)
        })?
        .unwrap_or(0);

    let mut stats = MergeStats::default();
    // source place id → destination place id, scoped to this merge.
    let mut id_map: HashMap<i64, i64> = HashMap::new();

    // Phase 1: places, deduplicated by URL.
    let mut stmt = staged.prepare(
        "SELECT id, url, title, rev_host, visit_count, hidden, typed,
                frecency, last_visit_date, guid
         FROM moz_places ORDER BY id",
    )?;
    let places: Vec<(i64, String, Option<String>, Option<String>, i64, i64, i64, i64, i64, String)> =
        stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })?
        .collect::<std::result::Result<_, _>>()?;

    for (i, place) in places.iter().enumerate() {
        let (source_id, url, title, rev_host, visit_count, hidden, typed, frecency, last_visit, guid) =
            place;

        if !places.is_empty() {
            let pos = 50 + 20 * i as u64 / places.len() as u64;
            report(sink, pos, 100, &format!("Importing place {}/{}", i + 1, places.len()))?;
        }

        let existing: Option<i64> = tx
            .query_row("SELECT id FROM moz_places WHERE url = ?1", [url], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(existing_id) = existing {
            // URL is the canonical identity: reuse the destination row.
            id_map.insert(*source_id, existing_id);
            stats.places_deduped += 1;
            continue;
        }

        let new_id = base_place_id + source_id;
        tx.execute(
            "INSERT INTO moz_places (
                id, url, title, rev_host, visit_count, hidden, typed,
                frecency, last_visit_date, guid
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                new_id, url, title, rev_host, visit_count, hidden, typed, frecency, last_visit,
                guid
            ],
        )?;
        id_map.insert(*source_id, new_id);
        stats.places_inserted += 1;
    }

    // Phase 2: visits, remapped onto the ids chosen above.
    let mut stmt = staged.prepare(
        "SELECT place_id, visit_date, visit_type, session
         FROM moz_historyvisits ORDER BY id",
    )?;
    let visits: Vec<(i64, i64, i64, i64)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<_, _>>()?;

    let mut next_visit_seq = 0i64;
    for (i, (source_place_id, visit_date, visit_type, session)) in visits.iter().enumerate() {
        if !visits.is_empty() {
            let pos = 70 + 20 * i as u64 / visits.len() as u64;
            report(sink, pos, 100, &format!("Importing visit {}/{}", i + 1, visits.len()))?;
        }

        let Some(place_id) = id_map.get(source_place_id) else {
            // Referenced place never made it into the window; drop the visit.
            stats.visits_skipped += 1;
            continue;
        };

        next_visit_seq += 1;
        tx.execute(
            "INSERT INTO moz_historyvisits (
                id, from_visit, place_id, visit_date, visit_type, session
             ) VALUES (?1, 0, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                base_visit_id + next_visit_seq,
                place_id,
                visit_date,
                visit_type,
                session
            ],
        )?;
        stats.visits_inserted += 1;
    }

    tx.commit()?;
    report(sink, 90, 100, "History import completed")?;
    Ok(stats)
}
