//! History extraction from the Chrome History store.
//!
//! Pulls a time-windowed, size-bounded slice of the `urls`/`visits`
//! relation off a scoped copy of the store, then stages it into a
//! places-shaped SQLite database ready for the merge engine.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::artifacts::SecureArtifactStore;
use crate::progress::{report, ProgressSink};
use crate::timestamp;

/// One visit row joined with its URL record.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub url: String,
    pub title: String,
    /// Chrome timestamp (µs since 1601) of this visit.
    pub visit_time: i64,
    pub visit_count: i64,
    /// Always `>= visit_time`; falls back to `visit_time` when the source
    /// column is absent or zero.
    pub last_visit_time: i64,
    pub typed_count: i64,
    pub hidden: bool,
}

/// Extract the most recent history window from a Chrome profile.
///
/// Returns entries ordered most recent first.
pub fn extract_history(
    history_db: &Path,
    retention_days: u32,
    max_items: u32,
    artifacts: &SecureArtifactStore,
    sink: &dyn ProgressSink,
) -> Result<Vec<HistoryEntry>> {
    if retention_days < 1 {
        bail!("retention_days must be at least 1");
    }
    if max_items < 1 {
        bail!("max_items must be at least 1");
    }
    if !history_db.exists() {
        bail!("History store not found: {:?}", history_db);
    }
    report(sink, 10, 100, "Located Chrome history store")?;

    // Chrome holds the live store open; query a copy.
    let copy = artifacts.acquire("chrome_history");
    fs::copy(history_db, copy.path()).context("Failed to copy History store")?;

    let cutoff = timestamp::cutoff_days_ago(retention_days);
    let conn = Connection::open(copy.path()).context("Failed to open History copy")?;
    report(sink, 20, 100, "Connected to history database")?;

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM urls
         JOIN visits ON urls.id = visits.url
         WHERE visits.visit_time > ?1",
        [cutoff],
        |row| row.get(0),
    )?;
    let total = total.min(i64::from(max_items));
    report(sink, 30, 100, &format!("Found {} history items", total))?;

    let mut stmt = conn.prepare(
        "SELECT urls.url, urls.title, visits.visit_time,
                urls.visit_count, urls.last_visit_time,
                urls.typed_count, urls.hidden
         FROM urls
         JOIN visits ON urls.id = visits.url
         WHERE visits.visit_time > ?1
         ORDER BY visits.visit_time DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![cutoff, max_items], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, i64>(6)?,
        ))
    })?;

    let mut entries = Vec::new();
    for (i, row) in rows.enumerate() {
        let (url, title, visit_time, visit_count, last_visit_time, typed_count, hidden) = row?;

        if total > 0 {
            let pos = 30 + 60 * i as u64 / total as u64;
            report(sink, pos, 100, &format!("Processing history item {}/{}", i + 1, total))?;
        }

        // A page without a title shows its URL.
        let title = match title {
            Some(t) if !t.is_empty() => t,
            _ => url.clone(),
        };

        entries.push(HistoryEntry {
            url,
            title,
            visit_time,
            visit_count,
            last_visit_time: if last_visit_time > 0 { last_visit_time } else { visit_time },
            typed_count,
            hidden: hidden != 0,
        });
    }

    report(sink, 95, 100, &format!("Extracted {} history items", entries.len()))?;
    Ok(entries)
}

/// Hostname reversed character-wise with a trailing dot, the way the
/// places store indexes hosts. Empty when the URL has no host segment.
fn rev_host(url: &str) -> String {
    match url.split('/').nth(2) {
        Some(host) if !host.is_empty() => {
            let mut reversed: String = host.chars().rev().collect();
            reversed.push('.');
            reversed
        }
        _ => String::new(),
    }
}

/// Write entries into a places-shaped staging database.
///
/// Each entry becomes one place row and one visit row; deduplication
/// against the destination happens later, in the merge.
pub fn stage_history(entries: &[HistoryEntry], staged_db: &Path) -> Result<()> {
    let mut conn = Connection::open(staged_db).context("Failed to create staging database")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS moz_places (
            id INTEGER PRIMARY KEY,
            url TEXT NOT NULL,
            title TEXT,
            rev_host TEXT,
            visit_count INTEGER,
            hidden INTEGER DEFAULT 0,
            typed INTEGER DEFAULT 0,
            frecency INTEGER,
            last_visit_date INTEGER,
            guid TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS moz_historyvisits (
            id INTEGER PRIMARY KEY,
            from_visit INTEGER,
            place_id INTEGER,
            visit_date INTEGER,
            visit_type INTEGER,
            session INTEGER
        )",
        [],
    )?;

    let tx = conn.transaction()?;
    for (i, entry) in entries.iter().enumerate() {
        tx.execute(
            "INSERT INTO moz_places (
                url, title, rev_host, visit_count, hidden, typed,
                frecency, last_visit_date, guid
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                entry.url,
                entry.title,
                rev_host(&entry.url),
                entry.visit_count,
                entry.hidden as i64,
                entry.typed_count,
                100, // default frecency, recalculated by the browser
                entry.last_visit_time,
                format!("chrome-import-{}", i),
            ],
        )?;
        let place_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO moz_historyvisits (
                from_visit, place_id, visit_date, visit_type, session
             ) VALUES (0, ?1, ?2, 1, 0)",
            rusqlite::params![place_id, entry.visit_time],
        )?;
    }
    tx.commit()?;

    conn.execute("CREATE INDEX IF NOT EXISTS url_idx ON moz_places (url)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS place_id_idx ON moz_historyvisits (place_id)",
        [],
    )?;

    debug!("Staged {} history entries to {:?}", entries.len(), staged_db);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;

    fn chrome_history_fixture(path: &Path, visits: &[(&str, &str, i64)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute(
            "CREATE TABLE urls (
                id INTEGER PRIMARY KEY, url TEXT UNIQUE, title TEXT,
                visit_count INTEGER, last_visit_time INTEGER,
                typed_count INTEGER, hidden INTEGER
             )",
            [],
        )
        .unwrap();
        conn.execute(
            "CREATE TABLE visits (id INTEGER PRIMARY KEY, url INTEGER, visit_time INTEGER)",
            [],
        )
        .unwrap();

        for (url, title, visit_time) in visits {
            conn.execute(
                "INSERT OR IGNORE INTO urls (url, title, visit_count, last_visit_time, typed_count, hidden)
                 VALUES (?1, ?2, 1, ?3, 0, 0)",
                rusqlite::params![url, title, visit_time],
            )
            .unwrap();
            let url_id: i64 = conn
                .query_row("SELECT id FROM urls WHERE url = ?1", [url], |r| r.get(0))
                .unwrap();
            conn.execute(
                "INSERT INTO visits (url, visit_time) VALUES (?1, ?2)",
                rusqlite::params![url_id, visit_time],
            )
            .unwrap();
        }
    }

    #[test]
    fn extracts_window_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("History");
        let recent = timestamp::cutoff_days_ago(1) + 1_000_000;
        let older = timestamp::cutoff_days_ago(2) + 1_000_000;
        let ancient = timestamp::cutoff_days_ago(400);
        chrome_history_fixture(
            &db,
            &[
                ("https://old.test/", "Old", older),
                ("https://new.test/", "New", recent),
                ("https://ancient.test/", "Ancient", ancient),
            ],
        );

        let store = SecureArtifactStore::with_root(dir.path().join("a"), false).unwrap();
        let entries = extract_history(&db, 30, 100, &store, &NullSink).unwrap();

        let urls: Vec<_> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://new.test/", "https://old.test/"]);
    }

    #[test]
    fn max_items_caps_the_slice() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("History");
        let base = timestamp::cutoff_days_ago(1);
        let visits: Vec<(String, String, i64)> = (0..10)
            .map(|i| {
                (
                    format!("https://site{}.test/", i),
                    format!("Site {}", i),
                    base + (i + 1) * 1_000_000,
                )
            })
            .collect();
        let borrowed: Vec<(&str, &str, i64)> =
            visits.iter().map(|(u, t, v)| (u.as_str(), t.as_str(), *v)).collect();
        chrome_history_fixture(&db, &borrowed);

        let store = SecureArtifactStore::with_root(dir.path().join("a"), false).unwrap();
        let entries = extract_history(&db, 30, 3, &store, &NullSink).unwrap();
        assert_eq!(entries.len(), 3);
        // Most recent survive the cap.
        assert_eq!(entries[0].url, "https://site9.test/");
    }

    #[test]
    fn empty_title_falls_back_to_url() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("History");
        let recent = timestamp::cutoff_days_ago(1) + 1_000_000;
        chrome_history_fixture(&db, &[("https://untitled.test/", "", recent)]);

        let store = SecureArtifactStore::with_root(dir.path().join("a"), false).unwrap();
        let entries = extract_history(&db, 30, 10, &store, &NullSink).unwrap();
        assert_eq!(entries[0].title, "https://untitled.test/");
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("History");
        chrome_history_fixture(&db, &[]);
        let store = SecureArtifactStore::with_root(dir.path().join("a"), false).unwrap();

        assert!(extract_history(&db, 0, 10, &store, &NullSink).is_err());
        assert!(extract_history(&db, 30, 0, &store, &NullSink).is_err());
    }

    #[test]
    fn rev_host_reverses_the_host_segment() {
        assert_eq!(rev_host("https://example.com/path"), "moc.elpmaxe.");
        assert_eq!(rev_host("not-a-url"), "");
    }

    #[test]
    fn staging_writes_one_place_and_visit_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.sqlite");
        let entries = vec![
            HistoryEntry {
                url: "https://a.test/".to_string(),
                title: "A".to_string(),
                visit_time: 13_000_000_000_000_000,
                visit_count: 2,
                last_visit_time: 13_000_000_001_000_000,
                typed_count: 1,
                hidden: false,
            },
            HistoryEntry {
                url: "https://a.test/".to_string(),
                title: "A".to_string(),
                visit_time: 13_000_000_002_000_000,
                visit_count: 2,
                last_visit_time: 13_000_000_002_000_000,
                typed_count: 1,
                hidden: false,
            },
        ];

        stage_history(&entries, &staged).unwrap();

        let conn = Connection::open(&staged).unwrap();
        let places: i64 = conn
            .query_row("SELECT COUNT(*) FROM moz_places", [], |r| r.get(0))
            .unwrap();
        let visits: i64 = conn
            .query_row("SELECT COUNT(*) FROM moz_historyvisits", [], |r| r.get(0))
            .unwrap();
        // Same URL stays duplicated at staging; the merge dedups it.
        assert_eq!(places, 2);
        assert_eq!(visits, 2);

        let rev: String = conn
            .query_row("SELECT rev_host FROM moz_places LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rev, "tset.a.");
    }
}
