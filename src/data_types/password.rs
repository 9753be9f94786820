//! Credential extraction from the Chrome Login Data store.
//!
//! Works on a scoped copy of the store (Chrome keeps the original locked
//! while running). Rows are processed most-recently-used first; a row that
//! fails to decrypt is skipped and counted, never fatal — profiles
//! routinely hold entries whose OS protection has expired without the rest
//! being invalid.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::artifacts::SecureArtifactStore;
use crate::crypto;
use crate::os_crypt::KeyProtector;
use crate::progress::{report, ProgressSink};

/// One saved login, plaintext after decryption.
///
/// Immutable once constructed; the password bytes are zeroed when the value
/// drops so aborted runs leave nothing readable on the heap.
#[derive(Clone)]
pub struct Credential {
    pub origin_url: String,
    pub action_url: String,
    pub username: String,
    pub password: String,
    /// Chrome timestamp (µs since 1601), 0 when unknown.
    pub created_at: i64,
    pub last_used_at: i64,
}

impl Drop for Credential {
    fn drop(&mut self) {
        // SAFETY: overwriting with NUL bytes keeps the String valid UTF-8.
        let bytes = unsafe { self.password.as_mut_vec() };
        for b in bytes.iter_mut() {
            *b = 0;
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("origin_url", &self.origin_url)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Result of one extraction batch: recovered rows plus the skip count.
pub struct CredentialBatch {
    pub credentials: Vec<Credential>,
    pub skipped: usize,
}

/// Extract and decrypt all saved logins from a Chrome profile.
pub fn extract_credentials(
    login_db: &Path,
    local_state: &Path,
    protector: &dyn KeyProtector,
    artifacts: &SecureArtifactStore,
    sink: &dyn ProgressSink,
) -> Result<CredentialBatch> {
    if !login_db.exists() {
        bail!("Login Data store not found: {:?}", login_db);
    }
    if !local_state.exists() {
        bail!("Local State file not found: {:?}", local_state);
    }
    report(sink, 10, 100, "Located Chrome password store")?;

    // Work on a copy; the artifact guarantees secure cleanup on all paths.
    let copy = artifacts.acquire("login_data");
    fs::copy(login_db, copy.path()).context("Failed to copy Login Data store")?;

    let key = crypto::obtain_master_key(local_state, protector)?;
    report(sink, 20, 100, "Recovered profile master key")?;

    let conn = Connection::open(copy.path()).context("Failed to open Login Data copy")?;
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM logins", [], |row| row.get(0))?;
    report(sink, 30, 100, &format!("Found {} stored credentials", total))?;

    let mut stmt = conn.prepare(
        "SELECT origin_url, action_url, username_value, password_value,
                date_created, date_last_used
         FROM logins
         ORDER BY date_last_used DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut credentials = Vec::new();
    let mut skipped = 0usize;

    for (i, row) in rows.enumerate() {
        let (origin_url, action_url, username, ciphertext, created_at, last_used_at) = row?;

        if total > 0 {
            let pos = 30 + 60 * i as u64 / total as u64;
            report(sink, pos, 100, &format!("Decrypting credential {}/{}", i + 1, total))?;
        }

        // Empty ciphertext means an empty password field, not corruption.
        if ciphertext.is_empty() {
            continue;
        }

        let password = match crypto::decrypt_row(&ciphertext, &key, protector) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("⚠️  Skipping credential for {}: {}", origin_url, e);
                skipped += 1;
                continue;
            }
        };

        credentials.push(Credential {
            origin_url,
            action_url,
            username,
            password,
            created_at,
            last_used_at,
        });
    }

    report(
        sink,
        95,
        100,
        &format!("Recovered {} credentials ({} skipped)", credentials.len(), skipped),
    )?;
    debug!("Credential extraction finished, copy will be erased");

    Ok(CredentialBatch { credentials, skipped })
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    url: String,
    username: String,
    password: String,
    #[serde(default)]
    action_url: String,
}

/// Write credentials in the tabular exchange format
/// (`url,username,password,action_url`).
pub fn write_credential_csv(credentials: &[Credential], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create credential CSV {:?}", path))?;

    writer.write_record(["url", "username", "password", "action_url"])?;
    for cred in credentials {
        writer.write_record([
            &cred.origin_url,
            &cred.username,
            &cred.password,
            &cred.action_url,
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse the tabular exchange format produced by an automated export.
///
/// Timestamps are not part of the format and come back as 0.
pub fn parse_credential_csv(path: &Path) -> Result<Vec<Credential>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open credential CSV {:?}", path))?;

    let mut credentials = Vec::new();
    for row in reader.deserialize() {
        let row: CsvRow = row.context("Malformed credential CSV row")?;
        credentials.push(Credential {
            origin_url: row.url,
            action_url: row.action_url,
            username: row.username,
            password: row.password,
            created_at: 0,
            last_used_at: 0,
        });
    }
    Ok(credentials)
}
