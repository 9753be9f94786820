//! Secure lifecycle for on-disk intermediate files.
//!
//! Every temporary file the migration touches (store copies, staged
//! databases, export files) is owned by a [`ScopedArtifact`] so it is
//! erased exactly once on every exit path, including errors and
//! cancellation. With secure delete enabled, release overwrites the full
//! file length with three passes (zeros, ones, random), fsyncing after
//! each, before unlinking. An overwrite failure degrades to a plain unlink
//! with a warning rather than leaving the file orphaned.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Context, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Salt for the at-rest key derivation. Static by design: the passphrase
/// (user-supplied or machine-derived) carries the entropy.
const AT_REST_SALT: &[u8] = b"chrome-zen-migrate-at-rest";
const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;

/// Manages the temp root and hands out scoped artifact files.
pub struct SecureArtifactStore {
    root: PathBuf,
    secure_delete: bool,
}

impl SecureArtifactStore {
    /// Create a store rooted under the OS temp directory.
    pub fn new(secure_delete: bool) -> Result<Self> {
        Self::with_root(std::env::temp_dir().join("chrome-zen-migrate"), secure_delete)
    }

    /// Create a store with an explicit root (tests use this).
    pub fn with_root(root: PathBuf, secure_delete: bool) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create artifact root {:?}", root))?;
        Ok(Self { root, secure_delete })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a uniquely named artifact file under the managed root.
    ///
    /// The file itself is created lazily by whoever writes it; release
    /// handles both cases.
    pub fn acquire(&self, name_hint: &str) -> ScopedArtifact {
        let path = self
            .root
            .join(format!("{}_{}", name_hint, uuid::Uuid::new_v4()));
        debug!("Acquired artifact {:?}", path);
        ScopedArtifact {
            path,
            secure_delete: self.secure_delete,
            released: false,
        }
    }

    /// Erase every file still present under the temp root.
    ///
    /// Catches leftovers from crashed earlier runs.
    pub fn sweep(&self) -> Result<()> {
        let mut erased = 0usize;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                erase_file(entry.path(), self.secure_delete);
                erased += 1;
            }
        }
        if erased > 0 {
            debug!("Swept {} leftover artifact(s) from {:?}", erased, self.root);
        }
        Ok(())
    }
}

/// Handle to one managed temp file. Erased exactly once: either through
/// [`ScopedArtifact::release`] or when the handle drops.
pub struct ScopedArtifact {
    path: PathBuf,
    secure_delete: bool,
    released: bool,
}

impl ScopedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Erase the artifact now instead of waiting for drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.path.exists() {
            erase_file(&self.path, self.secure_delete);
        }
    }
}

impl Drop for ScopedArtifact {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn erase_file(path: &Path, secure: bool) {
    if secure {
        if let Err(e) = overwrite_and_unlink(path) {
            warn!(
                "⚠️  Secure delete failed for {:?} ({}), falling back to plain delete",
                path, e
            );
            let _ = fs::remove_file(path);
        } else {
            debug!("Securely erased {:?}", path);
        }
    } else if let Err(e) = fs::remove_file(path) {
        warn!("⚠️  Failed to delete {:?}: {}", path, e);
    }
}

/// Three-pass overwrite (zeros, ones, random) then unlink.
fn overwrite_and_unlink(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len() as usize;

    write_pass(path, &vec![0x00u8; len])?;
    write_pass(path, &vec![0xFFu8; len])?;

    let mut random = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut random);
    write_pass(path, &random)?;

    fs::remove_file(path)?;
    Ok(())
}

fn write_pass(path: &Path, buf: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(buf)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Derive the symmetric at-rest key from a passphrase.
///
/// Without a user passphrase the key falls back to a machine-identity
/// passphrase (username + hostname + machine id), which protects artifacts
/// against casual copying but not against the local user.
pub fn derive_at_rest_key(passphrase: Option<&str>) -> [u8; 32] {
    let pass = match passphrase {
        Some(p) => p.to_string(),
        None => machine_passphrase(),
    };
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(pass.as_bytes(), AT_REST_SALT, KDF_ITERATIONS, &mut key);
    key
}

fn machine_passphrase() -> String {
    let user = std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default();
    let host = std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default();
    let machine_id = fs::read_to_string("/etc/machine-id").unwrap_or_default();
    format!("{}@{}#{}", user, host, machine_id.trim())
}

/// Authenticated encryption for artifacts resident on disk.
///
/// Blob layout: `[12-byte nonce][ciphertext + tag]`.
pub fn encrypt_at_rest(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid at-rest key"))?;
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| anyhow!("at-rest encryption failed: {}", e))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Inverse of [`encrypt_at_rest`]. Rejects truncated or tampered blobs.
pub fn decrypt_at_rest(blob: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + 1 {
        anyhow::bail!("at-rest blob too short ({} bytes)", blob.len());
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| anyhow!("invalid at-rest key"))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow!("at-rest decryption failed (wrong key or tampered blob)"))
}

/// Encrypt a file in place under the at-rest key.
pub fn protect_file(path: &Path, key: &[u8; 32]) -> Result<()> {
    let plain = fs::read(path)?;
    let blob = encrypt_at_rest(&plain, key)?;
    fs::write(path, blob)?;
    Ok(())
}

/// Decrypt a file in place that was written by [`protect_file`].
pub fn unprotect_file(path: &Path, key: &[u8; 32]) -> Result<()> {
    let blob = fs::read(path)?;
    let plain = decrypt_at_rest(&blob, key)?;
    fs::write(path, plain)?;
    Ok(())
}
