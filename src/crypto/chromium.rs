//! Chrome credential decryption.
//!
//! Chrome protects each stored password one of two ways:
//! - "v10"/"v11" prefix: AES-256-GCM under a per-profile master key, layout
//!   `[3-byte prefix][12-byte nonce][ciphertext + tag]`, no associated data.
//! - no version prefix: the whole blob is wrapped by the OS data protection
//!   service directly (rows written before the key migration).
//!
//! The master key itself sits base64-encoded in the profile's `Local State`
//! JSON, behind a 5-byte `DPAPI` marker, and is unwrapped through the OS
//! facility.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::os_crypt::KeyProtector;

/// Marker in front of the wrapped key in `Local State`.
const KEY_BLOB_PREFIX: &[u8] = b"DPAPI";
/// Version prefixes selecting the AEAD scheme.
const AEAD_PREFIXES: [&[u8; 3]; 2] = [b"v10", b"v11"];
const VERSION_PREFIX_LEN: usize = 3;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("master key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("ciphertext too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("authenticated decryption failed")]
    Aead,
    #[error("decrypted data is not valid UTF-8")]
    NotUtf8,
}

/// Profile master key recovered from `Local State`. Zeroed on drop.
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        for b in self.0.iter_mut() {
            *b = 0;
        }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey({} bytes)", self.0.len())
    }
}

/// Ciphertext scheme, selected by the 3-byte version prefix.
#[derive(Debug)]
pub enum DecryptScheme<'a> {
    /// Whole blob is wrapped by the OS data protection service.
    Legacy(&'a [u8]),
    /// AES-256-GCM with an explicit per-row nonce.
    Aead {
        nonce: &'a [u8],
        ciphertext: &'a [u8],
    },
}

impl<'a> DecryptScheme<'a> {
    /// Inspect the version prefix and split the blob accordingly.
    ///
    /// Callers are expected to have filtered out empty blobs already (an
    /// empty `password_value` means an empty password, not an error).
    pub fn detect(raw: &'a [u8]) -> Result<Self, DecryptError> {
        if AEAD_PREFIXES.iter().any(|p| raw.starts_with(*p)) {
            // Prefix + nonce + at least the 16-byte tag.
            if raw.len() <= VERSION_PREFIX_LEN + NONCE_LEN {
                return Err(DecryptError::TooShort { len: raw.len() });
            }
            let (nonce, ciphertext) = raw[VERSION_PREFIX_LEN..].split_at(NONCE_LEN);
            Ok(DecryptScheme::Aead { nonce, ciphertext })
        } else {
            Ok(DecryptScheme::Legacy(raw))
        }
    }
}

/// Read the wrapped master key out of `Local State` and unwrap it.
pub fn obtain_master_key(
    local_state_path: &Path,
    protector: &dyn KeyProtector,
) -> Result<MasterKey, DecryptError> {
    let raw = std::fs::read_to_string(local_state_path).map_err(|e| {
        DecryptError::KeyUnavailable(format!("cannot read Local State: {}", e))
    })?;
    let state: Value = serde_json::from_str(&raw)
        .map_err(|e| DecryptError::KeyUnavailable(format!("Local State is not JSON: {}", e)))?;

    let encoded = state["os_crypt"]["encrypted_key"]
        .as_str()
        .ok_or_else(|| {
            DecryptError::KeyUnavailable("encrypted_key missing from Local State".to_string())
        })?;

    let wrapped = BASE64.decode(encoded).map_err(|e| {
        DecryptError::KeyUnavailable(format!("encrypted_key is not valid base64: {}", e))
    })?;
    if !wrapped.starts_with(KEY_BLOB_PREFIX) {
        return Err(DecryptError::KeyUnavailable(
            "unexpected key blob header".to_string(),
        ));
    }

    let key = protector.unprotect(&wrapped[KEY_BLOB_PREFIX.len()..])?;
    Ok(MasterKey(key))
}

/// Decrypt one stored credential row into its plaintext password.
pub fn decrypt_row(
    raw: &[u8],
    key: &MasterKey,
    protector: &dyn KeyProtector,
) -> Result<String, DecryptError> {
    match DecryptScheme::detect(raw)? {
        DecryptScheme::Aead { nonce, ciphertext } => {
            let cipher =
                Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| DecryptError::Aead)?;
            let plain = cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| DecryptError::Aead)?;
            String::from_utf8(plain).map_err(|_| DecryptError::NotUtf8)
        }
        DecryptScheme::Legacy(blob) => {
            let plain = protector.unprotect(blob)?;
            String::from_utf8(plain).map_err(|_| DecryptError::NotUtf8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test protector: "unwraps" by stripping a `wrapped:` marker.
    struct MockProtector;

    impl KeyProtector for MockProtector {
        fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
            blob.strip_prefix(b"wrapped:")
                .map(|rest| rest.to_vec())
                .ok_or_else(|| DecryptError::KeyUnavailable("not wrapped".to_string()))
        }
    }

    struct RefusingProtector;

    impl KeyProtector for RefusingProtector {
        fn unprotect(&self, _blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
            Err(DecryptError::KeyUnavailable("access denied".to_string()))
        }
    }

    fn aead_blob(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(key).unwrap();
        let ct = cipher.encrypt(Nonce::from_slice(nonce), plaintext).unwrap();
        let mut blob = b"v10".to_vec();
        blob.extend_from_slice(nonce);
        blob.extend_from_slice(&ct);
        blob
    }

    fn write_local_state(dir: &Path, key_blob: &[u8]) -> std::path::PathBuf {
        let encoded = BASE64.encode([KEY_BLOB_PREFIX, key_blob].concat());
        let json = serde_json::json!({ "os_crypt": { "encrypted_key": encoded } });
        let path = dir.join("Local State");
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    #[test]
    fn detects_aead_schemes_by_prefix() {
        let mut blob = b"v10".to_vec();
        blob.extend_from_slice(&[7u8; 12]);
        blob.extend_from_slice(&[9u8; 20]);
        match DecryptScheme::detect(&blob).unwrap() {
            DecryptScheme::Aead { nonce, ciphertext } => {
                assert_eq!(nonce, &[7u8; 12]);
                assert_eq!(ciphertext.len(), 20);
            }
            other => panic!("expected AEAD scheme, got {:?}", other),
        }

        blob[..3].copy_from_slice(b"v11");
        assert!(matches!(
            DecryptScheme::detect(&blob).unwrap(),
            DecryptScheme::Aead { .. }
        ));
    }

    #[test]
    fn unversioned_blobs_are_legacy() {
        match DecryptScheme::detect(b"opaque-dpapi-bytes").unwrap() {
            DecryptScheme::Legacy(blob) => assert_eq!(blob, b"opaque-dpapi-bytes"),
            other => panic!("expected legacy scheme, got {:?}", other),
        }
    }

    #[test]
    fn truncated_aead_blob_is_rejected() {
        let err = DecryptScheme::detect(b"v10short").unwrap_err();
        assert!(matches!(err, DecryptError::TooShort { len: 8 }));
    }

    #[test]
    fn aead_round_trip() {
        let key_bytes = [0x42u8; 32];
        let blob = aead_blob(&key_bytes, &[1u8; 12], b"hunter2");
        let key = MasterKey(key_bytes.to_vec());

        let plain = decrypt_row(&blob, &key, &MockProtector).unwrap();
        assert_eq!(plain, "hunter2");
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key_bytes = [0x42u8; 32];
        let mut blob = aead_blob(&key_bytes, &[1u8; 12], b"hunter2");
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        let key = MasterKey(key_bytes.to_vec());
        assert!(matches!(
            decrypt_row(&blob, &key, &MockProtector),
            Err(DecryptError::Aead)
        ));
    }

    #[test]
    fn legacy_rows_go_through_the_protector() {
        let key = MasterKey(vec![0u8; 32]);
        let plain = decrypt_row(b"wrapped:letmein", &key, &MockProtector).unwrap();
        assert_eq!(plain, "letmein");

        assert!(matches!(
            decrypt_row(b"wrapped:letmein", &key, &RefusingProtector),
            Err(DecryptError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn master_key_is_recovered_from_local_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_local_state(dir.path(), b"wrapped:master-key-bytes");

        let key = obtain_master_key(&path, &MockProtector).unwrap();
        assert_eq!(key.as_bytes(), b"master-key-bytes");
    }

    #[test]
    fn refused_protector_surfaces_key_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_local_state(dir.path(), b"whatever");

        assert!(matches!(
            obtain_master_key(&path, &RefusingProtector),
            Err(DecryptError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn malformed_local_state_is_key_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Local State");
        std::fs::write(&path, "{}").unwrap();

        assert!(matches!(
            obtain_master_key(&path, &MockProtector),
            Err(DecryptError::KeyUnavailable(_))
        ));
    }
}
