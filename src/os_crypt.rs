//! OS key-protection facility.
//!
//! Chrome wraps its profile master key (and pre-migration password rows)
//! with the host's per-user data protection service. The migration core
//! only ever sees that service as a black box that either returns plaintext
//! bytes or refuses.

use crate::crypto::DecryptError;

/// Unwraps opaque OS-protected key material.
pub trait KeyProtector: Send + Sync {
    fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>, DecryptError>;
}

/// Production protector backed by the host's data protection service.
///
/// Shells out to the OS tool rather than binding the native API, the same
/// way the Keychain is queried through `security` on macOS. Running as a
/// different user than the one who wrote the store yields `KeyUnavailable`.
pub struct OsKeyProtector;

impl KeyProtector for OsKeyProtector {
    #[cfg(target_os = "windows")]
    fn unprotect(&self, blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
        dpapi_unprotect(blob)
    }

    #[cfg(not(target_os = "windows"))]
    fn unprotect(&self, _blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
        Err(DecryptError::KeyUnavailable(
            "OS data protection service is not available on this platform".to_string(),
        ))
    }
}

#[cfg(target_os = "windows")]
fn dpapi_unprotect(blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::process::Command;

    let script = format!(
        "Add-Type -AssemblyName System.Security; \
         [Convert]::ToBase64String(\
         [System.Security.Cryptography.ProtectedData]::Unprotect(\
         [Convert]::FromBase64String('{}'), $null, \
         [System.Security.Cryptography.DataProtectionScope]::CurrentUser))",
        BASE64.encode(blob)
    );

    let output = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", &script])
        .output()
        .map_err(|e| {
            DecryptError::KeyUnavailable(format!("failed to reach data protection service: {}", e))
        })?;

    if !output.status.success() {
        return Err(DecryptError::KeyUnavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    BASE64
        .decode(String::from_utf8_lossy(&output.stdout).trim())
        .map_err(|e| {
            DecryptError::KeyUnavailable(format!(
                "unexpected output from data protection service: {}",
                e
            ))
        })
}
