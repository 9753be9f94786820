//! Acquisition channels with ordered fallback.
//!
//! A data type can be acquired more than one way: through an automated
//! exporter that hands back a tabular file, or by opening the store files
//! directly. Channels implement one interface and are tried in order — the
//! first success wins, a failure falls through to the next channel with a
//! warning. Cancellation is not a channel failure and short-circuits.

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::artifacts::SecureArtifactStore;
use crate::data_types::password::{self, CredentialBatch};
use crate::os_crypt::KeyProtector;
use crate::progress::{is_cancelled, report, ProgressSink};

/// One way of obtaining a data set.
pub trait AcquisitionChannel<T> {
    fn name(&self) -> &'static str;
    fn attempt(&self, sink: &dyn ProgressSink) -> Result<T>;
}

/// Try channels in order until one produces the data.
pub fn acquire_with_fallback<T>(
    channels: &[&dyn AcquisitionChannel<T>],
    sink: &dyn ProgressSink,
) -> Result<T> {
    let mut last_err: Option<anyhow::Error> = None;

    for channel in channels {
        match channel.attempt(sink) {
            Ok(data) => {
                info!("✅ Acquired data via {} channel", channel.name());
                return Ok(data);
            }
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!(
                    "⚠️  {} channel failed: {}. Trying next channel...",
                    channel.name(),
                    e
                );
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("no acquisition channel configured")))
}

/// Credential acquisition through an external exporter process.
///
/// The exporter writes the tabular exchange format
/// (`url,username,password,action_url`) into a scoped artifact, which is
/// parsed and then securely erased. The timeout is advisory: on expiry the
/// process is killed and the channel reports failure so the caller can fall
/// back.
pub struct ExporterChannel<'a> {
    pub exporter_bin: PathBuf,
    pub timeout: Duration,
    pub artifacts: &'a SecureArtifactStore,
}

impl AcquisitionChannel<CredentialBatch> for ExporterChannel<'_> {
    fn name(&self) -> &'static str {
        "automated-export"
    }

    fn attempt(&self, sink: &dyn ProgressSink) -> Result<CredentialBatch> {
        report(sink, 5, 100, "Launching credential exporter")?;

        let output = self.artifacts.acquire("exported_credentials");
        let mut child = Command::new(&self.exporter_bin)
            .arg("--format")
            .arg("csv")
            .arg("--output")
            .arg(output.path())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!(
                        "exporter exceeded {}s timeout, abandoning channel",
                        self.timeout.as_secs()
                    );
                }
                None => std::thread::sleep(Duration::from_millis(100)),
            }
        };
        if !status.success() {
            bail!("exporter exited with {}", status);
        }

        report(sink, 70, 100, "Parsing exported credentials")?;
        let credentials = password::parse_credential_csv(output.path())?;
        report(
            sink,
            95,
            100,
            &format!("Parsed {} exported credentials", credentials.len()),
        )?;
        Ok(CredentialBatch { credentials, skipped: 0 })
    }
}

/// Credential acquisition by reading the Login Data store directly.
pub struct DirectStoreChannel<'a> {
    pub login_data: PathBuf,
    pub local_state: PathBuf,
    pub protector: &'a dyn KeyProtector,
    pub artifacts: &'a SecureArtifactStore,
}

impl AcquisitionChannel<CredentialBatch> for DirectStoreChannel<'_> {
    fn name(&self) -> &'static str {
        "direct-store"
    }

    fn attempt(&self, sink: &dyn ProgressSink) -> Result<CredentialBatch> {
        password::extract_credentials(
            &self.login_data,
            &self.local_state,
            self.protector,
            self.artifacts,
            sink,
        )
    }
}
