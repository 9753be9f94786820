//! Migration pipeline.
//!
//! Runs extract → (optional at-rest encrypt) → transform → import for each
//! selected data type, in a fixed order so progress fractions are
//! deterministic. Each type's failure is contained: one type blowing up
//! never stops the next, and the run as a whole counts as successful when
//! at least one type made it through — migrated data is additive and
//! independently useful per type.

use anyhow::{bail, Result};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::acquisition::{
    acquire_with_fallback, AcquisitionChannel, DirectStoreChannel, ExporterChannel,
};
use crate::artifacts::{self, SecureArtifactStore};
use crate::data_types::password::CredentialBatch;
use crate::data_types::{bookmark, history, password};
use crate::merge;
use crate::os_crypt::KeyProtector;
use crate::profile::{BrowserProfile, ChromeStores};
use crate::progress::{is_cancelled, report, ProgressSink, ScaledSink};

/// The data categories this tool migrates, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Passwords,
    Bookmarks,
    History,
}

impl DataType {
    /// Fixed execution order; progress fractions depend on it.
    pub const ORDERED: [DataType; 3] = [DataType::Passwords, DataType::Bookmarks, DataType::History];

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Passwords => "passwords",
            DataType::Bookmarks => "bookmarks",
            DataType::History => "history",
        }
    }
}

/// Outcome of one data type within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeOutcome {
    Succeeded { imported: usize, skipped: usize },
    Failed { reason: String },
    Cancelled,
}

/// Per-type outcomes of one pipeline run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    pub outcomes: Vec<(DataType, TypeOutcome)>,
}

impl MigrationReport {
    /// A run succeeded when at least one selected type did. Deliberate
    /// policy: one broken store must not void the data that did migrate.
    pub fn overall_success(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, TypeOutcome::Succeeded { .. }))
    }

    pub fn cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, TypeOutcome::Cancelled))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("\n📊 Migration Summary:\n");
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        for (ty, outcome) in &self.outcomes {
            match outcome {
                TypeOutcome::Succeeded { imported, skipped } => {
                    out.push_str(&format!(
                        "  ✅ {:<10} {} imported, {} skipped\n",
                        ty.name(),
                        imported,
                        skipped
                    ));
                }
                TypeOutcome::Failed { reason } => {
                    out.push_str(&format!("  ❌ {:<10} {}\n", ty.name(), reason));
                }
                TypeOutcome::Cancelled => {
                    out.push_str(&format!("  🛑 {:<10} cancelled\n", ty.name()));
                }
            }
        }
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out
    }
}

/// Everything one migration run needs to know.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub stores: ChromeStores,
    pub destination: BrowserProfile,
    pub retention_days: u32,
    pub max_items: u32,
    pub secure_delete: bool,
    pub at_rest_passphrase: Option<String>,
    /// External exporter binary for the automated credential channel.
    pub exporter_bin: Option<PathBuf>,
    pub exporter_timeout: Duration,
}

impl MigrationConfig {
    pub fn new(stores: ChromeStores, destination: BrowserProfile) -> Self {
        Self {
            stores,
            destination,
            retention_days: 30,
            max_items: 5000,
            secure_delete: true,
            at_rest_passphrase: None,
            exporter_bin: None,
            exporter_timeout: Duration::from_secs(60),
        }
    }
}

pub struct MigrationPipeline {
    config: MigrationConfig,
    protector: Box<dyn KeyProtector>,
    artifacts: SecureArtifactStore,
}

impl MigrationPipeline {
    pub fn new(config: MigrationConfig, protector: Box<dyn KeyProtector>) -> Result<Self> {
        let artifacts = SecureArtifactStore::new(config.secure_delete)?;
        Ok(Self { config, protector, artifacts })
    }

    /// Construct with an explicit artifact store (tests use this).
    pub fn with_artifacts(
        config: MigrationConfig,
        protector: Box<dyn KeyProtector>,
        artifacts: SecureArtifactStore,
    ) -> Self {
        Self { config, protector, artifacts }
    }

    /// Run the selected data types in fixed order.
    ///
    /// Never returns an error: every failure is absorbed into the per-type
    /// outcome. Cancellation marks the in-flight type and stops scheduling
    /// further ones.
    pub fn run(&self, selected: &[DataType], sink: &dyn ProgressSink) -> MigrationReport {
        let chosen: Vec<DataType> = DataType::ORDERED
            .iter()
            .copied()
            .filter(|t| selected.contains(t))
            .collect();

        let mut migration = MigrationReport::default();
        if let Err(e) = self.artifacts.sweep() {
            warn!("⚠️  Failed to sweep artifact root: {}", e);
        }

        for (idx, ty) in chosen.iter().enumerate() {
            info!("🔄 Migrating {}", ty.name());
            let scaled = ScaledSink::new(sink, idx, chosen.len());

            let outcome = match self.run_type(*ty, &scaled) {
                Ok((imported, skipped)) => {
                    info!(
                        "✅ {} migration succeeded ({} imported, {} skipped)",
                        ty.name(),
                        imported,
                        skipped
                    );
                    TypeOutcome::Succeeded { imported, skipped }
                }
                Err(e) if is_cancelled(&e) => {
                    info!("🛑 {} migration cancelled by user", ty.name());
                    TypeOutcome::Cancelled
                }
                Err(e) => {
                    error!("❌ {} migration failed: {:#}", ty.name(), e);
                    TypeOutcome::Failed { reason: format!("{:#}", e) }
                }
            };

            let stop = matches!(outcome, TypeOutcome::Cancelled);
            migration.outcomes.push((*ty, outcome));
            if stop {
                break;
            }
        }

        let message = if migration.cancelled() {
            "Migration cancelled"
        } else if migration.overall_success() {
            "Migration completed"
        } else {
            "Migration completed with errors"
        };
        sink.report(100, 100, message);
        migration
    }

    fn run_type(&self, ty: DataType, sink: &dyn ProgressSink) -> Result<(usize, usize)> {
        match ty {
            DataType::Passwords => self.run_passwords(sink),
            DataType::Bookmarks => self.run_bookmarks(sink),
            DataType::History => self.run_history(sink),
        }
    }

    fn run_passwords(&self, sink: &dyn ProgressSink) -> Result<(usize, usize)> {
        let direct = DirectStoreChannel {
            login_data: self.config.stores.login_data.clone(),
            local_state: self.config.stores.local_state.clone(),
            protector: self.protector.as_ref(),
            artifacts: &self.artifacts,
        };

        let exporter;
        let mut channels: Vec<&dyn AcquisitionChannel<CredentialBatch>> = Vec::new();
        if let Some(bin) = &self.config.exporter_bin {
            exporter = ExporterChannel {
                exporter_bin: bin.clone(),
                timeout: self.config.exporter_timeout,
                artifacts: &self.artifacts,
            };
            channels.push(&exporter);
        }
        channels.push(&direct);

        let batch = acquire_with_fallback(&channels, sink)?;

        // Transform into the tabular exchange document, staged as a scoped
        // artifact so an abort erases it.
        let staged = self.artifacts.acquire("credentials_csv");
        password::write_credential_csv(&batch.credentials, staged.path())?;

        // Import boundary: the exchange file is handed to the destination
        // profile for the browser's own import flow.
        let handoff = match &self.config.at_rest_passphrase {
            Some(pass) => {
                let key = artifacts::derive_at_rest_key(Some(pass));
                artifacts::protect_file(staged.path(), &key)?;
                self.config.destination.path.join("chrome-credentials.csv.enc")
            }
            None => {
                warn!("⚠️  Credential handoff is written unencrypted; supply a passphrase to protect it");
                self.config.destination.path.join("chrome-credentials.csv")
            }
        };
        fs::copy(staged.path(), &handoff)?;

        report(
            sink,
            100,
            100,
            &format!("Credential exchange file ready at {:?}", handoff),
        )?;
        Ok((batch.credentials.len(), batch.skipped))
    }

    fn run_bookmarks(&self, sink: &dyn ProgressSink) -> Result<(usize, usize)> {
        let path = &self.config.stores.bookmarks;
        if !path.exists() {
            bail!("Bookmarks file not found: {:?}", path);
        }
        report(sink, 10, 100, "Located Chrome bookmarks file")?;

        let raw = fs::read_to_string(path)?;
        let data: Value = serde_json::from_str(&raw)?;
        report(sink, 30, 100, "Loaded bookmarks data")?;

        let trees = bookmark::parse_bookmark_tree(&data)?;
        let leaf_count: usize = trees.iter().map(bookmark::BookmarkNode::leaf_count).sum();
        report(sink, 60, 100, &format!("Parsed {} bookmarks", leaf_count))?;

        let staged = self.artifacts.acquire("bookmarks_html");
        fs::write(staged.path(), bookmark::to_netscape_html(&trees))?;

        let handoff = self.config.destination.path.join("chrome-bookmarks.html");
        fs::copy(staged.path(), &handoff)?;

        report(
            sink,
            100,
            100,
            &format!("Bookmark exchange file ready at {:?}", handoff),
        )?;
        Ok((leaf_count, 0))
    }

    fn run_history(&self, sink: &dyn ProgressSink) -> Result<(usize, usize)> {
        // Extraction occupies the first half of this type's progress slice,
        // staging and merge the second; each phase stays monotone.
        let extract_sink = ScaledSink::new(sink, 0, 2);
        let merge_sink = ScaledSink::new(sink, 1, 2);

        let entries = history::extract_history(
            &self.config.stores.history,
            self.config.retention_days,
            self.config.max_items,
            &self.artifacts,
            &extract_sink,
        )?;

        let staged = self.artifacts.acquire("staged_history");
        history::stage_history(&entries, staged.path())?;

        // With an at-rest policy the staged rows never sit on disk in the
        // clear between phases.
        if let Some(pass) = &self.config.at_rest_passphrase {
            let key = artifacts::derive_at_rest_key(Some(pass));
            artifacts::protect_file(staged.path(), &key)?;
            artifacts::unprotect_file(staged.path(), &key)?;
        }

        let stats = merge::merge_history(
            staged.path(),
            &self.config.destination.places_db(),
            &self.artifacts,
            &merge_sink,
        )?;

        Ok((stats.visits_inserted, stats.visits_skipped))
    }
}
