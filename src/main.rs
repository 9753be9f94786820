use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use chrome_zen_migrate::data_types::{bookmark, password};
use chrome_zen_migrate::os_crypt::OsKeyProtector;
use chrome_zen_migrate::pipeline::{DataType, MigrationConfig, MigrationPipeline};
use chrome_zen_migrate::profile::{self, ChromeStores};
use chrome_zen_migrate::progress::{BarSink, NullSink};
use chrome_zen_migrate::scheduler::{self, SchedulerConfig};
use chrome_zen_migrate::worker::MigrationWorker;
use chrome_zen_migrate::{acquisition, artifacts};

#[derive(Parser)]
#[command(name = "chrome-zen-migrate")]
#[command(about = "Migrate Chrome credentials, bookmarks and history into Zen Browser", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full migration into the default Zen profile
    Migrate {
        /// Data types to migrate (comma-separated: passwords,bookmarks,history or "all")
        #[arg(short = 't', long, default_value = "all")]
        types: String,

        /// Chrome user data directory (auto-detected when omitted)
        #[arg(long)]
        chrome_dir: Option<PathBuf>,

        /// Chrome profile name
        #[arg(long, default_value = "Default")]
        chrome_profile: String,

        /// Zen Browser user data directory (auto-detected when omitted)
        #[arg(long)]
        zen_dir: Option<PathBuf>,

        /// Days of history to migrate
        #[arg(short, long, default_value_t = 30)]
        days: u32,

        /// Maximum number of history items
        #[arg(long, default_value_t = 5000)]
        max_items: u32,

        /// Skip multi-pass overwrite of temp files (faster, less careful)
        #[arg(long)]
        no_secure_delete: bool,

        /// Passphrase for encrypting intermediate artifacts at rest
        #[arg(long)]
        passphrase: Option<String>,

        /// External credential exporter binary (tried before direct access)
        #[arg(long)]
        exporter: Option<PathBuf>,

        /// Exporter timeout in seconds (advisory)
        #[arg(long, default_value_t = 60)]
        exporter_timeout: u64,
    },

    /// List detected Zen Browser profiles
    ListProfiles {
        /// Zen Browser user data directory (auto-detected when omitted)
        #[arg(long)]
        zen_dir: Option<PathBuf>,
    },

    /// Export Chrome bookmarks to a Netscape HTML file
    ExportBookmarks {
        /// Output HTML path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        chrome_dir: Option<PathBuf>,

        #[arg(long, default_value = "Default")]
        chrome_profile: String,
    },

    /// Export Chrome passwords to the tabular exchange format
    ExportPasswords {
        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        chrome_dir: Option<PathBuf>,

        #[arg(long, default_value = "Default")]
        chrome_profile: String,

        /// Skip multi-pass overwrite of temp files
        #[arg(long)]
        no_secure_delete: bool,
    },

    /// Run migrations on a cron schedule
    Schedule {
        /// Cron expression (default: daily at 03:00)
        #[arg(short, long, default_value = "0 0 3 * * *")]
        cron: String,

        #[arg(short = 't', long, default_value = "all")]
        types: String,

        #[arg(long)]
        chrome_dir: Option<PathBuf>,

        #[arg(long, default_value = "Default")]
        chrome_profile: String,

        #[arg(long)]
        zen_dir: Option<PathBuf>,

        #[arg(short, long, default_value_t = 30)]
        days: u32,
    },
}

fn parse_types(list: &str) -> Result<Vec<DataType>> {
    if list.eq_ignore_ascii_case("all") {
        return Ok(DataType::ORDERED.to_vec());
    }
    let mut selected = Vec::new();
    for part in list.split(',') {
        match part.trim().to_lowercase().as_str() {
            "passwords" => selected.push(DataType::Passwords),
            "bookmarks" => selected.push(DataType::Bookmarks),
            "history" => selected.push(DataType::History),
            other => {
                return Err(anyhow!(
                    "Unknown data type '{}'. Use passwords, bookmarks, history or all",
                    other
                ))
            }
        }
    }
    Ok(selected)
}

fn default_chrome_dir() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let local = std::env::var("LOCALAPPDATA")?;
        Ok(PathBuf::from(local).join("Google").join("Chrome").join("User Data"))
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join("Library/Application Support/Google/Chrome"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config/google-chrome"))
    }
}

fn default_zen_dir() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let roaming = std::env::var("APPDATA")?;
        Ok(PathBuf::from(roaming).join("zen"))
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join("Library/Application Support/zen"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".zen"))
    }
}

fn build_config(
    chrome_dir: Option<PathBuf>,
    chrome_profile: &str,
    zen_dir: Option<PathBuf>,
) -> Result<MigrationConfig> {
    let chrome_dir = match chrome_dir {
        Some(dir) => dir,
        None => default_chrome_dir()?,
    };
    let zen_dir = match zen_dir {
        Some(dir) => dir,
        None => default_zen_dir()?,
    };

    let stores = ChromeStores::resolve(&chrome_dir, chrome_profile);
    let destination = profile::default_profile(&zen_dir)?;
    info!("🎯 Destination profile: {} ({:?})", destination.name, destination.path);

    Ok(MigrationConfig::new(stores, destination))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate {
            types,
            chrome_dir,
            chrome_profile,
            zen_dir,
            days,
            max_items,
            no_secure_delete,
            passphrase,
            exporter,
            exporter_timeout,
        } => {
            let selected = parse_types(&types)?;
            info!(
                "🚀 Starting migration ({})",
                selected.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
            );

            let mut config = build_config(chrome_dir, &chrome_profile, zen_dir)?;
            config.retention_days = days;
            config.max_items = max_items;
            config.secure_delete = !no_secure_delete;
            config.at_rest_passphrase = passphrase;
            config.exporter_bin = exporter;
            config.exporter_timeout = Duration::from_secs(exporter_timeout);

            let pipeline = MigrationPipeline::new(config, Box::new(OsKeyProtector))?;
            let sink = Arc::new(BarSink::new());

            let worker = MigrationWorker::new();
            let migration = worker.run(pipeline, selected, sink.clone()).await?;

            sink.finish(if migration.overall_success() {
                "✅ Migration completed"
            } else {
                "❌ Migration completed with errors"
            });
            println!("{}", migration.summary());

            if !migration.overall_success() && !migration.cancelled() {
                std::process::exit(1);
            }
        }

        Commands::ListProfiles { zen_dir } => {
            let zen_dir = match zen_dir {
                Some(dir) => dir,
                None => default_zen_dir()?,
            };
            let profiles = profile::detect_profiles(&zen_dir)?;

            println!("\n🌐 Detected Zen Browser profiles:");
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            if profiles.is_empty() {
                println!("  ❌ No profiles found under {:?}", zen_dir);
            }
            for p in profiles {
                let marker = if p.is_default { " (default)" } else { "" };
                println!("  ✅ {}{}", p.name, marker);
                println!("     Path: {:?}", p.path);
            }
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        }

        Commands::ExportBookmarks { output, chrome_dir, chrome_profile } => {
            let chrome_dir = match chrome_dir {
                Some(dir) => dir,
                None => default_chrome_dir()?,
            };
            let stores = ChromeStores::resolve(&chrome_dir, &chrome_profile);

            info!("📖 Reading Chrome bookmarks...");
            let raw = std::fs::read_to_string(&stores.bookmarks)?;
            let trees = bookmark::parse_bookmark_tree(&serde_json::from_str(&raw)?)?;
            let leaf_count: usize = trees.iter().map(bookmark::BookmarkNode::leaf_count).sum();

            std::fs::write(&output, bookmark::to_netscape_html(&trees))?;
            info!("✅ Exported {} bookmarks to {:?}", leaf_count, output);
        }

        Commands::ExportPasswords { output, chrome_dir, chrome_profile, no_secure_delete } => {
            let chrome_dir = match chrome_dir {
                Some(dir) => dir,
                None => default_chrome_dir()?,
            };
            let stores = ChromeStores::resolve(&chrome_dir, &chrome_profile);
            let store = artifacts::SecureArtifactStore::new(!no_secure_delete)?;

            info!("🔐 Extracting Chrome credentials...");
            let channel = acquisition::DirectStoreChannel {
                login_data: stores.login_data,
                local_state: stores.local_state,
                protector: &OsKeyProtector,
                artifacts: &store,
            };
            let channels: [&dyn acquisition::AcquisitionChannel<password::CredentialBatch>; 1] =
                [&channel];
            let batch = acquisition::acquire_with_fallback(&channels, &NullSink)?;

            password::write_credential_csv(&batch.credentials, &output)?;
            info!(
                "✅ Exported {} credentials to {:?} ({} skipped)",
                batch.credentials.len(),
                output,
                batch.skipped
            );
            println!("⚠️  {:?} holds plaintext passwords. Delete it as soon as it has been imported.", output);
        }

        Commands::Schedule { cron, types, chrome_dir, chrome_profile, zen_dir, days } => {
            let selected = parse_types(&types)?;
            let mut config = build_config(chrome_dir, &chrome_profile, zen_dir)?;
            config.retention_days = days;

            info!("⏰ Scheduling migration with cron: {}", cron);
            scheduler::start_scheduler(SchedulerConfig {
                cron_expression: cron,
                config,
                selected,
            })
            .await?;
        }
    }

    Ok(())
}
