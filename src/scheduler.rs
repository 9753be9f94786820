//! Scheduled migration trigger.
//!
//! Runs the pipeline on a cron cadence through the single-flight worker; a
//! tick that fires while a run is still active is skipped.

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::os_crypt::OsKeyProtector;
use crate::pipeline::{DataType, MigrationConfig, MigrationPipeline};
use crate::progress::NullSink;
use crate::worker::MigrationWorker;

pub struct SchedulerConfig {
    pub cron_expression: String,
    pub config: MigrationConfig,
    pub selected: Vec<DataType>,
}

pub async fn start_scheduler(config: SchedulerConfig) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;
    info!("⏰ Scheduler initialized with cron: {}", config.cron_expression);

    let worker = MigrationWorker::new();
    let migration_config = Arc::new(config.config);
    let selected = Arc::new(config.selected);

    let job = Job::new_async(config.cron_expression.as_str(), move |_uuid, _l| {
        let worker = worker.clone();
        let migration_config = Arc::clone(&migration_config);
        let selected = Arc::clone(&selected);

        Box::pin(async move {
            if worker.is_running() {
                info!("⏭️  Previous migration still running, skipping this tick");
                return;
            }
            info!("🔄 Scheduled migration triggered");

            let pipeline = match MigrationPipeline::new(
                (*migration_config).clone(),
                Box::new(OsKeyProtector),
            ) {
                Ok(p) => p,
                Err(e) => {
                    error!("❌ Failed to set up migration pipeline: {}", e);
                    return;
                }
            };

            match worker.run(pipeline, (*selected).clone(), Arc::new(NullSink)).await {
                Ok(migration) => {
                    info!("{}", migration.summary());
                }
                Err(e) => {
                    error!("❌ Scheduled migration failed: {}", e);
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("⏰ Scheduler started. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down scheduler...");
    scheduler.shutdown().await?;
    Ok(())
}
