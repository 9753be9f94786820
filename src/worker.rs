//! Background migration worker.
//!
//! At most one migration run may be in flight system-wide: the history
//! merge's backup/restore protocol is not safe under concurrent writers to
//! the same destination store. A second trigger while one run is active is
//! rejected, not queued.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::pipeline::{DataType, MigrationPipeline, MigrationReport};
use crate::progress::ProgressSink;

#[derive(Clone, Default)]
pub struct MigrationWorker {
    in_flight: Arc<AtomicBool>,
}

impl MigrationWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run the pipeline on a blocking task so the caller never blocks.
    ///
    /// The in-flight flag clears exactly when the pipeline finishes, even
    /// if the awaiting future is dropped first.
    pub async fn run(
        &self,
        pipeline: MigrationPipeline,
        selected: Vec<DataType>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<MigrationReport> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            bail!("A migration run is already in progress");
        }

        let flag = Arc::clone(&self.in_flight);
        let handle = tokio::task::spawn_blocking(move || {
            // Clears the flag on every exit path of the blocking task.
            struct Clear(Arc<AtomicBool>);
            impl Drop for Clear {
                fn drop(&mut self) {
                    self.0.store(false, Ordering::SeqCst);
                }
            }
            let _clear = Clear(flag);

            info!("🚀 Migration worker started");
            pipeline.run(&selected, sink.as_ref())
        });

        let migration = handle.await?;
        info!("🏁 Migration worker finished");
        Ok(migration)
    }
}
