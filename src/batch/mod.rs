//! Paginated batch runner.
//!
//! Drives the dataset through fixed-size pages, checkpoints every completed
//! page, survives capacity exhaustion with a cooldown and one retry per page,
//! and finally reconciles failed or never-attempted records into one output.
//!
//! The run is strictly sequential: one request is in flight at a time.

mod page;
mod reconcile;
mod sweep;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::RunConfig;
use crate::dataset::{Dataset, Eligibility};
use crate::error::AppError;
use crate::text_service::{ServiceConnector, TextService};

pub use page::{process_page, PageOutcome};
pub use reconcile::FinalOutput;
pub use sweep::SweepSummary;

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sweep: SweepSummary,
    pub output: FinalOutput,
}

/// Owns the text service session for the length of a run.
///
/// The session is replaced only at the retry site after a cooldown.
pub struct BatchRunner {
    config: RunConfig,
    connector: Arc<dyn ServiceConnector>,
    eligibility: Arc<dyn Eligibility>,
    store: CheckpointStore,
    cancel: CancellationToken,
    session: Box<dyn TextService>,
}

impl BatchRunner {
    /// Validates the configuration, prepares the output directory and opens
    /// the first service session.
    pub async fn connect(
        config: RunConfig,
        connector: Arc<dyn ServiceConnector>,
        eligibility: Arc<dyn Eligibility>,
        cancel: CancellationToken,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let store = CheckpointStore::new(&config);
        store.ensure_dir().await?;
        let session = connector.connect().await?;

        Ok(Self {
            config,
            connector,
            eligibility,
            store,
            cancel,
            session,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs the sweep, then reconciliation.
    pub async fn run(&mut self, dataset: &Dataset) -> Result<RunReport, AppError> {
        info!(
            "[SWEEP] Starting run '{}' over {} records",
            self.config.mode.prefix(),
            dataset.len()
        );
        let sweep = self.run_sweep(dataset).await?;
        let output = self.reconcile(dataset).await?;
        Ok(RunReport { sweep, output })
    }

    fn check_cancelled(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            info!("[SWEEP] Cancellation requested");
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}
