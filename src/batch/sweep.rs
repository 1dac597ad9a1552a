//! The main sweep over all pages.

use tracing::{info, warn};

use crate::batch::page::process_page;
use crate::batch::BatchRunner;
use crate::dataset::{Dataset, Outcome, Record, ResultRow};
use crate::error::AppError;
use crate::streaming::{plan_pages, PageBounds};

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub pages_total: usize,
    /// Pages processed and checkpointed by this sweep.
    pub pages_processed: usize,
    /// Pages skipped because a checkpoint already existed.
    pub pages_resumed: usize,
    /// Pages below the configured starting page.
    pub pages_before_start: usize,
    /// Pages that needed the post-cooldown retry.
    pub retries: usize,
    pub answered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Rows of a page that completed, possibly on its retry.
pub(crate) struct PageRun {
    pub rows: Vec<ResultRow>,
    pub retried: bool,
}

impl BatchRunner {
    /// Processes every page from the starting page on, skipping pages that
    /// already have a checkpoint, and writes one checkpoint per page.
    ///
    /// # Errors
    ///
    /// - `AppError::FatalExhaustion` if a page fails again after the cooldown
    /// - `AppError::Cancelled` if the run is cancelled between pages or
    ///   during a cooldown
    pub async fn run_sweep(&mut self, dataset: &Dataset) -> Result<SweepSummary, AppError> {
        let pages = plan_pages(dataset.len(), self.config.page_size);
        let mut summary = SweepSummary {
            pages_total: pages.len(),
            ..SweepSummary::default()
        };

        for page in &pages {
            if page.number < self.config.starting_page {
                summary.pages_before_start += 1;
                continue;
            }

            self.check_cancelled()?;

            if self.store.page_exists(page).await? {
                info!("[SWEEP] {} already checkpointed, skipping", page);
                summary.pages_resumed += 1;
                continue;
            }

            let records = &dataset.records[page.start..page.end];
            let run = self.run_page_with_retry(page, records).await?;
            self.store.write_page(&dataset.headers, page, &run.rows).await?;

            for row in &run.rows {
                match row.outcome {
                    Outcome::Answered(_) => summary.answered += 1,
                    Outcome::Skipped => summary.skipped += 1,
                    Outcome::Failed => summary.failed += 1,
                }
            }
            summary.pages_processed += 1;
            if run.retried {
                summary.retries += 1;
            }
        }

        info!(
            "[SWEEP] Done: {} of {} pages processed ({} resumed, {} before start, {} retried); {} answered, {} skipped, {} failed",
            summary.pages_processed,
            summary.pages_total,
            summary.pages_resumed,
            summary.pages_before_start,
            summary.retries,
            summary.answered,
            summary.skipped,
            summary.failed
        );

        Ok(summary)
    }

    /// Runs a page, and on capacity exhaustion waits out the cooldown,
    /// reconnects and tries the page once more.
    pub(crate) async fn run_page_with_retry(
        &mut self,
        page: &PageBounds,
        records: &[Record],
    ) -> Result<PageRun, AppError> {
        let first = process_page(
            page,
            records,
            self.session.as_ref(),
            self.eligibility.as_ref(),
            self.config.pacing,
        )
        .await;
        if first.completed {
            return Ok(PageRun {
                rows: first.rows,
                retried: false,
            });
        }

        let exhausted = AppError::CapacityExhausted {
            start: page.start,
            end: page.end,
        };
        warn!(
            "[SWEEP] {}; cooling down for {}s before one retry",
            exhausted,
            self.config.cooldown.as_secs()
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {
                info!("[SWEEP] Cancelled during cooldown");
                return Err(AppError::Cancelled);
            }
            _ = tokio::time::sleep(self.config.cooldown) => {}
        }

        self.session = self.connector.connect().await?;
        info!("[SWEEP] Reconnected, retrying {}", page);

        let second = process_page(
            page,
            records,
            self.session.as_ref(),
            self.eligibility.as_ref(),
            self.config.pacing,
        )
        .await;
        if !second.completed {
            warn!("[SWEEP] {} failed again after cooldown, halting", page);
            return Err(AppError::FatalExhaustion {
                start: page.start,
                end: page.end,
            });
        }

        Ok(PageRun {
            rows: second.rows,
            retried: true,
        })
    }
}
