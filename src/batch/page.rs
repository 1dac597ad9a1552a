//! Processing of a single page.

use std::time::Duration;

use tracing::{debug, warn};

use crate::dataset::{Eligibility, Outcome, Record, ResultRow};
use crate::streaming::PageBounds;
use crate::text_service::TextService;

/// Result of one attempt at a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// False when the first external call of the page failed. `rows` then
    /// only holds the records before that call and must not be persisted.
    pub completed: bool,
    pub rows: Vec<ResultRow>,
    /// External calls made during this attempt.
    pub calls: usize,
}

impl PageOutcome {
    /// `(answered, skipped, failed)` counts.
    pub fn tally(&self) -> (usize, usize, usize) {
        self.rows
            .iter()
            .fold((0, 0, 0), |(a, s, f), row| match row.outcome {
                Outcome::Answered(_) => (a + 1, s, f),
                Outcome::Skipped => (a, s + 1, f),
                Outcome::Failed => (a, s, f + 1),
            })
    }
}

/// Sends every eligible record of `records` to the service, in order.
///
/// Ineligible records are marked skipped without a call or a pacing delay.
/// If the first call of the page fails, the page is abandoned at once; the
/// service is assumed out of capacity. Later failures are recorded and the
/// page carries on. `pacing` is slept after every call except an aborting one.
pub async fn process_page(
    page: &PageBounds,
    records: &[Record],
    service: &dyn TextService,
    eligibility: &dyn Eligibility,
    pacing: Duration,
) -> PageOutcome {
    let mut rows = Vec::with_capacity(records.len());
    let mut calls = 0;

    for record in records {
        if !eligibility.is_eligible(record) {
            rows.push(ResultRow::new(record, Outcome::Skipped));
            continue;
        }

        let response = service.ask(&record.payload).await;
        calls += 1;

        if response.success {
            rows.push(ResultRow::new(record, Outcome::Answered(response.response)));
        } else {
            let reason = response.error_message.as_deref().unwrap_or("no detail");
            if calls == 1 {
                warn!("[PAGE] First request of {} failed: {}", page, reason);
                return PageOutcome {
                    completed: false,
                    rows,
                    calls,
                };
            }
            warn!("[PAGE] Record '{}' in {} failed: {}", record.key, page, reason);
            rows.push(ResultRow::new(record, Outcome::Failed));
        }

        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }

    debug!("[PAGE] {} finished after {} calls", page, calls);
    PageOutcome {
        completed: true,
        rows,
        calls,
    }
}
