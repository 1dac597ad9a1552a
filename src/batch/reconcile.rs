//! Reconciliation of all checkpoints into the final output.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::batch::BatchRunner;
use crate::config::UnresolvedPolicy;
use crate::dataset::{Dataset, Outcome, Record, ResultRow};
use crate::error::AppError;
use crate::streaming::PageBounds;

/// What reconciliation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutput {
    pub path: PathBuf,
    /// Rows in the final output.
    pub rows: usize,
    /// Records sent through the leftover pass.
    pub leftover_attempted: usize,
    /// Leftover records that got a result this time.
    pub recovered: usize,
    /// Keys dropped under `UnresolvedPolicy::Drop`.
    pub unresolved: Vec<String>,
    pub unresolved_report: Option<PathBuf>,
}

/// Builds the combined result set, one row per key.
///
/// A row that is not missing wins over a failed one; otherwise the first row
/// seen for a key is kept.
pub(crate) fn combine<I>(rows: I) -> HashMap<String, ResultRow>
where
    I: IntoIterator<Item = ResultRow>,
{
    let mut combined: HashMap<String, ResultRow> = HashMap::new();
    for row in rows {
        match combined.get_mut(&row.key) {
            Some(existing) => {
                if existing.outcome.is_missing() && !row.outcome.is_missing() {
                    *existing = row;
                }
            }
            None => {
                combined.insert(row.key.clone(), row);
            }
        }
    }
    combined
}

impl BatchRunner {
    /// Merges every page checkpoint and the earlier leftover file, re-runs
    /// failed and never-attempted records once, and writes the final
    /// `key,result` output.
    ///
    /// # Errors
    ///
    /// - `AppError::UnresolvedRecords` under `UnresolvedPolicy::Fail` when
    ///   records still have no result; no final output is written
    /// - `AppError::FatalExhaustion` if the leftover pass is exhausted twice
    /// - `AppError::Cancelled` if cancelled before or during the leftover pass
    pub async fn reconcile(&mut self, dataset: &Dataset) -> Result<FinalOutput, AppError> {
        let (combined, earlier_leftover) = self.load_combined(dataset).await?;

        let missing: Vec<Record> = dataset
            .records
            .iter()
            .filter(|r| !matches!(combined.get(&r.key), Some(row) if !row.outcome.is_missing()))
            .cloned()
            .collect();

        let mut leftover: HashMap<String, Outcome> = HashMap::new();
        if missing.is_empty() {
            info!("[RECONCILE] No records missing a result");
        } else {
            self.check_cancelled()?;
            info!(
                "[RECONCILE] Re-running {} records without a result",
                missing.len()
            );
            let page = PageBounds {
                number: 0,
                start: 0,
                end: missing.len(),
            };
            let run = self.run_page_with_retry(&page, &missing).await?;
            let merged = merge_leftover(dataset, earlier_leftover, &run.rows);
            self.store.write_remaining(&dataset.headers, &merged).await?;
            leftover = run
                .rows
                .into_iter()
                .map(|row| (row.key, row.outcome))
                .collect();
        }

        let mut final_rows = Vec::with_capacity(dataset.len());
        let mut unresolved = Vec::new();
        let mut recovered = 0;

        for record in &dataset.records {
            let outcome = match combined.get(&record.key) {
                Some(row) if !row.outcome.is_missing() => Some(&row.outcome),
                _ => {
                    let retried = leftover.get(&record.key);
                    if retried.is_some_and(|o| !o.is_missing()) {
                        recovered += 1;
                    }
                    retried
                }
            };

            match outcome {
                Some(outcome) if !outcome.is_missing() => {
                    final_rows.push((record.key.clone(), outcome.text().to_string()))
                }
                _ => unresolved.push(record.key.clone()),
            }
        }

        let mut unresolved_report = None;
        if !unresolved.is_empty() {
            match self.config.unresolved_policy {
                UnresolvedPolicy::Fail => {
                    warn!(
                        "[RECONCILE] {} records unresolved after the leftover pass",
                        unresolved.len()
                    );
                    return Err(AppError::UnresolvedRecords { keys: unresolved });
                }
                UnresolvedPolicy::Drop => {
                    let report = self.store.write_unresolved(&unresolved).await?;
                    warn!(
                        "[RECONCILE] Dropping {} unresolved records from the final output (listed in {})",
                        unresolved.len(),
                        report.display()
                    );
                    unresolved_report = Some(report);
                }
            }
        }

        let path = self.store.write_final(&final_rows).await?;
        info!(
            "[RECONCILE] Final output has {} rows ({} recovered by the leftover pass)",
            final_rows.len(),
            recovered
        );

        Ok(FinalOutput {
            path,
            rows: final_rows.len(),
            leftover_attempted: missing.len(),
            recovered,
            unresolved,
            unresolved_report,
        })
    }

    /// Reads every page checkpoint of this run mode, then the leftover file
    /// of earlier reconciliations, into the combined set.
    ///
    /// Also returns the earlier leftover rows so the next leftover file can
    /// keep them.
    async fn load_combined(
        &self,
        dataset: &Dataset,
    ) -> Result<(HashMap<String, ResultRow>, Vec<ResultRow>), AppError> {
        let pages = self.store.list_pages().await?;
        let mut rows = Vec::new();

        for page in &pages {
            let contents = self.store.read(&page.path).await?;
            if contents.headers != dataset.headers {
                warn!(
                    "[RECONCILE] Checkpoint [{}, {}) has different input columns than the current input; merging anyway",
                    page.start, page.end
                );
            }
            rows.extend(contents.rows);
        }

        let earlier_leftover = match self.store.read_remaining().await? {
            Some(contents) => {
                if contents.headers != dataset.headers {
                    warn!("[RECONCILE] Leftover checkpoint has different input columns than the current input; merging anyway");
                }
                info!(
                    "[RECONCILE] Loaded {} rows from an earlier leftover pass",
                    contents.rows.len()
                );
                contents.rows
            }
            None => Vec::new(),
        };
        rows.extend(earlier_leftover.iter().cloned());

        let read = rows.len();
        let mut combined = combine(rows);
        let before = combined.len();
        let input_keys: HashSet<&str> = dataset.records.iter().map(|r| r.key.as_str()).collect();
        combined.retain(|key, _| input_keys.contains(key.as_str()));
        if combined.len() < before {
            warn!(
                "[RECONCILE] Ignored {} checkpoint keys not present in the input",
                before - combined.len()
            );
        }

        info!(
            "[RECONCILE] Loaded {} rows from {} checkpoints ({} distinct keys)",
            read,
            pages.len(),
            combined.len()
        );
        Ok((combined, earlier_leftover))
    }
}

/// Leftover rows to persist: this pass's rows plus earlier leftover rows,
/// one per key in input order. A fresh row replaces an earlier one unless
/// it failed where the earlier one did not.
fn merge_leftover(dataset: &Dataset, earlier: Vec<ResultRow>, fresh: &[ResultRow]) -> Vec<ResultRow> {
    let mut merged = combine(fresh.iter().cloned().chain(earlier));
    dataset
        .records
        .iter()
        .filter_map(|record| merged.remove(&record.key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::testing::{dataset, FakeService};
    use crate::checkpoint::CheckpointStore;
    use crate::config::{RunConfig, RunMode};
    use crate::dataset::{AllRecords, Eligibility};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn config(dir: &TempDir) -> RunConfig {
        RunConfig::new(dir.path(), RunMode::new("labels").unwrap()).page_size(5)
    }

    async fn runner_with(
        config: RunConfig,
        service: &FakeService,
        eligibility: Arc<dyn Eligibility>,
    ) -> BatchRunner {
        BatchRunner::connect(config, service.connector(), eligibility, CancellationToken::new())
            .await
            .unwrap()
    }

    async fn runner(config: RunConfig, service: &FakeService) -> BatchRunner {
        runner_with(config, service, Arc::new(AllRecords)).await
    }

    fn final_rows(path: &std::path::Path) -> Vec<(String, String)> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(|r| {
                let r = r.unwrap();
                (r[0].to_string(), r[1].to_string())
            })
            .collect()
    }

    fn row(key: &str, outcome: Outcome) -> ResultRow {
        ResultRow {
            key: key.to_string(),
            fields: vec![key.to_string()],
            outcome,
        }
    }

    #[test]
    fn combine_prefers_present_result_over_failure() {
        let combined = combine(vec![
            row("1", Outcome::Failed),
            row("1", Outcome::Answered("late".into())),
            row("2", Outcome::Answered("first".into())),
            row("2", Outcome::Answered("second".into())),
            row("3", Outcome::Skipped),
            row("3", Outcome::Failed),
            row("4", Outcome::Failed),
            row("4", Outcome::Failed),
        ]);

        assert_eq!(combined.len(), 4);
        assert_eq!(combined["1"].outcome, Outcome::Answered("late".into()));
        assert_eq!(combined["2"].outcome, Outcome::Answered("first".into()));
        assert_eq!(combined["3"].outcome, Outcome::Skipped);
        assert_eq!(combined["4"].outcome, Outcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_page_failure_recovered_by_leftover_pass() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        service.fail_times("p7", 1);
        let mut runner = runner(config(&dir), &service).await;
        let data = dataset(10);

        runner.run_sweep(&data).await.unwrap();
        let output = runner.reconcile(&data).await.unwrap();

        assert_eq!(output.rows, 10);
        assert_eq!(output.leftover_attempted, 1);
        assert_eq!(output.recovered, 1);
        assert!(output.unresolved.is_empty());

        let remaining = runner
            .store()
            .read(&dir.path().join("labels_remaining.csv"))
            .await
            .unwrap();
        assert_eq!(remaining.rows.len(), 1);
        assert_eq!(remaining.rows[0].key, "7");

        let rows = final_rows(&output.path);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[7], ("7".to_string(), "label:p7".to_string()));
        assert_eq!(rows[0], ("0".to_string(), "label:p0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_without_checkpoint_are_attempted() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        let mut runner = runner(config(&dir).starting_page(1), &service).await;
        let data = dataset(10);

        runner.run_sweep(&data).await.unwrap();
        let output = runner.reconcile(&data).await.unwrap();

        assert_eq!(output.leftover_attempted, 5);
        assert_eq!(output.rows, 10);
        let prompts = service.prompts();
        assert_eq!(&prompts[5..], &["p0", "p1", "p2", "p3", "p4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_records_are_final() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        let odd_only: Arc<dyn Eligibility> = Arc::new(|r: &Record| r.index % 2 == 1);
        let mut runner = runner_with(config(&dir), &service, odd_only).await;
        let data = dataset(10);

        runner.run_sweep(&data).await.unwrap();
        let calls_after_sweep = service.prompts().len();
        let output = runner.reconcile(&data).await.unwrap();

        assert_eq!(calls_after_sweep, 5);
        assert_eq!(service.prompts().len(), 5);
        assert_eq!(output.leftover_attempted, 0);
        assert!(!dir.path().join("labels_remaining.csv").exists());

        let rows = final_rows(&output.path);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].1, "");
        assert_eq!(rows[1].1, "label:p1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_records_fail_by_default() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        service.fail_times("p3", 1);
        service.fail_times("p7", 2);
        let mut runner = runner(config(&dir), &service).await;
        let data = dataset(10);

        runner.run_sweep(&data).await.unwrap();
        let err = runner.reconcile(&data).await.unwrap_err();

        match err {
            AppError::UnresolvedRecords { keys } => assert_eq!(keys, vec!["7"]),
            other => panic!("expected UnresolvedRecords, got {:?}", other),
        }
        assert!(!dir.path().join("labels.csv").exists());
        assert!(dir.path().join("labels_remaining.csv").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_records_dropped_when_allowed() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        service.fail_times("p3", 1);
        service.fail_times("p7", 2);
        let config = config(&dir).unresolved_policy(UnresolvedPolicy::Drop);
        let mut runner = runner(config, &service).await;
        let data = dataset(10);

        runner.run_sweep(&data).await.unwrap();
        let output = runner.reconcile(&data).await.unwrap();

        assert_eq!(output.rows, 9);
        assert_eq!(output.recovered, 1);
        assert_eq!(output.unresolved, vec!["7"]);
        let report = output.unresolved_report.unwrap();
        assert_eq!(fs::read_to_string(report).unwrap(), "7\n");
        assert!(final_rows(&output.path).iter().all(|(k, _)| k != "7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_checkpoints_collapse_by_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("labels_0000_0003.csv"),
            "Index,Answer,Response,status\n0,a,A0,answered\n1,a,,failed\n2,a,A2,answered\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("labels_0001_0003.csv"),
            "Index,Answer,Response,status\n1,a,A1,answered\n2,a,B2,answered\n",
        )
        .unwrap();
        let service = FakeService::new();
        let mut runner = runner(config(&dir), &service).await;
        let data = dataset(3);

        let output = runner.reconcile(&data).await.unwrap();

        assert_eq!(output.leftover_attempted, 0);
        assert!(service.prompts().is_empty());
        assert_eq!(
            final_rows(&output.path),
            vec![
                ("0".to_string(), "A0".to_string()),
                ("1".to_string(), "A1".to_string()),
                ("2".to_string(), "A2".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_yields_same_final_output() {
        let dir = TempDir::new().unwrap();
        let data = dataset(12);

        let first = FakeService::new();
        first.fail_times("p6", 1);
        let output = runner(config(&dir), &first).await.run(&data).await.unwrap().output;
        let before = fs::read_to_string(&output.path).unwrap();
        fs::remove_file(&output.path).unwrap();

        let second = FakeService::new();
        let output = runner(config(&dir), &second).await.run(&data).await.unwrap().output;

        // Pages and the leftover file already hold every result
        assert!(second.prompts().is_empty());
        assert_eq!(output.leftover_attempted, 0);
        assert_eq!(fs::read_to_string(&output.path).unwrap(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starting_page_offset_matches_single_pass() {
        let data = dataset(12);

        let single = TempDir::new().unwrap();
        let output = runner(config(&single), &FakeService::new())
            .await
            .run(&data)
            .await
            .unwrap()
            .output;
        let expected = fs::read_to_string(&output.path).unwrap();

        // Later pages first, earlier records picked up by the leftover pass
        let offset = TempDir::new().unwrap();
        let service = FakeService::new();
        let output = runner(config(&offset).starting_page(1), &service)
            .await
            .run(&data)
            .await
            .unwrap()
            .output;
        assert_eq!(output.leftover_attempted, 5);
        assert_eq!(fs::read_to_string(&output.path).unwrap(), expected);

        // Sweep from an offset, then resume from the first page
        let resumed = TempDir::new().unwrap();
        let mut late = runner(config(&resumed).starting_page(1), &FakeService::new()).await;
        late.run_sweep(&data).await.unwrap();
        let service = FakeService::new();
        let output = runner(config(&resumed), &service)
            .await
            .run(&data)
            .await
            .unwrap()
            .output;
        assert_eq!(service.prompts(), vec!["p0", "p1", "p2", "p3", "p4"]);
        assert_eq!(output.leftover_attempted, 0);
        assert_eq!(fs::read_to_string(&output.path).unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_keeps_leftover_answers() {
        let dir = TempDir::new().unwrap();
        let data = dataset(10);

        let first = FakeService::new();
        first.fail_times("p3", 1);
        first.fail_times("p7", 2);
        let err = runner(config(&dir), &first).await.run(&data).await.unwrap_err();
        assert!(matches!(err, AppError::UnresolvedRecords { ref keys } if keys == &["7"]));

        let second = FakeService::new();
        let output = runner(config(&dir), &second).await.run(&data).await.unwrap().output;

        assert_eq!(second.prompts(), vec!["p7"]);
        assert_eq!(output.leftover_attempted, 1);
        assert_eq!(output.recovered, 1);
        let rows = final_rows(&output.path);
        assert_eq!(rows[3], ("3".to_string(), "label:p3".to_string()));
        assert_eq!(rows[7], ("7".to_string(), "label:p7".to_string()));

        let remaining = CheckpointStore::new(&config(&dir))
            .read_remaining()
            .await
            .unwrap()
            .unwrap();
        let keys: Vec<&str> = remaining.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["3", "7"]);
        assert!(remaining.rows.iter().all(|r| !r.outcome.is_missing()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_exhaustion_is_fatal() {
        let dir = TempDir::new().unwrap();
        let service = FakeService::new();
        service.fail_times("p2", 3);
        let mut runner = runner(config(&dir), &service).await;
        let data = dataset(5);

        runner.run_sweep(&data).await.unwrap();
        let err = runner.reconcile(&data).await.unwrap_err();

        assert!(matches!(err, AppError::FatalExhaustion { start: 0, end: 1 }));
        assert_eq!(service.connects(), 2);
    }
}
