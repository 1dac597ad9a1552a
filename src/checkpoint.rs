//! Checkpoint files of a run.
//!
//! A page checkpoint holds every record of one completed page: the input
//! columns, then the result column, then `status`. The leftover checkpoint
//! uses the same layout. The final output is a flat `key,result` file. All
//! writes are atomic; a page counts as done exactly when its file exists.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::dataset::{Outcome, ResultRow};
use crate::error::AppError;
use crate::streaming::{write_lines_atomic, AtomicCsvWriter, PageBounds};

/// Name of the trailing status column in checkpoint files.
pub const STATUS_COLUMN: &str = "status";

const BOM_CHAR: char = '\u{feff}';

/// A page checkpoint found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCheckpoint {
    pub start: usize,
    pub end: usize,
    pub path: PathBuf,
}

/// Rows read back from a checkpoint, with the input headers it was written with.
#[derive(Debug, Clone)]
pub struct CheckpointContents {
    pub headers: Vec<String>,
    pub rows: Vec<ResultRow>,
}

/// Reads and writes the files of one run mode in one output directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    config: RunConfig,
}

impl CheckpointStore {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Creates the output directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                AppError::CheckpointError(format!("Failed to create output directory: {}", e))
            })
    }

    pub fn page_path(&self, page: &PageBounds) -> PathBuf {
        self.config.page_path(page.start, page.end)
    }

    /// True when the page already has a checkpoint on disk.
    pub async fn page_exists(&self, page: &PageBounds) -> Result<bool, AppError> {
        let path = self.page_path(page);
        tokio::fs::try_exists(&path).await.map_err(|e| {
            AppError::CheckpointError(format!("Failed to check {}: {}", path.display(), e))
        })
    }

    /// Persists a completed page.
    pub async fn write_page(
        &self,
        headers: &[String],
        page: &PageBounds,
        rows: &[ResultRow],
    ) -> Result<PathBuf, AppError> {
        let path = self.page_path(page);
        let written = self.write_rows(path, headers, rows).await?;
        info!(
            "[CHECKPOINT] Wrote {} ({} rows)",
            display_name(&written),
            rows.len()
        );
        Ok(written)
    }

    /// Persists the leftover rows under their fixed name, replacing the
    /// previous leftover file. Callers pass the merged rows.
    pub async fn write_remaining(
        &self,
        headers: &[String],
        rows: &[ResultRow],
    ) -> Result<PathBuf, AppError> {
        let written = self
            .write_rows(self.config.remaining_path(), headers, rows)
            .await?;
        info!(
            "[CHECKPOINT] Wrote {} ({} rows)",
            display_name(&written),
            rows.len()
        );
        Ok(written)
    }

    async fn write_rows(
        &self,
        path: PathBuf,
        headers: &[String],
        rows: &[ResultRow],
    ) -> Result<PathBuf, AppError> {
        let mut header_row = headers.to_vec();
        header_row.push(self.config.result_column.clone());
        header_row.push(STATUS_COLUMN.to_string());
        let rows = rows.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut writer = AtomicCsvWriter::new(&path)?;
            writer.write_record(&header_row)?;
            for row in &rows {
                writer.write_record(
                    row.fields
                        .iter()
                        .map(String::as_str)
                        .chain([row.outcome.text(), row.outcome.status()]),
                )?;
            }
            writer.finish()
        })
        .await
        .map_err(|e| AppError::Internal(format!("Checkpoint write task panicked: {}", e)))?
    }

    /// Lists this mode's page checkpoints, ordered by bounds.
    ///
    /// The leftover and final files never match the page naming scheme.
    pub async fn list_pages(&self) -> Result<Vec<PageCheckpoint>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.config.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::CheckpointError(format!(
                    "Failed to list output directory: {}",
                    e
                )))
            }
        };

        let mut pages = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            AppError::CheckpointError(format!("Failed to list output directory: {}", e))
        })? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some((start, end)) = self.config.mode.parse_page_file_name(name) {
                pages.push(PageCheckpoint {
                    start,
                    end,
                    path: entry.path(),
                });
            }
        }

        pages.sort_by_key(|p| (p.start, p.end));
        debug!("[CHECKPOINT] Found {} page checkpoints", pages.len());
        Ok(pages)
    }

    /// Reads a page or leftover checkpoint back into rows.
    pub async fn read(&self, path: &Path) -> Result<CheckpointContents, AppError> {
        let path = path.to_path_buf();
        let key_column = self.config.key_column.clone();
        let result_column = self.config.result_column.clone();

        tokio::task::spawn_blocking(move || read_blocking(&path, &key_column, &result_column))
            .await
            .map_err(|e| AppError::Internal(format!("Checkpoint read task panicked: {}", e)))?
    }

    /// Reads the leftover checkpoint of an earlier reconciliation, if any.
    pub async fn read_remaining(&self) -> Result<Option<CheckpointContents>, AppError> {
        let path = self.config.remaining_path();
        let exists = tokio::fs::try_exists(&path).await.map_err(|e| {
            AppError::CheckpointError(format!("Failed to check {}: {}", path.display(), e))
        })?;
        if !exists {
            return Ok(None);
        }
        self.read(&path).await.map(Some)
    }

    /// Writes the final `key,result` output in the given order.
    pub async fn write_final(&self, rows: &[(String, String)]) -> Result<PathBuf, AppError> {
        let path = self.config.final_path();
        let header = [self.config.key_column.clone(), self.config.result_column.clone()];
        let rows = rows.to_vec();

        let written = tokio::task::spawn_blocking(move || {
            let mut writer = AtomicCsvWriter::new(&path)?;
            writer.write_record(&header)?;
            for (key, result) in &rows {
                writer.write_record([key, result])?;
            }
            writer.finish()
        })
        .await
        .map_err(|e| AppError::Internal(format!("Final output task panicked: {}", e)))??;

        info!("[CHECKPOINT] Wrote final output {}", display_name(&written));
        Ok(written)
    }

    /// Writes the keys dropped by reconciliation, one per line.
    pub async fn write_unresolved(&self, keys: &[String]) -> Result<PathBuf, AppError> {
        let path = self.config.unresolved_path();
        let keys = keys.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_lines_atomic(&target, &keys))
            .await
            .map_err(|e| AppError::Internal(format!("Report task panicked: {}", e)))??;

        Ok(path)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_blocking(
    path: &Path,
    key_column: &str,
    result_column: &str,
) -> Result<CheckpointContents, AppError> {
    let name = display_name(path);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| AppError::CheckpointError(format!("Failed to open {}: {}", name, e)))?;

    let mut headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::CheckpointError(format!("Failed to read {} header: {}", name, e)))?
        .iter()
        .map(String::from)
        .collect();
    if let Some(first) = headers.first_mut() {
        *first = first.trim_start_matches(BOM_CHAR).to_string();
    }

    let n = headers.len();
    if n < 3 || headers[n - 1] != STATUS_COLUMN || headers[n - 2] != result_column {
        return Err(AppError::CheckpointError(format!(
            "{} does not end with '{}' and '{}' columns",
            name, result_column, STATUS_COLUMN
        )));
    }
    let field_count = n - 2;
    headers.truncate(field_count);

    let key_index = headers
        .iter()
        .position(|h| h == key_column)
        .ok_or_else(|| {
            AppError::CheckpointError(format!("{} has no '{}' column", name, key_column))
        })?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result
            .map_err(|e| AppError::CheckpointError(format!("Failed to read {}: {}", name, e)))?;
        let fields: Vec<String> = record.iter().take(field_count).map(String::from).collect();
        let text = record.get(field_count).unwrap_or("");
        let status = record.get(field_count + 1).unwrap_or("");
        let outcome = Outcome::from_columns(text, status)
            .map_err(|e| AppError::CheckpointError(format!("{}: {}", name, e)))?;

        rows.push(ResultRow {
            key: fields[key_index].clone(),
            fields,
            outcome,
        });
    }

    Ok(CheckpointContents { headers, rows })
}
