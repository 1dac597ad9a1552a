//! Run configuration for a paginated batch run.
//!
//! `RunConfig` carries the knobs that shape the sweep (page size, starting
//! page, pacing, cooldown) and the naming of the files a run produces.
//! `ServiceSettings` carries what is needed to reach the text service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Delay after every external call (500 ms).
pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// Wait after capacity exhaustion. Slightly longer than the service's
/// one-hour message cap window.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(4000);

/// Default request timeout for the text service (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

// ─────────────────────────────────────────────────────────────────────────────
// UnresolvedPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// What reconciliation does with records that still have no result after the
/// leftover pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Stop with `AppError::UnresolvedRecords`.
    #[default]
    Fail,
    /// Drop them from the final output, log a warning and write a report file.
    Drop,
}

// ─────────────────────────────────────────────────────────────────────────────
// RunMode
// ─────────────────────────────────────────────────────────────────────────────

/// Discriminates the files produced by different kinds of runs sharing an
/// output directory (e.g. `labels_full` vs `feedback`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMode {
    prefix: String,
}

impl RunMode {
    /// Creates a run mode from a file prefix.
    ///
    /// The prefix must be non-empty and only contain ASCII alphanumerics,
    /// `-` or `_`, since it becomes part of every file name of the run.
    pub fn new(prefix: impl Into<String>) -> Result<Self, AppError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(AppError::InvalidConfig("mode prefix must not be empty".into()));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::InvalidConfig(format!(
                "mode prefix '{}' may only contain letters, digits, '-' and '_'",
                prefix
            )));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Checkpoint file name for the page `[start, end)`.
    pub fn page_file_name(&self, start: usize, end: usize) -> String {
        format!("{}_{:04}_{:04}.csv", self.prefix, start, end)
    }

    /// File name of the leftover pass checkpoint.
    pub fn remaining_file_name(&self) -> String {
        format!("{}_remaining.csv", self.prefix)
    }

    /// File name of the final merged output.
    pub fn final_file_name(&self) -> String {
        format!("{}.csv", self.prefix)
    }

    /// File name of the report listing dropped records.
    pub fn unresolved_file_name(&self) -> String {
        format!("{}_unresolved.txt", self.prefix)
    }

    /// Parses `[start, end)` back out of a page checkpoint file name.
    ///
    /// Returns `None` for any file that is not a page checkpoint of this mode,
    /// including the leftover and final files.
    pub fn parse_page_file_name(&self, file_name: &str) -> Option<(usize, usize)> {
        let rest = file_name.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        let rest = rest.strip_suffix(".csv")?;
        let (start, end) = rest.split_once('_')?;
        if start.is_empty() || end.is_empty() {
            return None;
        }
        if !start.bytes().all(|b| b.is_ascii_digit()) || !end.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let start: usize = start.parse().ok()?;
        let end: usize = end.parse().ok()?;
        (start < end).then_some((start, end))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RunConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for one paginated run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory holding checkpoints, the leftover file and the final output.
    pub output_dir: PathBuf,
    /// File-name discriminator for this run.
    pub mode: RunMode,
    /// Records per page.
    pub page_size: usize,
    /// Pages with a lower index are not processed by the sweep.
    pub starting_page: usize,
    /// Delay after each external call.
    pub pacing: Duration,
    /// Wait after capacity exhaustion before the single retry.
    pub cooldown: Duration,
    /// Column of the input holding the record key.
    pub key_column: String,
    /// Column written with each record's result.
    pub result_column: String,
    /// Handling of records still unresolved after reconciliation.
    pub unresolved_policy: UnresolvedPolicy,
}

impl RunConfig {
    /// Creates a configuration with default pacing and page size.
    pub fn new(output_dir: impl AsRef<Path>, mode: RunMode) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            mode,
            page_size: DEFAULT_PAGE_SIZE,
            starting_page: 0,
            pacing: DEFAULT_PACING,
            cooldown: DEFAULT_COOLDOWN,
            key_column: "Index".to_string(),
            result_column: "Response".to_string(),
            unresolved_policy: UnresolvedPolicy::default(),
        }
    }

    /// Sets the page size.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the first page the sweep processes.
    pub fn starting_page(mut self, starting_page: usize) -> Self {
        self.starting_page = starting_page;
        self
    }

    /// Sets the delay after each external call.
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Sets the capacity-exhaustion cooldown.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the key column name.
    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Sets the result column name.
    pub fn result_column(mut self, column: impl Into<String>) -> Self {
        self.result_column = column.into();
        self
    }

    /// Sets the unresolved-record policy.
    pub fn unresolved_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    /// Checks invariants the runner relies on.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page_size == 0 {
            return Err(AppError::InvalidConfig("page size must be greater than 0".into()));
        }
        if self.key_column.is_empty() || self.result_column.is_empty() {
            return Err(AppError::InvalidConfig(
                "key and result column names must not be empty".into(),
            ));
        }
        if self.key_column == self.result_column {
            return Err(AppError::InvalidConfig(format!(
                "key column and result column are both '{}'",
                self.key_column
            )));
        }
        Ok(())
    }

    /// Path of the checkpoint for the page `[start, end)`.
    pub fn page_path(&self, start: usize, end: usize) -> PathBuf {
        self.output_dir.join(self.mode.page_file_name(start, end))
    }

    pub fn remaining_path(&self) -> PathBuf {
        self.output_dir.join(self.mode.remaining_file_name())
    }

    pub fn final_path(&self) -> PathBuf {
        self.output_dir.join(self.mode.final_file_name())
    }

    pub fn unresolved_path(&self) -> PathBuf {
        self.output_dir.join(self.mode.unresolved_file_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServiceSettings
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for the text-generation service.
///
/// The API key is wrapped in `SecretString` so it never shows up in `Debug`
/// output or logs.
#[derive(Clone)]
pub struct ServiceSettings {
    /// Base URL (e.g. "https://api.openai.com").
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Bearer API key.
    pub api_key: SecretString,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
