//! Atomic file writers with automatic cleanup on failure.
//!
//! Everything a run leaves on disk (page checkpoints, the leftover file,
//! the final output, the unresolved report) goes through here, so a crash
//! mid-write never leaves a truncated file under its final name. A partial
//! checkpoint would otherwise be mistaken for a completed page on resume.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;

fn temp_file_beside(final_path: &Path) -> Result<NamedTempFile, AppError> {
    let parent_dir = final_path.parent().ok_or_else(|| {
        AppError::CheckpointError(format!(
            "Cannot determine parent directory for: {}",
            final_path.display()
        ))
    })?;

    NamedTempFile::new_in(parent_dir)
        .map_err(|e| AppError::CheckpointError(format!("Failed to create temporary file: {}", e)))
}

fn persist(named_temp: NamedTempFile, final_path: &Path) -> Result<(), AppError> {
    named_temp.persist(final_path).map_err(|e| {
        AppError::CheckpointError(format!(
            "Failed to persist file to {}: {}",
            final_path.display(),
            e.error
        ))
    })?;
    Ok(())
}

/// A CSV writer that only makes its output visible on `finish()`.
///
/// Writes go to a temporary file in the destination directory. Dropping the
/// writer without calling `finish()` deletes the temporary file.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
}

impl AtomicCsvWriter {
    /// Creates a writer targeting `final_path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CheckpointError` if the parent directory cannot be
    /// determined or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();
        let temp_file = temp_file_beside(&final_path)?;

        Ok(Self {
            writer: Writer::from_writer(BufWriter::new(temp_file)),
            final_path,
        })
    }

    /// Writes one CSV record.
    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(record)
            .map_err(|e| AppError::CheckpointError(format!("Failed to write CSV record: {}", e)))
    }

    /// Flushes and atomically moves the file to its final path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CheckpointError` if flushing or persisting fails.
    /// The temporary file is cleaned up on error.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            AppError::CheckpointError(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer.into_inner().map_err(|e| {
            AppError::CheckpointError(format!("Failed to flush buffer: {}", e.error()))
        })?;

        persist(named_temp, &self.final_path)?;
        Ok(self.final_path)
    }
}

/// Atomically writes `lines`, one per line, to `final_path`.
pub fn write_lines_atomic<I, S>(final_path: &Path, lines: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut writer = BufWriter::new(temp_file_beside(final_path)?);
    for line in lines {
        writeln!(writer, "{}", line.as_ref())
            .map_err(|e| AppError::CheckpointError(format!("Failed to write line: {}", e)))?;
    }
    let named_temp = writer
        .into_inner()
        .map_err(|e| AppError::CheckpointError(format!("Failed to flush buffer: {}", e.error())))?;
    persist(named_temp, final_path)
}
