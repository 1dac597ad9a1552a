//! Sample-based validation of the input dataset.
//!
//! Reads only the first `VALIDATION_SAMPLE_SIZE` bytes so a multi-gigabyte
//! response export can be checked before a run that may take hours:
//! - UTF-8 encoding
//! - header row present, no duplicate header names
//! - required columns (key, template placeholders, predicate column) present
//! - consistent column counts in the sampled rows

use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Size of the sample buffer for validation (512 KB).
pub const VALIDATION_SAMPLE_SIZE: usize = 512 * 1024;

/// Maximum number of records to validate in the sample.
const MAX_RECORDS_TO_VALIDATE: usize = 1000;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Result of input validation.
#[derive(Debug, Clone)]
pub struct InputValidation {
    /// Whether the file passed validation (no errors).
    pub ok: bool,
    pub errors: Vec<InputValidationError>,
    pub warnings: Vec<InputValidationWarning>,
    /// Headers found in the CSV.
    pub headers: Vec<String>,
    /// Number of data rows parsed from the sample.
    pub sampled_rows: u64,
}

/// Validation errors that prevent a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValidationError {
    NotUtf8,
    EmptyFile,
    NoHeaders,
    /// A header name appears more than once.
    DuplicateHeader { name: String },
    /// A column the run needs is absent from the header.
    MissingColumn { name: String },
    /// Row has a different number of columns than the header.
    InconsistentColumns {
        expected: usize,
        found: usize,
        /// 1-based row number, header included.
        row: u64,
    },
    CsvParseError { message: String },
}

/// Validation warnings that don't prevent a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValidationWarning {
    /// File starts with a UTF-8 BOM (stripped on load).
    HasBom,
    /// Only the first `validated_rows` rows were checked.
    SampleOnlyValidation { validated_rows: u64 },
}

impl InputValidation {
    fn failed(errors: Vec<InputValidationError>, warnings: Vec<InputValidationWarning>) -> Self {
        Self {
            ok: false,
            errors,
            warnings,
            headers: vec![],
            sampled_rows: 0,
        }
    }

    /// Converts a failed validation into `AppError::CsvInvalid`.
    pub fn into_result(self) -> Result<Self, AppError> {
        if self.ok {
            return Ok(self);
        }
        let messages: Vec<String> = self.errors.iter().map(describe_error).collect();
        Err(AppError::CsvInvalid(messages.join("; ")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Validates the input CSV, requiring each of `required_columns` in the header.
///
/// # Errors
///
/// Returns `AppError` only for I/O failures. Validation problems are returned
/// in `InputValidation.errors`.
pub async fn validate(path: &Path, required_columns: &[&str]) -> Result<InputValidation, AppError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read file metadata: {}", e)))?;
    let file_size_bytes = metadata.len();

    if file_size_bytes == 0 {
        return Ok(InputValidation::failed(vec![InputValidationError::EmptyFile], warnings));
    }

    let sample_size = (file_size_bytes as usize).min(VALIDATION_SAMPLE_SIZE);
    let mut buffer = vec![0u8; sample_size];

    let mut file = File::open(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open file: {}", e)))?;
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read file: {}", e)))?;

    let is_sample_only = file_size_bytes > sample_size as u64;

    let has_bom = buffer.starts_with(UTF8_BOM);
    if has_bom {
        warnings.push(InputValidationWarning::HasBom);
    }
    let data = &buffer[if has_bom { UTF8_BOM.len() } else { 0 }..];

    // A sample cut may split a multi-byte character; only the valid prefix
    // matters in that case.
    if let Err(e) = std::str::from_utf8(data) {
        let cut_at_boundary = is_sample_only && e.error_len().is_none();
        if !cut_at_boundary {
            return Ok(InputValidation::failed(vec![InputValidationError::NotUtf8], warnings));
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(Cursor::new(data));

    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(String::from).collect(),
        Err(e) => {
            errors.push(InputValidationError::CsvParseError {
                message: e.to_string(),
            });
            return Ok(InputValidation::failed(errors, warnings));
        }
    };

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Ok(InputValidation::failed(vec![InputValidationError::NoHeaders], warnings));
    }

    let mut seen = HashSet::new();
    for name in &headers {
        if !seen.insert(name.as_str()) {
            errors.push(InputValidationError::DuplicateHeader { name: name.clone() });
        }
    }

    for required in required_columns {
        if !headers.iter().any(|h| h == required) {
            errors.push(InputValidationError::MissingColumn {
                name: (*required).to_string(),
            });
        }
    }

    let expected = headers.len();
    let mut validated_rows: u64 = 0;

    for result in reader.records().take(MAX_RECORDS_TO_VALIDATE) {
        match result {
            Ok(record) => {
                validated_rows += 1;
                if record.len() != expected {
                    errors.push(InputValidationError::InconsistentColumns {
                        expected,
                        found: record.len(),
                        row: validated_rows + 1,
                    });
                }
            }
            Err(e) => {
                if is_sample_only && is_likely_truncation_error(&e, data) {
                    break;
                }
                match e.kind() {
                    csv::ErrorKind::UnequalLengths { len, .. } => {
                        errors.push(InputValidationError::InconsistentColumns {
                            expected,
                            found: *len as usize,
                            row: validated_rows + 2,
                        });
                    }
                    // The sample may end inside a multi-byte character.
                    csv::ErrorKind::Utf8 { .. } if is_sample_only => break,
                    _ => errors.push(InputValidationError::CsvParseError {
                        message: e.to_string(),
                    }),
                }
                break;
            }
        }
    }

    if is_sample_only {
        warnings.push(InputValidationWarning::SampleOnlyValidation { validated_rows });
    }

    Ok(InputValidation {
        ok: errors.is_empty(),
        errors,
        warnings,
        headers,
        sampled_rows: validated_rows,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Checks if the error is likely due to the sample cutting a record in half.
fn is_likely_truncation_error(err: &csv::Error, data: &[u8]) -> bool {
    let msg = err.to_string().to_lowercase();
    if msg.contains("unexpected eof")
        || msg.contains("record ends in a quote")
        || msg.contains("premature eof")
    {
        return true;
    }

    // A cut record parses with too few fields; it is always the last line.
    matches!(err.kind(), csv::ErrorKind::UnequalLengths { .. })
        && err
            .position()
            .and_then(|pos| data.get(pos.byte() as usize..))
            .is_some_and(|rest| !rest.contains(&b'\n'))
}

fn describe_error(error: &InputValidationError) -> String {
    match error {
        InputValidationError::NotUtf8 => "file is not valid UTF-8".to_string(),
        InputValidationError::EmptyFile => "file is empty".to_string(),
        InputValidationError::NoHeaders => "file has no header row".to_string(),
        InputValidationError::DuplicateHeader { name } => {
            format!("header '{}' appears more than once", name)
        }
        InputValidationError::MissingColumn { name } => {
            format!("required column '{}' is missing", name)
        }
        InputValidationError::InconsistentColumns { expected, found, row } => format!(
            "row {} has {} columns, expected {}",
            row, found, expected
        ),
        InputValidationError::CsvParseError { message } => message.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
