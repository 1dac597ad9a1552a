//! Eligibility predicates deciding which records are sent to the service.

use crate::dataset::record::Record;
use crate::error::AppError;

/// Decides whether a record is sent to the text service.
///
/// Ineligible records get `Outcome::Skipped` without a call.
pub trait Eligibility: Send + Sync {
    fn is_eligible(&self, record: &Record) -> bool;
}

impl<F> Eligibility for F
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn is_eligible(&self, record: &Record) -> bool {
        self(record)
    }
}

/// Every record is eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRecords;

impl Eligibility for AllRecords {
    fn is_eligible(&self, _record: &Record) -> bool {
        true
    }
}

/// Eligible when one column holds an exact value (e.g. `Code=INCORRECT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEquals {
    column_index: usize,
    value: String,
}

impl ColumnEquals {
    /// Resolves `column` against the dataset headers.
    pub fn resolve(headers: &[String], column: &str, value: impl Into<String>) -> Result<Self, AppError> {
        let column_index = headers.iter().position(|h| h == column).ok_or_else(|| {
            AppError::InvalidConfig(format!("eligibility column '{}' not found in input", column))
        })?;
        Ok(Self {
            column_index,
            value: value.into(),
        })
    }
}

impl Eligibility for ColumnEquals {
    fn is_eligible(&self, record: &Record) -> bool {
        record.fields.get(self.column_index) == Some(&self.value)
    }
}

/// Parses a `COLUMN=VALUE` command-line rule.
pub fn parse_rule(rule: &str) -> Result<(String, String), AppError> {
    match rule.split_once('=') {
        Some((column, value)) if !column.is_empty() => Ok((column.to_string(), value.to_string())),
        _ => Err(AppError::InvalidConfig(format!(
            "eligibility rule '{}' must look like COLUMN=VALUE",
            rule
        ))),
    }
}
