//! Record and outcome types shared by the runner and the checkpoint store.

use crate::error::AppError;

/// One unit of work: a row of the input dataset and the prompt built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Position in the input dataset (0-based).
    pub index: usize,
    /// Stable row identity.
    pub key: String,
    /// Input fields, aligned with `Dataset::headers`.
    pub fields: Vec<String>,
    /// Prompt text sent to the text service.
    pub payload: String,
}

/// Result slot of a processed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service answered; the text may itself be empty.
    Answered(String),
    /// The record failed the eligibility predicate; no call was made.
    Skipped,
    /// The call failed. Revisited by reconciliation.
    Failed,
}

impl Outcome {
    pub const STATUS_ANSWERED: &'static str = "answered";
    pub const STATUS_SKIPPED: &'static str = "skipped";
    pub const STATUS_FAILED: &'static str = "failed";

    /// Value of the status column in checkpoint files.
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Answered(_) => Self::STATUS_ANSWERED,
            Outcome::Skipped => Self::STATUS_SKIPPED,
            Outcome::Failed => Self::STATUS_FAILED,
        }
    }

    /// Value of the result column; empty for skipped and failed records.
    pub fn text(&self) -> &str {
        match self {
            Outcome::Answered(text) => text,
            Outcome::Skipped | Outcome::Failed => "",
        }
    }

    /// True when the record still needs a result.
    pub fn is_missing(&self) -> bool {
        matches!(self, Outcome::Failed)
    }

    /// Rebuilds an outcome from the result and status columns of a checkpoint row.
    pub fn from_columns(text: &str, status: &str) -> Result<Self, AppError> {
        match status {
            Self::STATUS_ANSWERED => Ok(Outcome::Answered(text.to_string())),
            Self::STATUS_SKIPPED => Ok(Outcome::Skipped),
            Self::STATUS_FAILED => Ok(Outcome::Failed),
            other => Err(AppError::CheckpointError(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

/// A record after processing, as stored in a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub key: String,
    pub fields: Vec<String>,
    pub outcome: Outcome,
}

impl ResultRow {
    pub fn new(record: &Record, outcome: Outcome) -> Self {
        Self {
            key: record.key.clone(),
            fields: record.fields.clone(),
            outcome,
        }
    }
}
