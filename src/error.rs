use thiserror::Error;

/// Lowercase fragments that mark a message as unsafe to print.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "api_key",
    "api-key",
    "authorization:",
];

/// Prefix of secret API keys. Only matched at the start of a word, so
/// "task-3" or "disk-full" pass through.
const KEY_PREFIX: &str = "sk-";

fn looks_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
        || lower.match_indices(KEY_PREFIX).any(|(i, _)| {
            !lower[..i]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric())
        })
}

/// Returns `msg`, or `fallback` when `msg` may carry a credential.
fn redact_or(msg: &str, fallback: &str) -> String {
    if looks_sensitive(msg) {
        fallback.to_string()
    } else {
        msg.to_string()
    }
}

/// Operator-facing error presentation printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Every failure a run can end with.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Text service ──────────────────────────────────────────────────────────
    #[error("Text service error: {0}")]
    ServiceError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Text service unreachable: {0}")]
    ConnectionFailed(String),

    // ── Batch run ─────────────────────────────────────────────────────────────
    #[error("Capacity exhausted on page [{start}, {end})")]
    CapacityExhausted { start: usize, end: usize },

    #[error("Capacity still exhausted after cooldown on page [{start}, {end})")]
    FatalExhaustion { start: usize, end: usize },

    #[error("{} record(s) have no result after the leftover pass", keys.len())]
    UnresolvedRecords { keys: Vec<String> },

    #[error("Run cancelled")]
    Cancelled,

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("Input is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid input CSV: {0}")]
    CsvInvalid(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Other ─────────────────────────────────────────────────────────────────
    #[error("Internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a presentation suitable for the terminal.
    /// Never leaks API keys or authorization headers.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Text service ──────────────────────────────────────────────────
            AppError::ServiceError(msg) => ErrorPresentation {
                title: "Text Service Error".into(),
                message: redact_or(msg, "The text service returned an error."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("It asked to wait {}s.", secs),
                    None => "No wait time was given.".into(),
                };
                ErrorPresentation {
                    title: "Rate Limited".into(),
                    message: format!("The text service is limiting requests. {}", wait_msg),
                    action: Some("Wait for the limit to reset, then re-run".into()),
                }
            }

            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the text service. Please check the base URL and your network.".into(),
                action: Some("Check --base-url and connectivity".into()),
            },

            // ── Batch run ─────────────────────────────────────────────────────
            AppError::CapacityExhausted { start, end } => ErrorPresentation {
                title: "Capacity Exhausted".into(),
                message: format!(
                    "The text service refused the first request of rows {} to {}.",
                    start, end
                ),
                action: Some("Wait for the rate-limit window to reset".into()),
            },

            AppError::FatalExhaustion { start, end } => ErrorPresentation {
                title: "Run Halted".into(),
                message: format!(
                    "The text service was still unavailable after the cooldown while processing rows {} to {}. Pages before this one are checkpointed.",
                    start, end
                ),
                action: Some(format!(
                    "Re-run later; completed pages are skipped automatically (row {} is the first unprocessed row)",
                    start
                )),
            },

            AppError::UnresolvedRecords { keys } => {
                let preview: Vec<&str> = keys.iter().take(5).map(String::as_str).collect();
                let more = if keys.len() > preview.len() {
                    format!(" and {} more", keys.len() - preview.len())
                } else {
                    String::new()
                };
                ErrorPresentation {
                    title: "Unresolved Records".into(),
                    message: format!(
                        "{} record(s) still have no result after the leftover pass: {}{}",
                        keys.len(),
                        preview.join(", "),
                        more
                    ),
                    action: Some("Re-run to retry them, or pass --allow-unresolved to drop them".into()),
                }
            }

            AppError::Cancelled => ErrorPresentation {
                title: "Run Cancelled".into(),
                message: "The run was cancelled. Completed pages are checkpointed.".into(),
                action: None,
            },

            // ── File / CSV ────────────────────────────────────────────────────
            AppError::NotUtf8 => ErrorPresentation {
                title: "Input Not UTF-8".into(),
                message: "The input CSV must be UTF-8 encoded.".into(),
                action: Some("Re-export the input as UTF-8".into()),
            },

            AppError::CsvInvalid(msg) => ErrorPresentation {
                title: "Bad Input CSV".into(),
                message: format!("The input cannot be used: {}", msg),
                action: Some("Fix the input file and re-run".into()),
            },

            AppError::CheckpointError(msg) => ErrorPresentation {
                title: "Checkpoint Error".into(),
                message: format!("Could not read or write a checkpoint: {}", msg),
                action: Some("Check the output directory".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: redact_or(msg, "The run configuration is invalid."),
                action: Some("Check the command-line arguments".into()),
            },

            // ── Other ─────────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Internal Error".into(),
                message: "gradebatch hit an unexpected internal error. Checkpoints written so far are kept.".into(),
                action: Some("Re-run with GRADEBATCH_LOG=gradebatch=debug for details".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<AppError> {
        vec![
            AppError::ServiceError("model overloaded".into()),
            AppError::RateLimited { retry_after_secs: Some(45) },
            AppError::RateLimited { retry_after_secs: None },
            AppError::ConnectionFailed("timeout".into()),
            AppError::CapacityExhausted { start: 100, end: 200 },
            AppError::FatalExhaustion { start: 100, end: 200 },
            AppError::UnresolvedRecords { keys: vec!["r1".into(), "r2".into()] },
            AppError::Cancelled,
            AppError::NotUtf8,
            AppError::CsvInvalid("duplicate key '4'".into()),
            AppError::CheckpointError("rename failed".into()),
            AppError::InvalidConfig("page size must be greater than 0".into()),
            AppError::Internal("join error".into()),
        ]
    }

    #[test]
    fn every_variant_presents_title_and_message() {
        for err in every_variant() {
            let p = err.to_presentation();
            assert!(!p.title.trim().is_empty(), "no title for {:?}", err);
            assert!(!p.message.trim().is_empty(), "no message for {:?}", err);
        }
    }

    #[test]
    fn fatal_exhaustion_names_the_page() {
        let p = AppError::FatalExhaustion { start: 100, end: 200 }.to_presentation();
        assert!(p.message.contains("100") && p.message.contains("200"));
        assert!(p.action.unwrap().contains("100"));
    }

    #[test]
    fn unresolved_records_previews_keys() {
        let keys: Vec<String> = (0..8).map(|i| format!("row-{}", i)).collect();
        let p = AppError::UnresolvedRecords { keys }.to_presentation();

        assert!(p.message.starts_with("8 record(s)"));
        assert!(p.message.contains("row-0"));
        assert!(p.message.contains("row-4"));
        assert!(!p.message.contains("row-5"));
        assert!(p.message.contains("and 3 more"));
        assert!(p.action.unwrap().contains("--allow-unresolved"));
    }

    #[test]
    fn rate_limited_mentions_the_requested_wait() {
        let p = AppError::RateLimited { retry_after_secs: Some(45) }.to_presentation();
        assert!(p.message.contains("45s"));
        let p = AppError::RateLimited { retry_after_secs: None }.to_presentation();
        assert!(p.message.contains("No wait time"));
    }

    #[test]
    fn internal_detail_stays_out_of_the_message() {
        let p = AppError::Internal("task 17 panicked at src/x.rs".into()).to_presentation();
        assert!(!p.message.contains("panicked"));
    }

    #[test]
    fn credentials_never_reach_the_terminal() {
        let cases = vec![
            AppError::ServiceError("Authorization: Bearer sk-abc123".into()),
            AppError::InvalidConfig("api_key=sk-live-xyz rejected".into()),
            AppError::ConnectionFailed("bearer token sk-999".into()),
            AppError::Internal("api-key leaked".into()),
        ];

        for err in cases {
            let p = err.to_presentation();
            let shown = format!("{} {} {}", p.title, p.message, p.action.unwrap_or_default());
            assert!(!looks_sensitive(&shown), "{:?} leaks into {:?}", err, shown);
            assert!(!shown.contains("abc123") && !shown.contains("xyz") && !shown.contains("999"));
        }
    }

    #[test]
    fn ordinary_hyphenated_words_are_not_redacted() {
        for msg in ["disk-full on task-3", "risk-based retry", "ask-again"] {
            let p = AppError::ServiceError(msg.into()).to_presentation();
            assert!(p.message.contains(msg), "{:?} was redacted", msg);
        }

        for msg in ["key sk-abc rejected", "sk-abc", "(sk-abc)", "key=Sk-abc"] {
            let p = AppError::ServiceError(msg.into()).to_presentation();
            assert!(!p.message.contains("abc"), "{:?} was shown", msg);
        }
    }
}
