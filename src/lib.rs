//! Paginated, checkpointed batch prompting against a rate-limited
//! text-generation service.
//!
//! Rows of an input CSV are rendered into prompts, sent one at a time, and
//! persisted page by page. When the service runs out of capacity the run
//! cools down, reconnects and retries the page once; a rerun resumes from
//! the checkpoints on disk. Reconciliation retries failed rows once more and
//! writes a single `key,result` file.

pub mod batch;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod streaming;
pub mod text_service;
pub mod validation;

pub use error::AppError;
