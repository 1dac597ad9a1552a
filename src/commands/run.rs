//! End-to-end run: validate, load, sweep, reconcile.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{BatchRunner, RunReport};
use crate::config::RunConfig;
use crate::dataset::{
    load_dataset, table_text, AllRecords, CategoryColumn, CategoryTable, ColumnEquals,
    Eligibility, JoinColumns, LoadOptions, LookupTable, PromptTemplate,
};
use crate::error::AppError;
use crate::text_service::ServiceConnector;
use crate::validation::{self, InputValidation};

/// Where the derived category column comes from.
#[derive(Debug, Clone)]
pub struct CategorySource {
    /// Two-column `text,category` CSV.
    pub table_path: PathBuf,
    pub source_column: String,
    pub target_column: String,
}

/// A lookup table joined onto every row.
#[derive(Debug, Clone)]
pub struct JoinSource {
    pub table_path: PathBuf,
    /// Column holding the key, in the table and in the input alike.
    pub on_column: String,
}

/// A whole table rendered into one template placeholder.
#[derive(Debug, Clone)]
pub struct ContextSource {
    pub table_path: PathBuf,
    pub placeholder: String,
}

/// Everything needed to run one batch end to end.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub input: PathBuf,
    pub template: PromptTemplate,
    pub config: RunConfig,
    /// Only records whose column equals the value are sent; others are skipped.
    pub only_when: Option<(String, String)>,
    pub category: Option<CategorySource>,
    pub join: Option<JoinSource>,
    pub context: Option<ContextSource>,
}

impl RunRequest {
    /// Input columns the run reads. Placeholders naming the derived category
    /// column, a joined column or the context placeholder are not input
    /// columns.
    fn required_columns(&self, joined: &[String]) -> Vec<&str> {
        let derived = self.category.as_ref().map(|c| c.target_column.as_str());
        let context = self.context.as_ref().map(|c| c.placeholder.as_str());
        let is_input = |c: &str| {
            Some(c) != derived && Some(c) != context && !joined.iter().any(|j| j == c)
        };

        let mut columns = vec![self.config.key_column.as_str()];
        columns.extend(self.template.columns().into_iter().filter(|c| is_input(*c)));
        if let Some(category) = &self.category {
            columns.push(category.source_column.as_str());
        }
        if let Some(join) = &self.join {
            if Some(join.on_column.as_str()) != derived {
                columns.push(join.on_column.as_str());
            }
        }
        if let Some((column, _)) = &self.only_when {
            columns.push(column.as_str());
        }
        columns.sort_unstable();
        columns.dedup();
        columns
    }
}

/// Reads a prompt template file.
pub async fn load_template(path: &Path) -> Result<PromptTemplate, AppError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::InvalidConfig(format!("Failed to read template file: {}", e)))?;
    PromptTemplate::parse(&text)
}

/// Validates the input against the columns a run needs.
pub async fn validate_input(path: &Path, required_columns: &[&str]) -> Result<InputValidation, AppError> {
    let validation = validation::validate(path, required_columns).await?.into_result()?;
    for warning in &validation.warnings {
        warn!("[VALIDATE] {:?}", warning);
    }
    info!(
        "[VALIDATE] {} columns, {} rows sampled",
        validation.headers.len(),
        validation.sampled_rows
    );
    Ok(validation)
}

/// Runs a batch end to end and returns the sweep and reconciliation report.
///
/// # Errors
///
/// Any `AppError` from validation, loading, the sweep or reconciliation.
/// Checkpoints written before the error stay on disk for the next run.
pub async fn run_batch(
    request: RunRequest,
    connector: Arc<dyn ServiceConnector>,
    cancel: CancellationToken,
) -> Result<RunReport, AppError> {
    request.config.validate()?;

    let join = match &request.join {
        Some(source) => {
            let table_path = source.table_path.clone();
            let on_column = source.on_column.clone();
            let table = tokio::task::spawn_blocking(move || LookupTable::load(&table_path, &on_column))
                .await
                .map_err(|e| AppError::Internal(format!("Lookup load task panicked: {}", e)))??;
            info!(
                "[DATASET] Loaded lookup table with {} keys, joining {:?} on '{}'",
                table.len(),
                table.columns(),
                source.on_column
            );
            Some(JoinColumns {
                table,
                on_column: source.on_column.clone(),
            })
        }
        None => None,
    };
    let joined = join
        .as_ref()
        .map(|j| j.table.columns().to_vec())
        .unwrap_or_default();
    validate_input(&request.input, &request.required_columns(&joined)).await?;

    let template = match &request.context {
        Some(source) => {
            let table_path = source.table_path.clone();
            let text = tokio::task::spawn_blocking(move || table_text(&table_path))
                .await
                .map_err(|e| AppError::Internal(format!("Context load task panicked: {}", e)))??;
            info!(
                "[DATASET] Rendering context table into {{{}}} ({} chars)",
                source.placeholder,
                text.len()
            );
            request.template.fill(&source.placeholder, &text)
        }
        None => request.template.clone(),
    };

    let category = match &request.category {
        Some(source) => {
            let table_path = source.table_path.clone();
            let table = tokio::task::spawn_blocking(move || CategoryTable::load(&table_path))
                .await
                .map_err(|e| AppError::Internal(format!("Category load task panicked: {}", e)))??;
            info!("[DATASET] Loaded category table with {} entries", table.len());
            Some(CategoryColumn {
                table,
                source_column: source.source_column.clone(),
                target_column: source.target_column.clone(),
            })
        }
        None => None,
    };

    let options = LoadOptions {
        key_column: request.config.key_column.clone(),
        result_column: request.config.result_column.clone(),
        template,
        category,
        join,
    };
    let input = request.input.clone();
    let dataset = tokio::task::spawn_blocking(move || load_dataset(&input, &options))
        .await
        .map_err(|e| AppError::Internal(format!("Dataset load task panicked: {}", e)))??;

    let eligibility: Arc<dyn Eligibility> = match &request.only_when {
        Some((column, value)) => {
            Arc::new(ColumnEquals::resolve(&dataset.headers, column, value.clone())?)
        }
        None => Arc::new(AllRecords),
    };

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }

    let mut runner = BatchRunner::connect(request.config, connector, eligibility, cancel).await?;
    runner.run(&dataset).await
}
