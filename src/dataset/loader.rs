//! Loads the input CSV into `Record`s.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{info, warn};

use crate::dataset::category::CategoryTable;
use crate::dataset::lookup::LookupTable;
use crate::dataset::record::Record;
use crate::dataset::template::PromptTemplate;
use crate::error::AppError;

/// UTF-8 BOM as it appears at the start of the first header after decoding.
const BOM_CHAR: char = '\u{feff}';

/// Derived category column appended to each row.
#[derive(Debug, Clone)]
pub struct CategoryColumn {
    pub table: CategoryTable,
    /// Column whose text is looked up.
    pub source_column: String,
    /// Name of the appended column.
    pub target_column: String,
}

/// Lookup table columns appended to each row by matching `on_column`.
#[derive(Debug, Clone)]
pub struct JoinColumns {
    pub table: LookupTable,
    /// Input column (or the derived category column) holding the lookup key.
    pub on_column: String,
}

/// How to turn the input CSV into records.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub key_column: String,
    /// Must not already exist in the input; checkpoints append it.
    pub result_column: String,
    pub template: PromptTemplate,
    pub category: Option<CategoryColumn>,
    /// Applied after the category column, so it may join on it.
    pub join: Option<JoinColumns>,
}

/// The materialized input: headers plus one record per row, in file order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reads the input CSV, appends the category and joined columns, renders
/// prompts and checks that keys are unique.
///
/// Rows whose join key is absent from the lookup table get empty joined
/// values.
///
/// Blocking; call from `spawn_blocking` in async code.
///
/// # Errors
///
/// - `AppError::CsvInvalid` for parse errors, a missing key column, an empty
///   or duplicate key, or a result column already present in the input
/// - `AppError::InvalidConfig` if the template names an unknown column
pub fn load_dataset(path: &Path, options: &LoadOptions) -> Result<Dataset, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::CsvInvalid(format!("Failed to open input file: {}", e)))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(BufReader::new(file));

    let mut headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::CsvInvalid(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(String::from)
        .collect();

    if let Some(first) = headers.first_mut() {
        if first.starts_with(BOM_CHAR) {
            *first = first.trim_start_matches(BOM_CHAR).to_string();
        }
    }

    if headers.iter().any(|h| h == &options.result_column) {
        return Err(AppError::CsvInvalid(format!(
            "input already has a '{}' column",
            options.result_column
        )));
    }

    let key_index = column_index(&headers, &options.key_column)?;

    let category_source = match &options.category {
        Some(category) => {
            if headers.iter().any(|h| h == &category.target_column) {
                return Err(AppError::CsvInvalid(format!(
                    "input already has a '{}' column",
                    category.target_column
                )));
            }
            let source = column_index(&headers, &category.source_column)?;
            headers.push(category.target_column.clone());
            Some((source, &category.table))
        }
        None => None,
    };

    let join_source = match &options.join {
        Some(join) => {
            if let Some(clash) = join.table.columns().iter().find(|c| headers.contains(c)) {
                return Err(AppError::CsvInvalid(format!(
                    "input already has a '{}' column",
                    clash
                )));
            }
            let on = column_index(&headers, &join.on_column)?;
            headers.extend(join.table.columns().iter().cloned());
            Some((on, &join.table))
        }
        None => None,
    };

    let bound = options.template.bind(&headers)?;

    let mut records = Vec::new();
    let mut seen_keys = HashSet::new();
    let mut unmatched = 0usize;

    for (index, result) in reader.records().enumerate() {
        let row = result
            .map_err(|e| AppError::CsvInvalid(format!("Failed to read CSV record: {}", e)))?;
        let mut fields: Vec<String> = row.iter().map(String::from).collect();

        if let Some((source, table)) = category_source {
            let category = table.categorize(&fields[source]).to_string();
            fields.push(category);
        }

        if let Some((on, table)) = join_source {
            match table.get(&fields[on]) {
                Some(values) => fields.extend(values.iter().cloned()),
                None => {
                    unmatched += 1;
                    fields.extend(std::iter::repeat(String::new()).take(table.columns().len()));
                }
            }
        }

        let key = fields[key_index].clone();
        if key.is_empty() {
            return Err(AppError::CsvInvalid(format!(
                "row {} has an empty '{}' value",
                index + 2,
                options.key_column
            )));
        }
        if !seen_keys.insert(key.clone()) {
            return Err(AppError::CsvInvalid(format!(
                "duplicate key '{}' in column '{}'",
                key, options.key_column
            )));
        }

        let payload = bound.render(&fields);
        records.push(Record {
            index,
            key,
            fields,
            payload,
        });
    }

    if unmatched > 0 {
        warn!(
            "[DATASET] {} records have no match in the lookup table; joined columns left empty",
            unmatched
        );
    }
    info!(
        "[DATASET] Loaded {} records with {} columns",
        records.len(),
        headers.len()
    );

    Ok(Dataset { headers, records })
}

fn column_index(headers: &[String], column: &str) -> Result<usize, AppError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| AppError::CsvInvalid(format!("input has no '{}' column", column)))
}
