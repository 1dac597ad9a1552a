//! Keyed lookup tables joined onto the input.
//!
//! A lookup table is a CSV with a header row. One of its columns is the join
//! key; every other column is appended to each input row whose join column
//! holds a matching key. The whole table can also be rendered as text for
//! prompts that carry the full table as context.

use std::collections::HashMap;
use std::path::Path;

use crate::error::AppError;

const BOM_CHAR: char = '\u{feff}';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTable {
    key_column: String,
    /// Appended columns, in table order, without the key column.
    columns: Vec<String>,
    rows: HashMap<String, Vec<String>>,
}

impl LookupTable {
    /// Loads a table keyed by `key_column`.
    ///
    /// Repeated keys must carry identical values.
    ///
    /// # Errors
    ///
    /// `AppError::CsvInvalid` for an unreadable file, a missing key column, a
    /// table with no other columns, or conflicting rows for one key.
    pub fn load(path: &Path, key_column: &str) -> Result<Self, AppError> {
        let (headers, records) = read_table(path)?;
        let key_index = headers.iter().position(|h| h == key_column).ok_or_else(|| {
            AppError::CsvInvalid(format!("lookup table has no '{}' column", key_column))
        })?;
        if headers.len() < 2 {
            return Err(AppError::CsvInvalid(
                "lookup table needs at least one column besides the key".into(),
            ));
        }

        let columns = without(&headers, key_index);
        let mut rows = HashMap::new();
        for record in records {
            let key = record[key_index].clone();
            let values = without(&record, key_index);
            if let Some(previous) = rows.get(&key) {
                if previous != &values {
                    return Err(AppError::CsvInvalid(format!(
                        "lookup table has conflicting rows for '{}'",
                        key
                    )));
                }
                continue;
            }
            rows.insert(key, values);
        }

        Ok(Self {
            key_column: key_column.to_string(),
            columns,
            rows,
        })
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Names of the columns a join appends.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values appended for `key`, aligned with `columns()`.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Renders a whole CSV table as prompt text.
///
/// Each row becomes `Header: value` lines in column order; rows are joined
/// by `" \n"`.
pub fn table_text(path: &Path) -> Result<String, AppError> {
    let (headers, records) = read_table(path)?;
    let rendered: Vec<String> = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .zip(record)
                .map(|(h, v)| format!("{}: {}", h, v))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    Ok(rendered.join(" \n"))
}

fn without(values: &[String], index: usize) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, v)| v.clone())
        .collect()
}

fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| AppError::CsvInvalid(format!("Failed to open lookup table: {}", e)))?;

    let mut headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::CsvInvalid(format!("Failed to read lookup table headers: {}", e)))?
        .iter()
        .map(String::from)
        .collect();
    if let Some(first) = headers.first_mut() {
        *first = first.trim_start_matches(BOM_CHAR).to_string();
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result
            .map_err(|e| AppError::CsvInvalid(format!("Failed to read lookup table: {}", e)))?;
        records.push(record.iter().map(String::from).collect());
    }
    Ok((headers, records))
}
