//! Text-to-category lookup table.
//!
//! Maps the literal text of a column (e.g. a question prompt) to a category
//! code and appends it as a derived column before prompts are rendered. The
//! table is data, loaded from a two-column CSV; unmatched text maps to
//! `UNMATCHED_CATEGORY`.

use std::collections::HashMap;
use std::path::Path;

use crate::error::AppError;

/// Category assigned to text absent from the table.
pub const UNMATCHED_CATEGORY: &str = "undefined";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTable {
    entries: HashMap<String, String>,
}

impl CategoryTable {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads a table from a CSV whose first two columns are `text,category`.
    ///
    /// The first row is a header. Conflicting duplicate texts are rejected.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| AppError::CsvInvalid(format!("Failed to open category table: {}", e)))?;

        let mut entries = HashMap::new();
        for (i, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                AppError::CsvInvalid(format!("Failed to read category table: {}", e))
            })?;
            let (Some(text), Some(category)) = (record.get(0), record.get(1)) else {
                return Err(AppError::CsvInvalid(format!(
                    "category table row {} needs two columns",
                    i + 2
                )));
            };
            if let Some(previous) = entries.insert(text.to_string(), category.to_string()) {
                if previous != category {
                    return Err(AppError::CsvInvalid(format!(
                        "category table maps the same text to '{}' and '{}'",
                        previous, category
                    )));
                }
            }
        }

        Ok(Self { entries })
    }

    /// Category for `text`, or `UNMATCHED_CATEGORY`. Matching is exact.
    pub fn categorize(&self, text: &str) -> &str {
        self.entries
            .get(text)
            .map(String::as_str)
            .unwrap_or(UNMATCHED_CATEGORY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn categorize_is_exact_match() {
        let table = CategoryTable::from_pairs([
            ("Is 0.2 bigger or smaller than 0.22? How do you know?", "1A"),
            ("How do you figure how what a sequence is changing by?\n", "4"),
        ]);

        assert_eq!(
            table.categorize("Is 0.2 bigger or smaller than 0.22? How do you know?"),
            "1A"
        );
        // Trailing newline is part of the key
        assert_eq!(
            table.categorize("How do you figure how what a sequence is changing by?\n"),
            "4"
        );
        assert_eq!(
            table.categorize("How do you figure how what a sequence is changing by?"),
            UNMATCHED_CATEGORY
        );
    }

    #[test]
    fn load_reads_quoted_multiline_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.csv");
        fs::write(
            &path,
            "Question,Type\n\"When should you carry? How do you know?\",7\n\"Line one\nline two\",9\n",
        )
        .unwrap();

        let table = CategoryTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.categorize("When should you carry? How do you know?"), "7");
        assert_eq!(table.categorize("Line one\nline two"), "9");
    }

    #[test]
    fn load_rejects_conflicting_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("categories.csv");
        fs::write(&path, "Question,Type\nq,1A\nq,1B\n").unwrap();

        assert!(matches!(CategoryTable::load(&path), Err(AppError::CsvInvalid(_))));
    }
}
