//! Input data model and loading.
//!
//! Everything about the input that the runner treats opaquely lives here:
//! which column is the key, how prompts are worded, which rows are eligible,
//! and the optional category and lookup tables.

pub mod category;
pub mod eligibility;
pub mod loader;
pub mod lookup;
pub mod record;
pub mod template;

pub use category::{CategoryTable, UNMATCHED_CATEGORY};
pub use eligibility::{parse_rule, AllRecords, ColumnEquals, Eligibility};
pub use loader::{load_dataset, CategoryColumn, Dataset, JoinColumns, LoadOptions};
pub use lookup::{table_text, LookupTable};
pub use record::{Outcome, Record, ResultRow};
pub use template::{BoundTemplate, PromptTemplate};
