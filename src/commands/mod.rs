//! Command handlers used by the binary.

pub mod run;

pub use run::{
    load_template, run_batch, validate_input, CategorySource, ContextSource, JoinSource,
    RunRequest,
};
