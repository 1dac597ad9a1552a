//! Input dataset validation.
//!
//! Checks a fixed-size sample of the input CSV before a run starts, so a
//! malformed export fails fast instead of after hours of paced requests.

pub mod csv_validator;

pub use csv_validator::{
    validate, InputValidation, InputValidationError, InputValidationWarning,
    VALIDATION_SAMPLE_SIZE,
};
