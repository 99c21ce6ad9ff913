// Request guards applied before a batch enters the pipeline

pub mod validation;

pub use validation::{is_safe_filename, validate_files, ElapsedTime};
