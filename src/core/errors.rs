// Error types for the analysis pipeline
//
// One enum per failure class, folded into PipelineError at the
// orchestration boundary. The route layer maps each class to a status code.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed request shape, rejected before any file is staged
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No images provided")]
    EmptyBatch,

    #[error("File entry {index} is missing a name")]
    MissingName { index: usize },

    #[error("Filename {name:?} does not follow the <integer>.<two digits>.<extension> convention")]
    InvalidFilename { name: String },

    #[error("Filename {name:?} is not a plain file name")]
    UnsafeFilename { name: String },

    #[error("Payload for {name} is not a binary string: {reason}")]
    MalformedPayload { name: String, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

/// Local disk failures while staging or reading staged files
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read staged file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// External analysis program failures
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Segmentation failed on at least one image. Please make sure that uploaded images follow instruction guidelines.")]
    SegmentationFailed { exit_code: Option<i32> },

    #[error("Segmentation Analysis failed on at least one image. Please make sure that uploaded images follow instruction guidelines.")]
    AnalysisFailed { exit_code: Option<i32> },

    #[error("Segmentation Analysis produced unreadable output: {0}")]
    MalformedOutput(#[from] serde_json::Error),

    #[error("{program} did not finish within {seconds}s")]
    TimedOut { program: String, seconds: u64 },

    #[error("Failed to serialize arguments for {program}: {source}")]
    Arguments {
        program: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Opaque model failure for one image
#[derive(Debug, Error)]
#[error("Prediction error: couldn't predict on file {filename}: {reason}")]
pub struct ClassificationError {
    pub filename: String,
    pub reason: String,
}

/// Structural problems in a statistics table handed to the CSV exporter
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("Feature {feature} has {actual} values but totalCells is {expected}")]
    LengthMismatch {
        feature: String,
        expected: usize,
        actual: usize,
    },

    #[error("totalCells is {total_cells} but no feature columns were given")]
    NoFeatures { total_cells: usize },
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error("Analysis returned {actual} results for {expected} images")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("Inconsistent statistics for {filename}: {reason}")]
    InconsistentStatistic { filename: String, reason: String },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),

    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

impl PipelineError {
    /// True for errors caused by the request itself rather than the pipeline
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    #[error("Batch limit must be > 0, got {0}")]
    InvalidBatchLimit(usize),

    #[error("Classifier input size must be between 32 and 1024, got {0}")]
    InvalidInputSize(u32),

    #[error("Staging directory for {role} must not be empty")]
    EmptyStagingDir { role: &'static str },

    #[error("Program path for {0} must not be empty")]
    EmptyProgram(&'static str),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
