pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ClassificationError, ConfigError, ExportError, PipelineError, ProcessError, StagingError,
    ValidationError,
};
pub use types::{
    AnalysisOptions, AnalysisResult, ClassificationResult, FeatureSummary, PerImageStatistic,
    UploadPayload, UploadedImage,
};
