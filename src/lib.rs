// Library exports for the cell image analysis backend

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{
        ClassificationError, ConfigError, ExportError, PipelineError, ProcessError, StagingError,
        ValidationError,
    },
    types::{
        AnalysisOptions, AnalysisResult, ClassificationRequest, ClassificationResult, CsvExportRequest,
        PerImageStatistic, SegmentationRequest,
    },
};

pub use orchestration::BatchOrchestrator;

pub use services::{Classifier, OnnxClassifier, UnavailableClassifier};

pub use utils::{natural_cmp, Metrics};
