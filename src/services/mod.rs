pub mod analysis;
pub mod classification;
pub mod csv_export;
pub mod ingest;
pub mod process;
pub mod segmentation;
pub mod staging;

// Re-export commonly used services
pub use analysis::AnalysisRunner;
pub use classification::{ClassificationService, Classifier, OnnxClassifier, UnavailableClassifier};
pub use csv_export::to_csv;
pub use ingest::UploadIngestor;
pub use process::ExternalProgram;
pub use segmentation::SegmentationRunner;
pub use staging::{BatchId, CleanupManager, CleanupReport, Role, StagingGuard, StagingStore};
