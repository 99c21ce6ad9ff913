// Binary normal/reject classification of single images
//
// The model handle is injected at construction and loaded once per process.

pub mod onnx;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::ClassificationError;
use crate::core::types::ClassificationResult;

pub use onnx::OnnxClassifier;

/// Opaque model: image file in, `[pNormal, pReject]` out.
///
/// `predict` blocks and is always called from the blocking pool.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, image_path: &Path) -> Result<ClassificationResult>;
}

/// Stand-in used when the model could not be loaded at startup. Every
/// prediction fails with the load error.
#[derive(Debug, Clone)]
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl Classifier for UnavailableClassifier {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn predict(&self, _image_path: &Path) -> Result<ClassificationResult> {
        anyhow::bail!("classifier model is not loaded: {}", self.reason)
    }
}

#[derive(Clone)]
pub struct ClassificationService {
    classifier: Arc<dyn Classifier>,
}

impl ClassificationService {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        debug!("Classification service using {}", classifier.name());
        Self { classifier }
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Classify one staged image. The error names the uploaded file, never
    /// the staging path.
    pub async fn classify(&self, filename: &str, path: PathBuf) -> Result<ClassificationResult, ClassificationError> {
        let classifier = Arc::clone(&self.classifier);
        let outcome = tokio::task::spawn_blocking(move || classifier.predict(&path)).await;

        let reason = match outcome {
            Ok(Ok(prediction)) => {
                debug!("{}: pNormal={:.4} pReject={:.4}", filename, prediction[0], prediction[1]);
                return Ok(prediction);
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) => format!("prediction task failed: {}", e),
        };

        warn!("Prediction failed for {}: {}", filename, reason);
        Err(ClassificationError {
            filename: filename.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// Returns a fixed prediction per upload name and fails for the rest
    pub struct StubClassifier {
        pub predictions: HashMap<String, ClassificationResult>,
    }

    impl StubClassifier {
        pub fn new(pairs: &[(&str, ClassificationResult)]) -> Self {
            Self {
                predictions: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            }
        }
    }

    impl Classifier for StubClassifier {
        fn name(&self) -> &str {
            "stub"
        }

        fn predict(&self, image_path: &Path) -> Result<ClassificationResult> {
            let name = image_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            // staged copies carry an `<index>_` prefix
            let unprefixed = name.split_once('_').map(|(_, rest)| rest);
            self.predictions
                .get(name)
                .or_else(|| unprefixed.and_then(|rest| self.predictions.get(rest)))
                .copied()
                .ok_or_else(|| anyhow::anyhow!("cannot decode {}", name))
        }
    }
}
