// Batch Orchestrator: main workflow coordinator
//
// Each batch is one sequential pipeline in its own staging namespace:
//   segmentation: ingest → segment → analyze → assemble
//   classification: ingest → classify each image in upload order
// Staged files are removed exactly once on every exit path.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{
    AnalysisOptions, AnalysisResult, ClassificationRequest, ClassificationResult, SegmentationRequest,
    UploadedImage,
};
use crate::middleware::validate_files;
use crate::orchestration::assembler::assemble;
use crate::services::analysis::{AnalysisDirs, AnalysisRunner};
use crate::services::classification::{ClassificationService, Classifier};
use crate::services::ingest::{decode_uploads, UploadIngestor};
use crate::services::segmentation::{SegmentationDirs, SegmentationRunner};
use crate::services::staging::{BatchId, CleanupManager, Role, StagingGuard, StagingStore};
use crate::utils::{Metrics, Stage};

/// Classification inputs share one directory; the index keeps uploads with
/// the same name apart.
fn classification_staged_name(index: usize, filename: &str) -> String {
    format!("{}_{}", index, filename)
}

async fn blocking<T, F>(f: F) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?
}

/// Main batch orchestrator
pub struct BatchOrchestrator {
    config: Arc<Config>,
    store: Arc<StagingStore>,
    ingestor: UploadIngestor,
    cleanup: CleanupManager,
    classification: ClassificationService,
    segmentation: SegmentationRunner,
    analysis: AnalysisRunner,
    metrics: Arc<Metrics>,
    batch_semaphore: Arc<Semaphore>,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<Config>, classifier: Arc<dyn Classifier>, metrics: Arc<Metrics>) -> Self {
        let store = Arc::new(StagingStore::new(config.staging.clone()));
        let batch_semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches()));

        info!(
            "✓ Ready (batches: {}, classifier: {}, interpreter: {})",
            config.max_concurrent_batches(),
            classifier.name(),
            config.process.interpreter
        );

        Self {
            ingestor: UploadIngestor::new(store.clone()),
            cleanup: CleanupManager::new(store.clone()),
            classification: ClassificationService::new(classifier),
            segmentation: SegmentationRunner::new(&config.process),
            analysis: AnalysisRunner::new(&config.process),
            store,
            config,
            metrics,
            batch_semaphore,
        }
    }

    pub fn classifier_name(&self) -> &str {
        self.classification.classifier_name()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Batches that could start right now without waiting
    pub fn available_batch_slots(&self) -> usize {
        self.batch_semaphore.available_permits()
    }

    async fn admit(&self) -> PipelineResult<SemaphorePermit<'_>> {
        self.batch_semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::ShuttingDown)
    }

    /// Run the segmentation pipeline on one request and return per-image
    /// results in natural filename order.
    #[instrument(skip(self, request), fields(images = request.files.len(), overlay = request.options.overlay))]
    pub async fn analyze_batch(&self, request: SegmentationRequest) -> PipelineResult<Vec<AnalysisResult>> {
        validate_files(&request.files, self.config.batch.enforce_filename_pattern)?;
        let images = decode_uploads(&request.files)?;
        let num_images = images.len();

        let _permit = self.admit().await?;
        let start = Instant::now();
        let batch = BatchId::generate();
        let guard = StagingGuard::new(
            self.cleanup.clone(),
            batch.clone(),
            &Role::SEGMENTATION,
            images.iter().map(|image| image.name.clone()).collect(),
        );

        let outcome = self.segment_and_analyze(&batch, images, request.options).await;
        self.finish(guard, num_images, outcome.is_ok()).await;

        match &outcome {
            Ok(results) => info!(
                "✓ Batch {} analyzed {} images in {:.2}s",
                batch,
                results.len(),
                start.elapsed().as_secs_f64()
            ),
            Err(e) => error!("Batch {} failed: {}", batch, e),
        }
        outcome
    }

    async fn segment_and_analyze(
        &self,
        batch: &BatchId,
        images: Vec<UploadedImage>,
        options: AnalysisOptions,
    ) -> PipelineResult<Vec<AnalysisResult>> {
        let filenames = self.stage_uploads(batch, &Role::SEGMENTATION, Role::Raw, images).await?;

        let raw = self.store.dir_for(batch, Role::Raw);
        let segmented = self.store.dir_for(batch, Role::Segmented);
        let cropped = self.store.dir_for(batch, Role::Cropped);
        let colored = self.store.dir_for(batch, Role::Colored);
        let csv = self.store.dir_for(batch, Role::Csv);

        let stage_start = Instant::now();
        let segmentation = self
            .segmentation
            .run(
                SegmentationDirs {
                    raw: &raw,
                    segmented: &segmented,
                    cropped: &cropped,
                },
                &filenames,
            )
            .await;
        self.metrics.record_process(Stage::Segmentation, segmentation.is_ok());
        self.metrics.record_stage_duration(Stage::Segmentation, stage_start.elapsed());
        segmentation?;

        let stage_start = Instant::now();
        let analysis = self
            .analysis
            .run(
                AnalysisDirs {
                    segmented: &segmented,
                    colored: &colored,
                    csv: &csv,
                    cropped: &cropped,
                },
                &options,
                &filenames,
            )
            .await;
        self.metrics.record_process(Stage::Analysis, analysis.is_ok());
        self.metrics.record_stage_duration(Stage::Analysis, stage_start.elapsed());
        let statistics = analysis?;

        let stage_start = Instant::now();
        let store = self.store.clone();
        let batch = batch.clone();
        let results = blocking(move || assemble(&store, &batch, &filenames, statistics, &options)).await;
        self.metrics.record_stage_duration(Stage::Assembly, stage_start.elapsed());
        results
    }

    /// Classify every uploaded image. Results follow upload order; the
    /// batch aborts at the first image the model cannot handle.
    #[instrument(skip(self, request), fields(images = request.files.len()))]
    pub async fn classify_batch(&self, request: ClassificationRequest) -> PipelineResult<Vec<ClassificationResult>> {
        validate_files(&request.files, false)?;
        let images = decode_uploads(&request.files)?;
        let num_images = images.len();
        let originals: Vec<String> = images.iter().map(|image| image.name.clone()).collect();

        let _permit = self.admit().await?;
        let start = Instant::now();
        let batch = BatchId::generate();
        let staged: Vec<UploadedImage> = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| UploadedImage {
                name: classification_staged_name(index, &image.name),
                ..image
            })
            .collect();
        let guard = StagingGuard::new(
            self.cleanup.clone(),
            batch.clone(),
            &[Role::Classify],
            staged.iter().map(|image| image.name.clone()).collect(),
        );

        let outcome = self.classify_staged(&batch, originals, staged).await;
        self.finish(guard, num_images, outcome.is_ok()).await;

        if let Ok(predictions) = &outcome {
            info!(
                "✓ Batch {} classified {} images in {:.2}s",
                batch,
                predictions.len(),
                start.elapsed().as_secs_f64()
            );
        }
        outcome
    }

    async fn classify_staged(
        &self,
        batch: &BatchId,
        originals: Vec<String>,
        staged: Vec<UploadedImage>,
    ) -> PipelineResult<Vec<ClassificationResult>> {
        let staged_names = self.stage_uploads(batch, &[Role::Classify], Role::Classify, staged).await?;

        let stage_start = Instant::now();
        let mut predictions = Vec::with_capacity(staged_names.len());
        for (filename, staged_name) in originals.iter().zip(&staged_names) {
            let path = self.store.path_for(batch, Role::Classify, staged_name);
            let prediction = self.classification.classify(filename, path).await;
            self.metrics.record_classification(prediction.is_ok());
            predictions.push(prediction?);
        }
        self.metrics.record_stage_duration(Stage::Classification, stage_start.elapsed());

        Ok(predictions)
    }

    /// Create the batch directories and write every upload into `role`
    async fn stage_uploads(
        &self,
        batch: &BatchId,
        roles: &[Role],
        role: Role,
        images: Vec<UploadedImage>,
    ) -> PipelineResult<Vec<String>> {
        let stage_start = Instant::now();
        let store = self.store.clone();
        let ingestor = self.ingestor.clone();
        let batch = batch.clone();
        let roles = roles.to_vec();

        let filenames = blocking(move || {
            store.prepare(&batch, &roles)?;
            Ok(ingestor.ingest(&batch, role, &images)?)
        })
        .await?;

        self.metrics.record_stage_duration(Stage::Ingest, stage_start.elapsed());
        Ok(filenames)
    }

    async fn finish(&self, guard: StagingGuard, num_images: usize, success: bool) {
        let batch = guard.batch().clone();
        let report = match tokio::task::spawn_blocking(move || guard.release()).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Cleanup task for batch {} failed: {}", batch, e);
                self.metrics.record_batch(num_images, success);
                return;
            }
        };

        for warning in &report.warnings {
            warn!("{}", warning);
        }
        self.metrics.record_cleanup_warnings(report.warnings.len());
        self.metrics.record_batch(num_images, success);
    }
}
