use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Most recent samples kept per stage for averages and percentiles
pub const DURATION_WINDOW: usize = 1000;

/// Pipeline stage, used to bucket durations and process outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Segmentation,
    Analysis,
    Assembly,
    Classification,
}

/// Global metrics collector for the application.
///
/// Thread-safe and cheap to clone; every clone shares the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Batch Metrics
    batches_processed: AtomicUsize,
    batches_failed: AtomicUsize,
    images_processed: AtomicUsize,

    // External process outcomes
    segmentation_runs: AtomicUsize,
    segmentation_failures: AtomicUsize,
    analysis_runs: AtomicUsize,
    analysis_failures: AtomicUsize,

    // Classifier
    classifications: AtomicUsize,
    classification_failures: AtomicUsize,

    // Cleanup
    cleanup_warnings: AtomicUsize,

    // Stage durations
    ingest_duration_ms: RwLock<VecDeque<u64>>,
    segmentation_duration_ms: RwLock<VecDeque<u64>>,
    analysis_duration_ms: RwLock<VecDeque<u64>>,
    assembly_duration_ms: RwLock<VecDeque<u64>>,
    classification_duration_ms: RwLock<VecDeque<u64>>,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                batches_processed: AtomicUsize::new(0),
                batches_failed: AtomicUsize::new(0),
                images_processed: AtomicUsize::new(0),
                segmentation_runs: AtomicUsize::new(0),
                segmentation_failures: AtomicUsize::new(0),
                analysis_runs: AtomicUsize::new(0),
                analysis_failures: AtomicUsize::new(0),
                classifications: AtomicUsize::new(0),
                classification_failures: AtomicUsize::new(0),
                cleanup_warnings: AtomicUsize::new(0),
                ingest_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                segmentation_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                analysis_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                assembly_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                classification_duration_ms: RwLock::new(VecDeque::with_capacity(DURATION_WINDOW)),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    fn durations(&self, stage: Stage) -> &RwLock<VecDeque<u64>> {
        match stage {
            Stage::Ingest => &self.inner.ingest_duration_ms,
            Stage::Segmentation => &self.inner.segmentation_duration_ms,
            Stage::Analysis => &self.inner.analysis_duration_ms,
            Stage::Assembly => &self.inner.assembly_duration_ms,
            Stage::Classification => &self.inner.classification_duration_ms,
        }
    }

    pub fn record_stage_duration(&self, stage: Stage, duration: Duration) {
        let mut durations = self.durations(stage).write();
        if durations.len() == DURATION_WINDOW {
            durations.pop_front();
        }
        durations.push_back(duration.as_millis() as u64);
    }

    /// Record the exit outcome of an external program
    pub fn record_process(&self, stage: Stage, success: bool) {
        let (runs, failures) = match stage {
            Stage::Segmentation => (&self.inner.segmentation_runs, &self.inner.segmentation_failures),
            Stage::Analysis => (&self.inner.analysis_runs, &self.inner.analysis_failures),
            _ => return,
        };
        runs.fetch_add(1, Ordering::Relaxed);
        if !success {
            failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_classification(&self, success: bool) {
        self.inner.classifications.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.classification_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batch(&self, num_images: usize, success: bool) {
        if success {
            self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
            self.inner.images_processed.fetch_add(num_images, Ordering::Relaxed);
        } else {
            self.inner.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cleanup_warnings(&self, count: usize) {
        self.inner.cleanup_warnings.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner.endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let endpoint_requests = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        let (segmentation_avg_ms, segmentation_p95_ms) = {
            let durations = self.inner.segmentation_duration_ms.read();
            (avg(&durations), percentile(&durations, 0.95))
        };
        let (analysis_avg_ms, analysis_p95_ms) = {
            let durations = self.inner.analysis_duration_ms.read();
            (avg(&durations), percentile(&durations, 0.95))
        };

        MetricsSnapshot {
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            batches_failed: self.inner.batches_failed.load(Ordering::Relaxed),
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            segmentation_runs: self.inner.segmentation_runs.load(Ordering::Relaxed),
            segmentation_failures: self.inner.segmentation_failures.load(Ordering::Relaxed),
            analysis_runs: self.inner.analysis_runs.load(Ordering::Relaxed),
            analysis_failures: self.inner.analysis_failures.load(Ordering::Relaxed),
            classifications: self.inner.classifications.load(Ordering::Relaxed),
            classification_failures: self.inner.classification_failures.load(Ordering::Relaxed),
            cleanup_warnings: self.inner.cleanup_warnings.load(Ordering::Relaxed),
            ingest_avg_ms: avg(&self.inner.ingest_duration_ms.read()),
            segmentation_avg_ms,
            segmentation_p95_ms,
            analysis_avg_ms,
            analysis_p95_ms,
            assembly_avg_ms: avg(&self.inner.assembly_duration_ms.read()),
            classification_avg_ms: avg(&self.inner.classification_duration_ms.read()),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = format!(
            r#"# HELP batches_processed_total Batches that completed successfully
# TYPE batches_processed_total counter
batches_processed_total {{}} {}

# HELP batches_failed_total Batches that ended in an error
# TYPE batches_failed_total counter
batches_failed_total {{}} {}

# HELP images_processed_total Images in successful batches
# TYPE images_processed_total counter
images_processed_total {{}} {}

# HELP process_runs_total External program launches
# TYPE process_runs_total counter
process_runs_total {{stage="segmentation"}} {}
process_runs_total {{stage="analysis"}} {}

# HELP process_failures_total External program non-zero exits
# TYPE process_failures_total counter
process_failures_total {{stage="segmentation"}} {}
process_failures_total {{stage="analysis"}} {}

# HELP classifications_total Classifier invocations
# TYPE classifications_total counter
classifications_total {{}} {}
classification_failures_total {{}} {}

# HELP cleanup_warnings_total Staged files that could not be removed
# TYPE cleanup_warnings_total counter
cleanup_warnings_total {{}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms {{stage="ingest"}} {}
stage_avg_duration_ms {{stage="segmentation"}} {}
stage_avg_duration_ms {{stage="analysis"}} {}
stage_avg_duration_ms {{stage="assembly"}} {}
stage_avg_duration_ms {{stage="classification"}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            s.batches_processed,
            s.batches_failed,
            s.images_processed,
            s.segmentation_runs,
            s.analysis_runs,
            s.segmentation_failures,
            s.analysis_failures,
            s.classifications,
            s.classification_failures,
            s.cleanup_warnings,
            s.ingest_avg_ms,
            s.segmentation_avg_ms,
            s.analysis_avg_ms,
            s.assembly_avg_ms,
            s.classification_avg_ms,
            s.uptime_seconds,
        );

        if !s.endpoint_requests.is_empty() {
            out.push_str("\n# HELP endpoint_requests_total Requests per endpoint\n");
            out.push_str("# TYPE endpoint_requests_total counter\n");
            let mut endpoints: Vec<_> = s.endpoint_requests.iter().collect();
            endpoints.sort();
            for (endpoint, count) in endpoints {
                out.push_str(&format!(
                    "endpoint_requests_total {{endpoint=\"{}\"}} {}\n",
                    endpoint, count
                ));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub batches_processed: usize,
    pub batches_failed: usize,
    pub images_processed: usize,
    pub segmentation_runs: usize,
    pub segmentation_failures: usize,
    pub analysis_runs: usize,
    pub analysis_failures: usize,
    pub classifications: usize,
    pub classification_failures: usize,
    pub cleanup_warnings: usize,
    pub ingest_avg_ms: u64,
    pub segmentation_avg_ms: u64,
    pub segmentation_p95_ms: u64,
    pub analysis_avg_ms: u64,
    pub analysis_p95_ms: u64,
    pub assembly_avg_ms: u64,
    pub classification_avg_ms: u64,
    pub endpoint_requests: std::collections::HashMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_process(Stage::Segmentation, true);
        metrics.record_process(Stage::Analysis, false);
        metrics.record_classification(true);
        metrics.record_classification(false);
        metrics.record_batch(3, true);
        metrics.record_batch(2, false);
        metrics.record_cleanup_warnings(2);
        metrics.record_stage_duration(Stage::Segmentation, Duration::from_millis(100));
        metrics.record_stage_duration(Stage::Segmentation, Duration::from_millis(300));
        metrics.record_endpoint_request("/cnn/predict");
        metrics.record_endpoint_request("/cnn/predict");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.segmentation_runs, 1);
        assert_eq!(snapshot.segmentation_failures, 0);
        assert_eq!(snapshot.analysis_runs, 1);
        assert_eq!(snapshot.analysis_failures, 1);
        assert_eq!(snapshot.classifications, 2);
        assert_eq!(snapshot.classification_failures, 1);
        assert_eq!(snapshot.batches_processed, 1);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.images_processed, 3);
        assert_eq!(snapshot.cleanup_warnings, 2);
        assert_eq!(snapshot.segmentation_avg_ms, 200);
        assert_eq!(snapshot.endpoint_requests["/cnn/predict"], 2);
    }

    #[test]
    fn test_duration_window_keeps_latest_samples() {
        let metrics = Metrics::new();
        for ms in 0..(DURATION_WINDOW as u64 + 250) {
            metrics.record_stage_duration(Stage::Ingest, Duration::from_millis(ms));
        }

        let durations = metrics.durations(Stage::Ingest).read();
        assert_eq!(durations.len(), DURATION_WINDOW);
        assert_eq!(durations.front(), Some(&250));
        assert_eq!(durations.back(), Some(&(DURATION_WINDOW as u64 + 249)));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_batch(4, true);
        metrics.record_process(Stage::Segmentation, false);
        metrics.record_endpoint_request("/segmentation/predict");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("batches_processed_total {} 1"));
        assert!(prometheus.contains("images_processed_total {} 4"));
        assert!(prometheus.contains("process_failures_total {stage=\"segmentation\"} 1"));
        assert!(prometheus.contains("endpoint_requests_total {endpoint=\"/segmentation/predict\"} 1"));
    }
}
