// Main entry point for the cell analysis backend

use cell_analysis::{
    core::{
        types::{ClassificationRequest, CsvExportRequest, SegmentationRequest},
        Config, PipelineError,
    },
    orchestration::BatchOrchestrator,
    services::{csv_export::to_csv, Classifier, OnnxClassifier, UnavailableClassifier},
    utils::Metrics,
    AnalysisResult, ClassificationResult,
};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<BatchOrchestrator>,
    metrics: Arc<Metrics>,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new()?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let level = match config.log_level() {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    };
    let filter = EnvFilter::new(format!("cell_analysis={level},tower_http={level},ort=off"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== CELL ANALYSIS BACKEND ===");
    info!(
        "Config: Batches={} Interpreter={} Timeout={}",
        config.max_concurrent_batches(),
        config.process.interpreter,
        config
            .process
            .timeout
            .map(|t| format!("{}s", t.as_secs()))
            .unwrap_or_else(|| "none".to_string())
    );

    // Load the classifier once; the server still starts without it
    let classifier: Arc<dyn Classifier> = match OnnxClassifier::load(&config.classifier) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            warn!("Classifier unavailable, /cnn/predict will fail: {:#}", e);
            Arc::new(UnavailableClassifier::new(format!("{:#}", e)))
        }
    };

    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(BatchOrchestrator::new(config.clone(), classifier, metrics.clone()));
    let state = AppState { orchestrator, metrics };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/segmentation/predict", post(segmentation_predict))
        .route("/segmentation/download", post(segmentation_download))
        .route("/cnn/predict", post(cnn_predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /                       - Root endpoint");
    info!("  GET  /health                 - Health check");
    info!("  GET  /metrics                - Prometheus metrics");
    info!("  GET  /stats                  - Detailed statistics");
    info!("  POST /segmentation/predict   - Segment and analyze images");
    info!("  POST /segmentation/download  - Export cell statistics as CSV");
    info!("  POST /cnn/predict            - Classify images");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Parse a JSON body, reporting any shape problem as 400
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))
}

fn pipeline_error(e: PipelineError) -> ApiError {
    if e.is_client_error() {
        warn!("Rejected request: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    } else {
        error!("Batch processing failed: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

async fn root() -> &'static str {
    "Cell Analysis Backend"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "classifier": state.orchestrator.classifier_name(),
        "available_batch_slots": state.orchestrator.available_batch_slots(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

/// Segment, analyze and return one result per image in natural filename order
///
/// # Request Format:
/// `{files: [{name, buffer, type?}], size, shape, pointiness, overlay}`
async fn segmentation_predict(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<AnalysisResult>>, ApiError> {
    state.metrics.record_endpoint_request("/segmentation/predict");
    let request: SegmentationRequest = parse_body(&body)?;

    info!("Received segmentation request for {} images", request.files.len());
    let results = state
        .orchestrator
        .analyze_batch(request)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(results))
}

/// Export posted statistics as `stats.csv`
async fn segmentation_download(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.record_endpoint_request("/segmentation/download");
    let request: CsvExportRequest = parse_body(&body)?;

    let csv = to_csv(&request.columns(), request.total_cells).map_err(|e| {
        warn!("Rejected CSV export: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"stats.csv\""),
        ],
        csv,
    ))
}

/// Classify each image; predictions follow upload order
async fn cnn_predict(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<ClassificationResult>>, ApiError> {
    state.metrics.record_endpoint_request("/cnn/predict");
    let request: ClassificationRequest = parse_body(&body)?;

    info!("Received classification request for {} images", request.files.len());
    let predictions = state
        .orchestrator
        .classify_batch(request)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(predictions))
}
