// Request, result and statistics types shared across the pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One uploaded file as it arrives over the wire
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPayload {
    pub name: String,
    /// Binary string, one char per byte
    pub buffer: String,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
}

/// Decoded upload, ready to stage
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Feature families to compute and whether to render overlays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub overlay: bool,
    pub size: bool,
    pub shape: bool,
    pub pointiness: bool,
}

/// Body of `POST /segmentation/predict`
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationRequest {
    pub files: Vec<UploadPayload>,
    #[serde(flatten)]
    pub options: AnalysisOptions,
}

/// Body of `POST /cnn/predict`
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationRequest {
    pub files: Vec<UploadPayload>,
}

/// Summary of one feature over every detected cell of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub data: Vec<f64>,
    #[serde(rename = "totalCells")]
    pub total_cells: usize,
}

/// Per-image statistics keyed by feature name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerImageStatistic(pub BTreeMap<String, FeatureSummary>);

impl PerImageStatistic {
    /// Cell count shared by every feature, or None when no feature was computed.
    ///
    /// Fails when features disagree on the count or a data array does not
    /// hold exactly `totalCells` values.
    pub fn total_cells(&self) -> Result<Option<usize>, String> {
        let mut total: Option<usize> = None;
        for (feature, summary) in &self.0 {
            if summary.data.len() != summary.total_cells {
                return Err(format!(
                    "feature {} reports {} cells but carries {} values",
                    feature,
                    summary.total_cells,
                    summary.data.len()
                ));
            }
            match total {
                None => total = Some(summary.total_cells),
                Some(expected) if expected != summary.total_cells => {
                    return Err(format!(
                        "feature {} reports {} cells, expected {}",
                        feature, summary.total_cells, expected
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(total)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One image of a segmentation batch as returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub filename: String,
    pub stats: Option<PerImageStatistic>,
    #[serde(rename = "totalCells")]
    pub total_cells: Option<usize>,
    /// Base64 of the cropped image (overlay mode) or the raw upload
    pub raw_img: Option<String>,
    /// Base64 of the colorized overlay, overlay mode only
    pub segmented_img: Option<String>,
}

/// `[pNormal, pReject]`, aligned to upload order
pub type ClassificationResult = [f32; 2];

/// A feature column posted back for CSV export. Accepts either the raw
/// value list or the summary object returned by predict.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeatureColumn {
    Values(Vec<f64>),
    Summary { data: Vec<f64> },
}

impl FeatureColumn {
    pub fn values(&self) -> &[f64] {
        match self {
            FeatureColumn::Values(values) => values,
            FeatureColumn::Summary { data } => data,
        }
    }
}

/// Body of `POST /segmentation/download`
#[derive(Debug, Clone, Deserialize)]
pub struct CsvExportRequest {
    pub stats: BTreeMap<String, FeatureColumn>,
    #[serde(rename = "totalCells")]
    pub total_cells: usize,
}

impl CsvExportRequest {
    pub fn columns(&self) -> BTreeMap<String, Vec<f64>> {
        self.stats
            .iter()
            .map(|(feature, column)| (feature.clone(), column.values().to_vec()))
            .collect()
    }
}
