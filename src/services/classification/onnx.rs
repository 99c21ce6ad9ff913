// ONNX Runtime backed classifier (VGG16-style, NHWC input, 2-way softmax)

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array4;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, trace};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

use super::Classifier;
use crate::core::config::ClassifierConfig;
use crate::core::types::ClassificationResult;

/// Per-channel means subtracted from every RGB pixel
pub const CHANNEL_MEANS: [f32; 3] = [104.0, 117.0, 123.0];

pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    device_type: String,
}

impl OnnxClassifier {
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        let path = &config.model_path;
        if !path.exists() {
            anyhow::bail!("classifier model not found at {}", path.display());
        }

        let (device_type, session) = Self::build_session(path, config.intra_threads)
            .with_context(|| format!("failed to load classifier model {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("classifier model declares no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("classifier model declares no outputs")?;

        info!("✓ Classifier: {} ({} -> {})", device_type, input_name, output_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size: config.input_size,
            device_type,
        })
    }

    fn build_session(path: &Path, threads: usize) -> Result<(String, Session)> {
        #[cfg(feature = "cuda")]
        {
            if let Ok(session) = Session::builder()
                .and_then(|b| b.with_execution_providers([CUDAExecutionProvider::default().build()]))
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(threads))
                .and_then(|b| b.commit_from_file(path))
            {
                return Ok(("CUDA".to_string(), session));
            }
        }

        #[cfg(all(target_os = "macos", feature = "coreml"))]
        {
            if let Ok(session) = Session::builder()
                .and_then(|b| b.with_execution_providers([CoreMLExecutionProvider::default().build()]))
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(threads))
                .and_then(|b| b.commit_from_file(path))
            {
                return Ok(("CoreML".to_string(), session));
            }
        }

        let session = Session::builder()?
            .with_execution_providers([CPUExecutionProvider::default().build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(path)?;
        Ok(("CPU".to_string(), session))
    }

    /// Resize to `size`x`size` (bilinear), subtract channel means, NHWC.
    pub fn preprocess(img: &DynamicImage, size: u32) -> Array4<f32> {
        trace!("Preprocessing image: {}x{} → {}x{}", img.width(), img.height(), size, size);

        let resized = img.resize_exact(size, size, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let side = size as usize;
        let mut array = Array4::<f32>::zeros((1, side, side, 3));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                array[[0, y as usize, x as usize, c]] = pixel[c] as f32 - CHANNEL_MEANS[c];
            }
        }
        array
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        "onnx"
    }

    fn predict(&self, image_path: &Path) -> Result<ClassificationResult> {
        let img = image::open(image_path).with_context(|| format!("cannot decode {}", image_path.display()))?;
        let input = Value::from_array(Self::preprocess(&img, self.input_size))?;

        let start = Instant::now();
        let prediction = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
            let (_shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
            if data.len() != 2 {
                anyhow::bail!("expected 2 class probabilities, model returned {}", data.len());
            }
            [data[0], data[1]]
        };

        debug!(
            "✓ Inference on {} completed in {:.2}ms",
            self.device_type,
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(prediction)
    }
}
