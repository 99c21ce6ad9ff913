// Segmentation stage: one external process turning raw uploads into masks
// and cropped source images

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::core::config::ProcessConfig;
use crate::core::errors::ProcessError;
use crate::services::process::ExternalProgram;

/// Directories the segmentation program reads from and writes to
#[derive(Debug, Clone, Copy)]
pub struct SegmentationDirs<'a> {
    pub raw: &'a Path,
    pub segmented: &'a Path,
    pub cropped: &'a Path,
}

pub struct SegmentationRunner {
    program: ExternalProgram,
    weights_path: PathBuf,
}

impl SegmentationRunner {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            program: ExternalProgram::new(
                config.interpreter.clone(),
                config.segmentation_script.clone(),
                config.timeout,
            ),
            weights_path: config.weights_path.clone(),
        }
    }

    /// `<script> <raw> <segmented> <weights> <cropped> <json filenames>`
    pub fn arguments(&self, dirs: SegmentationDirs<'_>, filenames: &[String]) -> Result<Vec<OsString>, ProcessError> {
        let filenames = serde_json::to_string(filenames).map_err(|source| ProcessError::Arguments {
            program: self.program.label(),
            source,
        })?;
        Ok(vec![
            dirs.raw.into(),
            dirs.segmented.into(),
            self.weights_path.clone().into(),
            dirs.cropped.into(),
            filenames.into(),
        ])
    }

    /// Segment every file. Any non-zero exit fails the whole batch; stdout
    /// is only logged.
    pub async fn run(&self, dirs: SegmentationDirs<'_>, filenames: &[String]) -> Result<(), ProcessError> {
        let args = self.arguments(dirs, filenames)?;
        let output = self.program.run(args).await?;

        if !output.success() {
            error!("Segmentation exited with {:?} for {} images", output.exit_code, filenames.len());
            return Err(ProcessError::SegmentationFailed {
                exit_code: output.exit_code,
            });
        }

        info!("Segmented {} images", filenames.len());
        Ok(())
    }
}
