use crate::core::errors::{ConfigError, ConfigResult};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub max_body_bytes: usize,
}

/// Root directories for each staging role. Every batch gets its own
/// subdirectory under each of these.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub raw_dir: PathBuf,
    pub segmented_dir: PathBuf,
    pub cropped_dir: PathBuf,
    pub colored_dir: PathBuf,
    pub csv_dir: PathBuf,
    pub classify_dir: PathBuf,
}

/// External analysis programs
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub interpreter: String,
    pub segmentation_script: PathBuf,
    pub analysis_script: PathBuf,
    pub weights_path: PathBuf,
    /// None waits for the program indefinitely
    pub timeout: Option<Duration>,
}

/// In-process classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub intra_threads: usize,
}

/// Batch admission
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_concurrent_batches: usize,
    pub enforce_filename_pattern: bool,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub staging: StagingConfig,
    pub process: ProcessConfig,
    pub classifier: ClassifierConfig,
    pub batch: BatchConfig,
}

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from(|var| env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn load_from<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let root = PathBuf::from(lookup("STAGING_ROOT").unwrap_or_else(|| "segmentation".to_string()));
        let dir = |var: &str, default: &str| -> PathBuf {
            lookup(var)
                .map(PathBuf::from)
                .unwrap_or_else(|| root.join(default))
        };

        let timeout_secs: u64 = parse_or(&lookup, "PROCESS_TIMEOUT_SECS", 0)?;

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&lookup, "SERVER_PORT", 9000)?,
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
                max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", 200 * 1024 * 1024)?,
            },
            staging: StagingConfig {
                raw_dir: dir("RAW_IMG_DIR", "raw_img"),
                segmented_dir: dir("UNET_IMG_DIR", "unet_img"),
                cropped_dir: dir("CROPPED_IMG_DIR", "cropped_img"),
                colored_dir: dir("COLORED_IMG_DIR", "colored_img"),
                csv_dir: dir("CSV_DATA_DIR", "csv_data"),
                classify_dir: lookup("CNN_IMG_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("cnn/img_dest")),
            },
            process: ProcessConfig {
                interpreter: lookup("PYTHON_BIN").unwrap_or_else(|| "python3".to_string()),
                segmentation_script: dir("SEGMENTATION_SCRIPT", "python/segmentCells.py"),
                analysis_script: dir("ANALYSIS_SCRIPT", "python/analyzeCells.py"),
                weights_path: dir("SEGMENTATION_WEIGHTS", "unet_membrane.hdf5"),
                timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            },
            classifier: ClassifierConfig {
                model_path: lookup("CNN_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("cnn/pred_model/model.onnx")),
                input_size: parse_or(&lookup, "CNN_INPUT_SIZE", 224)?,
                intra_threads: match lookup("CNN_INTRA_THREADS") {
                    Some(raw) => parse_value("CNN_INTRA_THREADS", &raw)?,
                    None => std::cmp::min(num_cpus::get(), 4).max(1),
                },
            },
            batch: BatchConfig {
                max_concurrent_batches: parse_or(&lookup, "MAX_CONCURRENT_BATCHES", 8)?,
                enforce_filename_pattern: parse_or(&lookup, "ENFORCE_FILENAME_PATTERN", true)?,
            },
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch.max_concurrent_batches == 0 {
            return Err(ConfigError::InvalidBatchLimit(self.batch.max_concurrent_batches));
        }

        if !(32..=1024).contains(&self.classifier.input_size) {
            return Err(ConfigError::InvalidInputSize(self.classifier.input_size));
        }

        let dirs = [
            ("raw", &self.staging.raw_dir),
            ("segmented", &self.staging.segmented_dir),
            ("cropped", &self.staging.cropped_dir),
            ("colored", &self.staging.colored_dir),
            ("csv", &self.staging.csv_dir),
            ("classify", &self.staging.classify_dir),
        ];
        for (role, dir) in dirs {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::EmptyStagingDir { role });
            }
        }

        if self.process.interpreter.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("PYTHON_BIN"));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_concurrent_batches(&self) -> usize {
        self.batch.max_concurrent_batches
    }
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(raw) => parse_value(var, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: raw.to_string(),
    })
}
