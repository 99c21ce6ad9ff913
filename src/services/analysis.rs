// Feature-analysis stage: measures every segmented cell and renders overlays

use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, error, info};

use crate::core::config::ProcessConfig;
use crate::core::errors::ProcessError;
use crate::core::types::{AnalysisOptions, PerImageStatistic};
use crate::services::process::ExternalProgram;

/// Directories the analysis program reads from and writes to
#[derive(Debug, Clone, Copy)]
pub struct AnalysisDirs<'a> {
    pub segmented: &'a Path,
    pub colored: &'a Path,
    pub csv: &'a Path,
    pub cropped: &'a Path,
}

/// Parse the program's stdout: one or more JSON arrays of per-image
/// statistics, concatenated in arrival order. A `null` entry is an image
/// without any requested feature.
pub fn parse_statistics(stdout: &str) -> Result<Vec<PerImageStatistic>, ProcessError> {
    let mut statistics = Vec::new();
    let fragments = serde_json::Deserializer::from_str(stdout).into_iter::<Vec<Option<PerImageStatistic>>>();
    for fragment in fragments {
        let fragment = fragment?;
        debug!("Received statistics fragment with {} entries", fragment.len());
        statistics.extend(fragment.into_iter().map(Option::unwrap_or_default));
    }
    Ok(statistics)
}

pub struct AnalysisRunner {
    program: ExternalProgram,
}

impl AnalysisRunner {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            program: ExternalProgram::new(
                config.interpreter.clone(),
                config.analysis_script.clone(),
                config.timeout,
            ),
        }
    }

    /// `<script> <segmented> <colored> <csv> <cropped> <json options> <json filenames>`
    pub fn arguments(
        &self,
        dirs: AnalysisDirs<'_>,
        options: &AnalysisOptions,
        filenames: &[String],
    ) -> Result<Vec<OsString>, ProcessError> {
        let to_json = |value: serde_json::Result<String>| {
            value.map_err(|source| ProcessError::Arguments {
                program: self.program.label(),
                source,
            })
        };
        let options = to_json(serde_json::to_string(options))?;
        let filenames = to_json(serde_json::to_string(filenames))?;

        Ok(vec![
            dirs.segmented.into(),
            dirs.colored.into(),
            dirs.csv.into(),
            dirs.cropped.into(),
            options.into(),
            filenames.into(),
        ])
    }

    /// Analyze every segmented file and return one statistic per entry the
    /// program reported, in the order it reported them.
    pub async fn run(
        &self,
        dirs: AnalysisDirs<'_>,
        options: &AnalysisOptions,
        filenames: &[String],
    ) -> Result<Vec<PerImageStatistic>, ProcessError> {
        let args = self.arguments(dirs, options, filenames)?;
        let output = self.program.run(args).await?;

        if !output.success() {
            error!("Analysis exited with {:?} for {} images", output.exit_code, filenames.len());
            return Err(ProcessError::AnalysisFailed {
                exit_code: output.exit_code,
            });
        }

        let statistics = parse_statistics(&output.stdout)?;
        info!("Analyzed {} images ({} statistics)", filenames.len(), statistics.len());
        Ok(statistics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_IMAGE: &str = r#"[{"size":{"min":1,"max":3,"mean":2,"median":2,"std":0.8,"data":[1,2,3],"totalCells":3}}]"#;

    #[test]
    fn test_parse_single_fragment() {
        let stats = parse_statistics(ONE_IMAGE).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0["size"].data, vec![1.0, 2.0, 3.0]);
        assert_eq!(stats[0].total_cells(), Ok(Some(3)));
    }

    #[test]
    fn test_parse_concatenated_fragments() {
        let stdout = format!("{ONE_IMAGE}\n{ONE_IMAGE}{ONE_IMAGE}\n");
        assert_eq!(parse_statistics(&stdout).unwrap().len(), 3);
    }

    #[test]
    fn test_parse_null_and_empty_entries() {
        let stats = parse_statistics("[null, {}]").unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(PerImageStatistic::is_empty));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_statistics("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed_output() {
        assert!(matches!(
            parse_statistics("Received data: [1"),
            Err(ProcessError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_options_argument() {
        let runner = AnalysisRunner::new(&ProcessConfig {
            interpreter: "python3".into(),
            segmentation_script: "segment.py".into(),
            analysis_script: "analyze.py".into(),
            weights_path: "weights.hdf5".into(),
            timeout: None,
        });
        let options = AnalysisOptions {
            overlay: true,
            size: true,
            shape: false,
            pointiness: false,
        };
        let dirs = AnalysisDirs {
            segmented: Path::new("seg"),
            colored: Path::new("color"),
            csv: Path::new("csv"),
            cropped: Path::new("crop"),
        };

        let args = runner.arguments(dirs, &options, &["1.05.png".to_string()]).unwrap();

        assert_eq!(args.len(), 6);
        assert_eq!(args[2], OsString::from("csv"));
        assert_eq!(
            args[4],
            OsString::from(r#"{"overlay":true,"size":true,"shape":false,"pointiness":false}"#)
        );
        assert_eq!(args[5], OsString::from(r#"["1.05.png"]"#));
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::services::process::test_support::write_script;
    use std::path::PathBuf;

    fn runner(script: PathBuf) -> AnalysisRunner {
        AnalysisRunner::new(&ProcessConfig {
            interpreter: "sh".into(),
            segmentation_script: PathBuf::from("unused"),
            analysis_script: script,
            weights_path: PathBuf::from("unused"),
            timeout: None,
        })
    }

    #[tokio::test]
    async fn test_run_collects_fragments_per_image() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "analyze.sh",
            r#"for f in 1 2; do echo '[{"size":{"min":1,"max":1,"mean":1,"median":1,"std":0,"data":[1],"totalCells":1}}]'; done"#,
        );
        let dirs = AnalysisDirs {
            segmented: tmp.path(),
            colored: tmp.path(),
            csv: tmp.path(),
            cropped: tmp.path(),
        };

        let stats = runner(script)
            .run(dirs, &AnalysisOptions::default(), &["1.05.png".into(), "2.00.png".into()])
            .await
            .unwrap();
        assert_eq!(stats.len(), 2);
    }

    #[tokio::test]
    async fn test_run_failure_maps_to_domain_error() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "analyze.sh", "echo '[]'\nexit 2");
        let dirs = AnalysisDirs {
            segmented: tmp.path(),
            colored: tmp.path(),
            csv: tmp.path(),
            cropped: tmp.path(),
        };

        let err = runner(script)
            .run(dirs, &AnalysisOptions::default(), &["1.05.png".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::AnalysisFailed { exit_code: Some(2) }));
    }
}
