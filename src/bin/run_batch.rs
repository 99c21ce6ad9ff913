/// Run the segmentation pipeline on local image files
///
/// Usage: cargo run --release --bin run_batch -- 1.05.png 2.00.png [--output dir]
///        [--size] [--shape] [--pointiness] [--overlay] [--csv]

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cell_analysis::core::config::Config;
use cell_analysis::core::types::{AnalysisOptions, SegmentationRequest, UploadPayload};
use cell_analysis::services::csv_export::to_csv;
use cell_analysis::services::ingest::encode_binary_string;
use cell_analysis::services::staging::file_stem;
use cell_analysis::{BatchOrchestrator, Metrics, UnavailableClassifier};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!(
            "Usage: {} <image>... [--output dir] [--size] [--shape] [--pointiness] [--overlay] [--csv]",
            args[0]
        );
        std::process::exit(1);
    }

    let mut inputs = Vec::new();
    let mut output_dir = PathBuf::from("results");
    let mut options = AnalysisOptions::default();
    let mut write_csv = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    output_dir = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--size" => {
                options.size = true;
                i += 1;
            }
            "--shape" => {
                options.shape = true;
                i += 1;
            }
            "--pointiness" => {
                options.pointiness = true;
                i += 1;
            }
            "--overlay" => {
                options.overlay = true;
                i += 1;
            }
            "--csv" => {
                write_csv = true;
                i += 1;
            }
            path => {
                inputs.push(PathBuf::from(path));
                i += 1;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("cell_analysis=info,ort=off"))
        .init();

    std::fs::create_dir_all(&output_dir)?;

    let mut files = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Not a file name: {}", path.display()))?;
        files.push(UploadPayload {
            name: name.to_string(),
            buffer: encode_binary_string(&bytes),
            mime_type: None,
        });
    }
    println!("Loaded {} images", files.len());

    let config = Arc::new(Config::new()?);
    let orchestrator = BatchOrchestrator::new(
        config,
        Arc::new(UnavailableClassifier::new("run_batch does not classify")),
        Arc::new(Metrics::new()),
    );

    let results = orchestrator
        .analyze_batch(SegmentationRequest { files, options })
        .await?;

    for result in &results {
        println!(
            "{:<20} cells={}",
            result.filename,
            result
                .total_cells
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        let stem = file_stem(&result.filename);
        if let Some(overlay) = &result.segmented_img {
            let overlay_path = output_dir.join(format!("{}_overlay.png", stem));
            std::fs::write(&overlay_path, general_purpose::STANDARD.decode(overlay)?)?;
        }

        if write_csv {
            if let (Some(stats), Some(total_cells)) = (&result.stats, result.total_cells) {
                let columns: BTreeMap<String, Vec<f64>> = stats
                    .0
                    .iter()
                    .map(|(feature, summary)| (feature.clone(), summary.data.clone()))
                    .collect();
                write_text(&output_dir.join(format!("{}.csv", stem)), &to_csv(&columns, total_cells)?)?;
            }
        }
    }

    let summary_path = output_dir.join("results.json");
    write_text(&summary_path, &serde_json::to_string_pretty(&results)?)?;
    println!("Saved results: {}", summary_path.display());

    Ok(())
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}
