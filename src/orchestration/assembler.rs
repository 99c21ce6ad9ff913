// Joins analysis statistics with staged images into the response shape

use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{AnalysisOptions, AnalysisResult, PerImageStatistic};
use crate::services::staging::{file_stem, BatchId, Role, StagingStore};
use crate::utils::sort_natural_by_key;

fn encode(store: &StagingStore, batch: &BatchId, role: Role, filename: &str) -> PipelineResult<String> {
    let bytes = store.read(batch, role, filename)?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

/// Pair `stats[i]` with `filenames[i]`, attach base64 images and return the
/// results in natural filename order.
///
/// With `overlay` the raw image is the cropped source and the overlay is
/// the colorized `<stem>.png`; without it the raw image is the staged upload
/// and there is no overlay. A missing image file fails the batch.
pub fn assemble(
    store: &StagingStore,
    batch: &BatchId,
    filenames: &[String],
    stats: Vec<PerImageStatistic>,
    options: &AnalysisOptions,
) -> PipelineResult<Vec<AnalysisResult>> {
    if stats.len() != filenames.len() {
        return Err(PipelineError::ResultCountMismatch {
            expected: filenames.len(),
            actual: stats.len(),
        });
    }

    let mut results = Vec::with_capacity(filenames.len());
    for (filename, stat) in filenames.iter().zip(stats) {
        let total_cells = stat
            .total_cells()
            .map_err(|reason| PipelineError::InconsistentStatistic {
                filename: filename.clone(),
                reason,
            })?;

        let (raw_img, segmented_img) = if options.overlay {
            let overlay_name = format!("{}.png", file_stem(filename));
            (
                encode(store, batch, Role::Cropped, filename)?,
                Some(encode(store, batch, Role::Colored, &overlay_name)?),
            )
        } else {
            (encode(store, batch, Role::Raw, filename)?, None)
        };

        results.push(AnalysisResult {
            filename: filename.clone(),
            stats: (!stat.is_empty()).then_some(stat),
            total_cells,
            raw_img: Some(raw_img),
            segmented_img,
        });
    }

    sort_natural_by_key(&mut results, |result| result.filename.as_str());
    debug!("Assembled {} results for batch {}", results.len(), batch);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FeatureSummary;
    use crate::services::staging::test_support::staging_config;

    fn stat(cells: &[f64]) -> PerImageStatistic {
        let mut stat = PerImageStatistic::default();
        stat.0.insert(
            "size".into(),
            FeatureSummary {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                median: 0.0,
                std: 0.0,
                data: cells.to_vec(),
                total_cells: cells.len(),
            },
        );
        stat
    }

    fn staged(names: &[&str], overlay: bool) -> (tempfile::TempDir, StagingStore, BatchId) {
        let tmp = tempfile::tempdir().unwrap();
        let store = StagingStore::new(staging_config(tmp.path()));
        let batch = BatchId::generate();
        store.prepare(&batch, &Role::SEGMENTATION).unwrap();
        for name in names {
            store.stage(&batch, Role::Raw, name, b"raw").unwrap();
            if overlay {
                store.stage(&batch, Role::Cropped, name, b"crop").unwrap();
                let colored = format!("{}.png", file_stem(name));
                store.stage(&batch, Role::Colored, &colored, b"color").unwrap();
            }
        }
        (tmp, store, batch)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_results_are_naturally_sorted() {
        let uploads = ["2.00.png", "10.00.png", "1.05.png"];
        let (_tmp, store, batch) = staged(&uploads, false);

        let results = assemble(
            &store,
            &batch,
            &names(&uploads),
            vec![stat(&[2.0]), stat(&[10.0, 10.0]), stat(&[1.0, 1.0, 1.0])],
            &AnalysisOptions::default(),
        )
        .unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(order, vec!["1.05.png", "2.00.png", "10.00.png"]);
        // statistics travel with their file
        assert_eq!(results[0].total_cells, Some(3));
        assert_eq!(results[2].total_cells, Some(2));
        assert_eq!(results[0].raw_img.as_deref(), Some("cmF3"));
        assert!(results[0].segmented_img.is_none());
    }

    #[test]
    fn test_overlay_mode_images() {
        let uploads = ["1.05.jpg"];
        let (_tmp, store, batch) = staged(&uploads, true);
        let options = AnalysisOptions {
            overlay: true,
            ..Default::default()
        };

        let results = assemble(&store, &batch, &names(&uploads), vec![stat(&[1.0])], &options).unwrap();

        assert_eq!(results[0].raw_img.as_deref(), Some(general_purpose::STANDARD.encode(b"crop").as_str()));
        assert_eq!(
            results[0].segmented_img.as_deref(),
            Some(general_purpose::STANDARD.encode(b"color").as_str())
        );
    }

    #[test]
    fn test_short_statistics_fail() {
        let uploads = ["1.05.png", "2.00.png"];
        let (_tmp, store, batch) = staged(&uploads, false);

        let err = assemble(&store, &batch, &names(&uploads), vec![stat(&[1.0])], &AnalysisOptions::default())
            .unwrap_err();

        assert!(matches!(err, PipelineError::ResultCountMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_extra_statistics_fail() {
        let uploads = ["1.05.png"];
        let (_tmp, store, batch) = staged(&uploads, false);

        let err = assemble(
            &store,
            &batch,
            &names(&uploads),
            vec![stat(&[1.0]), stat(&[1.0])],
            &AnalysisOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::ResultCountMismatch { expected: 1, actual: 2 }));
    }

    #[test]
    fn test_missing_overlay_file_fails() {
        let uploads = ["1.05.png"];
        let (_tmp, store, batch) = staged(&uploads, false);
        let options = AnalysisOptions {
            overlay: true,
            ..Default::default()
        };

        let err = assemble(&store, &batch, &names(&uploads), vec![stat(&[1.0])], &options).unwrap_err();
        assert!(matches!(err, PipelineError::Staging(_)));
    }

    #[test]
    fn test_empty_statistic_has_no_cell_count() {
        let uploads = ["1.05.png"];
        let (_tmp, store, batch) = staged(&uploads, false);

        let results = assemble(
            &store,
            &batch,
            &names(&uploads),
            vec![PerImageStatistic::default()],
            &AnalysisOptions::default(),
        )
        .unwrap();

        assert!(results[0].stats.is_none());
        assert!(results[0].total_cells.is_none());
    }

    #[test]
    fn test_inconsistent_statistic_fails() {
        let uploads = ["1.05.png"];
        let (_tmp, store, batch) = staged(&uploads, false);
        let mut bad = stat(&[1.0, 2.0]);
        if let Some(summary) = bad.0.get_mut("size") {
            summary.total_cells = 5;
        }

        let err = assemble(&store, &batch, &names(&uploads), vec![bad], &AnalysisOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InconsistentStatistic { .. }));
    }
}
