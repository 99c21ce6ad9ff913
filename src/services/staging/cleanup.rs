use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{file_stem, BatchId, Role, StagingStore};

/// Name prefixes the analysis program uses for rendered overlays: the
/// colorized borders (`OV_<stem>.png`) and the composite (`<stem>.png`).
pub const COLORED_VARIANT_PREFIXES: [&str; 2] = ["OV_", ""];

/// Outcome of a cleanup pass. Failures never escalate, they are reported.
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub removed: usize,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Removes every staged artifact of a batch
#[derive(Debug, Clone)]
pub struct CleanupManager {
    store: Arc<StagingStore>,
}

impl CleanupManager {
    pub fn new(store: Arc<StagingStore>) -> Self {
        Self { store }
    }

    /// File names a role may hold for one uploaded file
    pub fn staged_names(role: Role, filename: &str) -> Vec<String> {
        match role {
            Role::Colored => COLORED_VARIANT_PREFIXES
                .iter()
                .map(|prefix| format!("{}{}.png", prefix, file_stem(filename)))
                .collect(),
            Role::Csv => vec![format!("{}.csv", file_stem(filename))],
            _ => vec![filename.to_string()],
        }
    }

    /// Delete the batch's files in every role, then the batch directories
    /// themselves so stray outputs of the external programs go too.
    ///
    /// Missing files are not an error: a failed batch may never have
    /// produced them.
    pub fn clean(&self, batch: &BatchId, roles: &[Role], filenames: &[String]) -> CleanupReport {
        let mut report = CleanupReport::default();

        for role in roles {
            for filename in filenames {
                for name in Self::staged_names(*role, filename) {
                    let path = self.store.path_for(batch, *role, &name);
                    remove(&path, &mut report, |p| std::fs::remove_file(p));
                }
            }

            let dir = self.store.dir_for(batch, *role);
            remove(&dir, &mut report, |p| std::fs::remove_dir_all(p));
        }

        debug!(
            "Cleaned batch {}: {} entries removed, {} warnings",
            batch,
            report.removed,
            report.warnings.len()
        );
        report
    }
}

fn remove<F>(path: &Path, report: &mut CleanupReport, op: F)
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    match op(path) {
        Ok(()) => report.removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => report
            .warnings
            .push(format!("Failed to remove {}: {}", path.display(), e)),
    }
}

/// Runs cleanup for a batch exactly once: explicitly through `release`, or
/// on drop if the batch future is abandoned before it finishes.
pub struct StagingGuard {
    cleanup: CleanupManager,
    batch: BatchId,
    roles: Vec<Role>,
    filenames: Vec<String>,
    released: bool,
}

impl StagingGuard {
    pub fn new(cleanup: CleanupManager, batch: BatchId, roles: &[Role], filenames: Vec<String>) -> Self {
        Self {
            cleanup,
            batch,
            roles: roles.to_vec(),
            filenames,
            released: false,
        }
    }

    pub fn batch(&self) -> &BatchId {
        &self.batch
    }

    pub fn release(mut self) -> CleanupReport {
        self.released = true;
        self.cleanup.clean(&self.batch, &self.roles, &self.filenames)
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let report = self.cleanup.clean(&self.batch, &self.roles, &self.filenames);
        warn!(
            "Batch {} abandoned before completion, removed {} staged entries",
            self.batch, report.removed
        );
        for warning in &report.warnings {
            warn!("{}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::staging::test_support::{files_under, staging_config};

    fn setup() -> (tempfile::TempDir, Arc<StagingStore>, BatchId) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StagingStore::new(staging_config(tmp.path())));
        let batch = BatchId::generate();
        store.prepare(&batch, &Role::SEGMENTATION).unwrap();
        (tmp, store, batch)
    }

    #[test]
    fn test_staged_names() {
        assert_eq!(
            CleanupManager::staged_names(Role::Colored, "10.05.jpg"),
            vec!["OV_10.05.png".to_string(), "10.05.png".to_string()]
        );
        assert_eq!(CleanupManager::staged_names(Role::Csv, "10.05.jpg"), vec!["10.05.csv"]);
        assert_eq!(CleanupManager::staged_names(Role::Raw, "10.05.jpg"), vec!["10.05.jpg"]);
    }

    #[test]
    fn test_clean_removes_every_variant() {
        let (tmp, store, batch) = setup();
        let filenames = vec!["1.05.jpg".to_string(), "2.00.jpg".to_string()];

        for name in &filenames {
            store.stage(&batch, Role::Raw, name, b"raw").unwrap();
            store.stage(&batch, Role::Segmented, name, b"mask").unwrap();
            store.stage(&batch, Role::Cropped, name, b"crop").unwrap();
            for variant in CleanupManager::staged_names(Role::Colored, name) {
                store.stage(&batch, Role::Colored, &variant, b"png").unwrap();
            }
        }

        let report = CleanupManager::new(store).clean(&batch, &Role::SEGMENTATION, &filenames);

        assert!(report.is_clean(), "{:?}", report.warnings);
        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn test_clean_tolerates_missing_files() {
        let (tmp, store, batch) = setup();
        let filenames = vec!["1.05.jpg".to_string()];
        store.stage(&batch, Role::Raw, "1.05.jpg", b"raw").unwrap();

        let report = CleanupManager::new(store).clean(&batch, &Role::SEGMENTATION, &filenames);

        assert!(report.is_clean());
        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn test_clean_removes_unexpected_outputs() {
        let (tmp, store, batch) = setup();
        store.stage(&batch, Role::Colored, "debug_dump.png", b"png").unwrap();

        CleanupManager::new(store).clean(&batch, &Role::SEGMENTATION, &["1.05.jpg".to_string()]);

        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn test_clean_collects_failures_as_warnings() {
        let (tmp, store, batch) = setup();
        // a directory where a staged file is expected cannot be unlinked
        std::fs::create_dir(store.path_for(&batch, Role::Raw, "1.05.jpg")).unwrap();

        let report = CleanupManager::new(store).clean(&batch, &[Role::Raw], &["1.05.jpg".to_string()]);

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("1.05.jpg"));
        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn test_guard_cleans_on_drop() {
        let (tmp, store, batch) = setup();
        store.stage(&batch, Role::Raw, "1.05.jpg", b"raw").unwrap();

        {
            let _guard = StagingGuard::new(
                CleanupManager::new(store.clone()),
                batch.clone(),
                &Role::SEGMENTATION,
                vec!["1.05.jpg".to_string()],
            );
        }

        assert!(files_under(tmp.path()).is_empty());
    }

    #[test]
    fn test_guard_release_runs_once() {
        let (_tmp, store, batch) = setup();
        store.stage(&batch, Role::Raw, "1.05.jpg", b"raw").unwrap();

        let guard = StagingGuard::new(
            CleanupManager::new(store.clone()),
            batch.clone(),
            &[Role::Raw],
            vec!["1.05.jpg".to_string()],
        );
        let report = guard.release();

        // file + batch directory
        assert_eq!(report.removed, 2);
        assert!(!store.dir_for(&batch, Role::Raw).exists());
    }
}
