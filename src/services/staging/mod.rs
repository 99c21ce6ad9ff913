// Staging store: role-tagged directories holding transient per-batch files
//
// Every batch writes into `<role dir>/<batch id>/`, so concurrent batches
// never see each other's files even when uploads share a name.

pub mod cleanup;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::core::config::StagingConfig;
use crate::core::errors::StagingError;
use crate::middleware::is_safe_filename;

pub use cleanup::{CleanupManager, CleanupReport, StagingGuard};

/// Role of a staging directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Decoded uploads
    Raw,
    /// Segmentation masks written by the segmentation program
    Segmented,
    /// Cropped source images written by the segmentation program
    Cropped,
    /// Colorized overlays written by the analysis program
    Colored,
    /// Per-image CSV side output of the analysis program
    Csv,
    /// Classifier inputs
    Classify,
}

impl Role {
    /// Roles touched by a segmentation batch
    pub const SEGMENTATION: [Role; 5] = [
        Role::Raw,
        Role::Segmented,
        Role::Cropped,
        Role::Colored,
        Role::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Raw => "raw",
            Role::Segmented => "segmented",
            Role::Cropped => "cropped",
            Role::Colored => "colored",
            Role::Csv => "csv",
            Role::Classify => "classify",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-batch directory segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// File stem used by the analysis program for derived artifacts
/// (`10.05.png` -> `10.05`).
pub fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

/// Staging store shared by every batch in the process
#[derive(Debug, Clone)]
pub struct StagingStore {
    dirs: StagingConfig,
}

impl StagingStore {
    pub fn new(dirs: StagingConfig) -> Self {
        Self { dirs }
    }

    fn role_root(&self, role: Role) -> &Path {
        match role {
            Role::Raw => &self.dirs.raw_dir,
            Role::Segmented => &self.dirs.segmented_dir,
            Role::Cropped => &self.dirs.cropped_dir,
            Role::Colored => &self.dirs.colored_dir,
            Role::Csv => &self.dirs.csv_dir,
            Role::Classify => &self.dirs.classify_dir,
        }
    }

    /// Directory holding one batch's files for a role
    pub fn dir_for(&self, batch: &BatchId, role: Role) -> PathBuf {
        self.role_root(role).join(batch.as_str())
    }

    pub fn path_for(&self, batch: &BatchId, role: Role, filename: &str) -> PathBuf {
        self.dir_for(batch, role).join(filename)
    }

    /// Create the batch directory for each role. External programs expect
    /// their output directories to exist.
    pub fn prepare(&self, batch: &BatchId, roles: &[Role]) -> Result<(), StagingError> {
        for role in roles {
            let dir = self.dir_for(batch, *role);
            std::fs::create_dir_all(&dir)
                .map_err(|source| StagingError::CreateDir { path: dir.clone(), source })?;
        }
        debug!("Prepared staging for batch {} ({} roles)", batch, roles.len());
        Ok(())
    }

    /// Write `bytes` under `role`, replacing any existing file of that name.
    pub fn stage(
        &self,
        batch: &BatchId,
        role: Role,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StagingError> {
        let path = self.path_for(batch, role, filename);
        if !is_safe_filename(filename) {
            return Err(StagingError::Write {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "filename must be a single path component",
                ),
            });
        }
        std::fs::write(&path, bytes)
            .map_err(|source| StagingError::Write { path: path.clone(), source })?;
        Ok(path)
    }

    /// Read a staged (or externally produced) file
    pub fn read(&self, batch: &BatchId, role: Role, filename: &str) -> Result<Vec<u8>, StagingError> {
        let path = self.path_for(batch, role, filename);
        std::fs::read(&path).map_err(|source| StagingError::Read { path, source })
    }
}
