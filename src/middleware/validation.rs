// Request-shape validation run before any file touches the staging store

use std::collections::HashSet;
use tracing::warn;

use crate::core::errors::ValidationError;
use crate::core::types::UploadPayload;

/// Elapsed time since treatment encoded in a filename as
/// `<whole>.<sub>.<extension>`, e.g. `10.05.png` is 10 units and 5 sub-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ElapsedTime {
    pub whole: u64,
    pub sub: u8,
}

impl ElapsedTime {
    /// Whether a filename has the shape `<integer>.<two digits>.<extension>`.
    /// The integer part may have any number of digits.
    pub fn matches(filename: &str) -> bool {
        Self::split(filename).is_some()
    }

    /// Parse a filename of the form `<integer>.<two digits>.<extension>`.
    ///
    /// Returns None for a whole part beyond `u64::MAX`, even though the name
    /// still `matches`.
    pub fn parse(filename: &str) -> Option<Self> {
        let (whole, sub) = Self::split(filename)?;
        Some(Self {
            whole: whole.parse().ok()?,
            sub: sub.parse().ok()?,
        })
    }

    fn split(filename: &str) -> Option<(&str, &str)> {
        let mut parts = filename.splitn(3, '.');
        let whole = parts.next()?;
        let sub = parts.next()?;
        let extension = parts.next()?;

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if sub.len() != 2 || !sub.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if extension.is_empty() || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some((whole, sub))
    }
}

/// A name that stays inside its staging directory.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Validate the file list of a batch request.
///
/// `enforce_time_pattern` additionally requires every name to carry an
/// elapsed time, which the segmentation results are ordered by.
pub fn validate_files(
    files: &[UploadPayload],
    enforce_time_pattern: bool,
) -> Result<(), ValidationError> {
    if files.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }

    let mut seen = HashSet::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        if file.name.trim().is_empty() {
            return Err(ValidationError::MissingName { index });
        }
        if !is_safe_filename(&file.name) {
            return Err(ValidationError::UnsafeFilename {
                name: file.name.clone(),
            });
        }
        if enforce_time_pattern && !ElapsedTime::matches(&file.name) {
            return Err(ValidationError::InvalidFilename {
                name: file.name.clone(),
            });
        }
        if !seen.insert(file.name.as_str()) {
            warn!("Duplicate filename {} in batch, the last upload wins", file.name);
        }
    }

    Ok(())
}
