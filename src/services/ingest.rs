// Upload ingestion: transport decoding and raw staging

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::core::errors::{StagingError, ValidationError};
use crate::core::types::{UploadPayload, UploadedImage};
use crate::services::staging::{BatchId, Role, StagingStore};

/// Decode a binary string (one char per byte) back into raw bytes.
///
/// Any char above U+00FF cannot have come from a byte and fails the upload.
pub fn decode_binary_string(name: &str, buffer: &str) -> Result<Vec<u8>, ValidationError> {
    buffer
        .chars()
        .enumerate()
        .map(|(position, c)| {
            u8::try_from(c).map_err(|_| ValidationError::MalformedPayload {
                name: name.to_string(),
                reason: format!("char U+{:04X} at position {} is not a byte", c as u32, position),
            })
        })
        .collect()
}

/// Inverse of `decode_binary_string`, used by clients and tests.
pub fn encode_binary_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Mime type declared by the client, or guessed from the extension.
pub fn mime_type_for(name: &str, declared: Option<&str>) -> String {
    if let Some(declared) = declared.filter(|m| !m.trim().is_empty()) {
        return declared.to_string();
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| image::ImageFormat::from_extension(ext))
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Decode every payload of a request, keeping upload order.
pub fn decode_uploads(files: &[UploadPayload]) -> Result<Vec<UploadedImage>, ValidationError> {
    files
        .iter()
        .map(|file| {
            Ok(UploadedImage {
                name: file.name.clone(),
                mime_type: mime_type_for(&file.name, file.mime_type.as_deref()),
                bytes: decode_binary_string(&file.name, &file.buffer)?,
            })
        })
        .collect()
}

/// Writes decoded uploads into a staging role
#[derive(Debug, Clone)]
pub struct UploadIngestor {
    store: Arc<StagingStore>,
}

impl UploadIngestor {
    pub fn new(store: Arc<StagingStore>) -> Self {
        Self { store }
    }

    /// Stage every image under `role` and return the staged names in upload
    /// order. A repeated name is staged again and the last upload wins.
    pub fn ingest(
        &self,
        batch: &BatchId,
        role: Role,
        images: &[UploadedImage],
    ) -> Result<Vec<String>, StagingError> {
        let mut staged = Vec::with_capacity(images.len());
        for image in images {
            self.store.stage(batch, role, &image.name, &image.bytes)?;
            debug!(
                "Staged {} ({}, {} bytes) as {}",
                image.name,
                image.mime_type,
                image.bytes.len(),
                role
            );
            staged.push(image.name.clone());
        }
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::staging::test_support::staging_config;

    fn payload(name: &str, buffer: &str) -> UploadPayload {
        UploadPayload {
            name: name.to_string(),
            buffer: buffer.to_string(),
            mime_type: None,
        }
    }

    #[test]
    fn test_decode_full_byte_range() {
        let bytes: Vec<u8> = (0..=255).collect();
        let encoded = encode_binary_string(&bytes);
        assert_eq!(encoded.chars().count(), 256);
        assert_eq!(decode_binary_string("x.png", &encoded).unwrap(), bytes);
    }

    #[test]
    fn test_decode_rejects_wide_chars() {
        let err = decode_binary_string("1.05.png", "ab\u{263A}").unwrap_err();
        match err {
            ValidationError::MalformedPayload { name, reason } => {
                assert_eq!(name, "1.05.png");
                assert!(reason.contains("U+263A"));
                assert!(reason.contains("position 2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("1.05.png", None), "image/png");
        assert_eq!(mime_type_for("1.05.jpg", None), "image/jpeg");
        assert_eq!(mime_type_for("1.05.png", Some("image/x-custom")), "image/x-custom");
        assert_eq!(mime_type_for("1.05.unknown", None), "application/octet-stream");
    }

    #[test]
    fn test_ingest_preserves_upload_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StagingStore::new(staging_config(tmp.path())));
        let batch = BatchId::generate();
        store.prepare(&batch, &[Role::Raw]).unwrap();

        let files = vec![
            payload("10.00.png", "\u{89}PNG"),
            payload("2.00.png", "two"),
            payload("1.05.png", "one"),
        ];
        let images = decode_uploads(&files).unwrap();
        let staged = UploadIngestor::new(store.clone())
            .ingest(&batch, Role::Raw, &images)
            .unwrap();

        assert_eq!(staged, vec!["10.00.png", "2.00.png", "1.05.png"]);
        assert_eq!(
            store.read(&batch, Role::Raw, "10.00.png").unwrap(),
            vec![0x89, b'P', b'N', b'G']
        );
    }

    #[test]
    fn test_ingest_duplicate_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(StagingStore::new(staging_config(tmp.path())));
        let batch = BatchId::generate();
        store.prepare(&batch, &[Role::Raw]).unwrap();

        let images = decode_uploads(&[payload("1.05.png", "first"), payload("1.05.png", "second")]).unwrap();
        UploadIngestor::new(store.clone())
            .ingest(&batch, Role::Raw, &images)
            .unwrap();

        assert_eq!(store.read(&batch, Role::Raw, "1.05.png").unwrap(), b"second");
    }
}
