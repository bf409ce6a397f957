//! Local directory store, for previews and offline runs.

use super::remote::uri_encode_path;
use super::{StorageBackend, UploadError};
use crate::persist;
use std::path::{Path, PathBuf};

/// Writes each object to `{root}/{key}`; its URL is `{base_url}/{key}` with
/// the key percent-encoded.
pub struct LocalStore {
    root: PathBuf,
    base_url: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, UploadError> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(UploadError::Io {
                    path: self.root.join(key),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("invalid object key {key:?}"),
                    ),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl StorageBackend for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, UploadError> {
        let path = self.object_path(key)?;
        persist::write_atomic(&path, bytes).map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(format!("{}/{}", self.base_url, uri_encode_path(key)))
    }

    fn supports_transforms(&self) -> bool {
        false
    }
}
