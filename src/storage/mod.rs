//! Object storage: where processed images end up.
//!
//! The orchestrator never talks to a store directly. It holds an
//! [`Uploader`], which owns one [`StorageBackend`] plus the variant settings
//! used to derive display and thumbnail URLs from the canonical URL.
//!
//! | Backend | Use |
//! |---|---|
//! | [`RemoteStore`] | S3-compatible object store (SigV4-signed `PUT`) |
//! | [`LocalStore`] | Writes objects under a local directory |
//! | [`DisabledStore`] | Store credentials missing: every upload fails |
//!
//! Variants cost nothing extra: the store's image service resizes on the fly
//! from a query string, so only the canonical object is uploaded.

pub mod local;
pub mod remote;

pub use local::LocalStore;
pub use remote::{RemoteStore, RemoteStoreConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Upload failure. Per image: the image is skipped and not recorded.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("upload of {key} failed: {source}")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("store rejected credentials for {key} (HTTP {status})")]
    Auth { key: String, status: u16 },
    #[error("store returned HTTP {status} for {key}: {body}")]
    Status {
        key: String,
        status: u16,
        body: String,
    },
    #[error("uploads disabled: {0}")]
    Disabled(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to sign request: {0}")]
    Signing(String),
}

/// A place objects can be written to.
///
/// `Sync` so the uploader can be shared across the rayon pool.
pub trait StorageBackend: Sync {
    /// Short name for logs and the run header.
    fn name(&self) -> &'static str;

    /// Store `bytes` under `key` and return the object's canonical URL.
    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, UploadError>;

    /// Whether URLs from this store accept transform query strings.
    fn supports_transforms(&self) -> bool;
}

impl<T: StorageBackend + Send> StorageBackend for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, UploadError> {
        (**self).put(key, bytes, content_type)
    }

    fn supports_transforms(&self) -> bool {
        (**self).supports_transforms()
    }
}

/// Query-string transforms appended to the canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariantConfig {
    /// Query parameter name, e.g. `x-oss-process`.
    pub query_param: String,
    pub display: String,
    pub thumbnail: String,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            query_param: "x-oss-process".to_string(),
            display: "image/resize,w_1200/quality,q_85".to_string(),
            thumbnail: "image/resize,w_300/quality,q_80".to_string(),
        }
    }
}

/// URLs of one uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedUrls {
    pub url: String,
    pub display_url: String,
    pub thumbnail_url: String,
}

/// A storage backend plus variant settings, built once per run.
pub struct Uploader {
    backend: Box<dyn StorageBackend>,
    variants: VariantConfig,
}

impl Uploader {
    pub fn new(backend: Box<dyn StorageBackend>, variants: VariantConfig) -> Self {
        Self { backend, variants }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Upload `bytes` under `key` and derive the variant URLs.
    pub fn upload(
        &self,
        bytes: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<UploadedUrls, UploadError> {
        let url = self.backend.put(key, bytes, content_type)?;
        tracing::debug!(backend = self.backend.name(), key = %key, size = bytes.len(), "uploaded");
        Ok(self.variant_urls(url))
    }

    /// Display and thumbnail URLs for a canonical URL. Without transform
    /// support all three URLs are the same.
    pub fn variant_urls(&self, url: String) -> UploadedUrls {
        if !self.backend.supports_transforms() {
            return UploadedUrls {
                display_url: url.clone(),
                thumbnail_url: url.clone(),
                url,
            };
        }
        UploadedUrls {
            display_url: with_transform(&url, &self.variants.query_param, &self.variants.display),
            thumbnail_url: with_transform(
                &url,
                &self.variants.query_param,
                &self.variants.thumbnail,
            ),
            url,
        }
    }
}

fn with_transform(url: &str, param: &str, value: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{param}={value}")
}

/// Stand-in used when no store is configured. Every upload fails, so images
/// are reported as failed and never recorded; the run itself carries on.
pub struct DisabledStore {
    reason: String,
}

impl DisabledStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl StorageBackend for DisabledStore {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn put(&self, _key: &str, _bytes: &[u8], _content_type: &str) -> Result<String, UploadError> {
        Err(UploadError::Disabled(self.reason.clone()))
    }

    fn supports_transforms(&self) -> bool {
        false
    }
}
