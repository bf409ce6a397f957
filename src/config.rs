//! Run configuration.
//!
//! Handles loading, layering and validating the configuration. Values are
//! resolved in four layers, each overriding the one before:
//!
//! 1. stock defaults ([`Config::default`])
//! 2. `portfolio-sync.toml` in the working directory, or `--config PATH`
//! 3. environment variables ([`apply_env`])
//! 4. command-line flags
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [source]
//! api_key = "secret_..."      # Notion integration token (NOTION_API_KEY)
//! database_id = "..."         # Albums database (NOTION_DATABASE_ID)
//! api_base = "https://api.notion.com"
//! page_size = 100             # 1-100
//!
//! [source.properties]
//! series = "Series"
//! title = "Album"
//! location = "Location"
//! date = "Date"
//! cover = "Cover"
//! images = "Images"
//!
//! [storage]
//! backend = "auto"            # auto | remote | local
//! bucket = "..."              # OSS_BUCKET
//! region = "oss-cn-hangzhou"  # OSS_REGION
//! endpoint = "..."            # OSS_ENDPOINT, default {region}.aliyuncs.com
//! cdn_domain = "..."          # OSS_CDN_DOMAIN
//! access_key_id = "..."       # OSS_ACCESS_KEY_ID
//! access_key_secret = "..."   # OSS_ACCESS_KEY_SECRET
//! prefix = "photo-portfolio/" # OSS_PREFIX
//! local_dir = "public/images"
//! local_base_url = "/images"
//!
//! [variants]
//! query_param = "x-oss-process"
//! display = "image/resize,w_1200/quality,q_85"
//! thumbnail = "image/resize,w_300/quality,q_80"
//!
//! [compression]
//! max_size_mb = 2.0
//! initial_quality = 80
//! min_quality = 10
//! quality_step = 10
//! fallback_quality = 70
//! max_downscale = 0.8
//!
//! [sync]
//! force = false               # FORCE_UPDATE=true
//! skip_existing = true
//! strip_query_in_identity = true
//! checkpoint_each_album = true
//! # run_timeout_secs = 3600
//! ledger_path = "data/processed_images.json"
//! document_path = "data/albums.json"
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//!
//! [http]
//! timeout_secs = 60
//! user_agent = "portfolio-sync/<version>"
//! # max_download_mb = 50
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::catalog::{NotionCatalog, PropertyNames};
use crate::download::HttpDownloader;
use crate::imaging::{
    CompressionParams, MAX_QUALITY_ATTEMPTS, Quality, megabytes_to_bytes, quality_schedule,
};
use crate::pipeline::{CancelToken, DEFAULT_KEY_PREFIX, SyncOptions};
use crate::storage::{
    DisabledStore, LocalStore, RemoteStore, RemoteStoreConfig, StorageBackend, Uploader,
    VariantConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file read from the working directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "portfolio-sync.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to serialize stock config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config validation error: {0}")]
    Validation(String),
    #[error("missing {0}")]
    Missing(String),
}

/// Full run configuration.
///
/// All fields have defaults. Config files need only specify the values they
/// want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Content source (Notion) connection and property names.
    pub source: SourceConfig,
    /// Where processed images are written.
    pub storage: StorageConfig,
    /// Display and thumbnail URL transforms.
    pub variants: VariantConfig,
    /// Adaptive compression knobs.
    pub compression: CompressionConfig,
    /// Run behavior and file locations.
    pub sync: RunConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// HTTP client settings.
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub api_key: Option<String>,
    pub database_id: Option<String>,
    pub api_base: String,
    pub page_size: u32,
    pub properties: PropertyNames,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            database_id: None,
            api_base: crate::catalog::notion::DEFAULT_API_BASE.to_string(),
            page_size: 100,
            properties: PropertyNames::default(),
        }
    }
}

/// Which storage backend a run uploads to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Remote store when credentials are complete, otherwise uploads are
    /// disabled with a warning.
    #[default]
    Auto,
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub cdn_domain: Option<String>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    /// Object key prefix, normalized to end in one `/`.
    pub prefix: String,
    /// Root directory of the `local` backend.
    pub local_dir: String,
    /// URL under which `local_dir` is served.
    pub local_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            bucket: None,
            region: None,
            endpoint: None,
            cdn_domain: None,
            access_key_id: None,
            access_key_secret: None,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            local_dir: "public/images".to_string(),
            local_base_url: "/images".to_string(),
        }
    }
}

impl StorageConfig {
    /// Remote connection settings, or the names of the missing values.
    pub fn remote(&self) -> Result<RemoteStoreConfig, Vec<&'static str>> {
        fn present(value: &Option<String>) -> Option<String> {
            value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
        }
        let bucket = present(&self.bucket);
        let region = present(&self.region);
        let access_key_id = present(&self.access_key_id);
        let secret = present(&self.access_key_secret);

        match (bucket, region, access_key_id, secret) {
            (Some(bucket), Some(region), Some(access_key_id), Some(secret_access_key)) => {
                Ok(RemoteStoreConfig {
                    bucket,
                    region,
                    endpoint: present(&self.endpoint),
                    cdn_domain: present(&self.cdn_domain),
                    access_key_id,
                    secret_access_key,
                })
            }
            (bucket, region, key, secret) => {
                let mut missing = Vec::new();
                if bucket.is_none() {
                    missing.push("storage.bucket (OSS_BUCKET)");
                }
                if region.is_none() {
                    missing.push("storage.region (OSS_REGION)");
                }
                if key.is_none() {
                    missing.push("storage.access_key_id (OSS_ACCESS_KEY_ID)");
                }
                if secret.is_none() {
                    missing.push("storage.access_key_secret (OSS_ACCESS_KEY_SECRET)");
                }
                Err(missing)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    /// Size budget per image, in megabytes.
    pub max_size_mb: f64,
    pub initial_quality: u32,
    pub min_quality: u32,
    pub quality_step: u32,
    pub fallback_quality: u32,
    /// Largest width of the resized fallback, as a fraction of the source.
    pub max_downscale: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let params = CompressionParams::default();
        Self {
            max_size_mb: 2.0,
            initial_quality: params.initial_quality.value(),
            min_quality: params.min_quality.value(),
            quality_step: params.quality_step,
            fallback_quality: params.fallback_quality.value(),
            max_downscale: params.max_downscale,
        }
    }
}

impl CompressionConfig {
    pub fn params(&self) -> CompressionParams {
        CompressionParams {
            budget_bytes: megabytes_to_bytes(self.max_size_mb),
            initial_quality: Quality::new(self.initial_quality),
            min_quality: Quality::new(self.min_quality),
            quality_step: self.quality_step,
            fallback_quality: Quality::new(self.fallback_quality),
            max_downscale: self.max_downscale,
        }
    }
}

/// The `[sync]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub force: bool,
    /// `false` has the same effect as `force = true`.
    pub skip_existing: bool,
    pub strip_query_in_identity: bool,
    pub checkpoint_each_album: bool,
    /// Stop starting new work after this many seconds.
    pub run_timeout_secs: Option<u64>,
    pub ledger_path: String,
    pub document_path: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            force: false,
            skip_existing: true,
            strip_query_in_identity: true,
            checkpoint_each_album: true,
            run_timeout_secs: None,
            ledger_path: crate::ledger::DEFAULT_LEDGER_PATH.to_string(),
            document_path: crate::document::DEFAULT_DOCUMENT_PATH.to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Reject source images larger than this.
    pub max_download_mb: Option<f64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: concat!("portfolio-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            max_download_mb: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Validation and derived settings
// =============================================================================

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.compression;
        if !(c.max_size_mb > 0.0) {
            return Err(ConfigError::Validation(
                "compression.max_size_mb must be greater than 0".into(),
            ));
        }
        for (name, q) in [
            ("initial_quality", c.initial_quality),
            ("min_quality", c.min_quality),
            ("fallback_quality", c.fallback_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(ConfigError::Validation(format!(
                    "compression.{name} must be 1-100"
                )));
            }
        }
        if c.min_quality >= c.initial_quality {
            return Err(ConfigError::Validation(
                "compression.min_quality must be below initial_quality".into(),
            ));
        }
        if c.quality_step == 0 {
            return Err(ConfigError::Validation(
                "compression.quality_step must be at least 1".into(),
            ));
        }
        let attempts = quality_schedule(c.initial_quality, c.min_quality, c.quality_step).len();
        if attempts > MAX_QUALITY_ATTEMPTS {
            return Err(ConfigError::Validation(format!(
                "compression quality search takes {attempts} encodes, at most \
                 {MAX_QUALITY_ATTEMPTS} allowed: raise quality_step or min_quality"
            )));
        }
        if !(c.max_downscale > 0.0 && c.max_downscale <= 1.0) {
            return Err(ConfigError::Validation(
                "compression.max_downscale must be in (0, 1]".into(),
            ));
        }
        if !(1..=100).contains(&self.source.page_size) {
            return Err(ConfigError::Validation(
                "source.page_size must be 1-100".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(mb) = self.http.max_download_mb
            && !(mb > 0.0)
        {
            return Err(ConfigError::Validation(
                "http.max_download_mb must be greater than 0".into(),
            ));
        }
        if self.sync.run_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "sync.run_timeout_secs must be at least 1".into(),
            ));
        }
        if self.variants.query_param.trim().is_empty() {
            return Err(ConfigError::Validation(
                "variants.query_param must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Whether every image is reprocessed.
    pub fn force(&self) -> bool {
        self.sync.force || !self.sync.skip_existing
    }

    pub fn sync_options(&self, album: Option<String>) -> SyncOptions {
        SyncOptions {
            force: self.force(),
            album,
            key_prefix: self.storage.prefix.clone(),
            strip_query_in_identity: self.sync.strip_query_in_identity,
            checkpoint_each_album: self.sync.checkpoint_each_album,
            ledger_path: PathBuf::from(&self.sync.ledger_path),
            document_path: PathBuf::from(&self.sync.document_path),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        match self.sync.run_timeout_secs {
            Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
            None => CancelToken::new(),
        }
    }

    /// Notion catalog client. Fails when the token or database id is missing.
    pub fn catalog(&self, client: reqwest::blocking::Client) -> Result<NotionCatalog, ConfigError> {
        let api_key = non_empty(&self.source.api_key)
            .ok_or_else(|| ConfigError::Missing("source.api_key (NOTION_API_KEY)".into()))?;
        let database_id = non_empty(&self.source.database_id).ok_or_else(|| {
            ConfigError::Missing("source.database_id (NOTION_DATABASE_ID)".into())
        })?;
        Ok(
            NotionCatalog::new(client, api_key, database_id, self.source.properties.clone())
                .with_api_base(&self.source.api_base)
                .with_page_size(self.source.page_size),
        )
    }

    pub fn downloader(&self, client: reqwest::blocking::Client) -> HttpDownloader {
        HttpDownloader::new(client, self.http.max_download_mb.map(megabytes_to_bytes))
    }

    /// Build the uploader for the configured backend.
    ///
    /// `auto` without complete credentials degrades to a store that fails
    /// every upload, with a warning; `remote` without them is an error.
    pub fn uploader(&self, client: reqwest::blocking::Client) -> Result<Uploader, ConfigError> {
        let backend: Box<dyn StorageBackend> = match self.storage.backend {
            BackendKind::Local => Box::new(LocalStore::new(
                &self.storage.local_dir,
                &self.storage.local_base_url,
            )),
            BackendKind::Remote => match self.storage.remote() {
                Ok(remote) => Box::new(RemoteStore::new(remote, client)),
                Err(missing) => return Err(ConfigError::Missing(missing.join(", "))),
            },
            BackendKind::Auto => match self.storage.remote() {
                Ok(remote) => Box::new(RemoteStore::new(remote, client)),
                Err(missing) => {
                    tracing::warn!(
                        missing = %missing.join(", "),
                        "object store credentials incomplete, uploads disabled"
                    );
                    Box::new(DisabledStore::new(format!(
                        "object store not configured (missing {})",
                        missing.join(", ")
                    )))
                }
            },
        };
        Ok(Uploader::new(backend, self.variants.clone()))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

// =============================================================================
// Environment overlay
// =============================================================================

/// Apply environment variables on top of `config`.
///
/// Takes the variables as an iterator so callers pass `std::env::vars()` and
/// tests pass a fixed list. Empty values are ignored.
pub fn apply_env<I, K, V>(config: &mut Config, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in vars {
        let value: String = value.into();
        if value.trim().is_empty() {
            continue;
        }
        match key.as_ref() {
            "NOTION_API_KEY" => config.source.api_key = Some(value),
            "NOTION_DATABASE_ID" => config.source.database_id = Some(value),
            "OSS_REGION" => config.storage.region = Some(value),
            "OSS_ACCESS_KEY_ID" => config.storage.access_key_id = Some(value),
            "OSS_ACCESS_KEY_SECRET" => config.storage.access_key_secret = Some(value),
            "OSS_BUCKET" => config.storage.bucket = Some(value),
            "OSS_CDN_DOMAIN" => config.storage.cdn_domain = Some(value),
            "OSS_ENDPOINT" => config.storage.endpoint = Some(value),
            "OSS_PREFIX" => config.storage.prefix = value,
            "FORCE_UPDATE" => {
                if value.eq_ignore_ascii_case("true") || value == "1" {
                    config.sync.force = true;
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Config loading and merging
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value. `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(Some(toml::from_str(&content)?))
}

/// Merge an optional overlay onto a base value and deserialize.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Load the config file layered over stock defaults, then the environment.
///
/// An explicit `path` must exist; the default file name is optional.
pub fn load_config<I, K, V>(path: Option<&Path>, env: I) -> Result<Config, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let overlay = match path {
        Some(explicit) => match load_raw_config(explicit)? {
            Some(value) => Some(value),
            None => {
                return Err(ConfigError::Io {
                    path: explicit.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
        },
        None => load_raw_config(Path::new(CONFIG_FILE_NAME))?,
    };
    let mut config = resolve_config(stock_defaults_value()?, overlay)?;
    apply_env(&mut config, env);
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `portfolio-sync.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# portfolio-sync configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Secrets are best left to the environment: NOTION_API_KEY,
# NOTION_DATABASE_ID, OSS_ACCESS_KEY_ID and OSS_ACCESS_KEY_SECRET override
# the matching keys below. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Content source (Notion)
# ---------------------------------------------------------------------------
[source]
# api_key = "secret_..."
# database_id = "..."
api_base = "https://api.notion.com"
# Results per page, 1-100.
page_size = 100

# Names of the database properties albums are read from.
[source.properties]
series = "Series"
title = "Album"
location = "Location"
date = "Date"
cover = "Cover"
images = "Images"

# ---------------------------------------------------------------------------
# Object storage
# ---------------------------------------------------------------------------
[storage]
# "auto":   upload to the remote store when credentials are complete,
#           otherwise run with uploads disabled (every image fails).
# "remote": require credentials.
# "local":  write files under local_dir, served from local_base_url.
backend = "auto"
# bucket = "my-bucket"           # OSS_BUCKET
# region = "oss-cn-hangzhou"     # OSS_REGION
# endpoint = "..."               # OSS_ENDPOINT, default {region}.aliyuncs.com
# cdn_domain = "img.example.com" # OSS_CDN_DOMAIN
prefix = "photo-portfolio/"      # OSS_PREFIX
local_dir = "public/images"
local_base_url = "/images"

# URL transforms for display and thumbnail variants, appended as
# ?{query_param}={transform}. Ignored by the local backend.
[variants]
query_param = "x-oss-process"
display = "image/resize,w_1200/quality,q_85"
thumbnail = "image/resize,w_300/quality,q_80"

# ---------------------------------------------------------------------------
# Compression
# ---------------------------------------------------------------------------
# Images at or under the budget are uploaded untouched. Larger ones are
# re-encoded as JPEG at decreasing quality; if none fits, they are resized
# once and encoded at fallback_quality. initial_quality, min_quality and
# quality_step together may allow at most 8 quality encodes.
[compression]
max_size_mb = 2.0
initial_quality = 80
min_quality = 10
quality_step = 10
fallback_quality = 70
max_downscale = 0.8

# ---------------------------------------------------------------------------
# Run behavior
# ---------------------------------------------------------------------------
[sync]
# Reprocess images already in the ledger (FORCE_UPDATE=true, --force).
force = false
skip_existing = true
# Ignore the query string of source URLs when matching the ledger.
strip_query_in_identity = true
# Save the ledger after every album.
checkpoint_each_album = true
# Stop starting new work after this many seconds.
# run_timeout_secs = 3600
ledger_path = "data/processed_images.json"
document_path = "data/albums.json"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel image workers. Omit to use all CPU cores.
# Values above the core count are clamped down.
# max_processes = 4

# ---------------------------------------------------------------------------
# HTTP
# ---------------------------------------------------------------------------
[http]
timeout_secs = 60
# user_agent = "portfolio-sync/<version>"
# Reject source images larger than this.
# max_download_mb = 50
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NO_ENV: [(&str, &str); 0] = [];

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.storage.backend, BackendKind::Auto);
        assert_eq!(config.storage.prefix, "photo-portfolio/");
        assert_eq!(config.compression.max_size_mb, 2.0);
        assert_eq!(config.sync.ledger_path, "data/processed_images.json");
        assert!(config.sync.skip_existing);
        assert_eq!(config.variants.query_param, "x-oss-process");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn compression_params_from_config() {
        let params = CompressionConfig::default().params();
        assert_eq!(params, CompressionParams::default());

        let params = CompressionConfig {
            max_size_mb: 0.5,
            ..CompressionConfig::default()
        }
        .params();
        assert_eq!(params.budget_bytes, 512 * 1024);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
[storage]
backend = "local"
local_dir = "out"

[compression]
max_size_mb = 1.5
"##;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Local);
        assert_eq!(config.storage.local_dir, "out");
        assert_eq!(config.compression.max_size_mb, 1.5);
        // Unspecified values stay default
        assert_eq!(config.compression.initial_quality, 80);
        assert_eq!(config.storage.local_base_url, "/images");
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = r##"
[compression]
max_size = 2
"##;
        assert!(toml::from_str::<Config>(toml).is_err());
        assert!(toml::from_str::<Config>("[source.properties]\nalbum_title = \"x\"").is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(toml::from_str::<Config>("[storage]\nbackend = \"s3\"").is_err());
    }

    // =========================================================================
    // validate
    // =========================================================================

    #[test]
    fn validate_rejects_bad_values() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c| c.compression.max_size_mb = 0.0),
            Box::new(|c| c.compression.initial_quality = 101),
            Box::new(|c| c.compression.min_quality = 90),
            Box::new(|c| c.compression.quality_step = 0),
            Box::new(|c| c.compression.initial_quality = 100),
            Box::new(|c| c.compression.quality_step = 1),
            Box::new(|c| c.compression.max_downscale = 1.5),
            Box::new(|c| c.source.page_size = 0),
            Box::new(|c| c.processing.max_processes = Some(0)),
            Box::new(|c| c.http.timeout_secs = 0),
            Box::new(|c| c.sync.run_timeout_secs = Some(0)),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::Validation(_))),
                "case {i} should fail validation"
            );
        }
    }

    // =========================================================================
    // merge_toml and loading
    // =========================================================================

    #[test]
    fn merge_toml_overlays_nested_tables() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = 4").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
        assert_eq!(merged["b"]["z"].as_integer(), Some(4));
    }

    #[test]
    fn load_config_reads_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        fs::write(&path, "[sync]\nforce = true\n[processing]\nmax_processes = 2\n").unwrap();

        let config = load_config(Some(&path), NO_ENV).unwrap();
        assert!(config.sync.force);
        assert_eq!(config.processing.max_processes, Some(2));
        assert_eq!(config.storage.prefix, "photo-portfolio/");
    }

    #[test]
    fn load_config_missing_explicit_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(Some(&tmp.path().join("nope.toml")), NO_ENV).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_config_validates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        fs::write(&path, "[compression]\nmax_downscale = 0.0\n").unwrap();
        assert!(matches!(
            load_config(Some(&path), NO_ENV),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let config: Config = toml::from_str(stock_config_toml()).unwrap();
        let mut expected = Config::default();
        // user_agent is commented out in the stock file
        expected.http.user_agent = config.http.user_agent.clone();
        assert_eq!(config, expected);
    }

    #[test]
    fn stock_defaults_value_round_trips() {
        let value = stock_defaults_value().unwrap();
        let config = resolve_config(value, None).unwrap();
        assert_eq!(config, Config::default());
    }

    // =========================================================================
    // Environment
    // =========================================================================

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        config.storage.bucket = Some("from-file".into());
        apply_env(
            &mut config,
            [
                ("NOTION_API_KEY", "secret_abc"),
                ("NOTION_DATABASE_ID", "db1"),
                ("OSS_BUCKET", "from-env"),
                ("OSS_REGION", "oss-cn-shanghai"),
                ("OSS_PREFIX", "gallery/"),
                ("OSS_ENDPOINT", ""),
                ("FORCE_UPDATE", "true"),
                ("HOME", "/root"),
            ],
        );
        assert_eq!(config.source.api_key.as_deref(), Some("secret_abc"));
        assert_eq!(config.source.database_id.as_deref(), Some("db1"));
        assert_eq!(config.storage.bucket.as_deref(), Some("from-env"));
        assert_eq!(config.storage.region.as_deref(), Some("oss-cn-shanghai"));
        assert_eq!(config.storage.prefix, "gallery/");
        assert_eq!(config.storage.endpoint, None);
        assert!(config.force());
    }

    #[test]
    fn force_update_other_values_ignored() {
        let mut config = Config::default();
        apply_env(&mut config, [("FORCE_UPDATE", "false")]);
        assert!(!config.force());
    }

    #[test]
    fn skip_existing_false_forces() {
        let mut config = Config::default();
        config.sync.skip_existing = false;
        assert!(config.force());
        assert!(config.sync_options(None).force);
    }

    // =========================================================================
    // Derived settings
    // =========================================================================

    #[test]
    fn sync_options_from_config() {
        let mut config = Config::default();
        config.storage.prefix = "p/".into();
        config.sync.checkpoint_each_album = false;
        let options = config.sync_options(Some("a1".into()));
        assert_eq!(options.album.as_deref(), Some("a1"));
        assert_eq!(options.key_prefix, "p/");
        assert!(!options.checkpoint_each_album);
        assert_eq!(options.ledger_path, PathBuf::from("data/processed_images.json"));
    }

    fn full_remote(config: &mut Config) {
        config.storage.bucket = Some("b".into());
        config.storage.region = Some("oss-cn-hangzhou".into());
        config.storage.access_key_id = Some("id".into());
        config.storage.access_key_secret = Some("secret".into());
    }

    #[test]
    fn remote_settings_require_credentials() {
        let mut config = Config::default();
        config.storage.bucket = Some("b".into());
        let missing = config.storage.remote().unwrap_err();
        assert_eq!(missing.len(), 3);
        assert!(missing[0].starts_with("storage.region"));

        full_remote(&mut config);
        let remote = config.storage.remote().unwrap();
        assert_eq!(remote.host(), "b.oss-cn-hangzhou.aliyuncs.com");
    }

    #[test]
    fn auto_backend_degrades_without_credentials() {
        let client = reqwest::blocking::Client::new();
        let uploader = Config::default().uploader(client).unwrap();
        assert_eq!(uploader.backend_name(), "disabled");
    }

    #[test]
    fn remote_backend_without_credentials_is_error() {
        let mut config = Config::default();
        config.storage.backend = BackendKind::Remote;
        let client = reqwest::blocking::Client::new();
        assert!(matches!(config.uploader(client), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn backends_selected_by_kind() {
        let client = reqwest::blocking::Client::new();
        let mut config = Config::default();
        full_remote(&mut config);
        assert_eq!(config.uploader(client.clone()).unwrap().backend_name(), "remote");

        config.storage.backend = BackendKind::Local;
        assert_eq!(config.uploader(client).unwrap().backend_name(), "local");
    }

    #[test]
    fn catalog_requires_source_credentials() {
        let client = reqwest::blocking::Client::new();
        let mut config = Config::default();
        assert!(matches!(
            config.catalog(client.clone()),
            Err(ConfigError::Missing(_))
        ));
        config.source.api_key = Some("secret".into());
        config.source.database_id = Some("db".into());
        assert!(config.catalog(client).is_ok());
    }

    #[test]
    fn run_timeout_sets_deadline() {
        let mut config = Config::default();
        assert!(!config.cancel_token().is_cancelled());
        config.sync.run_timeout_secs = Some(3600);
        assert!(!config.cancel_token().is_cancelled());
    }

    #[test]
    fn effective_threads_clamps_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
        let config = ProcessingConfig {
            max_processes: Some(cores + 100),
        };
        assert_eq!(effective_threads(&config), cores);
        let config = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(effective_threads(&config), 1);
    }
}
