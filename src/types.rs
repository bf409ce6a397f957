//! Shared types used across the sync pipeline.
//!
//! Catalog types ([`Series`], [`Album`], [`ImageRef`]) are per-run snapshots
//! rebuilt from the content source on every invocation. [`ProcessedArtifact`]
//! is the only type that outlives a run: it is stored in the ledger and,
//! trimmed, in the output document.

use serde::{Deserialize, Serialize};

/// A named group of albums. `id` is the slug of `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub albums: Vec<Album>,
}

/// One album as read from the content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    /// Stable external identifier (the source page id).
    pub id: String,
    pub title: String,
    /// Directory segment of the title (`naming::dir_segment`), the album
    /// part of every object key.
    pub dir_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub date: String,
    /// Explicit cover reference, if the source sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    /// Images in source order. Empty until the album's images are fetched.
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to one source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Source URL; the natural identity of the image.
    pub src: String,
    pub alt: String,
    #[serde(default)]
    pub processed: bool,
}

impl ImageRef {
    pub fn new(src: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            alt: alt.into(),
            processed: false,
        }
    }
}

/// The processed, uploaded representation of one source image.
///
/// Never mutated after it enters the ledger; a force run replaces it whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArtifact {
    /// The exact URL that was downloaded.
    pub original_url: String,
    /// Canonical URL of the uploaded object.
    pub url: String,
    pub display_url: String,
    /// Thumbnail variant URL.
    pub thumbnail: String,
    pub alt: String,
    /// Size in bytes of the uploaded object.
    #[serde(default)]
    pub size: u64,
    /// `1 - uploaded / original`; `0.0` when the original was uploaded as-is.
    #[serde(default)]
    pub compression_ratio: f64,
}

/// The full catalog for one run: every album with its image list filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub series: Vec<Series>,
}

impl Catalog {
    pub fn album_count(&self) -> usize {
        self.series.iter().map(|s| s.albums.len()).sum()
    }

    pub fn image_count(&self) -> usize {
        self.series
            .iter()
            .flat_map(|s| &s.albums)
            .map(|a| a.images.len() + usize::from(a.cover.is_some()))
            .sum()
    }
}
