//! Shared test utilities for the portfolio-sync test suite.
//!
//! Provides in-memory stand-ins for the network collaborators and generators
//! for real encoded images.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let source = InMemoryCatalog::new()
//!     .album("travel", "Travel", "a1", "Kyoto", &["https://src.test/1.jpg"]);
//! let downloader = MemoryDownloader::new()
//!     .with("https://src.test/1.jpg", noisy_jpeg(64, 64, 90));
//! ```

use crate::catalog::{CatalogSource, SourceFetchError};
use crate::download::{DownloadError, Downloader};
use crate::types::{Album, ImageRef, Series};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;

// =========================================================================
// Catalog
// =========================================================================

/// Catalog held in memory. Albums keep insertion order, series are grouped
/// by id in order of first appearance.
#[derive(Default)]
pub struct InMemoryCatalog {
    series: Vec<Series>,
    /// `fetch_album_images` for this album id fails with HTTP 500.
    pub fail_images_for: Option<String>,
    /// `fetch_catalog` fails with HTTP 401.
    pub fail_catalog: bool,
    /// Album ids passed to `fetch_album_images`, in call order.
    pub image_fetches: Mutex<Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an album whose images are `srcs`, alt text `"image"`.
    pub fn album(
        mut self,
        series_id: &str,
        series_name: &str,
        album_id: &str,
        title: &str,
        srcs: &[&str],
    ) -> Self {
        let album = Album {
            id: album_id.to_string(),
            title: title.to_string(),
            dir_name: crate::naming::dir_segment(title),
            location: String::new(),
            date: String::new(),
            cover: None,
            images: srcs.iter().map(|s| ImageRef::new(*s, "image")).collect(),
        };
        match self.series.iter_mut().find(|s| s.id == series_id) {
            Some(series) => series.albums.push(album),
            None => self.series.push(Series {
                id: series_id.to_string(),
                name: series_name.to_string(),
                albums: vec![album],
            }),
        }
        self
    }

    /// Set the explicit cover of an already added album.
    pub fn with_cover(mut self, album_id: &str, url: &str) -> Self {
        if let Some(album) = self.album_mut(album_id) {
            album.cover = Some(url.to_string());
        }
        self
    }

    /// Replace the images of an already added album.
    pub fn with_images(mut self, album_id: &str, images: Vec<ImageRef>) -> Self {
        if let Some(album) = self.album_mut(album_id) {
            album.images = images;
        }
        self
    }

    pub fn image_fetch_count(&self) -> usize {
        self.image_fetches.lock().unwrap().len()
    }

    fn album_mut(&mut self, album_id: &str) -> Option<&mut Album> {
        self.series
            .iter_mut()
            .flat_map(|s| s.albums.iter_mut())
            .find(|a| a.id == album_id)
    }

    fn without_images(series: &Series) -> Series {
        let mut series = series.clone();
        for album in series.albums.iter_mut() {
            album.images.clear();
        }
        series
    }
}

impl CatalogSource for InMemoryCatalog {
    fn fetch_catalog(&self) -> Result<Vec<Series>, SourceFetchError> {
        if self.fail_catalog {
            return Err(SourceFetchError::Auth {
                context: "database".to_string(),
                status: 401,
            });
        }
        Ok(self.series.iter().map(Self::without_images).collect())
    }

    fn fetch_album_images(&self, album_id: &str) -> Result<Vec<ImageRef>, SourceFetchError> {
        self.image_fetches.lock().unwrap().push(album_id.to_string());
        if self.fail_images_for.as_deref() == Some(album_id) {
            return Err(SourceFetchError::Status {
                context: format!("album {album_id}"),
                status: 500,
                body: "mock failure".to_string(),
            });
        }
        Ok(self
            .series
            .iter()
            .flat_map(|s| &s.albums)
            .find(|a| a.id == album_id)
            .map(|a| a.images.clone())
            .unwrap_or_default())
    }

    fn fetch_album(&self, album_id: &str) -> Result<Series, SourceFetchError> {
        self.series
            .iter()
            .find_map(|s| {
                s.albums.iter().find(|a| a.id == album_id).map(|a| Series {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    albums: vec![Album {
                        images: Vec::new(),
                        ..a.clone()
                    }],
                })
            })
            .ok_or_else(|| SourceFetchError::Malformed {
                context: format!("album {album_id}"),
                message: "no such album".to_string(),
            })
    }
}

// =========================================================================
// Downloads
// =========================================================================

/// Serves bytes from a map; unknown URLs answer HTTP 404.
#[derive(Default)]
pub struct MemoryDownloader {
    bodies: HashMap<String, Vec<u8>>,
    pub fetched: Mutex<Vec<String>>,
}

impl MemoryDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), bytes);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl Downloader for MemoryDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

// =========================================================================
// Image generators
// =========================================================================

/// JPEG of pseudo-random noise. Noise compresses badly, so these stay large
/// at high quality and shrink steadily as quality drops.
pub fn noisy_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    let img = RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        };
        Rgb([next(), next(), next()])
    });
    encode_jpeg(&img, quality)
}

/// JPEG of a smooth gradient. Compresses very well at any quality.
pub fn gradient_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    });
    encode_jpeg(&img, quality)
}

/// Single-colour RGBA PNG.
pub fn png_rgba(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(pixel));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    out
}
