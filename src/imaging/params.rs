//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between [`operations`](super::operations) (which decides which
//! encodes to try) and the [`backend`](super::backend) (which does the pixel
//! work). Tests swap in a scripted backend without touching the search logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`EncodeParams`]: One encode attempt: quality plus an optional target size.
//! - [`CompressionParams`]: The size budget and the quality/resolution search knobs.

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// A single encode: quality, and the output size when the image is resized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub quality: Quality,
    /// `(width, height)` to resize to before encoding; `None` keeps the source size.
    pub resize_to: Option<(u32, u32)>,
}

impl EncodeParams {
    pub fn at_quality(quality: Quality) -> Self {
        Self {
            quality,
            resize_to: None,
        }
    }
}

/// Knobs for the adaptive compressor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionParams {
    /// Target upper bound for the output, in bytes.
    pub budget_bytes: u64,
    /// First quality tried.
    pub initial_quality: Quality,
    /// The quality loop stops once quality is at or below this.
    pub min_quality: Quality,
    /// Quality decrement per attempt.
    pub quality_step: u32,
    /// Quality for the single resized encode.
    pub fallback_quality: Quality,
    /// Largest allowed output width as a fraction of the source width.
    pub max_downscale: f64,
}

impl CompressionParams {
    /// Defaults with a budget in megabytes (1 MB = 1024 * 1024 bytes).
    pub fn with_budget_mb(max_size_mb: f64) -> Self {
        Self {
            budget_bytes: megabytes_to_bytes(max_size_mb),
            ..Self::default()
        }
    }
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            budget_bytes: megabytes_to_bytes(2.0),
            initial_quality: Quality::new(80),
            min_quality: Quality::new(10),
            quality_step: 10,
            fallback_quality: Quality::new(70),
            max_downscale: 0.8,
        }
    }
}

pub fn megabytes_to_bytes(mb: f64) -> u64 {
    (mb.max(0.0) * 1024.0 * 1024.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_80() {
        assert_eq!(Quality::default().value(), 80);
    }

    #[test]
    fn compression_defaults() {
        let p = CompressionParams::default();
        assert_eq!(p.budget_bytes, 2 * 1_048_576);
        assert_eq!(p.initial_quality.value(), 80);
        assert_eq!(p.min_quality.value(), 10);
        assert_eq!(p.quality_step, 10);
        assert_eq!(p.fallback_quality.value(), 70);
        assert_eq!(p.max_downscale, 0.8);
    }

    #[test]
    fn budget_from_fractional_megabytes() {
        assert_eq!(CompressionParams::with_budget_mb(0.5).budget_bytes, 524_288);
        assert_eq!(megabytes_to_bytes(-1.0), 0);
    }
}
