//! Adaptive image compression, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (JPEG, PNG, TIFF, WebP, GIF) |
//! | **Quality search → JPEG** | `JpegEncoder::new_with_quality` |
//! | **Resize fallback** | Lanczos3 `resize_exact` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for the quality schedule and downscale math (unit testable)
//! - **Parameters**: Data structures describing compression and encode settings
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`compress`], the search combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{CompressionError, Dimensions, ImageBackend};
pub use calculations::{
    MAX_QUALITY_ATTEMPTS, compression_ratio, downscale_dimensions, quality_schedule,
};
pub use operations::{Compressed, compress, sniff_content_type};
pub use params::{CompressionParams, EncodeParams, Quality, megabytes_to_bytes};
pub use rust_backend::RustBackend;
