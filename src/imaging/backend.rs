//! Image codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the compressor
//! needs: decode raw bytes once, then encode the decoded image as many times
//! as the search requires.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use super::params::EncodeParams;
use thiserror::Error;

/// Compression failure. Per image: the caller uploads the original bytes.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image codec backends.
///
/// `Sync` so one backend can be shared across the rayon pool.
pub trait ImageBackend: Sync {
    /// Backend-specific decoded image.
    type Image;

    fn decode(&self, raw: &[u8]) -> Result<Self::Image, CompressionError>;

    fn dimensions(&self, image: &Self::Image) -> Dimensions;

    /// Encode (after an optional resize) and return the output bytes.
    fn encode(&self, image: &Self::Image, params: &EncodeParams)
    -> Result<Vec<u8>, CompressionError>;
}
