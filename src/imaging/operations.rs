//! High-level image operations.
//!
//! [`compress`] combines the pure search schedule from
//! [`calculations`](super::calculations) with backend encodes:
//!
//! 1. Decode once. Undecodable input is an error.
//! 2. Input already within budget → returned untouched, no encode.
//! 3. Quality phase: encode at decreasing quality until one fits.
//! 4. Resolution phase: one resized encode at the fallback quality, accepted
//!    whatever its size.

use super::backend::{CompressionError, ImageBackend};
use super::calculations::{downscale_dimensions, quality_schedule};
use super::params::{CompressionParams, EncodeParams, Quality};

/// Output of one [`compress`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Compressed {
    pub bytes: Vec<u8>,
    /// Quality of the accepted encode (the initial quality for passthrough).
    pub quality: Quality,
    pub resized: bool,
    /// MIME type sniffed from `bytes`.
    pub content_type: String,
    /// Number of encodes performed.
    pub attempts: u32,
}

impl Compressed {
    pub fn passthrough(&self) -> bool {
        self.attempts == 0
    }

    pub fn within_budget(&self, params: &CompressionParams) -> bool {
        self.bytes.len() as u64 <= params.budget_bytes
    }
}

/// Compress `raw` towards `params.budget_bytes`.
///
/// Terminates after at most `quality_schedule(..).len() + 1` encodes. The
/// result may still exceed the budget when the resized encode does; callers
/// treat that as best effort.
pub fn compress<B: ImageBackend>(
    backend: &B,
    raw: &[u8],
    params: &CompressionParams,
) -> Result<Compressed, CompressionError> {
    let image = backend.decode(raw)?;

    if raw.len() as u64 <= params.budget_bytes {
        return Ok(Compressed {
            bytes: raw.to_vec(),
            quality: params.initial_quality,
            resized: false,
            content_type: sniff_content_type(raw).to_string(),
            attempts: 0,
        });
    }

    let mut attempts = 0;
    let schedule = quality_schedule(
        params.initial_quality.value(),
        params.min_quality.value(),
        params.quality_step,
    );
    for q in schedule {
        let quality = Quality::new(q);
        let bytes = backend.encode(&image, &EncodeParams::at_quality(quality))?;
        attempts += 1;
        tracing::trace!(quality = q, size = bytes.len(), "quality attempt");
        if bytes.len() as u64 <= params.budget_bytes {
            return Ok(finish(bytes, quality, false, attempts));
        }
    }

    let dims = backend.dimensions(&image);
    let target = downscale_dimensions(
        (dims.width, dims.height),
        params.budget_bytes,
        params.max_downscale,
    );
    let bytes = backend.encode(
        &image,
        &EncodeParams {
            quality: params.fallback_quality,
            resize_to: Some(target),
        },
    )?;
    attempts += 1;
    tracing::debug!(
        from = ?(dims.width, dims.height),
        to = ?target,
        size = bytes.len(),
        "quality search exhausted, resized"
    );
    Ok(finish(bytes, params.fallback_quality, true, attempts))
}

fn finish(bytes: Vec<u8>, quality: Quality, resized: bool, attempts: u32) -> Compressed {
    let content_type = sniff_content_type(&bytes).to_string();
    Compressed {
        bytes,
        quality,
        resized,
        content_type,
        attempts,
    }
}

/// MIME type from magic bytes, `application/octet-stream` when unknown.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustBackend;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::{gradient_jpeg, noisy_jpeg};

    fn params(budget: u64) -> CompressionParams {
        CompressionParams {
            budget_bytes: budget,
            ..CompressionParams::default()
        }
    }

    // =========================================================================
    // Search logic (mock backend)
    // =========================================================================

    #[test]
    fn passthrough_when_within_budget() {
        let backend = MockBackend::new(100, 100);
        let raw = vec![1u8; 500];
        let out = compress(&backend, &raw, &params(500)).unwrap();
        assert_eq!(out.bytes, raw);
        assert!(out.passthrough());
        assert!(!out.resized);
        assert_eq!(out.quality, Quality::new(80));
        assert_eq!(backend.encode_count(), 0);
    }

    #[test]
    fn first_quality_that_fits_wins() {
        let backend = MockBackend::new(100, 100).with_sizes(vec![900, 700, 400], 1);
        let out = compress(&backend, &[0u8; 1000], &params(500)).unwrap();
        assert_eq!(out.quality.value(), 60);
        assert_eq!(out.attempts, 3);
        assert!(out.within_budget(&params(500)));
        assert!(!out.resized);
        assert_eq!(out.bytes.len(), 400);
    }

    #[test]
    fn quality_phase_walks_the_schedule() {
        let backend = MockBackend::new(100, 100).with_sizes(vec![9999; 7], 1);
        compress(&backend, &[0u8; 1000], &params(500)).unwrap();
        let qualities: Vec<u32> = backend
            .get_operations()
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Encode { quality, resize_to: None } => Some(*quality),
                _ => None,
            })
            .collect();
        assert_eq!(qualities, vec![80, 70, 60, 50, 40, 30, 20]);
    }

    #[test]
    fn resize_after_quality_exhausted() {
        let backend = MockBackend::new(64, 64).with_sizes(vec![9999; 7], 9999);
        let out = compress(&backend, &[0u8; 1000], &params(100)).unwrap();
        assert!(out.resized);
        assert_eq!(out.quality.value(), 70);
        assert_eq!(out.attempts, 8);
        // Accepted even though it is still over budget.
        assert_eq!(out.bytes.len(), 9999);
        assert!(!out.within_budget(&params(100)));
        assert_eq!(
            backend.get_operations().last(),
            Some(&RecordedOp::Encode {
                quality: 70,
                resize_to: Some((28, 28))
            })
        );
    }

    #[test]
    fn attempts_never_exceed_schedule_plus_one() {
        for initial in [10, 11, 35, 80, 100] {
            let backend = MockBackend::new(10, 10).with_sizes(vec![], 9999);
            let p = CompressionParams {
                budget_bytes: 10,
                initial_quality: Quality::new(initial),
                ..CompressionParams::default()
            };
            let out = compress(&backend, &[0u8; 100], &p).unwrap();
            let bound = quality_schedule(initial, 10, 10).len() as u32 + 1;
            assert_eq!(out.attempts, bound, "initial quality {initial}");
        }
    }

    #[test]
    fn decode_failure_is_compression_error() {
        let backend = MockBackend::new(1, 1).failing_decode();
        let err = compress(&backend, &[0u8; 10], &params(1)).unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
        assert_eq!(backend.encode_count(), 0);
    }

    // =========================================================================
    // Real codec
    // =========================================================================

    #[test]
    fn real_passthrough_is_byte_identical() {
        let raw = gradient_jpeg(120, 80, 90);
        let out = compress(&RustBackend::new(), &raw, &params(10 * 1024 * 1024)).unwrap();
        assert_eq!(out.bytes, raw);
        assert_eq!(out.content_type, "image/jpeg");
    }

    #[test]
    fn real_first_attempt_fits_when_just_over_budget() {
        let raw = gradient_jpeg(256, 256, 100);
        let backend = RustBackend::new();
        let out = compress(&backend, &raw, &params(raw.len() as u64 - 1)).unwrap();

        let single = backend
            .encode(
                &backend.decode(&raw).unwrap(),
                &EncodeParams::at_quality(Quality::new(80)),
            )
            .unwrap();
        assert!(single.len() < raw.len() - 1);
        assert_eq!(out.quality.value(), 80);
        assert_eq!(out.attempts, 1);
        assert_eq!(out.bytes, single);
    }

    #[test]
    fn real_noisy_image_meets_budget_or_resizes() {
        let raw = noisy_jpeg(256, 256, 100);
        let budget = 6 * 1024;
        let out = compress(&RustBackend::new(), &raw, &params(budget)).unwrap();
        assert!(out.bytes.len() as u64 <= budget || out.resized);
        assert!(out.attempts <= 8);
        assert_eq!(out.content_type, "image/jpeg");
    }

    #[test]
    fn real_tiny_budget_resizes_square() {
        let raw = noisy_jpeg(64, 64, 95);
        let backend = RustBackend::new();
        let out = compress(&backend, &raw, &params(100)).unwrap();
        assert!(out.resized);
        assert_eq!(out.quality.value(), 70);
        let decoded = backend.decode(&out.bytes).unwrap();
        assert_eq!(backend.dimensions(&decoded).width, 28);
    }

    #[test]
    fn real_corrupt_bytes_error() {
        let err = compress(&RustBackend::new(), b"\xFF\xD8garbage", &params(1)).unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
    }

    #[test]
    fn sniffs_known_and_unknown_types() {
        assert_eq!(sniff_content_type(&gradient_jpeg(4, 4, 80)), "image/jpeg");
        assert_eq!(
            sniff_content_type(b"\x89PNG\r\n\x1a\n...."),
            "image/png"
        );
        assert_eq!(sniff_content_type(b"hello"), "application/octet-stream");
    }
}
