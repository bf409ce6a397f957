//! Pure calculation functions for the compression search.
//!
//! All functions here are pure and testable without any I/O or images.

/// Most encodes the quality phase may take; configs whose schedule is longer
/// are rejected at load time.
pub const MAX_QUALITY_ATTEMPTS: usize = 8;

/// Qualities the quality phase tries, in order.
///
/// Starts at `initial` and steps down by `step` while the value is still
/// above `floor`. The floor itself is never tried.
///
/// # Examples
/// ```
/// # use portfolio_sync::imaging::quality_schedule;
/// assert_eq!(quality_schedule(80, 10, 10), vec![80, 70, 60, 50, 40, 30, 20]);
/// assert_eq!(quality_schedule(10, 10, 10), Vec::<u32>::new());
/// ```
pub fn quality_schedule(initial: u32, floor: u32, step: u32) -> Vec<u32> {
    let step = step.max(1);
    let mut schedule = Vec::new();
    let mut q = initial;
    while q > floor {
        schedule.push(q);
        q = q.saturating_sub(step);
    }
    schedule
}

/// Output dimensions for the resolution phase.
///
/// Width is chosen so that `width * height ≈ budget_bytes * 8` at the source
/// aspect ratio (roughly one bit per pixel of budget), capped at
/// `max_downscale * source_width`. Both dimensions are at least 1.
///
/// # Arguments
/// * `source` - Source dimensions (width, height)
/// * `budget_bytes` - Size budget in bytes
/// * `max_downscale` - Largest allowed output width as a fraction of the source width
pub fn downscale_dimensions(source: (u32, u32), budget_bytes: u64, max_downscale: f64) -> (u32, u32) {
    let (src_w, src_h) = source;
    let src_w = src_w.max(1) as f64;
    let src_h = src_h.max(1) as f64;
    let aspect = src_w / src_h;

    let ideal = ((budget_bytes as f64 * 8.0) / aspect).sqrt();
    let width = ideal.min(src_w * max_downscale).round().max(1.0);
    let height = (width / aspect).round().max(1.0);
    (width as u32, height as u32)
}

/// `1 - output / original`, or `0.0` when the original is empty.
pub fn compression_ratio(original_len: usize, output_len: usize) -> f64 {
    if original_len == 0 {
        return 0.0;
    }
    1.0 - output_len as f64 / original_len as f64
}
