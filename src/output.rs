//! CLI output formatting for the `sync` and `plan` commands.
//!
//! # Information-First Display
//!
//! Output is **album-centric**: every album leads with its positional index,
//! title and photo count; per-image status lines are indented below it, keyed
//! by the image's position and its source file name. Logs (`tracing`) go to
//! stderr; these lines go to stdout and read as an inventory of the run.
//!
//! # Output Format
//!
//! ## Sync
//!
//! ```text
//! Syncing 2 albums (5 photos) to remote
//! 001 Kyoto 2019 (3 photos)
//!     Series: Travel
//!     cover (temple.png): uploaded 812 KB
//!     001 (a.jpg): compressed 1.9 MB, -41%
//!     002 (b.jpg): cached
//!     Done: 2 processed, 1 cached, 0 failed
//! 002 Osaka (2 photos)
//!     Series: Travel
//!     001 (c.jpg): failed at download: https://… returned HTTP 404
//!     ...
//! ```
//!
//! ## Plan
//!
//! ```text
//! 001 Kyoto 2019 (3 photos)
//!     Series: Travel
//!     2 to process, 1 cached
//!
//! 2 to process, 1 cached across 1 album
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::naming::ImageSlot;
use crate::pipeline::{AlbumPlan, ImageOutcome, RunStats, SyncEvent, SyncReport};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Album header: positional index, title and photo count.
///
/// ```text
/// 001 Kyoto 2019 (12 photos)
/// 002 Portrait (1 photo)
/// ```
fn album_header(index: usize, title: &str, count: usize) -> String {
    format!("{} {} ({})", format_index(index), title, photos(count))
}

fn photos(count: usize) -> String {
    if count == 1 {
        "1 photo".to_string()
    } else {
        format!("{} photos", count)
    }
}

fn albums(count: usize) -> String {
    if count == 1 {
        "1 album".to_string()
    } else {
        format!("{} albums", count)
    }
}

/// Image line prefix: position (or `cover`) and the source file name.
///
/// ```text
/// 001 (a.jpg)
/// cover (temple.png)
/// ```
fn image_label(slot: ImageSlot, label: &str) -> String {
    match slot {
        ImageSlot::Position(n) => format!("{} ({})", format_index(n), label),
        ImageSlot::Cover => format!("cover ({})", label),
    }
}

/// Human-readable byte size with binary units.
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.0} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn outcome_text(outcome: &ImageOutcome) -> String {
    match outcome {
        ImageOutcome::Cached => "cached".to_string(),
        ImageOutcome::Failed { stage, reason } => format!("failed at {}: {}", stage, reason),
        ImageOutcome::Processed {
            size,
            compression_ratio,
            compressed,
            resized,
        } => {
            let verb = match (compressed, resized) {
                (true, true) => "resized",
                (true, false) => "compressed",
                (false, _) => "uploaded",
            };
            if *compressed {
                format!(
                    "{} {}, -{:.0}%",
                    verb,
                    format_size(*size),
                    compression_ratio * 100.0
                )
            } else {
                format!("{} {}", verb, format_size(*size))
            }
        }
    }
}

// ============================================================================
// Sync output
// ============================================================================

/// Format a single sync progress event as display lines.
pub fn format_sync_event(event: &SyncEvent) -> Vec<String> {
    match event {
        SyncEvent::RunStarted {
            albums: album_count,
            images,
            backend,
            force,
        } => {
            let mode = if *force { " (force)" } else { "" };
            vec![format!(
                "Syncing {} ({}) to {}{}",
                albums(*album_count),
                photos(*images),
                backend,
                mode
            )]
        }
        SyncEvent::AlbumStarted {
            index,
            series,
            title,
            image_count,
        } => vec![
            album_header(*index, title, *image_count),
            format!("{}Series: {}", indent(1), series),
        ],
        SyncEvent::ImageFinished {
            slot,
            label,
            outcome,
        } => vec![format!(
            "{}{}: {}",
            indent(1),
            image_label(*slot, label),
            outcome_text(outcome)
        )],
        SyncEvent::AlbumFinished { stats, cover, .. } => {
            let mut lines = vec![format!("{}Done: {}", indent(1), stats)];
            if cover.is_none() {
                lines.push(format!("{}No cover", indent(1)));
            }
            lines
        }
        SyncEvent::Cancelled { remaining } => {
            vec![format!("Cancelled: {} not published", albums(*remaining))]
        }
    }
}

/// Format the closing summary of a run.
pub fn format_sync_summary(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!("Synced {}: {}", albums(report.albums), report.stats)];
    if report.cancelled {
        lines.push("Run was cancelled before all albums finished".to_string());
    }
    lines
}

pub fn print_sync_summary(report: &SyncReport) {
    for line in format_sync_summary(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Plan output
// ============================================================================

/// Format a dry-run plan: one block per album, then totals.
pub fn format_plan(plans: &[AlbumPlan]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut totals = RunStats::default();

    for (i, plan) in plans.iter().enumerate() {
        lines.push(album_header(i + 1, &plan.title, plan.images));
        lines.push(format!("{}Series: {}", indent(1), plan.series));
        lines.push(format!(
            "{}{} to process, {} cached",
            indent(1),
            plan.to_process(),
            plan.cached
        ));
        totals.processed += plan.to_process();
        totals.cached += plan.cached;
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "{} to process, {} cached across {}",
        totals.processed,
        totals.cached,
        albums(plans.len())
    ));
    lines
}

pub fn print_plan(plans: &[AlbumPlan]) {
    for line in format_plan(plans) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn album_header_pluralizes() {
        assert_eq!(album_header(1, "Kyoto", 5), "001 Kyoto (5 photos)");
        assert_eq!(album_header(2, "Portrait", 1), "002 Portrait (1 photo)");
    }

    #[test]
    fn image_label_positions_and_cover() {
        assert_eq!(image_label(ImageSlot::Position(3), "a.jpg"), "003 (a.jpg)");
        assert_eq!(image_label(ImageSlot::Cover, "c.png"), "cover (c.png)");
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2 KB");
        assert_eq!(format_size(3 * 1024 * 1024 + 512 * 1024), "3.5 MB");
    }

    // =========================================================================
    // Sync event formatting tests
    // =========================================================================

    #[test]
    fn format_run_started() {
        let event = SyncEvent::RunStarted {
            albums: 2,
            images: 5,
            backend: "remote",
            force: true,
        };
        assert_eq!(
            format_sync_event(&event),
            vec!["Syncing 2 albums (5 photos) to remote (force)"]
        );
    }

    #[test]
    fn format_album_started() {
        let event = SyncEvent::AlbumStarted {
            index: 1,
            series: "Travel".to_string(),
            title: "Kyoto 2019".to_string(),
            image_count: 3,
        };
        let lines = format_sync_event(&event);
        assert_eq!(lines, vec!["001 Kyoto 2019 (3 photos)", "    Series: Travel"]);
    }

    #[test]
    fn format_image_outcomes() {
        let line = |outcome| {
            format_sync_event(&SyncEvent::ImageFinished {
                slot: ImageSlot::Position(2),
                label: "b.jpg".to_string(),
                outcome,
            })
            .remove(0)
        };
        assert_eq!(line(ImageOutcome::Cached), "    002 (b.jpg): cached");
        assert_eq!(
            line(ImageOutcome::Processed {
                size: 2048,
                compression_ratio: 0.0,
                compressed: false,
                resized: false,
            }),
            "    002 (b.jpg): uploaded 2 KB"
        );
        assert_eq!(
            line(ImageOutcome::Processed {
                size: 1024 * 1024,
                compression_ratio: 0.41,
                compressed: true,
                resized: false,
            }),
            "    002 (b.jpg): compressed 1.0 MB, -41%"
        );
        assert_eq!(
            line(ImageOutcome::Failed {
                stage: Stage::Upload,
                reason: "HTTP 500".to_string(),
            }),
            "    002 (b.jpg): failed at upload: HTTP 500"
        );
    }

    #[test]
    fn format_album_finished_without_cover() {
        let event = SyncEvent::AlbumFinished {
            title: "Empty".to_string(),
            stats: RunStats::default(),
            cover: None,
        };
        assert_eq!(
            format_sync_event(&event),
            vec!["    Done: 0 processed, 0 cached, 0 failed", "    No cover"]
        );
    }

    #[test]
    fn format_summary_reports_cancellation() {
        let report = SyncReport {
            stats: RunStats {
                processed: 1,
                cached: 2,
                failed: 0,
            },
            albums: 1,
            cancelled: true,
        };
        let lines = format_sync_summary(&report);
        assert_eq!(lines[0], "Synced 1 album: 1 processed, 2 cached, 0 failed");
        assert_eq!(lines.len(), 2);
    }

    // =========================================================================
    // Plan formatting tests
    // =========================================================================

    #[test]
    fn format_plan_blocks_and_totals() {
        let plans = vec![
            AlbumPlan {
                series: "Travel".to_string(),
                album_id: "a1".to_string(),
                title: "Kyoto".to_string(),
                images: 3,
                cached: 1,
            },
            AlbumPlan {
                series: "Street".to_string(),
                album_id: "b1".to_string(),
                title: "Night".to_string(),
                images: 1,
                cached: 1,
            },
        ];
        let lines = format_plan(&plans);
        assert_eq!(lines[0], "001 Kyoto (3 photos)");
        assert_eq!(lines[1], "    Series: Travel");
        assert_eq!(lines[2], "    2 to process, 1 cached");
        assert_eq!(lines[3], "002 Night (1 photo)");
        assert_eq!(lines.last().unwrap(), "2 to process, 2 cached across 2 albums");
    }

    #[test]
    fn format_empty_plan() {
        assert_eq!(format_plan(&[]), vec!["0 to process, 0 cached across 0 albums"]);
    }
}
