//! The sync pipeline.
//!
//! Reads the catalog, brings every referenced image into the object store and
//! publishes the result. One run moves through these states:
//!
//! ```text
//! lock → load ledger + document → read catalog → for each album:
//!     explicit cover → images (parallel) → assemble album
//! → persist ledger → merge + persist document
//! ```
//!
//! ## Per-image work
//!
//! Each image is looked up in the ledger by its identity (see
//! [`naming::source_identity`]). A hit reuses the stored artifact verbatim. A
//! miss, or every image under `force`, goes through [`process_image`]:
//!
//! 1. download the source bytes
//! 2. compress towards the size budget (on failure the original bytes are
//!    uploaded unchanged)
//! 3. upload under the derived object key
//!
//! and is recorded in the ledger only once the upload succeeded. A failing
//! image is logged, reported as [`ImageOutcome::Failed`] and left out of its
//! album; the album and the run carry on.
//!
//! ## Concurrency
//!
//! Images of one album run on the rayon pool, results are collected in input
//! order. Two workers never work on the same identity at once ([`InFlight`]);
//! the second waits and reuses what the first recorded. Ledger writes go
//! through a single mutex.
//!
//! ## Cancellation
//!
//! A tripped [`CancelToken`] stops new per-image work. Work already running
//! finishes, the ledger and the document are still written, and only albums
//! that finished completely are published.
//!
//! ## Progress
//!
//! Progress is reported as [`SyncEvent`]s over an optional channel, in
//! catalog order, for the CLI printer thread.

use crate::catalog::notion::DEFAULT_ALT;
use crate::catalog::{self, CatalogSource, SourceFetchError};
use crate::document::{self, DocumentAlbum, DocumentImage, DocumentSeries, OutputDocument};
use crate::download::Downloader;
use crate::imaging::{self, CompressionParams, ImageBackend};
use crate::ledger::{DEFAULT_LEDGER_PATH, Ledger};
use crate::naming::{self, ImageSlot};
use crate::persist::{PersistError, RunLock};
use crate::storage::Uploader;
use crate::types::{Album, ImageRef, ProcessedArtifact, Series};
use rayon::prelude::*;
use serde_json::Map;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default object key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "photo-portfolio/";

/// Fatal run failure. Per-image problems never surface here.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("another run is in progress (lock file {path} exists)")]
    Locked { path: PathBuf },
    #[error("failed to create lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read catalog: {0}")]
    Source(#[from] SourceFetchError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Run-level switches.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Reprocess every image even when the ledger has it.
    pub force: bool,
    /// Only sync this album id.
    pub album: Option<String>,
    pub key_prefix: String,
    /// Drop query string and fragment from source URLs for ledger keys.
    pub strip_query_in_identity: bool,
    /// Persist the ledger after every album, not only at the end.
    pub checkpoint_each_album: bool,
    pub ledger_path: PathBuf,
    pub document_path: PathBuf,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            album: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            strip_query_in_identity: true,
            checkpoint_each_album: true,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            document_path: PathBuf::from(document::DEFAULT_DOCUMENT_PATH),
        }
    }
}

/// Everything a run needs, built once by the caller.
pub struct SyncContext<'a, B: ImageBackend> {
    pub source: &'a dyn CatalogSource,
    pub downloader: &'a dyn Downloader,
    pub backend: &'a B,
    pub uploader: &'a Uploader,
    pub params: CompressionParams,
    pub options: SyncOptions,
    pub cancel: CancelToken,
}

// ============================================================================
// Outcomes and events
// ============================================================================

/// Pipeline stage an image failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Download => f.write_str("download"),
            Stage::Upload => f.write_str("upload"),
        }
    }
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    /// Downloaded, compressed and uploaded in this run.
    Processed {
        size: u64,
        compression_ratio: f64,
        /// Re-encoded (as opposed to uploaded as downloaded).
        compressed: bool,
        resized: bool,
    },
    /// Reused from the ledger.
    Cached,
    Failed { stage: Stage, reason: String },
}

/// Per-image outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub processed: usize,
    pub cached: usize,
    pub failed: usize,
}

impl RunStats {
    pub fn count(&mut self, outcome: &ImageOutcome) {
        match outcome {
            ImageOutcome::Processed { .. } => self.processed += 1,
            ImageOutcome::Cached => self.cached += 1,
            ImageOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn add(&mut self, other: RunStats) {
        self.processed += other.processed;
        self.cached += other.cached;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.processed + self.cached + self.failed
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} cached, {} failed",
            self.processed, self.cached, self.failed
        )
    }
}

/// Progress events, in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    RunStarted {
        albums: usize,
        images: usize,
        backend: &'static str,
        force: bool,
    },
    AlbumStarted {
        /// 1-based position among the run's albums.
        index: usize,
        series: String,
        title: String,
        image_count: usize,
    },
    ImageFinished {
        slot: ImageSlot,
        /// File name of the source URL, for display.
        label: String,
        outcome: ImageOutcome,
    },
    AlbumFinished {
        title: String,
        stats: RunStats,
        /// Canonical URL of the chosen cover, if any.
        cover: Option<String>,
    },
    /// The run stopped early; `remaining` albums were not published.
    Cancelled { remaining: usize },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub stats: RunStats,
    /// Albums completed and published.
    pub albums: usize,
    pub cancelled: bool,
}

fn emit(events: Option<&Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(tx) = events {
        // The printer going away must not stop the run.
        let _ = tx.send(event);
    }
}

// ============================================================================
// Coordination
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identities currently being processed.
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Held while an identity is being processed; releases it on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    identity: String,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`, blocking while another worker holds it.
    pub fn claim(&self, identity: &str) -> InFlightGuard<'_> {
        let mut active = lock(&self.active);
        while active.contains(identity) {
            active = self
                .released
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        active.insert(identity.to_string());
        InFlightGuard {
            owner: self,
            identity: identity.to_string(),
        }
    }

    pub fn is_active(&self, identity: &str) -> bool {
        lock(&self.active).contains(identity)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.owner.active).remove(&self.identity);
        self.owner.released.notify_all();
    }
}

/// Cooperative stop signal, optionally tripped by a deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// State shared by the workers of one run.
struct Shared {
    ledger: Mutex<Ledger>,
    in_flight: InFlight,
}

// ============================================================================
// Per image
// ============================================================================

/// One image to bring into the store, with what its key is derived from.
#[derive(Debug, Clone, Copy)]
pub struct ImageJob<'a> {
    pub image: &'a ImageRef,
    pub slot: ImageSlot,
    pub series_name: &'a str,
    pub album_title: &'a str,
    /// The album's directory segment, [`Album::dir_name`].
    pub album_dir: &'a str,
}

impl ImageJob<'_> {
    /// Object key for this image under `prefix`.
    pub fn object_key(&self, prefix: &str) -> String {
        naming::object_key(prefix, self.series_name, self.album_dir, &self.file_name())
    }

    fn file_name(&self) -> String {
        naming::safe_filename(
            self.series_name,
            self.album_title,
            self.slot,
            &naming::url_extension(&self.image.src),
        )
    }
}

/// A per-image failure, converted to [`ImageOutcome::Failed`] by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFailure {
    pub stage: Stage,
    pub reason: String,
}

/// An image processed by [`process_image`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    pub artifact: ProcessedArtifact,
    pub key: String,
    pub compressed: bool,
    pub resized: bool,
}

/// Download, compress and upload one image. Does not touch the ledger.
pub fn process_image<B: ImageBackend>(
    ctx: &SyncContext<'_, B>,
    job: &ImageJob<'_>,
) -> Result<ProcessedImage, ImageFailure> {
    let src = &job.image.src;
    let raw = ctx.downloader.fetch(src).map_err(|e| ImageFailure {
        stage: Stage::Download,
        reason: e.to_string(),
    })?;
    let original_len = raw.len();

    let (bytes, content_type, compressed, resized) =
        match imaging::compress(ctx.backend, &raw, &ctx.params) {
            Ok(out) => {
                if !out.within_budget(&ctx.params) {
                    tracing::warn!(
                        src = %src,
                        size = out.bytes.len(),
                        budget = ctx.params.budget_bytes,
                        "still over budget after resize, uploading best effort"
                    );
                }
                let compressed = !out.passthrough();
                (out.bytes, out.content_type, compressed, out.resized)
            }
            Err(e) => {
                tracing::warn!(src = %src, error = %e, "compression failed, uploading original");
                let content_type = imaging::sniff_content_type(&raw).to_string();
                (raw, content_type, false, false)
            }
        };

    let key = job.object_key(&ctx.options.key_prefix);
    let urls = ctx
        .uploader
        .upload(&bytes, &key, &content_type)
        .map_err(|e| ImageFailure {
            stage: Stage::Upload,
            reason: e.to_string(),
        })?;

    let artifact = ProcessedArtifact {
        original_url: src.clone(),
        url: urls.url,
        display_url: urls.display_url,
        thumbnail: urls.thumbnail_url,
        alt: artifact_alt(&job.image.alt, &job.file_name()),
        size: bytes.len() as u64,
        compression_ratio: imaging::compression_ratio(original_len, bytes.len()),
    };
    Ok(ProcessedImage {
        artifact,
        key,
        compressed,
        resized,
    })
}

/// Alt text for an artifact: the source's alt, unless it is the generic
/// placeholder, in which case the file stem with `_` read as spaces.
fn artifact_alt(alt: &str, file_name: &str) -> String {
    let alt = alt.trim();
    if !alt.is_empty() && alt != DEFAULT_ALT {
        return alt.to_string();
    }
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.replace('_', " ")
}

struct ImageResult {
    slot: ImageSlot,
    label: String,
    outcome: ImageOutcome,
    artifact: Option<ProcessedArtifact>,
}

/// Ledger entry usable for `identity` in this run.
fn reusable(shared: &Shared, identity: &str, force: bool) -> Option<ProcessedArtifact> {
    let ledger = lock(&shared.ledger);
    if force && !ledger.recorded_this_run(identity) {
        return None;
    }
    ledger.lookup(identity).cloned()
}

/// Sync one image. `None` when the run was cancelled before it started.
fn sync_image<B: ImageBackend>(
    ctx: &SyncContext<'_, B>,
    shared: &Shared,
    job: &ImageJob<'_>,
) -> Option<ImageResult> {
    if ctx.cancel.is_cancelled() {
        return None;
    }
    let src = &job.image.src;
    let label = naming::url_file_name(src).unwrap_or_else(|| src.clone());
    let identity = naming::source_identity(src, ctx.options.strip_query_in_identity);

    let cached = |artifact: ProcessedArtifact| ImageResult {
        slot: job.slot,
        label: label.clone(),
        outcome: ImageOutcome::Cached,
        artifact: Some(artifact),
    };

    if let Some(artifact) = reusable(shared, &identity, ctx.options.force) {
        return Some(cached(artifact));
    }
    let _guard = shared.in_flight.claim(&identity);
    // Another worker may have finished this identity while we waited.
    if let Some(artifact) = reusable(shared, &identity, ctx.options.force) {
        return Some(cached(artifact));
    }

    let result = match process_image(ctx, job) {
        Ok(processed) => {
            tracing::debug!(
                key = %processed.key,
                size = processed.artifact.size,
                ratio = processed.artifact.compression_ratio,
                "image processed"
            );
            lock(&shared.ledger).record(identity, processed.artifact.clone());
            ImageResult {
                slot: job.slot,
                label,
                outcome: ImageOutcome::Processed {
                    size: processed.artifact.size,
                    compression_ratio: processed.artifact.compression_ratio,
                    compressed: processed.compressed,
                    resized: processed.resized,
                },
                artifact: Some(processed.artifact),
            }
        }
        Err(failure) => {
            tracing::warn!(
                src = %src,
                album = %job.album_title,
                stage = %failure.stage,
                reason = %failure.reason,
                "image skipped"
            );
            ImageResult {
                slot: job.slot,
                label,
                outcome: ImageOutcome::Failed {
                    stage: failure.stage,
                    reason: failure.reason,
                },
                artifact: None,
            }
        }
    };
    Some(result)
}

// ============================================================================
// Per album
// ============================================================================

struct AlbumResult {
    document: DocumentAlbum,
    images: Vec<ImageResult>,
    stats: RunStats,
    /// Some images were never started.
    cancelled: bool,
}

fn sync_album<B: ImageBackend>(
    ctx: &SyncContext<'_, B>,
    shared: &Shared,
    series: &Series,
    album: &Album,
) -> AlbumResult {
    let mut cancelled = false;

    let cover_result = album.cover.as_ref().and_then(|src| {
        let image = ImageRef::new(src.clone(), DEFAULT_ALT);
        let job = ImageJob {
            image: &image,
            slot: ImageSlot::Cover,
            series_name: &series.name,
            album_title: &album.title,
            album_dir: &album.dir_name,
        };
        let result = sync_image(ctx, shared, &job);
        cancelled |= result.is_none();
        result
    });

    let results: Vec<Option<ImageResult>> = album
        .images
        .par_iter()
        .enumerate()
        .map(|(i, image)| {
            let job = ImageJob {
                image,
                slot: ImageSlot::Position(i + 1),
                series_name: &series.name,
                album_title: &album.title,
                album_dir: &album.dir_name,
            };
            sync_image(ctx, shared, &job)
        })
        .collect();

    let mut stats = RunStats::default();
    let mut reports = Vec::with_capacity(results.len() + 1);
    let mut artifacts = Vec::with_capacity(results.len());
    let mut cover_artifact = None;

    if let Some(result) = cover_result {
        stats.count(&result.outcome);
        cover_artifact = result.artifact.clone();
        if cover_artifact.is_none() {
            tracing::warn!(album = %album.title, "cover failed, falling back to first image");
        }
        reports.push(result);
    }
    for result in results {
        let Some(result) = result else {
            cancelled = true;
            continue;
        };
        stats.count(&result.outcome);
        if let Some(artifact) = &result.artifact {
            artifacts.push(artifact.clone());
        }
        reports.push(result);
    }

    let cover = cover_artifact.as_ref().or(artifacts.first());
    let document = DocumentAlbum {
        id: album.id.clone(),
        title: album.title.clone(),
        location: album.location.clone(),
        date: album.date.clone(),
        cover: cover.map(|a| a.url.clone()).unwrap_or_default(),
        cover_thumbnail: cover.map(|a| a.thumbnail.clone()),
        images: artifacts.iter().map(DocumentImage::from).collect(),
        extra: Map::new(),
    };

    AlbumResult {
        document,
        images: reports,
        stats,
        cancelled,
    }
}

// ============================================================================
// Run
// ============================================================================

/// Run a full sync.
///
/// Returns `Err` only for fatal conditions: the run lock is held, the catalog
/// could not be read, or the ledger or document could not be written.
pub fn run<B: ImageBackend>(
    ctx: &SyncContext<'_, B>,
    events: Option<Sender<SyncEvent>>,
) -> Result<SyncReport, SyncError> {
    let options = &ctx.options;
    let _lock = RunLock::acquire(&options.ledger_path).map_err(|source| {
        let path = RunLock::path_for(&options.ledger_path);
        if source.kind() == io::ErrorKind::AlreadyExists {
            SyncError::Locked { path }
        } else {
            SyncError::Lock { path, source }
        }
    })?;

    let ledger = Ledger::load(&options.ledger_path);
    let existing = OutputDocument::load(&options.document_path);
    let catalog = catalog::read_catalog(ctx.source, options.album.as_deref())?;
    let total_albums = catalog.album_count();

    tracing::info!(
        albums = total_albums,
        images = catalog.image_count(),
        cached = ledger.len(),
        backend = ctx.uploader.backend_name(),
        force = options.force,
        "sync started"
    );
    emit(
        events.as_ref(),
        SyncEvent::RunStarted {
            albums: total_albums,
            images: catalog.image_count(),
            backend: ctx.uploader.backend_name(),
            force: options.force,
        },
    );

    let shared = Shared {
        ledger: Mutex::new(ledger),
        in_flight: InFlight::new(),
    };
    let mut report = SyncReport::default();
    let mut incoming = OutputDocument::default();
    let mut album_index = 0;

    for series in &catalog.series {
        let mut published = Vec::new();
        for album in &series.albums {
            if ctx.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            album_index += 1;
            emit(
                events.as_ref(),
                SyncEvent::AlbumStarted {
                    index: album_index,
                    series: series.name.clone(),
                    title: album.title.clone(),
                    image_count: album.images.len() + usize::from(album.cover.is_some()),
                },
            );

            let result = sync_album(ctx, &shared, series, album);
            for image in result.images {
                emit(
                    events.as_ref(),
                    SyncEvent::ImageFinished {
                        slot: image.slot,
                        label: image.label,
                        outcome: image.outcome,
                    },
                );
            }
            let cover = Some(result.document.cover.clone()).filter(|c| !c.is_empty());
            emit(
                events.as_ref(),
                SyncEvent::AlbumFinished {
                    title: album.title.clone(),
                    stats: result.stats,
                    cover,
                },
            );
            tracing::info!(album = %album.title, stats = %result.stats, "album synced");
            report.stats.add(result.stats);

            if result.cancelled {
                report.cancelled = true;
                break;
            }
            published.push(result.document);
            report.albums += 1;

            if options.checkpoint_each_album
                && let Err(e) = lock(&shared.ledger).persist(&options.ledger_path)
            {
                tracing::warn!(error = %e, "ledger checkpoint failed");
            }
        }

        if !published.is_empty() {
            incoming.series.push(DocumentSeries {
                id: series.id.clone(),
                name: series.name.clone(),
                albums: published,
                extra: Map::new(),
            });
        }
        if report.cancelled {
            break;
        }
    }

    if report.cancelled {
        let remaining = total_albums - report.albums;
        tracing::warn!(remaining, "run cancelled, persisting completed work");
        emit(events.as_ref(), SyncEvent::Cancelled { remaining });
    }

    let ledger = shared
        .ledger
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    persist_outputs(&ledger, existing, incoming, options)?;
    tracing::info!(stats = %report.stats, "sync finished");
    Ok(report)
}

/// Write the ledger, then merge `incoming` into the document loaded at the
/// start of the run and write it. Both are attempted even when the first
/// fails; the first error is returned.
fn persist_outputs(
    ledger: &Ledger,
    existing: OutputDocument,
    incoming: OutputDocument,
    options: &SyncOptions,
) -> Result<(), PersistError> {
    let ledger_result = ledger.persist(&options.ledger_path);
    let document_result = document::merge(existing, incoming).save(&options.document_path);

    if let (Err(first), Err(second)) = (&ledger_result, &document_result) {
        tracing::error!(ledger = %first, document = %second, "both output files failed to persist");
    }
    ledger_result.and(document_result)
}

// ============================================================================
// Plan
// ============================================================================

/// What a sync would do for one album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumPlan {
    pub series: String,
    pub album_id: String,
    pub title: String,
    /// Images including an explicit cover.
    pub images: usize,
    /// Images the ledger (or an earlier album of the same run) already covers.
    pub cached: usize,
}

impl AlbumPlan {
    pub fn to_process(&self) -> usize {
        self.images - self.cached
    }
}

/// Report per album how many images a sync would process and reuse. Reads
/// the catalog; downloads, uploads and writes nothing.
pub fn plan(
    source: &dyn CatalogSource,
    ledger: &Ledger,
    options: &SyncOptions,
) -> Result<Vec<AlbumPlan>, SourceFetchError> {
    let catalog = catalog::read_catalog(source, options.album.as_deref())?;
    let mut seen = HashSet::new();
    let mut plans = Vec::with_capacity(catalog.album_count());

    for series in &catalog.series {
        for album in &series.albums {
            let srcs = album
                .cover
                .iter()
                .chain(album.images.iter().map(|i| &i.src));
            let mut images = 0;
            let mut cached = 0;
            for src in srcs {
                images += 1;
                let identity = naming::source_identity(src, options.strip_query_in_identity);
                let in_ledger = !options.force && ledger.lookup(&identity).is_some();
                if !seen.insert(identity) || in_ledger {
                    cached += 1;
                }
            }
            plans.push(AlbumPlan {
                series: series.name.clone(),
                album_id: album.id.clone(),
                title: album.title.clone(),
                images,
                cached,
            });
        }
    }
    Ok(plans)
}
