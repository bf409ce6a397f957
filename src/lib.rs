//! # portfolio-sync
//!
//! Keeps a photography portfolio's image store in step with its catalog.
//! Albums live in a Notion database; this crate reads them, compresses every
//! referenced image to a size budget, uploads it to an object store and
//! publishes the result as a JSON document the portfolio front end reads.
//!
//! # Architecture: One Incremental Pipeline
//!
//! ```text
//! catalog (Notion)  →  per image: ledger? → download → compress → upload
//!                   →  ledger (processed_images.json)
//!                   →  document (albums.json, merged into the previous one)
//! ```
//!
//! Every uploaded image is recorded in the **ledger**, keyed by the source
//! URL. Later runs reuse recorded artifacts instead of downloading and
//! uploading again, so a run against an unchanged catalog does no network
//! work beyond reading the catalog.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`catalog`] | `CatalogSource` trait, pagination, series grouping, the Notion adapter |
//! | [`ledger`] | Identity → artifact record persisted between runs |
//! | [`imaging`] | Adaptive JPEG compression towards a byte budget |
//! | [`download`] | Source image download behind the `Downloader` trait |
//! | [`storage`] | `StorageBackend` trait, SigV4 remote store, local store, variant URLs |
//! | [`pipeline`] | The run itself: skip/process per image, covers, cancellation, events |
//! | [`document`] | Output document and its pure merge |
//! | [`persist`] | Atomic file writes and the single-run lock |
//! | [`naming`] | Series ids, object keys, image identity |
//! | [`config`] | Layered TOML + environment configuration |
//! | [`types`] | Catalog and artifact types shared across modules |
//! | [`output`] | CLI output formatting for `sync` and `plan` |
//!
//! # Design Decisions
//!
//! ## Catalog First, Then Images
//!
//! The whole catalog, every album's image list included, is read before any
//! image is touched. A content-source failure therefore aborts the run before
//! the ledger or the document can be updated from a partial view.
//!
//! ## Failures Stay Local
//!
//! A download or upload failure skips one image. The image is not recorded,
//! so the next run retries it; the rest of the album is published. Only
//! catalog and persistence failures end a run.
//!
//! ## Variants Without Extra Uploads
//!
//! Display and thumbnail URLs are the canonical URL plus an image-service
//! query string (`x-oss-process` by default). One object per image is
//! uploaded, whatever the number of variants.
//!
//! ## Merge, Never Prune
//!
//! The published document is merged by series and album id. Albums outside
//! the current run (single-album mode, or albums removed from the catalog)
//! keep their last published state.

pub mod catalog;
pub mod config;
pub mod document;
pub mod download;
pub mod imaging;
pub mod ledger;
pub mod naming;
pub mod output;
pub mod persist;
pub mod pipeline;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
