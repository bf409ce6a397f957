//! Content catalog: which albums exist and which images they hold.
//!
//! The catalog lives in an external content source (a Notion database in
//! production). [`CatalogSource`] hides the API; this module adds what every
//! source needs on top:
//!
//! - [`collect_pages`] drives cursor pagination to completion;
//! - [`group_into_series`] folds flat album records into [`Series`] by slug;
//! - [`read_catalog`] fetches every album's images up front, so processing
//!   never starts from a partial catalog.

pub mod notion;

pub use notion::{NotionCatalog, PropertyNames};

use crate::naming;
use crate::types::{Album, Catalog, ImageRef, Series};
use thiserror::Error;

/// Fallback series name for albums without one.
pub const UNCATEGORIZED_SERIES: &str = "Uncategorized";
/// Fallback title for albums without one.
pub const UNTITLED_ALBUM: &str = "Untitled Album";

/// Failure reading the catalog. Fatal for the run.
#[derive(Error, Debug)]
pub enum SourceFetchError {
    #[error("request for {context} failed: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("content source rejected credentials for {context} (HTTP {status})")]
    Auth { context: String, status: u16 },
    #[error("content source returned HTTP {status} for {context}: {body}")]
    Status {
        context: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response for {context}: {message}")]
    Malformed { context: String, message: String },
}

/// Read access to the content catalog.
///
/// `Sync` so a run context holding it can be shared with the worker pool.
pub trait CatalogSource: Sync {
    /// All series with album metadata, in source order. Album image lists are
    /// left empty.
    fn fetch_catalog(&self) -> Result<Vec<Series>, SourceFetchError>;

    /// Images of one album, in source order.
    fn fetch_album_images(&self, album_id: &str) -> Result<Vec<ImageRef>, SourceFetchError>;

    /// One album wrapped in its series, image list left empty.
    fn fetch_album(&self, album_id: &str) -> Result<Series, SourceFetchError>;
}

/// Album metadata as mapped from one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRecord {
    pub id: String,
    pub series_name: String,
    pub title: String,
    pub location: String,
    pub date: String,
    pub cover_url: Option<String>,
}

impl AlbumRecord {
    pub fn into_album(self) -> Album {
        Album {
            dir_name: naming::dir_segment(&self.title),
            id: self.id,
            title: self.title,
            location: self.location,
            date: self.date,
            cover: self.cover_url,
            images: Vec::new(),
        }
    }
}

/// Group records into series keyed by [`naming::series_id`].
///
/// Series appear in order of first appearance and keep the first name seen;
/// albums keep source order within their series.
pub fn group_into_series(records: Vec<AlbumRecord>) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();
    for record in records {
        let id = naming::series_id(&record.series_name);
        match series.iter_mut().find(|s| s.id == id) {
            Some(existing) => existing.albums.push(record.into_album()),
            None => series.push(Series {
                id,
                name: record.series_name.clone(),
                albums: vec![record.into_album()],
            }),
        }
    }
    series
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Call `fetch` with successive cursors until the source reports no more
/// pages, concatenating items in order.
pub fn collect_pages<T, F>(context: &str, mut fetch: F) -> Result<Vec<T>, SourceFetchError>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, SourceFetchError>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = fetch(cursor.as_deref())?;
        items.extend(page.items);
        if !page.has_more {
            return Ok(items);
        }
        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            Some(_) => {
                return Err(SourceFetchError::Malformed {
                    context: context.to_string(),
                    message: "pagination cursor did not advance".to_string(),
                });
            }
            None => {
                return Err(SourceFetchError::Malformed {
                    context: context.to_string(),
                    message: "has_more without next_cursor".to_string(),
                });
            }
        }
    }
}

/// Read the full catalog, every album's images included.
///
/// With `album_filter`, only that album is read (through
/// [`CatalogSource::fetch_album`]). Any source error aborts the read.
pub fn read_catalog(
    source: &dyn CatalogSource,
    album_filter: Option<&str>,
) -> Result<Catalog, SourceFetchError> {
    let mut series = match album_filter {
        Some(album_id) => vec![source.fetch_album(album_id)?],
        None => source.fetch_catalog()?,
    };

    for s in series.iter_mut() {
        for album in s.albums.iter_mut() {
            album.images = source.fetch_album_images(&album.id)?;
            tracing::debug!(album = %album.title, images = album.images.len(), "album images read");
        }
    }

    let catalog = Catalog { series };
    tracing::info!(
        series = catalog.series.len(),
        albums = catalog.album_count(),
        images = catalog.image_count(),
        "catalog read"
    );
    Ok(catalog)
}
