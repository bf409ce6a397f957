//! The output document: the published Series → Album → image tree.
//!
//! This is what the portfolio front end reads. It is rebuilt from the catalog
//! on every run and then merged into the previously persisted document with
//! [`merge`], keyed by series and album ids:
//!
//! - an incoming album replaces the existing album with the same id in place;
//! - new albums and series are appended in catalog order;
//! - albums the current run did not see are left exactly as they were.
//!
//! Fields this crate does not know about (added by hand or by another tool)
//! are kept on series and albums the run does not touch.

use crate::persist::{self, PersistError};
use crate::types::ProcessedArtifact;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default location of the output document, relative to the working directory.
pub const DEFAULT_DOCUMENT_PATH: &str = "data/albums.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub series: Vec<DocumentSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSeries {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub albums: Vec<DocumentAlbum>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAlbum {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub date: String,
    /// Canonical URL of the cover image; empty when the album has none.
    #[serde(default)]
    pub cover: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_thumbnail: Option<String>,
    #[serde(default)]
    pub images: Vec<DocumentImage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Published form of a [`ProcessedArtifact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentImage {
    pub original_url: String,
    pub url: String,
    pub display_url: String,
    pub thumbnail: String,
    pub alt: String,
}

impl From<&ProcessedArtifact> for DocumentImage {
    fn from(a: &ProcessedArtifact) -> Self {
        Self {
            original_url: a.original_url.clone(),
            url: a.url.clone(),
            display_url: a.display_url.clone(),
            thumbnail: a.thumbnail.clone(),
            alt: a.alt.clone(),
        }
    }
}

/// Older documents were written as a bare array of series.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentRepr {
    Wrapped(OutputDocument),
    Bare(Vec<DocumentSeries>),
}

impl OutputDocument {
    pub fn album_count(&self) -> usize {
        self.series.iter().map(|s| s.albums.len()).sum()
    }

    pub fn find_album(&self, album_id: &str) -> Option<&DocumentAlbum> {
        self.series
            .iter()
            .flat_map(|s| &s.albums)
            .find(|a| a.id == album_id)
    }

    /// Load from `path`.
    ///
    /// Missing file → empty document. An unparseable file is renamed to
    /// `<path>.bak` with a warning and an empty document is returned, so the
    /// run can proceed without silently discarding the old content.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "output document unreadable, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str::<DocumentRepr>(&content) {
            Ok(DocumentRepr::Wrapped(doc)) => doc,
            Ok(DocumentRepr::Bare(series)) => Self { series },
            Err(e) => {
                let backup = backup_path(path);
                match std::fs::rename(path, &backup) {
                    Ok(()) => tracing::warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "output document corrupt, moved aside"
                    ),
                    Err(rename_err) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        backup_error = %rename_err,
                        "output document corrupt and could not be backed up"
                    ),
                }
                Self::default()
            }
        }
    }

    /// Atomically write the document to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::write_json_atomic(path, self).map_err(|source| PersistError::Document {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Merge the document assembled by this run into the persisted one.
///
/// Pure: the result depends only on the two inputs. Series keep their
/// position in `existing`; an album that moved to a different series is
/// removed from its old series, and a series left empty by such a move is
/// dropped.
pub fn merge(existing: OutputDocument, incoming: OutputDocument) -> OutputDocument {
    let mut merged = existing;

    for incoming_series in incoming.series {
        let incoming_ids: Vec<&str> = incoming_series.albums.iter().map(|a| a.id.as_str()).collect();

        // Pull moved albums out of the series they used to live in.
        let mut emptied = Vec::new();
        for series in merged.series.iter_mut() {
            if series.id == incoming_series.id {
                continue;
            }
            let before = series.albums.len();
            series.albums.retain(|a| !incoming_ids.contains(&a.id.as_str()));
            if before > 0 && series.albums.is_empty() {
                emptied.push(series.id.clone());
            }
        }
        merged.series.retain(|s| !emptied.contains(&s.id));

        match merged.series.iter_mut().find(|s| s.id == incoming_series.id) {
            Some(target) => {
                target.name = incoming_series.name;
                for album in incoming_series.albums {
                    match target.albums.iter_mut().find(|a| a.id == album.id) {
                        Some(slot) => {
                            let mut extra = std::mem::take(&mut slot.extra);
                            extra.extend(album.extra.clone());
                            *slot = DocumentAlbum { extra, ..album };
                        }
                        None => target.albums.push(album),
                    }
                }
            }
            None => merged.series.push(incoming_series),
        }
    }

    merged
}
