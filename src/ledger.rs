//! Processed-image ledger for incremental runs.
//!
//! Downloading, compressing and uploading an image costs seconds of network
//! and CPU time. The ledger remembers every image that made it to the object
//! store so later runs can reuse the stored artifact instead of redoing the
//! work.
//!
//! # Keys
//!
//! Entries are keyed by the image's *identity*: its source URL, by default
//! with query string and fragment stripped (see
//! [`naming::source_identity`](crate::naming::source_identity)). The content
//! source hands out signed URLs that change on every fetch; the path does not.
//!
//! # Invariants
//!
//! - An entry is only added after a confirmed upload.
//! - Entries are never edited in place; force runs overwrite them whole.
//! - The file on disk is replaced atomically, so it is never half-written.
//!
//! # Storage
//!
//! A pretty-printed JSON object `{ identity: artifact }`, sorted by key so two
//! identical runs produce byte-identical files. A missing or unparseable file
//! loads as an empty ledger: the worst case is redoing work, never a failed
//! run.

use crate::persist::{self, PersistError};
use crate::types::ProcessedArtifact;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default location of the ledger file, relative to the working directory.
pub const DEFAULT_LEDGER_PATH: &str = "data/processed_images.json";

/// Identity → artifact map persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: BTreeMap<String, ProcessedArtifact>,
    /// Identities recorded since this ledger was loaded. Never serialized.
    #[serde(skip)]
    recorded: HashSet<String>,
}

impl Ledger {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from `path`. Missing file → empty. Unreadable or corrupt file →
    /// empty with a warning.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::empty(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ledger unreadable, starting empty");
                return Self::empty();
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(ledger) => {
                tracing::debug!(path = %path.display(), entries = ledger.len(), "ledger loaded");
                ledger
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ledger corrupt, starting empty");
                Self::empty()
            }
        }
    }

    /// Atomically write the ledger to `path`.
    pub fn persist(&self, path: &Path) -> Result<(), PersistError> {
        persist::write_json_atomic(path, self).map_err(|source| PersistError::Ledger {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn lookup(&self, identity: &str) -> Option<&ProcessedArtifact> {
        self.entries.get(identity)
    }

    /// Insert or overwrite the artifact for `identity`.
    pub fn record(&mut self, identity: impl Into<String>, artifact: ProcessedArtifact) {
        let identity = identity.into();
        self.recorded.insert(identity.clone());
        self.entries.insert(identity, artifact);
    }

    /// Whether `identity` was recorded since load. Force runs use this to
    /// reuse an image referenced twice in the same run.
    pub fn recorded_this_run(&self, identity: &str) -> bool {
        self.recorded.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
