//! Crash-safe file writes and the single-run lock.
//!
//! The ledger and the output document are the only state that survives a run.
//! Both are written with [`write_atomic`]: the new content goes to a sibling
//! temp file, is flushed to disk, then renamed over the target. Readers see
//! either the old file or the new one, never a torn write.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to write one of the run's durable files. Fatal for the run.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to write ledger {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Atomically replace `path` with `contents`, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = dir.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Exclusive lock held for the duration of a run.
///
/// Created next to the ledger as `<ledger>.lock` with `create_new`, so a
/// second run against the same ledger fails fast. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Lock file path for a ledger path.
    pub fn path_for(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        ledger_path.with_file_name(name)
    }

    /// Acquire the lock. Fails with `AlreadyExists` when another run holds it.
    pub fn acquire(ledger_path: &Path) -> io::Result<Self> {
        let path = Self::path_for(ledger_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
