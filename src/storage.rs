//! File Storage Helpers
//!
//! Snapshot files are replaced atomically: the new contents go to a hidden
//! temporary file next to the target, which is then renamed over it. A crash
//! mid-write leaves the previous snapshot intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PersistenceError;

/// A JSON file holding periodic snapshots of an in-memory store.
///
/// Stores count their mutations in a revision number; the snapshot remembers
/// the last revision it wrote so unchanged state is not rewritten. Writes
/// to one snapshot are serialized, and a revision older than the one on
/// disk is never written over it.
pub struct JsonSnapshot {
    path: PathBuf,
    flushed_revision: AtomicU64,
    /// Held for the duration of a file write only
    write_lock: Mutex<()>,
}

impl JsonSnapshot {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            flushed_revision: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is `None`; so is a file that is not
    /// JSON at all, after it has been copied aside to `<name>.corrupt`.
    pub async fn read(&self) -> Result<Option<serde_json::Value>, PersistenceError> {
        let content = match read_optional(&self.path).await? {
            Some(content) => content,
            None => return Ok(None),
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let backup = self.path.with_extension("corrupt");
                warn!(
                    "Snapshot {:?} is unreadable ({}), starting empty; original kept at {:?}",
                    self.path, e, backup
                );
                if let Err(e) = fs::copy(&self.path, &backup).await {
                    warn!("Failed to keep corrupt snapshot {:?}: {}", backup, e);
                }
                Ok(None)
            }
        }
    }

    /// Whether `revision` has already been written
    pub fn is_flushed(&self, revision: u64) -> bool {
        self.flushed_revision.load(Ordering::Acquire) >= revision
    }

    /// Write `data` as the snapshot of `revision`. Returns `false` without
    /// touching the file if a newer revision has already been written.
    pub async fn write<T: Serialize>(&self, revision: u64, data: &T) -> Result<bool, PersistenceError> {
        let content = serde_json::to_string_pretty(data).map_err(|e| PersistenceError::Encode {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().await;
        let flushed = self.flushed_revision.load(Ordering::Acquire);
        if revision < flushed {
            debug!(
                "Skipping stale snapshot {:?} at revision {} (on disk: {})",
                self.path, revision, flushed
            );
            return Ok(false);
        }

        write_atomic(&self.path, &content).await?;
        self.flushed_revision.store(revision, Ordering::Release);
        debug!("Wrote snapshot {:?} at revision {}", self.path, revision);
        Ok(true)
    }
}

/// Read a file, returning `None` if it does not exist yet
pub async fn read_optional(path: &Path) -> Result<Option<String>, PersistenceError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace `path` with `contents` via temp file + rename
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let (tmp_path, mut file) = create_temp_file(path).await.map_err(write_err)?;
    file.write_all(contents.as_bytes()).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    // Best-effort durability; some filesystems reject fsync
    let _ = file.sync_all().await;
    drop(file);

    if let Err(source) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(write_err(source));
    }

    Ok(())
}

/// Sequence shared by every writer in the process, so concurrent writes to
/// one path never share a temp file
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a fresh `.<name>.tmp-<pid>-<n>` next to `path`
async fn create_temp_file(path: &Path) -> std::io::Result<(PathBuf, fs::File)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());

    loop {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = path.with_file_name(format!(".{}.tmp-{}-{}", name, std::process::id(), n));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}
