//! Durable attachment blob storage.
//!
//! Blobs are written under a single root directory with collision-free
//! names, so concurrent writers need no coordination. A write is staged to
//! a temporary file, fsynced, and renamed into place; a path returned from
//! [`AttachmentStore::store`] is never a partial write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::error::{DevinboxError, Result};

/// Filesystem-backed store for attachment payloads.
pub struct AttachmentStore {
    root: PathBuf,
    /// Per-process monotonic disambiguator, combined with a millisecond
    /// timestamp in every generated name.
    seq: AtomicU64,
}

impl AttachmentStore {
    /// Open the store, creating the root directory (and parents) and
    /// probing that it is writable. Fails loudly otherwise.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| DevinboxError::io(&root, e))?;

        let probe = root.join(".devinbox-write-probe");
        std::fs::write(&probe, b"").map_err(|e| DevinboxError::io(&probe, e))?;
        std::fs::remove_file(&probe).map_err(|e| DevinboxError::io(&probe, e))?;

        Ok(Self {
            root,
            seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` durably under a collision-free name derived from
    /// `filename`. On success the returned path is immediately readable.
    pub async fn store(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = self.disambiguated_name(filename);
        let path = self.root.join(&name);
        let staging = self.root.join(format!(".{name}.tmp"));

        match self.write_durably(&staging, &path, bytes).await {
            Ok(()) => Ok(path),
            Err(e) => {
                // The staging file may or may not exist; clear it quietly.
                let _ = tokio::fs::remove_file(&staging).await;
                Err(e)
            }
        }
    }

    async fn write_durably(&self, staging: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        let wrap = |e: std::io::Error| DevinboxError::AttachmentWrite {
            path: path.to_path_buf(),
            source: e,
        };

        let mut file = tokio::fs::File::create(staging).await.map_err(wrap)?;
        file.write_all(bytes).await.map_err(wrap)?;
        file.sync_all().await.map_err(wrap)?;
        drop(file);

        tokio::fs::rename(staging, path).await.map_err(wrap)
    }

    /// Best-effort blob removal. A missing file is logged, never an error.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "could not remove attachment blob");
        }
    }

    /// Generate a storage name that cannot collide with concurrent writers:
    /// millisecond timestamp, process-wide counter, sanitized filename.
    fn disambiguated_name(&self, filename: &str) -> String {
        let millis = Utc::now().timestamp_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{millis}-{seq}-{}", sanitize_filename(filename))
    }
}

/// Sanitize a declared filename for use on disk.
///
/// Replaces path separators and other unsafe characters with `_` and
/// truncates to 150 characters.
pub fn sanitize_filename(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(150)
        .collect();

    if sanitized.trim_matches(['_', '.']).is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}
