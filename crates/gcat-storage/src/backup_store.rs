//! Write-once backup documents, addressed by the digest of their contents.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::write_new_file;

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Where a backup document landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBackup {
    pub digest: String,
    /// Relative to the store root.
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub byte_size: usize,
    /// An identical document was already on disk.
    pub reused: bool,
}

/// Backup directory laid out as `<YYYYMMDD_HHMMSS>/<label>/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, captured_at: DateTime<Utc>, label: &str, digest: &str) -> PathBuf {
        PathBuf::from(captured_at.format("%Y%m%d_%H%M%S").to_string())
            .join(label)
            .join(format!("{digest}.json"))
    }

    /// Documents are never overwritten; a second identical `put` reuses the
    /// existing file.
    pub fn put_document(
        &self,
        captured_at: DateTime<Utc>,
        label: &str,
        document: &[u8],
    ) -> anyhow::Result<StoredBackup> {
        let digest = content_digest(document);
        let relative_path = self.document_path(captured_at, label, &digest);
        let path = self.root.join(&relative_path);
        let mut stored = StoredBackup {
            digest,
            relative_path,
            path,
            byte_size: document.len(),
            reused: true,
        };
        if stored.path.exists() {
            debug!(path = %stored.path.display(), "backup document already stored");
            return Ok(stored);
        }

        let dir = stored.path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating backup directory {}", dir.display()))?;
        stored.reused = !publish(&dir, &stored.path, document)?;
        Ok(stored)
    }
}

/// Stage `bytes` in `dir` and rename onto `target`. `Ok(false)` when another
/// writer published the same document first.
fn publish(dir: &Path, target: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let staging = dir.join(format!(".{}.staging", Uuid::new_v4()));
    write_new_file(&staging, bytes)?;
    match fs::rename(&staging, target) {
        Ok(()) => Ok(true),
        Err(err) => {
            let _ = fs::remove_file(&staging);
            if err.kind() == ErrorKind::AlreadyExists {
                Ok(false)
            } else {
                Err(err).with_context(|| format!("publishing backup {}", target.display()))
            }
        }
    }
}
