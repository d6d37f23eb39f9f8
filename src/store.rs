//! On-disk archive layout and crash-safe writes
//!
//! The archive directory is its own ledger: a non-empty file at the expected path means
//! the target is done. Content is always streamed into `{name}.part` next to the final
//! path and renamed into place only after it has been flushed and synced, so a final
//! path never holds partial content. Nothing in this module deletes a final file.

use crate::error::{DownloadError, Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Suffix of in-progress files
pub const TEMP_SUFFIX: &str = ".part";

/// Name of the throwaway file used to check that the root is writable
const WRITE_CHECK_FILE: &str = ".podcast-backup-write-test";

/// Result of committing a write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Committed {
    /// The file was renamed into place
    Written(u64),
    /// Another writer got there first; the existing file was kept
    AlreadyPresent,
}

/// Root of the archive
#[derive(Clone, Debug)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    /// Open (and create if missing) the archive root
    ///
    /// # Errors
    /// Returns a setup error if the directory cannot be created or written to.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::config(
                "destination",
                format!("cannot create {}: {}", root.display(), e),
            )
        })?;

        let check = root.join(WRITE_CHECK_FILE);
        std::fs::write(&check, b"ok").map_err(|e| {
            Error::config(
                "destination",
                format!("{} is not writable: {}", root.display(), e),
            )
        })?;
        if let Err(e) = std::fs::remove_file(&check) {
            tracing::warn!(path = %check.display(), error = %e, "Could not remove write check file");
        }

        Ok(Self { root })
    }

    /// Archive root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a path relative to the root
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// True if the target is already archived: present, a regular file, non-empty
    pub async fn exists(&self, relative: &Path) -> bool {
        is_complete(&self.resolve(relative)).await
    }

    /// Start writing `relative`; content only becomes visible on [`PendingWrite::commit`]
    pub async fn begin_write(&self, relative: &Path) -> Result<PendingWrite> {
        let final_path = self.resolve(relative);
        let file_name = final_path
            .file_name()
            .ok_or_else(|| Error::Other(format!("not a file path: {}", final_path.display())))?
            .to_string_lossy()
            .into_owned();

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = final_path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));
        // a leftover from an interrupted run is simply truncated
        let file = File::create(&temp_path).await?;

        Ok(PendingWrite {
            file: Some(BufWriter::new(file)),
            temp_path,
            final_path,
            written: 0,
            committed: false,
        })
    }

    /// Write a whole in-memory buffer atomically
    pub async fn write_bytes(&self, relative: &Path, bytes: &[u8]) -> Result<Committed> {
        let mut pending = self.begin_write(relative).await?;
        pending.write(bytes).await?;
        pending.commit().await
    }
}

/// A write in progress
///
/// Dropping it without calling [`commit`](PendingWrite::commit) removes the temp file.
pub struct PendingWrite {
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    committed: bool,
}

impl PendingWrite {
    /// Append bytes to the temp file
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Other("write after close".to_string()))?;
        file.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Temp file location
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush, sync and rename into place
    ///
    /// If the final path was completed by someone else in the meantime, it is left
    /// untouched and the temp file is discarded.
    pub async fn commit(mut self) -> Result<Committed> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.get_mut().sync_all().await?;
        }

        if is_complete(&self.final_path).await {
            tracing::debug!(
                path = %self.final_path.display(),
                "Target appeared during download, keeping existing file"
            );
            return Ok(Committed::AlreadyPresent);
        }

        tokio::fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|e| DownloadError::Commit {
                temp_path: self.temp_path.clone(),
                final_path: self.final_path.clone(),
                reason: e.to_string(),
            })?;
        self.committed = true;

        Ok(Committed::Written(self.written))
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // close before removing, Windows refuses to delete open files
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.temp_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %self.temp_path.display(),
                error = %e,
                "Could not remove temp file"
            );
        }
    }
}

async fn is_complete(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}
