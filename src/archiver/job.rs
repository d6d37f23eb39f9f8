//! A single target: download (or inline write) and commit

use super::Archiver;
use super::progress::{Outcome, RunState};
use crate::error::{DownloadError, Result};
use crate::retry::with_retry;
use crate::store::Committed;
use crate::types::{Event, FileTarget, TargetSource};
use std::path::Path;
use std::sync::Arc;

/// Archive one target and report the outcome
///
/// Errors stop here: they are logged with the source URL and turned into
/// [`Outcome::Failed`] so sibling jobs keep running.
pub(super) async fn archive_target(
    archiver: Archiver,
    target: FileTarget,
    state: Arc<RunState>,
) -> Outcome {
    let result = match &target.source {
        TargetSource::Inline(bytes) => archiver.store.write_bytes(&target.path, bytes).await,
        TargetSource::Remote(url) => archiver.download(url, &target.path).await,
    };

    let outcome = match result {
        Ok(Committed::Written(bytes)) => {
            tracing::info!(
                path = ?target.path,
                kind = %target.kind,
                bytes,
                "Archived"
            );
            archiver.emit_event(Event::Downloaded {
                path: target.path.clone(),
                origin: target.origin().to_string(),
                bytes,
            });
            Outcome::Downloaded(bytes)
        }
        Ok(Committed::AlreadyPresent) => {
            archiver.emit_event(Event::Skipped {
                path: target.path.clone(),
            });
            Outcome::Skipped
        }
        Err(e) => {
            tracing::warn!(
                url = %target.origin(),
                path = ?target.path,
                kind = %target.kind,
                error = %e,
                "Failed to archive"
            );
            archiver.emit_event(Event::Failed {
                path: target.path.clone(),
                origin: target.origin().to_string(),
                error: e.to_string(),
            });
            Outcome::Failed
        }
    };

    archiver.emit_event(state.finish());
    outcome
}

impl Archiver {
    /// Stream `url` into `path`
    ///
    /// Each attempt starts a fresh temp file; a failed attempt drops its
    /// [`PendingWrite`](crate::store::PendingWrite), which removes the partial file.
    async fn download(&self, url: &str, path: &Path) -> Result<Committed> {
        with_retry(self.http.retry_config(), || async move {
            let response = self.http.open(url).await?;
            if let Some(length) = response.content_length() {
                tracing::debug!(url, length, "Downloading");
            }

            let mut pending = self.store.begin_write(path).await?;
            let written = response.copy_to(&mut pending).await?;
            if written == 0 {
                return Err(DownloadError::EmptyBody {
                    url: url.to_string(),
                }
                .into());
            }

            pending.commit().await
        })
        .await
    }
}
