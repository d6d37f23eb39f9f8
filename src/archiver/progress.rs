//! Run-wide bookkeeping shared by all feeds of one run

use crate::types::{Event, RunSummary};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// What happened to one target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Already in the archive
    Skipped,
    /// Written this run, with its size
    Downloaded(u64),
    /// Gave up on it
    Failed,
}

impl Outcome {
    /// Add this outcome to a summary
    pub(crate) fn record(self, summary: &mut RunSummary) {
        match self {
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Downloaded(bytes) => {
                summary.downloaded += 1;
                summary.bytes += bytes;
            }
            Outcome::Failed => summary.failed += 1,
        }
    }
}

/// Result of reserving a path
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// First time this run
    Fresh,
    /// Already reserved by the same owner
    Duplicate,
    /// Already reserved by someone else
    Conflict {
        /// The owner holding the path
        owner: String,
    },
}

/// Paths handed out during the run, who asked for them, and progress counters
#[derive(Default)]
pub(crate) struct RunState {
    submitted: Mutex<HashMap<PathBuf, String>>,
    discovered: AtomicU64,
    processed: AtomicU64,
}

impl RunState {
    /// Reserve `path` for `owner` (an entry key or a feed URL)
    pub(crate) async fn claim(&self, path: &Path, owner: &str) -> Claim {
        match self.submitted.lock().await.entry(path.to_path_buf()) {
            Entry::Vacant(slot) => {
                slot.insert(owner.to_string());
                self.discovered.fetch_add(1, Ordering::Relaxed);
                Claim::Fresh
            }
            Entry::Occupied(held) if held.get() == owner => Claim::Duplicate,
            Entry::Occupied(held) => Claim::Conflict {
                owner: held.get().clone(),
            },
        }
    }

    /// True if `path` is reserved by anyone other than `owner`
    pub(crate) async fn held_by_other(&self, path: &Path, owner: &str) -> bool {
        self.submitted
            .lock()
            .await
            .get(path)
            .is_some_and(|held| held != owner)
    }

    /// Count one finished target and return the matching progress event
    pub(crate) fn finish(&self) -> Event {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        Event::Progress {
            processed,
            discovered: self.discovered.load(Ordering::Relaxed),
        }
    }
}
