//! Core types and events for podcast-backup

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A feed as it appears on disk: its URL plus the directory it is archived into
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedIdentity {
    /// Subscription URL (the first page)
    pub url: String,
    /// Sanitized directory name under the archive root
    pub dir_name: String,
}

/// What a file target holds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Audio enclosure
    Audio,
    /// Video enclosure
    Video,
    /// Any other enclosure (PDF, alternate format of unknown type)
    Attachment,
    /// Podcasting 2.0 transcript
    Transcript,
    /// Podcasting 2.0 chapters file
    Chapters,
    /// Feed cover image
    Cover,
    /// Raw copy of the first feed page
    FeedSnapshot,
    /// Episode description
    Shownotes,
    /// Parsed entry as JSON
    Metadata,
}

impl FileKind {
    /// Lowercase label used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Audio => "audio",
            FileKind::Video => "video",
            FileKind::Attachment => "attachment",
            FileKind::Transcript => "transcript",
            FileKind::Chapters => "chapters",
            FileKind::Cover => "cover",
            FileKind::FeedSnapshot => "feed_snapshot",
            FileKind::Shownotes => "shownotes",
            FileKind::Metadata => "metadata",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of a target come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetSource {
    /// Fetched over HTTP
    Remote(String),
    /// Already in memory (feed snapshot, shownotes, metadata)
    Inline(Arc<[u8]>),
}

/// One file to archive: source, final location and kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTarget {
    /// Where the content comes from
    pub source: TargetSource,
    /// Final path, relative to the archive root
    pub path: PathBuf,
    /// Kind of resource
    pub kind: FileKind,
}

impl FileTarget {
    /// Target fetched from `url`
    pub fn remote(url: impl Into<String>, path: PathBuf, kind: FileKind) -> Self {
        Self {
            source: TargetSource::Remote(url.into()),
            path,
            kind,
        }
    }

    /// Target written from bytes already in memory
    pub fn inline(bytes: impl Into<Arc<[u8]>>, path: PathBuf, kind: FileKind) -> Self {
        Self {
            source: TargetSource::Inline(bytes.into()),
            path,
            kind,
        }
    }

    /// Remote URL, if any
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            TargetSource::Remote(url) => Some(url),
            TargetSource::Inline(_) => None,
        }
    }

    /// Human-readable origin for logs (`inline` for in-memory content)
    pub fn origin(&self) -> &str {
        self.url().unwrap_or("inline")
    }
}

/// Event emitted during an archive run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Started traversing a feed
    FeedStarted {
        /// Subscription URL
        url: String,
    },

    /// Finished traversing a feed
    FeedFinished {
        /// Subscription URL
        url: String,
        /// Directory name under the archive root
        name: String,
        /// Number of pages fetched
        pages: usize,
        /// Number of entries seen
        entries: usize,
    },

    /// The first page of a feed could not be fetched or parsed
    FeedFailed {
        /// Subscription URL
        url: String,
        /// Error message
        error: String,
    },

    /// Target already present in the archive
    Skipped {
        /// Final path
        path: PathBuf,
    },

    /// Target written to the archive
    Downloaded {
        /// Final path
        path: PathBuf,
        /// Source URL or `inline`
        origin: String,
        /// Bytes written
        bytes: u64,
    },

    /// Target could not be archived
    Failed {
        /// Final path
        path: PathBuf,
        /// Source URL or `inline`
        origin: String,
        /// Error message
        error: String,
    },

    /// Overall progress; `discovered` grows while feeds are still being paginated
    Progress {
        /// Targets finished (skipped, downloaded or failed)
        processed: u64,
        /// Targets discovered so far
        discovered: u64,
    },
}

/// Final counts of an archive run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Feeds attempted
    pub feeds: usize,
    /// Feeds whose first page failed
    pub feeds_failed: usize,
    /// Entries seen across all feeds and pages
    pub entries: usize,
    /// Targets already present
    pub skipped: u64,
    /// Targets written this run
    pub downloaded: u64,
    /// Targets that failed
    pub failed: u64,
    /// Bytes written this run
    pub bytes: u64,
}

impl RunSummary {
    /// Total number of targets handled
    pub fn targets(&self) -> u64 {
        self.skipped + self.downloaded + self.failed
    }

    /// Fold another (per-feed) summary into this one
    pub fn merge(&mut self, other: &RunSummary) {
        self.feeds += other.feeds;
        self.feeds_failed += other.feeds_failed;
        self.entries += other.entries;
        self.skipped += other.skipped;
        self.downloaded += other.downloaded;
        self.failed += other.failed;
        self.bytes += other.bytes;
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} feeds ({} failed), {} entries: {} downloaded ({:.1} MiB), {} already archived, {} failed",
            self.feeds,
            self.feeds_failed,
            self.entries,
            self.downloaded,
            self.bytes as f64 / (1024.0 * 1024.0),
            self.skipped,
            self.failed
        )
    }
}
