//! Error types for podcast-backup
//!
//! Errors fall into four groups, and only the first one is fatal:
//! - setup errors (unreadable OPML, invalid config, unwritable destination)
//! - feed-level errors (unreachable feed, malformed XML, pagination cycles)
//! - target-level errors (failed download, failed write)
//! - naming degradations, which are only logged and never become an `Error`

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for podcast-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podcast-backup
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "destination")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Http {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Feed document could not be used
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Invalid OPML subscription list
    #[error("invalid OPML: {0}")]
    Opml(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Feed-level errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// Document is neither valid RSS nor valid Atom
    #[error("failed to parse {url} as RSS ({rss}) or Atom ({atom})")]
    Parse {
        /// Page URL
        url: String,
        /// RSS parser message
        rss: String,
        /// Atom parser message
        atom: String,
    },

    /// A next-page link points back to a page already visited
    #[error("pagination cycle at {url}")]
    Cycle {
        /// The repeated page URL
        url: String,
    },
}

/// Target-level download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Server returned a body with no bytes
    #[error("empty response body from {url}")]
    EmptyBody {
        /// Requested URL
        url: String,
    },

    /// Server sent nothing for longer than the idle timeout
    #[error("no data from {url} for {idle:?}")]
    Stalled {
        /// Requested URL
        url: String,
        /// The idle timeout that expired
        idle: std::time::Duration,
    },

    /// Temp file could not be renamed into place
    #[error("failed to commit {temp_path} to {final_path}: {reason}")]
    Commit {
        /// The temporary file
        temp_path: PathBuf,
        /// Where it should have ended up
        final_path: PathBuf,
        /// The reason the rename failed
        reason: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a config key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_keeps_key_and_message() {
        let err = Error::config("max_concurrent_downloads", "must be at least 1");
        match &err {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("max_concurrent_downloads"));
            }
            other => panic!("expected Config, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "configuration error: must be at least 1"
        );
    }

    #[test]
    fn nested_errors_render_with_their_context() {
        let err: Error = DownloadError::EmptyBody {
            url: "https://cdn.example.com/ep1.mp3".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "download error: empty response body from https://cdn.example.com/ep1.mp3"
        );

        let err: Error = FeedError::Cycle {
            url: "https://example.com/feed?page=1".into(),
        }
        .into();
        assert!(err.to_string().contains("pagination cycle"));
    }

    #[test]
    fn stalled_download_names_url_and_timeout() {
        let err: Error = DownloadError::Stalled {
            url: "https://cdn.example.com/ep1.mp3".into(),
            idle: std::time::Duration::from_secs(60),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "download error: no data from https://cdn.example.com/ep1.mp3 for 60s"
        );
    }

    #[test]
    fn http_error_names_status_and_url() {
        let err = Error::Http {
            status: 404,
            url: "https://example.com/missing.mp3".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404 for https://example.com/missing.mp3");
    }
}
