//! # podcast-backup
//!
//! Idempotent, crash-safe archiver for podcast feeds.
//!
//! ## Design Philosophy
//!
//! podcast-backup is designed to be:
//! - **Idempotent** - A second run over an unchanged feed downloads nothing
//! - **Crash-safe** - A final path only ever holds complete content
//! - **Append-only** - Nothing already archived is deleted or overwritten
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! The archive directory is the only state: a non-empty file at the path derived from
//! an entry means that file is done.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podcast_backup::{Archiver, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         destination: "/srv/podcasts".into(),
//!         ..Default::default()
//!     };
//!
//!     let archiver = Archiver::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = archiver.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let feeds = podcast_backup::opml::read_opml("subscriptions.opml".as_ref())?;
//!     let summary = archiver.run(&feeds).await;
//!     println!("{summary}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive run orchestration
pub mod archiver;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Feed model, parsing and pagination
pub mod feed;
/// Shared HTTP client
pub mod http;
/// Deterministic file naming
pub mod naming;
/// OPML subscription lists
pub mod opml;
/// Entry to file target expansion
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Archive directory and atomic writes
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archiver::Archiver;
pub use config::{Config, RetryConfig};
pub use error::{DownloadError, Error, FeedError, Result};
pub use feed::{Entry, FeedPage};
pub use types::{Event, FeedIdentity, FileKind, FileTarget, RunSummary};

/// Run the given feeds until done or until a termination signal arrives
///
/// Returns `None` when interrupted. Dropping the run future aborts every in-flight
/// download; their temp files are removed and final paths are left untouched.
///
/// - **Unix:** listens for SIGTERM and SIGINT.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use podcast_backup::{Archiver, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let archiver = Archiver::new(Config::default())?;
///     let feeds = vec!["https://example.com/feed.xml".to_string()];
///
///     match run_with_shutdown(&archiver, &feeds).await {
///         Some(summary) => println!("{summary}"),
///         None => eprintln!("interrupted"),
///     }
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(archiver: &Archiver, feed_urls: &[String]) -> Option<RunSummary> {
    tokio::select! {
        summary = archiver.run(feed_urls) => Some(summary),
        _ = wait_for_signal() => {
            tracing::warn!("Interrupted, abandoning in-flight downloads");
            None
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            // a failed registration must not look like an interrupt
            tracing::error!(error = %e, "Could not register any signal handlers");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
