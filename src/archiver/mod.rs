//! Archive run orchestration
//!
//! The [`Archiver`] owns the run context (config, HTTP client, archive store, event
//! channel) and drives the pipeline:
//! - [`feed_task`] - per-feed traversal, target resolution and dedup
//! - [`job`] - one download or inline write per target
//! - [`progress`] - run-wide dedup set and progress counters

mod feed_task;
mod job;
mod progress;


use crate::config::Config;
use crate::error::Result;
use crate::http::HttpClient;
use crate::store::ArchiveStore;
use crate::types::{Event, RunSummary};
use futures::stream::{self, StreamExt};
use progress::RunState;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Buffered events per subscriber before slow receivers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Archive runner (cloneable, all fields are shared)
#[derive(Clone)]
pub struct Archiver {
    /// Run configuration
    pub(crate) config: Arc<Config>,
    /// HTTP client with the global connection limit
    pub(crate) http: HttpClient,
    /// Archive directory
    pub(crate) store: ArchiveStore,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl Archiver {
    /// Create the run context
    ///
    /// Validates the config, creates the destination directory and checks that it is
    /// writable. Every error returned here is a setup error.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = ArchiveStore::open(&config.destination)?;
        let http = HttpClient::new(&config)?;

        // events are only observed, so a run without subscribers is fine
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            destination = %store.root().display(),
            max_concurrent_downloads = config.max_concurrent_downloads,
            max_concurrent_feeds = config.max_concurrent_feeds,
            "Archiver initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            http,
            store,
            event_tx,
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Archive every feed, at most `max_concurrent_feeds` at a time
    ///
    /// Feed and target failures are counted in the summary, never returned.
    pub async fn run(&self, feed_urls: &[String]) -> RunSummary {
        let state = Arc::new(RunState::default());
        tracing::info!(feeds = feed_urls.len(), "Starting archive run");

        let summaries: Vec<RunSummary> = stream::iter(feed_urls)
            .map(|url| {
                let state = Arc::clone(&state);
                async move { self.process_feed(url, state).await }
            })
            .buffer_unordered(self.config.max_concurrent_feeds)
            .collect()
            .await;

        let mut total = RunSummary::default();
        for summary in &summaries {
            total.merge(summary);
        }

        tracing::info!(summary = %total, "Archive run finished");
        total
    }

    /// Archive a single feed
    pub async fn archive_feed(&self, url: &str) -> RunSummary {
        self.process_feed(url, Arc::new(RunState::default())).await
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // no subscribers is not an error
        self.event_tx.send(event).ok();
    }
}
