//! Traversal of one feed: pages → entries → targets → jobs

use super::Archiver;
use super::job::archive_target;
use super::progress::{Claim, Outcome, RunState};
use crate::feed::FeedPaginator;
use crate::resolver::{
    ResolveOptions, entry_key, feed_identity, resolve, resolve_distinct, resolve_feed,
    resolve_feed_metadata,
};
use crate::types::{Event, FeedIdentity, FileTarget, RunSummary};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

impl Archiver {
    /// Walk every page of `url`, submitting each new target as it is discovered
    ///
    /// Pages are fetched lazily, so downloads of the newest episodes start while older
    /// pages are still being requested.
    pub(super) async fn process_feed(&self, url: &str, state: Arc<RunState>) -> RunSummary {
        let mut summary = RunSummary {
            feeds: 1,
            ..Default::default()
        };
        let options = ResolveOptions::from(self.config.as_ref());

        tracing::info!(url, "Archiving feed");
        self.emit_event(Event::FeedStarted {
            url: url.to_string(),
        });

        let mut paginator = FeedPaginator::new(self.http.clone(), url);
        let mut first = match paginator.next_page().await {
            Some(Ok(page)) => page,
            Some(Err(e)) => {
                tracing::warn!(url, error = %e, "Feed unavailable, skipping it");
                summary.feeds_failed = 1;
                self.emit_event(Event::FeedFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
                return summary;
            }
            None => {
                summary.feeds_failed = 1;
                return summary;
            }
        };

        let identity = feed_identity(url, &first, options.max_filename_bytes);
        tracing::debug!(url, dir = %identity.dir_name, "Resolved feed directory");

        let mut jobs = JoinSet::new();
        let mut seen_enclosures = HashSet::new();

        let feed_targets = resolve_feed(&identity, &first, &options);
        self.submit(feed_targets, url, &state, &mut jobs, &mut summary)
            .await;

        // the first page stays around for meta.json, its entries are walked like the rest
        let mut entries = std::mem::take(&mut first.entries);
        let mut fetched_at = first.fetched_at;
        loop {
            for entry in &entries {
                summary.entries += 1;

                if let Some(enclosure) = entry.primary_enclosure()
                    && !seen_enclosures.insert(enclosure.url.clone())
                {
                    tracing::debug!(
                        url = %enclosure.url,
                        "Enclosure already listed by this feed, ignoring duplicate entry"
                    );
                    continue;
                }

                let key = entry_key(entry);
                let mut targets = resolve(&identity, entry, fetched_at, &options);
                if let Some(taken) = first_taken(&targets, &key, &state).await {
                    tracing::warn!(
                        feed = url,
                        path = ?taken,
                        entry = %key,
                        "Another entry has the same date and title, adding a hash to its names"
                    );
                    targets = resolve_distinct(&identity, entry, fetched_at, &options);
                }
                self.submit(targets, &key, &state, &mut jobs, &mut summary)
                    .await;
            }

            while let Some(finished) = jobs.try_join_next() {
                record(finished, &mut summary);
            }

            match paginator.next_page().await {
                Some(Ok(next)) => {
                    fetched_at = next.fetched_at;
                    entries = next.entries;
                }
                Some(Err(e)) => {
                    tracing::warn!(url, error = %e, "Stopping feed traversal");
                    break;
                }
                None => break,
            }
        }

        if let Some(metadata) = resolve_feed_metadata(&identity, &first, summary.entries, &options)
        {
            self.submit(vec![metadata], url, &state, &mut jobs, &mut summary)
                .await;
        }

        while let Some(finished) = jobs.join_next().await {
            record(finished, &mut summary);
        }

        self.finish_feed(&identity, paginator.pages_fetched(), &summary);
        summary
    }

    /// Drop duplicates and archived targets, spawn a job for the rest
    ///
    /// `owner` is the entry key, or the feed URL for feed-level files.
    async fn submit(
        &self,
        targets: Vec<FileTarget>,
        owner: &str,
        state: &Arc<RunState>,
        jobs: &mut JoinSet<Outcome>,
        summary: &mut RunSummary,
    ) {
        for target in targets {
            match state.claim(&target.path, owner).await {
                Claim::Fresh => {}
                Claim::Duplicate => {
                    tracing::debug!(path = ?target.path, "Target already submitted this run");
                    continue;
                }
                Claim::Conflict { owner: holder } => {
                    tracing::warn!(
                        path = ?target.path,
                        url = %target.origin(),
                        held_by = %holder,
                        "File name already taken by another entry this run, not archiving"
                    );
                    continue;
                }
            }

            if self.store.exists(&target.path).await {
                tracing::debug!(path = ?target.path, "Already archived");
                self.emit_event(Event::Skipped {
                    path: target.path.clone(),
                });
                self.emit_event(state.finish());
                Outcome::Skipped.record(summary);
                continue;
            }

            jobs.spawn(archive_target(self.clone(), target, Arc::clone(state)));
        }
    }

    fn finish_feed(&self, identity: &FeedIdentity, pages: usize, summary: &RunSummary) {
        tracing::info!(
            url = %identity.url,
            name = %identity.dir_name,
            pages,
            entries = summary.entries,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "Feed archived"
        );
        self.emit_event(Event::FeedFinished {
            url: identity.url.clone(),
            name: identity.dir_name.clone(),
            pages,
            entries: summary.entries,
        });
    }
}

/// Path of the first target already reserved by a different entry
async fn first_taken<'a>(
    targets: &'a [FileTarget],
    key: &str,
    state: &RunState,
) -> Option<&'a PathBuf> {
    for target in targets {
        if state.held_by_other(&target.path, key).await {
            return Some(&target.path);
        }
    }
    None
}

fn record(finished: Result<Outcome, tokio::task::JoinError>, summary: &mut RunSummary) {
    match finished {
        Ok(outcome) => outcome.record(summary),
        Err(e) => {
            tracing::error!(error = %e, "Download task panicked or was cancelled");
            summary.failed += 1;
        }
    }
}
