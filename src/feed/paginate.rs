//! Lazy traversal of paged feeds
//!
//! Pages are fetched one at a time, only when the previous one has been consumed, and
//! followed through their RFC 5005 `rel="next"` link. Every URL seen during a traversal
//! (requested and post-redirect) is remembered, so a feed whose links loop back ends
//! instead of spinning forever.

use super::{Entry, FeedPage, parse_feed};
use crate::error::{Error, FeedError, Result};
use crate::http::HttpClient;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashSet;

/// Page-by-page walk over one feed
///
/// Finite and not restartable: once [`next_page`](FeedPaginator::next_page) has
/// returned `None` it keeps returning `None`.
pub struct FeedPaginator {
    client: HttpClient,
    next: Option<String>,
    visited: HashSet<String>,
    pending: Option<Error>,
    pages: usize,
}

impl FeedPaginator {
    /// Start a traversal at `url`
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            next: Some(normalize(url.into())),
            visited: HashSet::new(),
            pending: None,
            pages: 0,
        }
    }

    /// Fetch and parse the next page
    ///
    /// An `Err` ends the traversal: a page that failed to load or parse has no usable
    /// next link, and a cycle is reported once after the last good page.
    pub async fn next_page(&mut self) -> Option<Result<FeedPage>> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        let url = self.next.take()?;
        self.visited.insert(url.clone());

        let fetched = match self.client.fetch_page(&url).await {
            Ok(fetched) => fetched,
            Err(e) => return Some(Err(e)),
        };
        self.visited.insert(fetched.url.clone());

        let page = match parse_feed(&fetched.url, Utc::now(), fetched.body) {
            Ok(page) => page,
            Err(e) => return Some(Err(e)),
        };
        self.pages += 1;

        if let Some(next) = &page.next {
            if self.visited.contains(next) {
                self.pending = Some(FeedError::Cycle { url: next.clone() }.into());
            } else {
                self.next = Some(next.clone());
            }
        }

        Some(Ok(page))
    }

    /// Number of pages fetched and parsed so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}

/// Stream every entry of a feed, oldest page last, in document order
///
/// Errors are logged and end the stream; entries yielded before the error stay valid.
pub fn paginate(client: HttpClient, url: impl Into<String>) -> impl Stream<Item = Entry> {
    let url = url.into();
    let paginator = FeedPaginator::new(client, url.clone());

    stream::unfold(paginator, move |mut paginator| {
        let url = url.clone();
        async move {
            match paginator.next_page().await {
                None => None,
                Some(Ok(page)) => Some((page.entries, paginator)),
                Some(Err(e)) => {
                    tracing::warn!(url = %url, error = %e, "Stopping feed traversal");
                    None
                }
            }
        }
    })
    .flat_map(stream::iter)
}

fn normalize(url: String) -> String {
    match url::Url::parse(&url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url,
    }
}
