//! Feed documents and episode entries
//!
//! Feeds are parsed as RSS 2.0 first and as Atom if that fails. Both formats end up
//! in the same explicit [`FeedPage`] / [`Entry`] structures, so the rest of the crate
//! never inspects parser-specific types. Every optional field documents what happens
//! when a feed omits it.
//!
//! Recognized RSS extensions: iTunes (`itunes:image`, `itunes:author`,
//! `itunes:summary`), Podcasting 2.0 (`podcast:transcript`, `podcast:chapters`,
//! `podcast:alternateEnclosure`) and `atom:link` for pagination and attachments.

mod paginate;

pub use paginate::{FeedPaginator, paginate};

use crate::error::{FeedError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Namespace URI of the Podcasting 2.0 extensions
const PODCAST_NAMESPACE: &str = "https://podcastindex.org/namespace/1.0";

/// Syntax a page was parsed as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// RSS 2.0
    Rss,
    /// Atom 1.0
    Atom,
}

/// One parsed feed document
#[derive(Clone, Debug)]
pub struct FeedPage {
    /// URL the page was served from (after redirects)
    pub url: String,
    /// When the page was fetched; stands in for missing publish dates
    pub fetched_at: DateTime<Utc>,
    /// Detected syntax
    pub format: FeedFormat,
    /// Feed title; absent → the directory is named after the URL
    pub title: Option<String>,
    /// Feed description
    pub description: Option<String>,
    /// Website of the podcast
    pub link: Option<String>,
    /// Author / owner
    pub author: Option<String>,
    /// Cover image URL; absent → no cover file
    pub image: Option<String>,
    /// Next (older) page, absolute; absent → last page
    pub next: Option<String>,
    /// Entries in document order
    pub entries: Vec<Entry>,
    /// The document exactly as received
    pub raw: Arc<[u8]>,
}

/// One episode
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Entry {
    /// RSS `guid` / Atom `id`; absent → identity rests on the enclosure URL
    pub guid: Option<String>,
    /// Title; absent → guid, then enclosure file name, then `untitled`
    pub title: Option<String>,
    /// Publish date; absent or unparseable → fetch time of the page
    pub published: Option<DateTime<Utc>>,
    /// Shownotes (HTML or text); absent → no shownotes file
    pub description: Option<String>,
    /// Episode web page
    pub link: Option<String>,
    /// Media files, primary first
    pub enclosures: Vec<Enclosure>,
    /// Transcript links
    pub transcripts: Vec<Transcript>,
    /// Chapters file link
    pub chapters: Option<ChaptersLink>,
    /// Supplementary resources linked from the entry (PDFs, related files)
    pub attachments: Vec<Attachment>,
    /// Episode artwork URL (kept in metadata only)
    pub image: Option<String>,
}

/// A media file attached to an entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Enclosure {
    /// Absolute URL
    pub url: String,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Declared length in bytes
    pub length: Option<u64>,
}

/// A transcript link
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transcript {
    /// Absolute URL
    pub url: String,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Language code
    pub language: Option<String>,
}

/// A supplementary resource linked from an entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Absolute URL
    pub url: String,
    /// Declared MIME type
    pub mime_type: Option<String>,
    /// Link title
    pub title: Option<String>,
}

/// A chapters file link
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChaptersLink {
    /// Absolute URL
    pub url: String,
    /// Declared MIME type
    pub mime_type: Option<String>,
}

impl Entry {
    /// The first enclosure, if any
    pub fn primary_enclosure(&self) -> Option<&Enclosure> {
        self.enclosures.first()
    }

    /// Title after applying the documented fallbacks
    pub fn display_title(&self) -> String {
        non_empty(self.title.as_deref())
            .or_else(|| non_empty(self.guid.as_deref()))
            .map(str::to_string)
            .or_else(|| {
                self.primary_enclosure()
                    .and_then(|e| crate::naming::url_file_stem(&e.url))
            })
            .unwrap_or_else(|| crate::naming::UNTITLED.to_string())
    }
}

/// Parse a fetched document as RSS, falling back to Atom
///
/// # Errors
/// Returns [`FeedError::Parse`] when the document is neither.
pub fn parse_feed(url: &str, fetched_at: DateTime<Utc>, raw: Vec<u8>) -> Result<FeedPage> {
    let raw: Arc<[u8]> = raw.into();

    match rss::Channel::read_from(&raw[..]) {
        Ok(channel) => {
            let page = rss_page(url, fetched_at, &channel, raw.clone());
            tracing::debug!(url, entries = page.entries.len(), "Parsed page as RSS");
            Ok(page)
        }
        Err(rss_err) => match atom_syndication::Feed::read_from(&raw[..]) {
            Ok(feed) => {
                let page = atom_page(url, fetched_at, &feed, raw.clone());
                tracing::debug!(url, entries = page.entries.len(), "Parsed page as Atom");
                Ok(page)
            }
            Err(atom_err) => Err(FeedError::Parse {
                url: url.to_string(),
                rss: rss_err.to_string(),
                atom: atom_err.to_string(),
            }
            .into()),
        },
    }
}

fn rss_page(url: &str, fetched_at: DateTime<Utc>, channel: &rss::Channel, raw: Arc<[u8]>) -> FeedPage {
    let itunes = channel.itunes_ext();
    let podcast_prefix = podcast_prefix(channel);

    let image = channel
        .image()
        .map(|image| image.url().to_string())
        .or_else(|| itunes.and_then(|i| i.image()).map(str::to_string))
        .filter(|u| !u.trim().is_empty())
        .map(|u| absolutize(url, &u));

    let next = channel
        .atom_ext()
        .map(|atom| next_link(url, atom.links()))
        .unwrap_or_default();

    let entries = channel
        .items()
        .iter()
        .map(|item| rss_entry(url, item, &podcast_prefix))
        .collect();

    FeedPage {
        url: url.to_string(),
        fetched_at,
        format: FeedFormat::Rss,
        title: non_empty(Some(channel.title())).map(str::to_string),
        description: non_empty(Some(channel.description())).map(str::to_string),
        link: non_empty(Some(channel.link())).map(str::to_string),
        author: itunes
            .and_then(|i| i.author())
            .or(channel.managing_editor())
            .map(str::to_string),
        image,
        next,
        entries,
        raw,
    }
}

fn rss_entry(base: &str, item: &rss::Item, podcast_prefix: &str) -> Entry {
    let mut enclosures: Vec<Enclosure> = item
        .enclosure()
        .filter(|enc| !enc.url().trim().is_empty())
        .map(|enc| Enclosure {
            url: absolutize(base, enc.url()),
            mime_type: non_empty(Some(enc.mime_type())).map(str::to_string),
            length: enc.length().trim().parse::<u64>().ok(),
        })
        .into_iter()
        .collect();

    let mut transcripts = Vec::new();
    let mut chapters = None;

    if let Some(podcast) = item.extensions().get(podcast_prefix) {
        for ext in podcast.get("transcript").into_iter().flatten() {
            if let Some(href) = ext.attrs().get("url") {
                transcripts.push(Transcript {
                    url: absolutize(base, href),
                    mime_type: ext.attrs().get("type").cloned(),
                    language: ext.attrs().get("language").cloned(),
                });
            }
        }

        chapters = podcast
            .get("chapters")
            .and_then(|list| list.first())
            .and_then(|ext| {
                ext.attrs().get("url").map(|href| ChaptersLink {
                    url: absolutize(base, href),
                    mime_type: ext.attrs().get("type").cloned(),
                })
            });

        for alternate in podcast.get("alternateEnclosure").into_iter().flatten() {
            let mime_type = alternate.attrs().get("type").cloned();
            let length = alternate
                .attrs()
                .get("length")
                .and_then(|l| l.trim().parse::<u64>().ok());
            // only the first source of an alternate is needed, the others are mirrors
            let source = alternate
                .children()
                .iter()
                .find(|(name, _)| name.as_str() == "source" || name.ends_with(":source"))
                .and_then(|(_, sources)| sources.first())
                .and_then(|source| source.attrs().get("uri"));
            if let Some(uri) = source {
                let url = absolutize(base, uri);
                if !enclosures.iter().any(|e| e.url == url) {
                    enclosures.push(Enclosure {
                        url,
                        mime_type,
                        length,
                    });
                }
            }
        }
    }

    let attachments = item
        .atom_ext()
        .map(|atom| attachment_links(base, atom.links(), &enclosures))
        .unwrap_or_default();

    let published = item.pub_date().and_then(parse_rss_date);
    if published.is_none()
        && let Some(raw_date) = item.pub_date()
    {
        tracing::debug!(date = raw_date, "Unparseable pubDate");
    }

    Entry {
        guid: item.guid().map(|g| g.value().to_string()),
        title: item.title().map(str::to_string),
        published,
        description: item
            .content()
            .or(item.description())
            .or_else(|| item.itunes_ext().and_then(|i| i.summary()))
            .map(str::to_string),
        link: item.link().map(str::to_string),
        enclosures,
        transcripts,
        chapters,
        attachments,
        image: item
            .itunes_ext()
            .and_then(|i| i.image())
            .map(|u| absolutize(base, u)),
    }
}

fn atom_page(
    url: &str,
    fetched_at: DateTime<Utc>,
    feed: &atom_syndication::Feed,
    raw: Arc<[u8]>,
) -> FeedPage {
    let entries = feed
        .entries()
        .iter()
        .map(|entry| atom_entry(url, entry))
        .collect();

    FeedPage {
        url: url.to_string(),
        fetched_at,
        format: FeedFormat::Atom,
        title: non_empty(Some(feed.title().as_str())).map(str::to_string),
        description: feed.subtitle().map(|s| s.as_str().to_string()),
        link: feed
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .map(|link| absolutize(url, link.href())),
        author: feed.authors().first().map(|p| p.name().to_string()),
        image: feed
            .logo()
            .or(feed.icon())
            .map(|u| absolutize(url, u)),
        next: next_link(url, feed.links()),
        entries,
        raw,
    }
}

fn atom_entry(base: &str, entry: &atom_syndication::Entry) -> Entry {
    let enclosures: Vec<Enclosure> = entry
        .links()
        .iter()
        .filter(|link| link.rel() == "enclosure")
        .map(|link| Enclosure {
            url: absolutize(base, link.href()),
            mime_type: link.mime_type().map(str::to_string),
            length: link.length().and_then(|l| l.trim().parse::<u64>().ok()),
        })
        .collect();

    // `updated` moves when an entry is edited, but it is still steadier than fetch time.
    // A missing `updated` parses as the Unix epoch, which means no date at all.
    let published = entry
        .published()
        .copied()
        .or_else(|| Some(*entry.updated()).filter(|updated| updated.timestamp() != 0))
        .map(|date| date.with_timezone(&Utc));

    let description = entry
        .content()
        .and_then(|c| c.value())
        .map(str::to_string)
        .or_else(|| entry.summary().map(|s| s.as_str().to_string()));

    Entry {
        guid: non_empty(Some(entry.id())).map(str::to_string),
        title: non_empty(Some(entry.title().as_str())).map(str::to_string),
        published,
        description,
        link: entry
            .links()
            .iter()
            .find(|link| link.rel() == "alternate")
            .map(|link| absolutize(base, link.href())),
        attachments: attachment_links(base, entry.links(), &enclosures),
        enclosures,
        transcripts: Vec::new(),
        chapters: None,
        image: None,
    }
}

/// Links worth archiving next to an episode
///
/// An http(s) link that is not an enclosure, not a paging or self link, and either
/// has a title or declares a type other than `text/html`. An untyped link counts as
/// a web page.
fn attachment_links(
    base: &str,
    links: &[atom_syndication::Link],
    enclosures: &[Enclosure],
) -> Vec<Attachment> {
    let mut attachments: Vec<Attachment> = Vec::new();
    for link in links {
        if matches!(
            link.rel(),
            "enclosure" | "self" | "next" | "previous" | "prev" | "prev-archive" | "next-archive"
        ) {
            continue;
        }
        let title = non_empty(link.title()).map(str::to_string);
        let mime_type = non_empty(link.mime_type()).map(str::to_string);
        let is_page = mime_type
            .as_deref()
            .is_none_or(|t| t.eq_ignore_ascii_case("text/html"));
        if title.is_none() && is_page {
            continue;
        }

        let url = absolutize(base, link.href());
        let is_http = url.starts_with("http://") || url.starts_with("https://");
        let known = enclosures.iter().any(|e| e.url == url)
            || attachments.iter().any(|a| a.url == url);
        if is_http && !known {
            attachments.push(Attachment {
                url,
                mime_type,
                title,
            });
        }
    }
    attachments
}

/// Pick the RFC 5005 `rel="next"` link; other paging relations end the traversal
fn next_link(base: &str, links: &[atom_syndication::Link]) -> Option<String> {
    let next = links
        .iter()
        .find(|link| link.rel() == "next" && !link.href().trim().is_empty())
        .map(|link| absolutize(base, link.href()));

    if next.is_none()
        && let Some(other) = links
            .iter()
            .find(|link| matches!(link.rel(), "prev-archive" | "previous" | "prev"))
    {
        tracing::debug!(
            rel = other.rel(),
            href = other.href(),
            "Unsupported pagination link, treating page as the last one"
        );
    }

    next
}

/// Prefix bound to the Podcasting 2.0 namespace, `podcast` when undeclared
fn podcast_prefix(channel: &rss::Channel) -> String {
    channel
        .namespaces()
        .iter()
        .find(|(_, uri)| uri.trim_end_matches('/') == PODCAST_NAMESPACE.trim_end_matches('/'))
        .map(|(prefix, _)| prefix.clone())
        .unwrap_or_else(|| "podcast".to_string())
}

fn parse_rss_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolve `href` against the page URL; unparseable input is kept verbatim
fn absolutize(base: &str, href: &str) -> String {
    let href = href.trim();
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
