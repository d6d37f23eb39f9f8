//! Expansion of feed entries into file targets
//!
//! Resolution is pure: the same entry always produces the same list of targets with
//! the same paths, in the same order. That is what lets the archive directory act as
//! the only record of what has been downloaded.

use crate::config::Config;
use crate::feed::{Entry, FeedFormat, FeedPage};
use crate::naming::{self, episode_filename, extension_for, feed_dir_name};
use crate::types::{FeedIdentity, FileKind, FileTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Name of the raw feed snapshot inside a feed directory
pub const FEED_SNAPSHOT_NAME: &str = "feed.xml";

/// Stem of the cover image inside a feed directory
pub const COVER_STEM: &str = "cover";

/// Name of the feed-level metadata file inside a feed directory
pub const FEED_METADATA_NAME: &str = "meta.json";

/// Byte limit for the part of an attachment name taken from its URL or title
const ATTACHMENT_LABEL_BYTES: usize = 64;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "oga", "opus", "flac", "wav"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "webm", "mkv"];

/// Knobs that change which targets are produced
#[derive(Clone, Debug)]
pub struct ResolveOptions {
    /// Upper bound for every file name, in UTF-8 bytes
    pub max_filename_bytes: usize,
    /// Emit `.html`/`.txt` shownotes
    pub write_shownotes: bool,
    /// Emit the `.json` episode metadata
    pub write_metadata: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ResolveOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_filename_bytes: config.max_filename_bytes,
            write_shownotes: config.write_shownotes,
            write_metadata: config.write_episode_metadata,
        }
    }
}

/// Identity of the feed whose first page is `page`
pub fn feed_identity(feed_url: &str, page: &FeedPage, max_filename_bytes: usize) -> FeedIdentity {
    FeedIdentity {
        url: feed_url.to_string(),
        dir_name: feed_dir_name(page.title.as_deref(), feed_url, max_filename_bytes),
    }
}

/// Feed-level targets: the raw snapshot of the first page and the cover image
pub fn resolve_feed(
    feed: &FeedIdentity,
    page: &FeedPage,
    options: &ResolveOptions,
) -> Vec<FileTarget> {
    let dir = Path::new(&feed.dir_name);
    let mut targets = vec![FileTarget::inline(
        page.raw.clone(),
        dir.join(FEED_SNAPSHOT_NAME),
        FileKind::FeedSnapshot,
    )];

    if let Some(image) = &page.image {
        let ext = extension_for(image, None, "jpg");
        let name = naming::sanitize(&format!("{}.{}", COVER_STEM, ext), options.max_filename_bytes);
        targets.push(FileTarget::remote(image.clone(), dir.join(name), FileKind::Cover));
    }

    targets
}

/// `meta.json`: feed fields plus the number of entries seen across all pages
///
/// `None` when metadata output is disabled.
pub fn resolve_feed_metadata(
    feed: &FeedIdentity,
    page: &FeedPage,
    episode_count: usize,
    options: &ResolveOptions,
) -> Option<FileTarget> {
    if !options.write_metadata {
        return None;
    }

    let metadata = FeedMetadata {
        url: &feed.url,
        title: page.title.as_deref(),
        description: page.description.as_deref(),
        link: page.link.as_deref(),
        author: page.author.as_deref(),
        image: page.image.as_deref(),
        format: page.format,
        fetched_at: page.fetched_at,
        episode_count,
    };
    match serde_json::to_vec_pretty(&metadata) {
        Ok(json) => Some(FileTarget::inline(
            json,
            Path::new(&feed.dir_name).join(FEED_METADATA_NAME),
            FileKind::Metadata,
        )),
        Err(e) => {
            tracing::warn!(feed = %feed.url, error = %e, "Could not serialize feed metadata");
            None
        }
    }
}

/// What tells two entries apart when their titles and dates agree
///
/// The primary enclosure URL, then the guid, then the web page link, then the title.
pub fn entry_key(entry: &Entry) -> String {
    entry
        .primary_enclosure()
        .map(|e| e.url.clone())
        .or_else(|| entry.guid.clone())
        .or_else(|| entry.link.clone())
        .unwrap_or_else(|| entry.display_title())
}

/// Every file belonging to one entry
///
/// Order: enclosures (primary first), transcripts, chapters, attachments, shownotes,
/// metadata. `fetched_at` stands in for a missing publish date.
pub fn resolve(
    feed: &FeedIdentity,
    entry: &Entry,
    fetched_at: DateTime<Utc>,
    options: &ResolveOptions,
) -> Vec<FileTarget> {
    resolve_titled(feed, entry, fetched_at, options, entry.display_title())
}

/// Like [`resolve`], with ` [xxxxxxxx]` from the hash of [`entry_key`] after the title
///
/// For an entry whose plain names already belong to a different entry.
pub fn resolve_distinct(
    feed: &FeedIdentity,
    entry: &Entry,
    fetched_at: DateTime<Utc>,
    options: &ResolveOptions,
) -> Vec<FileTarget> {
    let title = format!(
        "{} [{}]",
        entry.display_title(),
        naming::short_hash(&entry_key(entry))
    );
    resolve_titled(feed, entry, fetched_at, options, title)
}

fn resolve_titled(
    feed: &FeedIdentity,
    entry: &Entry,
    fetched_at: DateTime<Utc>,
    options: &ResolveOptions,
    title: String,
) -> Vec<FileTarget> {
    let published = match entry.published {
        Some(published) => published,
        None => {
            tracing::warn!(
                feed = %feed.url,
                title = %title,
                "Entry has no usable publish date, using fetch time"
            );
            fetched_at
        }
    };

    let mut namer = EntryNamer::new(Path::new(&feed.dir_name), published, &title, options);
    let mut targets = Vec::new();

    for (index, enclosure) in entry.enclosures.iter().enumerate() {
        let ext = extension_for(&enclosure.url, enclosure.mime_type.as_deref(), "mp3");
        let suffix = if index == 0 {
            String::new()
        } else {
            format!(" [{}]", index + 1)
        };
        let kind = media_kind(enclosure.mime_type.as_deref(), &ext);
        targets.push(FileTarget::remote(
            enclosure.url.clone(),
            namer.path(&suffix, &ext),
            kind,
        ));
    }

    let several_transcripts = entry.transcripts.len() > 1;
    for transcript in &entry.transcripts {
        let ext = extension_for(&transcript.url, transcript.mime_type.as_deref(), "txt");
        let suffix = match transcript.language.as_deref().map(|l| naming::sanitize(l, 16)) {
            Some(lang) if several_transcripts && lang != naming::UNTITLED => {
                format!(".transcript.{}", lang)
            }
            _ => ".transcript".to_string(),
        };
        targets.push(FileTarget::remote(
            transcript.url.clone(),
            namer.path(&suffix, &ext),
            FileKind::Transcript,
        ));
    }

    if let Some(chapters) = &entry.chapters {
        let ext = extension_for(&chapters.url, chapters.mime_type.as_deref(), "json");
        targets.push(FileTarget::remote(
            chapters.url.clone(),
            namer.path(".chapters", &ext),
            FileKind::Chapters,
        ));
    }

    for attachment in &entry.attachments {
        let ext = extension_for(&attachment.url, attachment.mime_type.as_deref(), "bin");
        let label = naming::url_file_stem(&attachment.url)
            .or_else(|| attachment.title.clone())
            .unwrap_or_else(|| "attachment".to_string());
        let suffix = format!(" {}", naming::sanitize(&label, ATTACHMENT_LABEL_BYTES));
        targets.push(FileTarget::remote(
            attachment.url.clone(),
            namer.path(&suffix, &ext),
            FileKind::Attachment,
        ));
    }

    if options.write_shownotes
        && let Some(notes) = entry.description.as_deref().filter(|d| !d.trim().is_empty())
    {
        let ext = if looks_like_html(notes) { "html" } else { "txt" };
        targets.push(FileTarget::inline(
            notes.as_bytes().to_vec(),
            namer.path("", ext),
            FileKind::Shownotes,
        ));
    }

    if options.write_metadata {
        let metadata = EpisodeMetadata {
            feed_url: &feed.url,
            fetched_at,
            entry,
        };
        match serde_json::to_vec_pretty(&metadata) {
            Ok(json) => targets.push(FileTarget::inline(
                json,
                namer.path("", "json"),
                FileKind::Metadata,
            )),
            Err(e) => tracing::warn!(title = %title, error = %e, "Could not serialize entry"),
        }
    }

    targets
}

/// Content of the feed's `meta.json`
#[derive(Serialize)]
struct FeedMetadata<'a> {
    url: &'a str,
    title: Option<&'a str>,
    description: Option<&'a str>,
    link: Option<&'a str>,
    author: Option<&'a str>,
    image: Option<&'a str>,
    format: FeedFormat,
    fetched_at: DateTime<Utc>,
    episode_count: usize,
}

/// Content of the per-episode `.json` file
#[derive(Serialize)]
struct EpisodeMetadata<'a> {
    feed_url: &'a str,
    fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    entry: &'a Entry,
}

/// Hands out unique file names within one entry
struct EntryNamer<'a> {
    dir: &'a Path,
    published: DateTime<Utc>,
    title: &'a str,
    max_bytes: usize,
    used: HashSet<String>,
}

impl<'a> EntryNamer<'a> {
    fn new(
        dir: &'a Path,
        published: DateTime<Utc>,
        title: &'a str,
        options: &ResolveOptions,
    ) -> Self {
        Self {
            dir,
            published,
            title,
            max_bytes: options.max_filename_bytes,
            used: HashSet::new(),
        }
    }

    /// `{date} - {title}{suffix}.{ext}`, with ` [n]` added to the suffix on collision
    fn path(&mut self, suffix: &str, ext: &str) -> PathBuf {
        let mut name = episode_filename(self.published, self.title, suffix, ext, self.max_bytes);
        let mut n = 2;
        while !self.used.insert(name.clone()) {
            let numbered = format!("{} [{}]", suffix, n);
            name = episode_filename(self.published, self.title, &numbered, ext, self.max_bytes);
            n += 1;
        }
        self.dir.join(name)
    }
}

fn media_kind(mime_type: Option<&str>, ext: &str) -> FileKind {
    let mime = mime_type.unwrap_or_default().trim().to_ascii_lowercase();
    if mime.starts_with("audio/") {
        FileKind::Audio
    } else if mime.starts_with("video/") {
        FileKind::Video
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        FileKind::Audio
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileKind::Video
    } else {
        FileKind::Attachment
    }
}

/// True if `text` contains something that looks like an HTML tag or entity
fn looks_like_html(text: &str) -> bool {
    let bytes = text.as_bytes();
    let tag = bytes.windows(2).any(|w| {
        w[0] == b'<' && (w[1].is_ascii_alphabetic() || w[1] == b'/' || w[1] == b'!')
    });
    tag || text.contains("&amp;") || text.contains("&nbsp;")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Attachment, ChaptersLink, Enclosure, FeedFormat, Transcript};
    use crate::types::TargetSource;
    use chrono::TimeZone;

    fn feed() -> FeedIdentity {
        FeedIdentity {
            url: "https://show.test/feed.xml".into(),
            dir_name: "Show".into(),
        }
    }

    fn fetched() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn enclosure(url: &str, mime: Option<&str>) -> Enclosure {
        Enclosure {
            url: url.into(),
            mime_type: mime.map(str::to_string),
            length: None,
        }
    }

    fn episode() -> Entry {
        Entry {
            guid: Some("ep-3".into()),
            title: Some("Episode #3: \"Rise/Fall\"".into()),
            published: Some(Utc.with_ymd_and_hms(2023, 4, 1, 9, 0, 0).unwrap()),
            description: Some("<p>Show notes</p>".into()),
            enclosures: vec![enclosure("https://cdn.test/ep3.mp3?x=1", Some("audio/mpeg"))],
            ..Default::default()
        }
    }

    fn paths(targets: &[FileTarget]) -> Vec<String> {
        targets
            .iter()
            .map(|t| t.path.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn names_primary_enclosure_shownotes_and_metadata() {
        let targets = resolve(&feed(), &episode(), fetched(), &ResolveOptions::default());

        assert_eq!(
            paths(&targets),
            vec![
                "Show/2023-04-01 - Episode #3 Rise-Fall.mp3",
                "Show/2023-04-01 - Episode #3 Rise-Fall.html",
                "Show/2023-04-01 - Episode #3 Rise-Fall.json",
            ]
        );
        assert_eq!(targets[0].kind, FileKind::Audio);
        assert_eq!(targets[0].url(), Some("https://cdn.test/ep3.mp3?x=1"));
        assert_eq!(targets[1].kind, FileKind::Shownotes);
        assert_eq!(targets[2].kind, FileKind::Metadata);
    }

    #[test]
    fn resolution_is_deterministic() {
        let entry = Entry {
            published: None,
            ..episode()
        };
        let first = resolve(&feed(), &entry, fetched(), &ResolveOptions::default());
        let second = resolve(&feed(), &entry, fetched(), &ResolveOptions::default());
        assert_eq!(first, second);
        assert!(paths(&first)[0].starts_with("Show/2024-06-01 - "));
    }

    #[test]
    fn extra_enclosures_transcripts_and_chapters() {
        let entry = Entry {
            description: Some("plain text notes".into()),
            enclosures: vec![
                enclosure("https://cdn.test/ep3.mp3", Some("audio/mpeg")),
                enclosure("https://cdn.test/ep3.mp4", Some("video/mp4")),
                enclosure("https://cdn.test/slides.pdf", None),
            ],
            transcripts: vec![
                Transcript {
                    url: "https://cdn.test/ep3.vtt".into(),
                    mime_type: Some("text/vtt".into()),
                    language: Some("en".into()),
                },
                Transcript {
                    url: "https://cdn.test/ep3-de.srt".into(),
                    mime_type: Some("application/x-subrip".into()),
                    language: Some("de".into()),
                },
                Transcript {
                    url: "https://cdn.test/ep3-en-2.vtt".into(),
                    mime_type: Some("text/vtt".into()),
                    language: Some("en".into()),
                },
            ],
            chapters: Some(ChaptersLink {
                url: "https://cdn.test/chapters".into(),
                mime_type: Some("application/json+chapters".into()),
            }),
            ..episode()
        };
        let options = ResolveOptions {
            write_metadata: false,
            ..Default::default()
        };

        let targets = resolve(&feed(), &entry, fetched(), &options);

        let stem = "Show/2023-04-01 - Episode #3 Rise-Fall";
        assert_eq!(
            paths(&targets),
            vec![
                format!("{stem}.mp3"),
                format!("{stem} [2].mp4"),
                format!("{stem} [3].pdf"),
                format!("{stem}.transcript.en.vtt"),
                format!("{stem}.transcript.de.srt"),
                format!("{stem}.transcript.en [2].vtt"),
                format!("{stem}.chapters.json"),
                format!("{stem}.txt"),
            ]
        );
        let kinds: Vec<FileKind> = targets.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds[..3],
            [FileKind::Audio, FileKind::Video, FileKind::Attachment]
        );
    }

    #[test]
    fn single_transcript_has_no_language_segment() {
        let entry = Entry {
            transcripts: vec![Transcript {
                url: "https://cdn.test/t".into(),
                mime_type: Some("text/vtt".into()),
                language: Some("en".into()),
            }],
            ..episode()
        };
        let targets = resolve(&feed(), &entry, fetched(), &ResolveOptions::default());
        assert!(paths(&targets).contains(&"Show/2023-04-01 - Episode #3 Rise-Fall.transcript.vtt".to_string()));
    }

    #[test]
    fn disabled_outputs_and_entry_without_enclosure() {
        let entry = Entry {
            enclosures: Vec::new(),
            ..episode()
        };
        let options = ResolveOptions {
            write_shownotes: false,
            write_metadata: false,
            ..Default::default()
        };
        assert!(resolve(&feed(), &entry, fetched(), &options).is_empty());
    }

    #[test]
    fn inline_metadata_carries_feed_and_entry_fields() {
        let targets = resolve(&feed(), &episode(), fetched(), &ResolveOptions::default());
        let TargetSource::Inline(bytes) = &targets[2].source else {
            panic!("metadata must be inline");
        };
        let json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["feed_url"], "https://show.test/feed.xml");
        assert_eq!(json["guid"], "ep-3");
        assert_eq!(json["enclosures"][0]["mime_type"], "audio/mpeg");
    }

    #[test]
    fn long_titles_stay_within_limit_and_distinct() {
        let long_a = format!("{} A", "x".repeat(400));
        let long_b = format!("{} B", "x".repeat(400));
        let options = ResolveOptions {
            max_filename_bytes: 100,
            write_shownotes: false,
            write_metadata: false,
        };
        let a = resolve(
            &feed(),
            &Entry {
                title: Some(long_a),
                ..episode()
            },
            fetched(),
            &options,
        );
        let b = resolve(
            &feed(),
            &Entry {
                title: Some(long_b),
                ..episode()
            },
            fetched(),
            &options,
        );

        let name_a = a[0].path.file_name().unwrap().to_string_lossy().into_owned();
        let name_b = b[0].path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name_a.len() <= 100, "{name_a}");
        assert!(name_a.ends_with(".mp3"));
        assert_ne!(name_a, name_b);
    }

    #[test]
    fn feed_targets_snapshot_and_cover() {
        let page = FeedPage {
            url: "https://show.test/feed.xml".into(),
            fetched_at: fetched(),
            format: FeedFormat::Rss,
            title: Some("Show".into()),
            description: None,
            link: None,
            author: None,
            image: Some("https://cdn.test/art/cover.PNG".into()),
            next: None,
            entries: Vec::new(),
            raw: b"<rss/>".to_vec().into(),
        };
        let identity = feed_identity("https://show.test/feed.xml", &page, 240);
        assert_eq!(identity.dir_name, "Show");

        let targets = resolve_feed(&identity, &page, &ResolveOptions::default());

        assert_eq!(paths(&targets), vec!["Show/feed.xml", "Show/cover.png"]);
        assert_eq!(targets[0].kind, FileKind::FeedSnapshot);
        assert_eq!(targets[1].kind, FileKind::Cover);
    }

    #[test]
    fn attachments_are_named_after_their_url() {
        let entry = Entry {
            attachments: vec![
                Attachment {
                    url: "https://cdn.test/files/Slides%20Week%201.pdf".into(),
                    mime_type: Some("application/pdf".into()),
                    title: None,
                },
                Attachment {
                    url: "https://cdn.test/".into(),
                    mime_type: None,
                    title: Some("Reading: list".into()),
                },
            ],
            ..episode()
        };
        let options = ResolveOptions {
            write_shownotes: false,
            write_metadata: false,
            ..Default::default()
        };

        let targets = resolve(&feed(), &entry, fetched(), &options);

        assert_eq!(
            paths(&targets),
            vec![
                "Show/2023-04-01 - Episode #3 Rise-Fall.mp3",
                "Show/2023-04-01 - Episode #3 Rise-Fall Slides Week 1.pdf",
                "Show/2023-04-01 - Episode #3 Rise-Fall Reading list.bin",
            ]
        );
        assert_eq!(targets[1].kind, FileKind::Attachment);
        assert_eq!(targets[2].url(), Some("https://cdn.test/"));
    }

    #[test]
    fn distinct_resolution_tags_every_name_with_the_entry_key() {
        let first = episode();
        let second = Entry {
            guid: Some("ep-3-rerun".into()),
            enclosures: vec![enclosure("https://cdn.test/ep3-rerun.mp3", Some("audio/mpeg"))],
            ..episode()
        };

        let plain = resolve(&feed(), &first, fetched(), &ResolveOptions::default());
        let clash = resolve(&feed(), &second, fetched(), &ResolveOptions::default());
        assert_eq!(paths(&plain), paths(&clash));

        let distinct = resolve_distinct(&feed(), &second, fetched(), &ResolveOptions::default());
        let marker = naming::short_hash("https://cdn.test/ep3-rerun.mp3");
        let stem = format!("Show/2023-04-01 - Episode #3 Rise-Fall [{marker}]");
        assert_eq!(
            paths(&distinct),
            vec![
                format!("{stem}.mp3"),
                format!("{stem}.html"),
                format!("{stem}.json"),
            ]
        );
        assert_eq!(
            distinct,
            resolve_distinct(&feed(), &second, fetched(), &ResolveOptions::default())
        );
    }

    #[test]
    fn entry_key_prefers_enclosure_then_guid() {
        assert_eq!(entry_key(&episode()), "https://cdn.test/ep3.mp3?x=1");
        let no_media = Entry {
            enclosures: Vec::new(),
            ..episode()
        };
        assert_eq!(entry_key(&no_media), "ep-3");
        assert_eq!(entry_key(&Entry::default()), "untitled");
    }

    #[test]
    fn feed_metadata_lists_feed_fields_and_episode_count() {
        let page = FeedPage {
            url: "https://show.test/feed.xml".into(),
            fetched_at: fetched(),
            format: FeedFormat::Atom,
            title: Some("Show".into()),
            description: Some("About things".into()),
            link: Some("https://show.test/".into()),
            author: Some("Host".into()),
            image: None,
            next: None,
            entries: Vec::new(),
            raw: b"<feed/>".to_vec().into(),
        };

        let target =
            resolve_feed_metadata(&feed(), &page, 42, &ResolveOptions::default()).unwrap();
        assert_eq!(target.path, Path::new("Show/meta.json"));
        assert_eq!(target.kind, FileKind::Metadata);
        let TargetSource::Inline(bytes) = &target.source else {
            panic!("feed metadata must be inline");
        };
        let json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(json["url"], "https://show.test/feed.xml");
        assert_eq!(json["title"], "Show");
        assert_eq!(json["author"], "Host");
        assert_eq!(json["format"], "atom");
        assert_eq!(json["episode_count"], 42);
        assert!(json["image"].is_null());

        let disabled = ResolveOptions {
            write_metadata: false,
            ..Default::default()
        };
        assert!(resolve_feed_metadata(&feed(), &page, 42, &disabled).is_none());
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<p>hello</p>"));
        assert!(looks_like_html("a<br/>b"));
        assert!(looks_like_html("Tom &amp; Jerry"));
        assert!(!looks_like_html("1 < 2 and 3 > 2"));
        assert!(!looks_like_html("plain notes"));
    }
}
