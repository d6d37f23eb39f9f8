//! Deterministic, filesystem-safe file naming
//!
//! Every archived file name is a pure function of feed metadata. The archive has no
//! index besides the directory tree, so a name that changed between runs would mean a
//! second copy of the same episode. Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Name used when sanitizing leaves nothing behind
pub const UNTITLED: &str = "untitled";

/// Length of the `~xxxxxxxx` marker appended to truncated names
const HASH_MARKER_LEN: usize = 9;

/// Device names Windows refuses as file names, with or without an extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Turn an arbitrary string into a safe file name of at most `max_bytes` UTF-8 bytes
///
/// The result is never empty, so a `max_bytes` of 0 still yields one byte.
///
/// - `/` and `\` become `-`
/// - `: * ? " < > |` and control characters are dropped
/// - whitespace runs collapse into a single space
/// - leading and trailing spaces and dots are trimmed
/// - overlong names are cut and get `~` plus 8 hex digits of the SHA-256 of `raw`,
///   so two long titles sharing a prefix still map to different names
///
/// # Examples
///
/// ```
/// use podcast_backup::naming::sanitize;
///
/// assert_eq!(sanitize("Episode #3: \"Rise/Fall\"", 255), "Episode #3 Rise-Fall");
/// ```
pub fn sanitize(raw: &str, max_bytes: usize) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '/' | '\\' => cleaned.push('-'),
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => {}
            c if c.is_whitespace() => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = trim_edges(&collapsed);

    let mut name = if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    };

    if is_reserved(&name) {
        name.insert(0, '_');
    }

    if name.len() > max_bytes {
        name = if max_bytes < HASH_MARKER_LEN {
            // no room for the `~`: what is left of the hash still tells names apart
            let mut hash = short_hash(raw);
            hash.truncate(max_bytes.max(1));
            hash
        } else {
            let keep = max_bytes - HASH_MARKER_LEN;
            let cut = trim_edges(truncate_at_char_boundary(&name, keep));
            format!("{}~{}", cut, short_hash(raw))
        };
    }

    name
}

/// 8 hex digits of the SHA-256 of `raw`, a stable tag for disambiguating names
pub fn short_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..HASH_MARKER_LEN - 1].to_string()
}

/// `"{YYYY-MM-DD} - {sanitized title}"`, at most `max_bytes` long
pub fn episode_stem(published: DateTime<Utc>, title: &str, max_bytes: usize) -> String {
    let prefix = date_prefix(published);
    let budget = max_bytes.saturating_sub(prefix.len());
    format!("{}{}", prefix, sanitize(title, budget))
}

/// Full episode file name: `"{YYYY-MM-DD} - {title}{suffix}.{ext}"`
///
/// The title gets whatever budget is left after the date prefix, `suffix` and the
/// extension, so the whole name never exceeds `max_bytes`. `suffix` is inserted
/// verbatim and must already be safe (see [`sanitize`]). An empty `ext` produces no dot.
pub fn episode_filename(
    published: DateTime<Utc>,
    title: &str,
    suffix: &str,
    ext: &str,
    max_bytes: usize,
) -> String {
    let prefix = date_prefix(published);
    let tail = if ext.is_empty() {
        suffix.to_string()
    } else {
        format!("{}.{}", suffix, ext)
    };
    let budget = max_bytes.saturating_sub(prefix.len() + tail.len());
    format!("{}{}{}", prefix, sanitize(title, budget), tail)
}

/// Directory name of a feed: its sanitized title, or `host + path` of its URL
pub fn feed_dir_name(title: Option<&str>, feed_url: &str, max_bytes: usize) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return sanitize(title, max_bytes);
    }

    let fallback = match url::Url::parse(feed_url) {
        Ok(parsed) => format!(
            "{}{}",
            parsed.host_str().unwrap_or_default(),
            parsed.path().trim_end_matches('/')
        ),
        Err(_) => feed_url.to_string(),
    };
    sanitize(&fallback, max_bytes)
}

/// Pick a file extension for a resource
///
/// A recognized MIME type wins, then the suffix of the last URL path segment when it
/// is 1 to 5 ASCII alphanumerics, then `fallback`. Always lowercase, without the dot.
pub fn extension_for(url: &str, mime_type: Option<&str>, fallback: &str) -> String {
    if let Some(ext) = mime_type.and_then(extension_for_mime) {
        return ext.to_string();
    }
    if let Some(ext) = url_extension(url) {
        return ext;
    }
    fallback.to_string()
}

/// Map a MIME type (parameters allowed) to a conventional extension
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let ext = match essence.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg" | "audio/x-mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" | "audio/aac-mp4" => "m4a",
        "audio/aac" | "audio/x-aac" => "aac",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "video/mp4" => "mp4",
        "video/x-m4v" => "m4v",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "text/vtt" => "vtt",
        "application/x-subrip" | "application/srt" | "text/srt" => "srt",
        "application/json" | "application/json+chapters" => "json",
        "text/html" => "html",
        "text/plain" => "txt",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        _ => return None,
    };
    Some(ext)
}

/// Percent-decoded last path segment of `url` without its extension
pub fn url_file_stem(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => decoded,
    };
    Some(stem)
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

fn date_prefix(published: DateTime<Utc>) -> String {
    format!("{} - ", published.format("%Y-%m-%d"))
}

fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '.')
}

fn is_reserved(name: &str) -> bool {
    let base = name.split('.').next().unwrap_or(name);
    RESERVED_NAMES
        .iter()
        .any(|reserved| base.eq_ignore_ascii_case(reserved))
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 18, 30, 0).unwrap()
    }

    #[test]
    fn title_with_illegal_characters_gets_date_prefix() {
        let name = episode_filename(day(2023, 4, 1), "Episode #3: \"Rise/Fall\"", "", "mp3", 240);
        assert!(
            name.starts_with("2023-04-01 - Episode #3 Rise-Fall"),
            "got {name}"
        );
        assert_eq!(name, "2023-04-01 - Episode #3 Rise-Fall.mp3");
    }

    #[test]
    fn sanitize_replaces_and_strips_illegal_characters() {
        assert_eq!(sanitize(r"a\b/c", 255), "a-b-c");
        assert_eq!(sanitize("what? *really* <yes> | no", 255), "what really yes no");
        assert_eq!(sanitize("bell\u{7}char\u{0}", 255), "bellchar");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_trims_dots() {
        assert_eq!(sanitize("  many \t\n  spaces\u{a0}here  ", 255), "many spaces here");
        assert_eq!(sanitize("...hidden.", 255), "hidden");
    }

    #[test]
    fn sanitize_never_returns_empty_or_reserved_names() {
        assert_eq!(sanitize("", 255), UNTITLED);
        assert_eq!(sanitize(" ?? // ", 255), "--");
        assert_eq!(sanitize("???", 255), UNTITLED);
        assert_eq!(sanitize("con", 255), "_con");
        assert_eq!(sanitize("NUL.txt", 255), "_NUL.txt");
        assert_eq!(sanitize("Console", 255), "Console");
    }

    #[test]
    fn sanitize_is_deterministic() {
        let raw = "Folge 12: Über \"Sinn\" & Unsinn / Teil 2";
        assert_eq!(sanitize(raw, 64), sanitize(raw, 64));
        let long = "x".repeat(500);
        assert_eq!(sanitize(&long, 100), sanitize(&long, 100));
    }

    #[test]
    fn truncated_names_keep_distinct_hash_markers() {
        let shared = "A very long podcast episode title that keeps going ".repeat(8);
        let a = format!("{shared} part one");
        let b = format!("{shared} part two");

        let sa = sanitize(&a, 100);
        let sb = sanitize(&b, 100);

        assert!(sa.len() <= 100, "len {}", sa.len());
        assert!(sb.len() <= 100, "len {}", sb.len());
        assert_ne!(sa, sb, "distinct long titles must not collide");
        assert!(sa.contains('~'));
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let title = "ü".repeat(200);
        let name = sanitize(&title, 51);
        assert!(name.len() <= 51);
        assert!(name.is_char_boundary(name.len()));
        assert!(name.starts_with('ü'));
    }

    #[test]
    fn tiny_budgets_are_still_respected() {
        let title = "An episode title that cannot fit";
        for max_bytes in 0..=HASH_MARKER_LEN {
            let name = sanitize(title, max_bytes);
            assert!(name.len() <= max_bytes.max(1), "{max_bytes}: {name}");
            assert!(!name.is_empty());
        }
        assert_ne!(sanitize("first long title", 4), sanitize("second long title", 4));

        let name = episode_filename(day(2020, 1, 2), title, &" x".repeat(19), "transcript", 64);
        assert!(name.len() <= 64, "len {}", name.len());
    }

    #[test]
    fn episode_filename_fits_budget_including_suffix_and_extension() {
        let title = "Interview ".repeat(60);
        let name = episode_filename(day(2020, 1, 2), &title, ".transcript", "vtt", 120);
        assert!(name.len() <= 120, "len {}", name.len());
        assert!(name.starts_with("2020-01-02 - Interview"));
        assert!(name.ends_with(".transcript.vtt"));
    }

    #[test]
    fn episode_stem_matches_filename_without_extension() {
        let stem = episode_stem(day(2021, 12, 24), "Holiday Special", 240);
        assert_eq!(stem, "2021-12-24 - Holiday Special");
        assert_eq!(
            episode_filename(day(2021, 12, 24), "Holiday Special", "", "", 240),
            stem
        );
    }

    #[test]
    fn feed_dir_name_prefers_title_then_url() {
        assert_eq!(
            feed_dir_name(Some("Tech: Weekly"), "https://x.test/feed", 240),
            "Tech Weekly"
        );
        assert_eq!(
            feed_dir_name(Some("   "), "https://podcasts.example.com/shows/abc/feed.xml", 240),
            "podcasts.example.com-shows-abc-feed.xml"
        );
        assert_eq!(
            feed_dir_name(None, "https://example.com/", 240),
            "example.com"
        );
    }

    #[test]
    fn extension_prefers_known_mime_type() {
        assert_eq!(
            extension_for("https://cdn.test/redirect.php?id=1", Some("audio/mpeg"), "bin"),
            "mp3"
        );
        assert_eq!(
            extension_for("https://cdn.test/a.mp3", Some("audio/x-m4a; codecs=mp4a"), "bin"),
            "m4a"
        );
    }

    #[test]
    fn extension_falls_back_to_url_suffix_then_default() {
        assert_eq!(
            extension_for("https://cdn.test/show/Ep.OGG?token=abc", None, "bin"),
            "ogg"
        );
        assert_eq!(
            extension_for("https://cdn.test/ep.mp3", Some("application/octet-stream"), "bin"),
            "mp3"
        );
        assert_eq!(extension_for("https://cdn.test/download", None, "mp3"), "mp3");
        assert_eq!(extension_for("https://cdn.test/a.toolongext", None, "bin"), "bin");
        assert_eq!(extension_for("not a url", None, "bin"), "bin");
    }

    #[test]
    fn url_file_stem_decodes_last_segment() {
        assert_eq!(
            url_file_stem("https://cdn.test/show/My%20Episode.mp3?x=1").as_deref(),
            Some("My Episode")
        );
        assert_eq!(
            url_file_stem("https://cdn.test/show/episode-42/").as_deref(),
            Some("episode-42")
        );
        assert_eq!(url_file_stem("https://cdn.test/"), None);
    }
}
