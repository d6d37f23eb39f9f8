//! OPML subscription list reader

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashSet;
use std::path::Path;

/// Read an OPML file and return its feed URLs
///
/// Any failure here is a setup error: the run cannot start without subscriptions.
pub fn read_opml(path: &Path) -> Result<Vec<String>> {
    tracing::info!(path = %path.display(), "Parsing OPML file");
    let raw = std::fs::read(path)
        .map_err(|e| Error::Opml(format!("cannot read {}: {}", path.display(), e)))?;
    parse_opml(&raw)
}

/// Extract the `xmlUrl` of every `<outline>` in document order, without duplicates
///
/// Outlines may be nested to any depth (category folders are common). An outline
/// without `xmlUrl` is a folder or a plain link and is skipped.
pub fn parse_opml(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut urls = Vec::new();
    let mut seen = HashSet::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"opml" => saw_root = true,
                b"outline" => {
                    if let Some(url) = outline_feed_url(&e)?
                        && seen.insert(url.clone())
                    {
                        urls.push(url);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Opml(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Error::Opml("missing <opml> root element".to_string()));
    }

    tracing::debug!(feeds = urls.len(), "OPML parsed");
    Ok(urls)
}

fn outline_feed_url(outline: &BytesStart<'_>) -> Result<Option<String>> {
    for attr in outline.attributes().flatten() {
        if attr.key.local_name().as_ref().eq_ignore_ascii_case(b"xmlUrl") {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::Opml(format!("invalid xmlUrl attribute: {}", e)))?;
            let value = value.trim();
            if value.is_empty() {
                return Ok(None);
            }
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="1.0">
  <head><title>Subscriptions</title></head>
  <body>
    <outline type="rss" text="First" xmlUrl="https://one.example.com/feed.xml"/>
    <outline text="News">
      <outline type="rss" text="Second" xmlUrl="https://two.example.com/rss?a=1&amp;b=2"/>
      <outline type="rss" text="First again" xmlUrl="https://one.example.com/feed.xml"/>
    </outline>
    <outline type="link" text="Homepage" url="https://example.com"/>
    <outline text="Lowercase" xmlurl="https://three.example.com/podcast"></outline>
  </body>
</opml>"#;

    #[test]
    fn collects_nested_outlines_in_order_without_duplicates() {
        let urls = parse_opml(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://one.example.com/feed.xml",
                "https://two.example.com/rss?a=1&b=2",
                "https://three.example.com/podcast",
            ]
        );
    }

    #[test]
    fn empty_body_yields_no_feeds() {
        let urls = parse_opml(b"<opml version=\"2.0\"><body/></opml>").unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn rejects_documents_without_opml_root() {
        let err = parse_opml(b"<rss><channel/></rss>").unwrap_err();
        assert!(matches!(err, Error::Opml(_)), "got {err:?}");
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = parse_opml(b"<opml><body><outline xmlUrl=\"x\"></body></opml>").unwrap_err();
        assert!(matches!(err, Error::Opml(_)), "got {err:?}");
    }

    #[test]
    fn read_opml_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_opml(&dir.path().join("missing.opml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"), "got {err}");
    }

    #[test]
    fn read_opml_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.opml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(read_opml(&path).unwrap().len(), 3);
    }
}
