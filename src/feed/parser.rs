use feed_rs::model::{Entry, Feed as RawFeed};
use feed_rs::parser;

use crate::dedup::fingerprint;
use crate::error::ParseError;
use crate::feed::fetcher::resolve_url;
use crate::models::{Enclosure, EntryCandidate, EntryRecord, FeedMeta, Link};
use crate::providers::ProviderRegistry;

const SUMMARY_CHARS: usize = 300;

#[derive(Debug, Default)]
pub struct ParsedFeed {
    pub meta: FeedMeta,
    pub entries: Vec<EntryCandidate>,
    /// One error per item that could not be normalized.
    pub errors: Vec<ParseError>,
}

fn parse_raw(body: &[u8]) -> Result<RawFeed, ParseError> {
    parser::parse(body).map_err(|e| ParseError::Document(e.to_string()))
}

/// Parses only the channel-level metadata of a feed document.
pub fn feed_meta(source_url: &str, body: &[u8]) -> Result<FeedMeta, ParseError> {
    let feed = parse_raw(body)?;
    Ok(meta_from(source_url, &feed))
}

/// Parses an RSS, Atom or JSON Feed document into entry candidates.
///
/// A document that cannot be read at all fails as a whole. Items are
/// normalized one by one, so a bad item only adds to `errors`.
pub fn parse_feed(
    source_url: &str,
    body: &[u8],
    providers: &ProviderRegistry,
) -> Result<ParsedFeed, ParseError> {
    let feed = parse_raw(body)?;
    let meta = meta_from(source_url, &feed);

    let mut parsed = ParsedFeed {
        meta,
        ..Default::default()
    };

    for (index, entry) in feed.entries.into_iter().enumerate() {
        match normalize_entry(source_url, parsed.meta.language.as_deref(), entry) {
            Ok(record) => {
                let references = providers.extract_references(&reference_text(&record));
                parsed.entries.push(EntryCandidate { entry: record, references });
            }
            Err(reason) => parsed.errors.push(ParseError::Item { index, reason }),
        }
    }

    Ok(parsed)
}

fn meta_from(source_url: &str, feed: &RawFeed) -> FeedMeta {
    let website = feed
        .links
        .iter()
        .filter(|l| l.rel.as_deref() != Some("self"))
        .find_map(|l| resolve_url(&l.href, source_url));

    FeedMeta {
        title: feed.title.as_ref().map(|t| t.content.trim().to_string()),
        description: feed.description.as_ref().map(|d| d.content.clone()),
        language: feed.language.clone(),
        website,
        icon_url: feed.icon.as_ref().and_then(|i| resolve_url(&i.uri, source_url)),
        visual_url: feed.logo.as_ref().and_then(|i| resolve_url(&i.uri, source_url)),
    }
}

fn normalize_entry(
    source_url: &str,
    locale: Option<&str>,
    entry: Entry,
) -> Result<EntryRecord, String> {
    let alternate: Vec<Link> = entry
        .links
        .iter()
        .filter_map(|l| {
            resolve_url(&l.href, source_url).map(|href| Link {
                href,
                mime_type: l.media_type.clone(),
            })
        })
        .collect();

    // The first link wins; a permalink-style id is the fallback.
    let url = alternate
        .first()
        .map(|l| l.href.clone())
        .or_else(|| {
            let id = entry.id.trim();
            (id.starts_with("http://") || id.starts_with("https://"))
                .then(|| resolve_url(id, source_url))
                .flatten()
        })
        .ok_or_else(|| "no usable link".to_string())?;

    let title = entry.title.as_ref().map(|t| t.content.trim().to_string());
    let content = entry.content.as_ref().and_then(|c| c.body.clone());
    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| content.as_deref().and_then(excerpt));

    let mut enclosure = Vec::new();
    let mut visual_url = None;
    for media in &entry.media {
        for item in &media.content {
            if let Some(media_url) = &item.url {
                enclosure.push(Enclosure {
                    url: media_url.to_string(),
                    content_type: item.content_type.as_ref().map(|m| m.to_string()),
                    length: item.size,
                });
            }
        }
        if visual_url.is_none() {
            visual_url = media
                .thumbnails
                .first()
                .and_then(|t| resolve_url(&t.image.uri, source_url));
        }
    }
    if visual_url.is_none() {
        visual_url = enclosure
            .iter()
            .find(|e| e.content_type.as_deref().is_some_and(|t| t.starts_with("image/")))
            .map(|e| e.url.clone());
    }

    let published = entry.published.or(entry.updated);
    let origin_id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

    Ok(EntryRecord {
        fingerprint: fingerprint(title.as_deref(), &url, published),
        url,
        title,
        summary,
        content,
        author: entry.authors.first().map(|a| a.name.clone()),
        visual_url,
        locale: locale.map(str::to_string),
        published,
        updated: entry.updated,
        alternate,
        enclosure,
        keywords: entry.categories.iter().map(|c| c.term.clone()).collect(),
        origin_id,
    })
}

fn excerpt(html: &str) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 80).ok()?;
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(SUMMARY_CHARS).collect())
}

// Embeds are often percent-encoded inside iframe src attributes.
fn reference_text(record: &EntryRecord) -> String {
    let mut text = String::new();
    for part in [&record.content, &record.summary].into_iter().flatten() {
        text.push_str(part);
        text.push('\n');
    }
    text.push_str(&record.url);
    text.push('\n');
    for link in &record.alternate {
        text.push_str(&link.href);
        text.push('\n');
    }
    for enclosure in &record.enclosure {
        text.push_str(&enclosure.url);
        text.push('\n');
    }

    match urlencoding::decode(&text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, Provider};

    const FEED_URL: &str = "https://blog.example.com/feed.xml";

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://blog.example.com/</link>
    <description>Music writing</description>
    <language>ja</language>
    {items}
  </channel>
</rss>"#
        )
    }

    #[test]
    fn test_parse_rss_entries() {
        let body = rss(
            r#"<item>
      <title>First post</title>
      <link>/posts/1</link>
      <guid isPermaLink="false">post-1</guid>
      <pubDate>Mon, 01 Apr 2024 10:00:00 GMT</pubDate>
      <category>indie</category>
      <description>Short summary</description>
    </item>"#,
        );
        let parsed = parse_feed(FEED_URL, body.as_bytes(), &ProviderRegistry::default()).unwrap();

        assert_eq!(parsed.meta.title.as_deref(), Some("Example Blog"));
        assert_eq!(parsed.meta.language.as_deref(), Some("ja"));
        assert!(parsed.errors.is_empty());

        let entry = &parsed.entries[0].entry;
        assert_eq!(entry.url, "https://blog.example.com/posts/1");
        assert_eq!(entry.origin_id.as_deref(), Some("post-1"));
        assert_eq!(entry.summary.as_deref(), Some("Short summary"));
        assert_eq!(entry.keywords, vec!["indie".to_string()]);
        assert_eq!(entry.locale.as_deref(), Some("ja"));
        assert!(entry.published.is_some());
    }

    #[test]
    fn test_item_without_link_is_an_item_error() {
        let body = rss(
            r#"<item><title>ok</title><link>https://blog.example.com/ok</link><guid>a</guid></item>
    <item><title>broken</title><guid isPermaLink="false">b</guid></item>"#,
        );
        let parsed = parse_feed(FEED_URL, body.as_bytes(), &ProviderRegistry::default()).unwrap();

        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(parsed.errors[0], ParseError::Item { index: 1, .. }));
    }

    #[test]
    fn test_permalink_guid_is_used_as_url() {
        let body = rss(r#"<item><title>t</title><guid>https://blog.example.com/p/9</guid></item>"#);
        let parsed = parse_feed(FEED_URL, body.as_bytes(), &ProviderRegistry::default()).unwrap();
        assert_eq!(parsed.entries[0].entry.url, "https://blog.example.com/p/9");
    }

    #[test]
    fn test_garbage_is_a_document_error() {
        let err = parse_feed(FEED_URL, b"not a feed at all", &ProviderRegistry::default()).unwrap_err();
        assert!(matches!(err, ParseError::Document(_)));
    }

    #[test]
    fn test_summary_falls_back_to_content_excerpt() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Blog</title>
  <id>urn:feed</id>
  <updated>2024-04-01T10:00:00Z</updated>
  <entry>
    <title>Entry</title>
    <id>urn:entry:1</id>
    <link href="https://atom.example.com/1"/>
    <updated>2024-04-01T10:00:00Z</updated>
    <content type="html">&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let parsed = parse_feed(FEED_URL, body.as_bytes(), &ProviderRegistry::default()).unwrap();
        let entry = &parsed.entries[0].entry;
        let summary = entry.summary.as_deref().unwrap();
        assert!(summary.contains("Hello"));
        assert!(!summary.contains("<p>"));
    }

    #[test]
    fn test_embeds_become_references() {
        let body = rss(
            r#"<item>
      <title>Video</title>
      <link>https://blog.example.com/v</link>
      <guid>v</guid>
      <description>&lt;iframe src="https://www.youtube.com/embed/dQw4w9WgXcQ"&gt;&lt;/iframe&gt;
      &lt;iframe src="https://w.soundcloud.com/player/?url=https%3A//api.soundcloud.com/tracks/12345"&gt;&lt;/iframe&gt;</description>
    </item>"#,
        );
        let registry = ProviderRegistry::default();
        let parsed = parse_feed(FEED_URL, body.as_bytes(), &registry).unwrap();
        let refs = &parsed.entries[0].references;

        assert!(refs
            .iter()
            .any(|r| r.provider == Provider::YouTube && r.identifier == "dQw4w9WgXcQ" && r.kind == MediaKind::Track));
        assert!(refs
            .iter()
            .any(|r| r.provider == Provider::SoundCloud && r.identifier == "12345"));
    }
}
