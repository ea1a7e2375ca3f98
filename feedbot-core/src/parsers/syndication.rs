use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::entry::FeedEntry;
use crate::error::ParseError;

use super::Parsed;

/// The implicit default parser: RSS first, Atom as a fallback. Follow URLs
/// do not apply to syndication feeds.
pub fn parse(content: &[u8]) -> Result<Parsed, ParseError> {
    match rss::Channel::read_from(content) {
        Ok(channel) => Ok(Parsed {
            entries: channel.items().iter().filter_map(entry_from_rss).collect(),
            follow_urls: Vec::new(),
        }),
        Err(rss_err) => match atom_syndication::Feed::read_from(content) {
            Ok(feed) => Ok(Parsed {
                entries: feed.entries().iter().filter_map(entry_from_atom).collect(),
                follow_urls: Vec::new(),
            }),
            // Keep the RSS error; it is the usual suspect.
            Err(_) => Err(ParseError::from(rss_err)),
        },
    }
}

fn entry_from_rss(item: &rss::Item) -> Option<FeedEntry> {
    let long_url = item.link()?.to_string();
    let mut raw_fields = HashMap::new();
    if let Some(guid) = item.guid() {
        raw_fields.insert("guid".to_string(), guid.value().to_string());
    }
    if let Some(author) = item.author() {
        raw_fields.insert("author".to_string(), author.to_string());
    }
    if let Some(pub_date) = item.pub_date() {
        raw_fields.insert("pub_date".to_string(), pub_date.to_string());
        if let Ok(parsed) = DateTime::parse_from_rfc2822(pub_date) {
            raw_fields.insert(
                "published".to_string(),
                parsed.with_timezone(&Utc).to_rfc3339(),
            );
        }
    }
    Some(FeedEntry {
        title: item.title().unwrap_or_default().to_string(),
        long_url,
        summary: item.description().unwrap_or_default().to_string(),
        categories: item
            .categories()
            .iter()
            .map(|category| category.name().to_string())
            .collect(),
        raw_fields,
        ..FeedEntry::default()
    })
}

fn entry_from_atom(entry: &atom_syndication::Entry) -> Option<FeedEntry> {
    let long_url = entry
        .links()
        .iter()
        .find(|link| link.rel() == "alternate")
        .or_else(|| entry.links().first())?
        .href()
        .to_string();
    let mut raw_fields = HashMap::from([
        ("guid".to_string(), entry.id().to_string()),
        ("updated".to_string(), entry.updated().to_rfc3339()),
    ]);
    if let Some(author) = entry.authors().first() {
        raw_fields.insert("author".to_string(), author.name().to_string());
    }
    if let Some(published) = entry.published() {
        raw_fields.insert("published".to_string(), published.to_rfc3339());
    }
    Some(FeedEntry {
        title: entry.title().to_string(),
        long_url,
        summary: entry
            .summary()
            .map(|text| text.to_string())
            .unwrap_or_default(),
        categories: entry
            .categories()
            .iter()
            .map(|category| category.term().to_string())
            .collect(),
        raw_fields,
        ..FeedEntry::default()
    })
}

#[cfg(test)]
mod tests {
    use super::parse;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Journal</title>
    <link>http://example.com/</link>
    <description>d</description>
    <item>
      <title>Alpha</title>
      <link>http://example.com/1</link>
      <guid>g1</guid>
      <category>science</category>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First item</description>
    </item>
    <item>
      <title>No link, skipped</title>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Journal</title>
  <id>urn:feed</id>
  <updated>2024-10-21T07:28:00Z</updated>
  <entry>
    <title>Beta</title>
    <id>urn:1</id>
    <updated>2024-10-21T07:28:00Z</updated>
    <link rel="alternate" href="http://example.com/2"/>
    <category term="news"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_and_skips_linkless_items() {
        let parsed = parse(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        let entry = &parsed.entries[0];
        assert_eq!(entry.title, "Alpha");
        assert_eq!(entry.long_url, "http://example.com/1");
        assert_eq!(entry.categories, vec!["science"]);
        assert_eq!(entry.raw_fields.get("guid").map(String::as_str), Some("g1"));
        assert!(entry.raw_fields.contains_key("published"));
        assert!(parsed.follow_urls.is_empty());
    }

    #[test]
    fn falls_back_to_atom() {
        let parsed = parse(ATOM.as_bytes()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].title, "Beta");
        assert_eq!(parsed.entries[0].long_url, "http://example.com/2");
        assert_eq!(parsed.entries[0].categories, vec!["news"]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse(b"not a feed").is_err());
    }
}
