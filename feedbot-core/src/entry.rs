use std::collections::HashMap;

/// Identity of a configured feed: the pair of channel and feed name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub channel: String,
    pub name: String,
}

impl FeedKey {
    pub fn new(channel: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "feed {} of {}", self.name, self.channel)
    }
}

/// One item from a parsed feed. Identity is the long URL; everything else is
/// presentation.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: String,
    pub long_url: String,
    /// Populated only when shortening is enabled for the feed.
    pub short_url: Option<String>,
    pub summary: String,
    pub categories: Vec<String>,
    /// Opaque source fields from the parser, available to `format.re`
    /// substitutions.
    pub raw_fields: HashMap<String, String>,
    /// Whitelist title pattern that admitted this entry, if any.
    pub matching_title_pattern: Option<String>,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, long_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            long_url: long_url.into(),
            ..Self::default()
        }
    }

    /// The URL to post: the short URL when present, the long URL otherwise.
    pub fn post_url(&self) -> &str {
        self.short_url.as_deref().unwrap_or(&self.long_url)
    }
}

impl PartialEq for FeedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.long_url == other.long_url
    }
}

impl Eq for FeedEntry {}

impl std::hash::Hash for FeedEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.long_url.hash(state);
    }
}
