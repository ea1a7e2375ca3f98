use tracing::debug;
use url::Url;

use crate::config::FeedConfig;
use crate::entry::{FeedEntry, FeedKey};
use crate::error::{ConfigError, ParseError};

mod html;
mod json;
mod syndication;

/// What a parser extracts from one URL's content: entries plus any secondary
/// URLs to also fetch.
#[derive(Debug, Default)]
pub struct Parsed {
    pub entries: Vec<FeedEntry>,
    pub follow_urls: Vec<String>,
}

/// Selected parser for a feed. Exactly one selector may be configured; the
/// implicit default is the syndication (feedparser) parser. Parsers are pure
/// functions from content bytes to [`Parsed`]; adding one is additive.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserKind {
    Feedparser,
    Hext {
        select: String,
        follow: Option<String>,
    },
    Jmespath {
        select: String,
        follow: Option<String>,
    },
}

impl ParserKind {
    pub fn from_config(cfg: &FeedConfig) -> Result<Self, ConfigError> {
        if cfg.pandas.is_some() {
            return Err(ConfigError::Invalid(
                "the pandas parser is not available in this build".into(),
            ));
        }
        match (&cfg.hext, &cfg.jmespath) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "more than one parser selector configured".into(),
            )),
            (Some(spec), None) => Ok(ParserKind::Hext {
                select: spec.select().to_string(),
                follow: spec.follow().map(str::to_string),
            }),
            (None, Some(spec)) => Ok(ParserKind::Jmespath {
                select: spec.select().to_string(),
                follow: spec.follow().map(str::to_string),
            }),
            (None, None) => Ok(ParserKind::Feedparser),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::Feedparser => "feedparser",
            ParserKind::Hext { .. } => "hext",
            ParserKind::Jmespath { .. } => "jmespath",
        }
    }
}

/// Parse one URL's content for a feed. Pure and side-effect-free; errors
/// propagate to the reader's alert path.
pub fn parse(
    kind: &ParserKind,
    key: &FeedKey,
    url: &str,
    content: &[u8],
) -> Result<Parsed, ParseError> {
    debug!(channel = %key.channel, feed = %key.name, url, parser = kind.name(), "parsing content");
    let base = Url::parse(url).ok();
    match kind {
        ParserKind::Feedparser => syndication::parse(content),
        ParserKind::Hext { select, follow } => {
            html::parse(select, follow.as_deref(), base.as_ref(), content)
        }
        ParserKind::Jmespath { select, follow } => {
            json::parse(select, follow.as_deref(), content)
        }
    }
}

/// Resolve a possibly-relative URL against the page it came from.
pub(crate) fn resolve_url(base: Option<&Url>, href: &str) -> String {
    match base {
        Some(base) => base
            .join(href)
            .map(String::from)
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}
