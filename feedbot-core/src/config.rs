use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Channels are compared case-insensitively everywhere.
pub fn casefold(name: &str) -> String {
    name.to_lowercase()
}

/// One or more seed URLs for a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UrlSpec {
    One(String),
    Many(Vec<String>),
}

impl UrlSpec {
    pub fn list(&self) -> Vec<String> {
        match self {
            UrlSpec::One(url) => vec![url.clone()],
            UrlSpec::Many(urls) => urls.clone(),
        }
    }
}

/// A parser selector: either a bare selector string or a selector with a
/// secondary follow expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParserSpec {
    Select(String),
    Detailed {
        select: String,
        #[serde(default)]
        follow: Option<String>,
    },
}

impl ParserSpec {
    pub fn select(&self) -> &str {
        match self {
            ParserSpec::Select(s) => s,
            ParserSpec::Detailed { select, .. } => select,
        }
    }

    pub fn follow(&self) -> Option<&str> {
        match self {
            ParserSpec::Select(_) => None,
            ParserSpec::Detailed { follow, .. } => follow.as_deref(),
        }
    }
}

/// Regex lists keyed by entry field, for blacklist and whitelist filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterLists {
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub url: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
}

impl FilterLists {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.url.is_empty() && self.category.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubRule {
    pub pattern: String,
    pub repl: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubConfig {
    #[serde(default)]
    pub title: Option<SubRule>,
    #[serde(default)]
    pub url: Option<SubRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatTemplates {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatConfig {
    /// Field name to regex-with-named-groups; the groups become template
    /// parameters.
    #[serde(default)]
    pub re: HashMap<String, String>,
    #[serde(default, rename = "str")]
    pub templates: FormatTemplates,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    #[default]
    Feed,
    Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub empty: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { empty: true }
    }
}

fn default_true() -> bool {
    true
}

/// Per-feed settings. Every field is optional so the same type serves as the
/// instance-wide `defaults` block; see [`FeedConfig::merged_with`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default)]
    pub url: Option<UrlSpec>,
    /// Hours between polls, jittered.
    #[serde(default)]
    pub period: Option<f64>,
    #[serde(default)]
    pub hext: Option<ParserSpec>,
    #[serde(default)]
    pub jmespath: Option<ParserSpec>,
    #[serde(default)]
    pub pandas: Option<ParserSpec>,
    #[serde(default)]
    pub blacklist: Option<FilterLists>,
    #[serde(default)]
    pub whitelist: Option<FilterLists>,
    #[serde(default)]
    pub sub: Option<SubConfig>,
    #[serde(default)]
    pub format: Option<FormatConfig>,
    #[serde(default)]
    pub https: Option<bool>,
    #[serde(default)]
    pub shorten: Option<bool>,
    #[serde(default)]
    pub dedup: Option<DedupScope>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub new: Option<String>,
    #[serde(default)]
    pub alerts: Option<AlertsConfig>,
}

impl FeedConfig {
    /// Per-feed settings override instance defaults field by field.
    pub fn merged_with(&self, defaults: &FeedConfig) -> FeedConfig {
        macro_rules! pick {
            ($field:ident) => {
                self.$field.clone().or_else(|| defaults.$field.clone())
            };
        }
        FeedConfig {
            url: pick!(url),
            period: self.period.or(defaults.period),
            hext: pick!(hext),
            jmespath: pick!(jmespath),
            pandas: pick!(pandas),
            blacklist: pick!(blacklist),
            whitelist: pick!(whitelist),
            sub: pick!(sub),
            format: pick!(format),
            https: self.https.or(defaults.https),
            shorten: self.shorten.or(defaults.shorten),
            dedup: self.dedup.or(defaults.dedup),
            group: pick!(group),
            new: pick!(new),
            alerts: pick!(alerts),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.url.as_ref().map(UrlSpec::list).unwrap_or_default()
    }

    pub fn dedup_scope(&self) -> DedupScope {
        self.dedup.unwrap_or_default()
    }

    pub fn alerts_on_empty(&self) -> bool {
        self.alerts.as_ref().map_or(true, |a| a.empty)
    }
}

fn default_message_format() -> String {
    "[{feed}] {title} → {url}".to_string()
}

fn default_seconds_per_message() -> f64 {
    2.0
}

fn default_seconds_between_feed_urls() -> f64 {
    2.0
}

fn default_period_hours_min() -> f64 {
    0.2
}

fn default_period_hours_default() -> f64 {
    1.0
}

fn default_period_random_percent() -> f64 {
    5.0
}

fn default_min_channel_idle_time() -> f64 {
    900.0
}

fn default_title_max_bytes() -> usize {
    200
}

fn default_new_feed_posts_max() -> HashMap<String, usize> {
    HashMap::from([
        ("none".to_string(), 0),
        ("some".to_string(), 3),
        ("all".to_string(), usize::MAX),
    ])
}

fn default_new_tag() -> String {
    "some".to_string()
}

fn default_shortener_cache_size() -> usize {
    2048
}

/// Global pipeline knobs. All fields have production defaults and may be
/// overridden per instance, which also lets tests shrink timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tunables {
    #[serde(default = "default_message_format")]
    pub message_format: String,
    #[serde(default = "default_seconds_per_message")]
    pub seconds_per_message: f64,
    #[serde(default = "default_seconds_between_feed_urls")]
    pub seconds_between_feed_urls: f64,
    #[serde(default = "default_period_hours_min")]
    pub period_hours_min: f64,
    #[serde(default = "default_period_hours_default")]
    pub period_hours_default: f64,
    #[serde(default = "default_period_random_percent")]
    pub period_random_percent: f64,
    /// Seconds a channel must have been quiet before the bot posts to it.
    #[serde(default = "default_min_channel_idle_time")]
    pub min_channel_idle_time: f64,
    #[serde(default = "default_title_max_bytes")]
    pub title_max_bytes: usize,
    /// Policy tag to first-post cap for new feeds.
    #[serde(default = "default_new_feed_posts_max")]
    pub new_feed_posts_max: HashMap<String, usize>,
    #[serde(default = "default_new_tag")]
    pub new_default: String,
    #[serde(default = "default_shortener_cache_size")]
    pub shortener_max_cache_size: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty tunables deserialize")
    }
}

impl Tunables {
    /// Average poll period in seconds, clamped to the configured floor.
    pub fn period_avg_secs(&self, cfg: &FeedConfig) -> f64 {
        cfg.period
            .unwrap_or(self.period_hours_default)
            .max(self.period_hours_min)
            * 3600.0
    }

    /// Jittered period bounds in seconds.
    pub fn period_bounds_secs(&self, cfg: &FeedConfig) -> (f64, f64) {
        let avg = self.period_avg_secs(cfg);
        let spread = self.period_random_percent / 100.0;
        (avg * (1.0 - spread), avg * (1.0 + spread))
    }

    /// Feeds polled at the minimum period are exempt from the idle gate.
    pub fn min_idle_time(&self, cfg: &FeedConfig) -> Duration {
        if cfg.period.unwrap_or(self.period_hours_default) > self.period_hours_min {
            Duration::from_secs_f64(self.min_channel_idle_time.max(0.0))
        } else {
            Duration::ZERO
        }
    }

    pub fn new_feed_cap(&self, cfg: &FeedConfig) -> Option<usize> {
        let tag = cfg.new.as_deref().unwrap_or(&self.new_default);
        self.new_feed_posts_max.get(tag).copied()
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from("posted.json")
}

/// Immutable instance configuration: chat endpoint, channels, feeds and
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub host: String,
    pub ssl_port: u16,
    pub nick: String,
    #[serde(default)]
    pub mode: Option<String>,
    pub alerts_channel: String,
    /// channel name to feed name to feed settings.
    pub feeds: HashMap<String, HashMap<String, FeedConfig>>,
    #[serde(default)]
    pub defaults: FeedConfig,
    /// Stop each reader after one successful cycle.
    #[serde(default)]
    pub once: bool,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default)]
    pub tunables: Tunables,
}

impl InstanceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: InstanceConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Merged settings for one feed.
    pub fn effective(&self, channel: &str, feed: &str) -> Option<FeedConfig> {
        self.feeds
            .get(channel)
            .and_then(|feeds| feeds.get(feed))
            .map(|cfg| cfg.merged_with(&self.defaults))
    }

    /// Casefolded names of every channel the bot occupies, alerts channel
    /// included.
    pub fn known_channels(&self) -> HashSet<String> {
        let mut channels: HashSet<String> = self.feeds.keys().map(|c| casefold(c)).collect();
        channels.insert(casefold(&self.alerts_channel));
        channels
    }

    /// True when at least one feed posts shortened URLs.
    pub fn wants_shortener(&self) -> bool {
        self.feeds.iter().any(|(channel, feeds)| {
            feeds.keys().any(|feed| {
                self.effective(channel, feed)
                    .is_some_and(|cfg| cfg.shorten.unwrap_or(false))
            })
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.host.is_empty() || self.nick.is_empty() {
            return invalid("host and nick are required".into());
        }
        if self.alerts_channel.is_empty() {
            return invalid("alerts_channel is required".into());
        }
        if self.feeds.is_empty() {
            return invalid("at least one channel with feeds is required".into());
        }
        let mut seen_channels = HashSet::new();
        for (channel, feeds) in &self.feeds {
            if !seen_channels.insert(casefold(channel)) {
                return invalid(format!("duplicate channel {channel} after casefold"));
            }
            if feeds.is_empty() {
                return invalid(format!("channel {channel} has no feeds"));
            }
            for name in feeds.keys() {
                let cfg = self
                    .effective(channel, name)
                    .expect("feed exists by construction");
                self.validate_feed(channel, name, &cfg)?;
            }
        }
        Ok(())
    }

    fn validate_feed(&self, channel: &str, name: &str, cfg: &FeedConfig) -> Result<(), ConfigError> {
        let fail = |msg: String| {
            Err(ConfigError::Invalid(format!(
                "feed {name} of {channel}: {msg}"
            )))
        };
        if cfg.urls().is_empty() {
            return fail("no url configured".into());
        }
        if cfg.pandas.is_some() {
            return fail("the pandas parser is not available in this build".into());
        }
        let selectors = usize::from(cfg.hext.is_some()) + usize::from(cfg.jmespath.is_some());
        if selectors > 1 {
            return fail("more than one parser selector configured".into());
        }
        if self.tunables.new_feed_cap(cfg).is_none() {
            let tag = cfg.new.as_deref().unwrap_or(&self.tunables.new_default);
            return fail(format!("unknown new-feed policy tag {tag:?}"));
        }
        for lists in [&cfg.blacklist, &cfg.whitelist].into_iter().flatten() {
            for pattern in lists
                .title
                .iter()
                .chain(&lists.url)
                .chain(&lists.category)
            {
                if let Err(err) = Regex::new(pattern) {
                    return fail(format!("bad filter regex {pattern:?}: {err}"));
                }
            }
        }
        if let Some(sub) = &cfg.sub {
            for rule in [&sub.title, &sub.url].into_iter().flatten() {
                if let Err(err) = Regex::new(&rule.pattern) {
                    return fail(format!("bad sub regex {:?}: {err}", rule.pattern));
                }
            }
        }
        if let Some(format) = &cfg.format {
            for (field, pattern) in &format.re {
                if let Err(err) = Regex::new(pattern) {
                    return fail(format!("bad format regex for {field:?}: {err}"));
                }
            }
        }
        Ok(())
    }
}
