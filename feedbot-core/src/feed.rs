use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{DedupScope, FeedConfig, FilterLists, Tunables};
use crate::dedup::DedupStore;
use crate::entry::{FeedEntry, FeedKey};
use crate::error::{BotError, ShortenError};
use crate::shorten::UrlShortener;
use crate::util::html::html_to_text;
use crate::util::text::{is_all_caps, render_template, sentence_case, shorten_to_bytes_width};

/// Compiled regex lists for one filter of one feed.
#[derive(Debug, Default)]
pub struct CompiledFilters {
    title: Vec<Regex>,
    url: Vec<Regex>,
    category: Vec<Regex>,
}

impl CompiledFilters {
    fn compile(lists: &FilterLists) -> Self {
        // Patterns were validated at startup; anything bad now is skipped.
        let compile_all = |patterns: &[String]| {
            patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        warn!(%pattern, error = %err, "skipping uncompilable filter pattern");
                        None
                    }
                })
                .collect()
        };
        Self {
            title: compile_all(&lists.title),
            url: compile_all(&lists.url),
            category: compile_all(&lists.category),
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.url.is_empty() && self.category.is_empty()
    }

    /// Any pattern under any key matching the corresponding field.
    fn matches(&self, entry: &FeedEntry) -> bool {
        self.matching(entry).is_some()
    }

    /// The first (key, pattern) that matches, checking title, then url, then
    /// categories.
    fn matching(&self, entry: &FeedEntry) -> Option<(&'static str, String)> {
        for re in &self.title {
            if re.is_match(&entry.title) {
                return Some(("title", re.as_str().to_string()));
            }
        }
        for re in &self.url {
            if re.is_match(&entry.long_url) {
                return Some(("url", re.as_str().to_string()));
            }
        }
        for re in &self.category {
            if entry.categories.iter().any(|c| re.is_match(c)) {
                return Some(("category", re.as_str().to_string()));
            }
        }
        None
    }
}

/// Bounded cache of compiled filter lists keyed by (channel, feed, list
/// type). Feeds re-read every period; their patterns never change.
pub struct FilterCache {
    cache: Mutex<LruCache<(String, String, &'static str), Arc<CompiledFilters>>>,
}

impl FilterCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(
        &self,
        key: &FeedKey,
        list_type: &'static str,
        lists: Option<&FilterLists>,
    ) -> Arc<CompiledFilters> {
        let cache_key = (key.channel.clone(), key.name.clone(), list_type);
        let mut cache = self.cache.lock().expect("filter cache poisoned");
        if let Some(compiled) = cache.get(&cache_key) {
            return compiled.clone();
        }
        debug!(channel = %key.channel, feed = %key.name, list_type, "caching compiled patterns");
        let compiled = Arc::new(match lists {
            Some(lists) => CompiledFilters::compile(lists),
            None => CompiledFilters::default(),
        });
        cache.put(cache_key, compiled.clone());
        compiled
    }
}

/// One poll's worth of a feed: filtered, reshaped entries plus everything
/// the poster needs. Produced by a reader, consumed by one poster, then
/// dropped.
#[derive(Debug)]
pub struct Feed {
    pub key: FeedKey,
    pub config: FeedConfig,
    pub entries: Vec<FeedEntry>,
    pub num_urls_read: usize,
    pub min_channel_idle_time: Duration,
    pub read_elapsed: Duration,
    new_feed_cap: usize,
    unposted: OnceCell<Vec<FeedEntry>>,
    postable: OnceCell<Vec<FeedEntry>>,
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.key.fmt(f)
    }
}

impl Feed {
    /// Run the entry pipeline over freshly parsed entries and assemble the
    /// Feed handed to the channel queue.
    pub fn build(
        key: FeedKey,
        config: FeedConfig,
        tunables: &Tunables,
        filters: &FilterCache,
        entries: Vec<FeedEntry>,
        num_urls_read: usize,
        read_elapsed: Duration,
    ) -> Result<Self, BotError> {
        let blacklist = filters.get(&key, "blacklist", config.blacklist.as_ref());
        let whitelist = filters.get(&key, "whitelist", config.whitelist.as_ref());
        let entries = process_entries(&key, &config, tunables, &blacklist, &whitelist, entries)?;
        let min_channel_idle_time = tunables.min_idle_time(&config);
        let new_feed_cap = tunables.new_feed_cap(&config).unwrap_or(usize::MAX);
        Ok(Self {
            key,
            config,
            entries,
            num_urls_read,
            min_channel_idle_time,
            read_elapsed,
            new_feed_cap,
            unposted: OnceCell::new(),
            postable: OnceCell::new(),
        })
    }

    /// Entries not yet recorded in the dedup store under the configured
    /// scope, in pipeline order. Computed once and cached.
    pub async fn unposted_entries(&self, db: &DedupStore) -> Result<&[FeedEntry], BotError> {
        let entries = self
            .unposted
            .get_or_try_init(|| async {
                let urls: Vec<String> =
                    self.entries.iter().map(|e| e.long_url.clone()).collect();
                let unposted = match self.config.dedup_scope() {
                    DedupScope::Channel => {
                        db.select_unposted_for_channel(&self.key.channel, &self.key.name, &urls)
                            .await
                    }
                    DedupScope::Feed => {
                        db.select_unposted_for_feed(&self.key.channel, &self.key.name, &urls)
                            .await
                    }
                };
                let unposted: HashSet<String> = unposted.into_iter().collect();
                let entries: Vec<FeedEntry> = self
                    .entries
                    .iter()
                    .filter(|e| unposted.contains(&e.long_url))
                    .cloned()
                    .collect();
                debug!(feed = %self, unposted = entries.len(), "selected unposted entries");
                Ok::<_, BotError>(entries)
            })
            .await?;
        Ok(entries.as_slice())
    }

    /// The entries to actually post: unposted entries, capped for new feeds,
    /// with short URLs resolved when shortening is on. Computed once and
    /// cached.
    pub async fn postable_entries(
        &self,
        db: &DedupStore,
        shortener: Option<&UrlShortener>,
    ) -> Result<&[FeedEntry], BotError> {
        let entries = self
            .postable
            .get_or_try_init(|| async {
                let mut entries = self.unposted_entries(db).await?.to_vec();
                if db.is_new_feed(&self.key.channel, &self.key.name).await
                    && entries.len() > self.new_feed_cap
                {
                    debug!(
                        feed = %self,
                        cap = self.new_feed_cap,
                        skipped = entries.len() - self.new_feed_cap,
                        "capping first post of new feed"
                    );
                    entries.truncate(self.new_feed_cap);
                }
                if !entries.is_empty() && self.config.shorten.unwrap_or(false) {
                    let shortener = shortener.ok_or(ShortenError::NoTokens)?;
                    let long_urls: Vec<String> =
                        entries.iter().map(|e| e.long_url.clone()).collect();
                    let short_urls = shortener.shorten_urls(&long_urls).await?;
                    for (entry, short_url) in entries.iter_mut().zip(short_urls) {
                        entry.short_url = Some(short_url);
                    }
                }
                Ok::<_, BotError>(entries)
            })
            .await?;
        Ok(entries.as_slice())
    }
}

/// The reshaping pipeline, applied in this exact order. A `format.re` field
/// absent from an entry's parameters fails the whole batch; the reader
/// alerts and retries next period.
fn process_entries(
    key: &FeedKey,
    config: &FeedConfig,
    tunables: &Tunables,
    blacklist: &CompiledFilters,
    whitelist: &CompiledFilters,
    mut entries: Vec<FeedEntry>,
) -> Result<Vec<FeedEntry>, BotError> {
    // Remove blacklisted entries
    if !blacklist.is_empty() {
        let before = entries.len();
        entries.retain(|entry| !blacklist.matches(entry));
        debug!(feed = %key, before, after = entries.len(), "applied blacklist");
        if entries.is_empty() {
            return Ok(entries);
        }
    }

    // Keep only whitelisted entries, remembering the matching title pattern
    if !whitelist.is_empty() {
        let mut kept = Vec::new();
        for mut entry in entries {
            if let Some((list_key, pattern)) = whitelist.matching(&entry) {
                if list_key == "title" {
                    entry.matching_title_pattern = Some(pattern);
                }
                kept.push(entry);
            }
        }
        entries = kept;
        debug!(feed = %key, after = entries.len(), "applied whitelist");
        if entries.is_empty() {
            return Ok(entries);
        }
    }

    // Enforce HTTPS URLs
    if config.https.unwrap_or(false) {
        for entry in &mut entries {
            if let Some(rest) = entry.long_url.strip_prefix("http://") {
                entry.long_url = format!("https://{rest}");
            }
        }
    }

    // Substitute titles and URLs
    if let Some(sub) = &config.sub {
        if let Some(rule) = &sub.title {
            if let Ok(re) = Regex::new(&rule.pattern) {
                for entry in &mut entries {
                    entry.title = re.replace_all(&entry.title, rule.repl.as_str()).into_owned();
                }
            }
        }
        if let Some(rule) = &sub.url {
            if let Ok(re) = Regex::new(&rule.pattern) {
                for entry in &mut entries {
                    entry.long_url = re
                        .replace_all(&entry.long_url, rule.repl.as_str())
                        .into_owned();
                }
            }
        }
    }

    // Format entries from raw fields and named-group captures
    if let Some(format) = &config.format {
        let compiled: Vec<(String, Regex)> = format
            .re
            .iter()
            .filter_map(|(field, pattern)| {
                Regex::new(pattern).ok().map(|re| (field.clone(), re))
            })
            .collect();
        let title_template = format.templates.title.as_deref().unwrap_or("{title}");
        let url_template = format.templates.url.as_deref().unwrap_or("{url}");
        for entry in &mut entries {
            let mut params: HashMap<String, String> = entry.raw_fields.clone();
            params.insert("title".to_string(), entry.title.clone());
            params.insert("url".to_string(), entry.long_url.clone());
            params.insert("summary".to_string(), entry.summary.clone());
            params.insert("categories".to_string(), entry.categories.join(", "));
            for (field, re) in &compiled {
                let value = params.get(field).cloned().ok_or_else(|| {
                    BotError::MissingFormatField {
                        field: field.clone(),
                        url: entry.long_url.clone(),
                    }
                })?;
                if let Some(caps) = re.captures(&value) {
                    for name in re.capture_names().flatten() {
                        if let Some(m) = caps.name(name) {
                            params.insert(name.to_string(), m.as_str().to_string());
                        }
                    }
                }
            }
            match render_template(title_template, &params) {
                Ok(title) => entry.title = title,
                Err(err) => warn!(
                    feed = %key, url = %entry.long_url, template = title_template, error = %err,
                    "cannot format entry title"
                ),
            }
            match render_template(url_template, &params) {
                Ok(url) => entry.long_url = url,
                Err(err) => warn!(
                    feed = %key, url = %entry.long_url, template = url_template, error = %err,
                    "cannot format entry url"
                ),
            }
        }
    }

    // Escape spaces in URLs
    for entry in &mut entries {
        entry.long_url = entry.long_url.trim().replace(' ', "%20");
    }

    // Strip HTML tags from titles and summaries
    for entry in &mut entries {
        entry.title = html_to_text(&entry.title);
        entry.summary = html_to_text(&entry.summary);
    }

    // Strip unicode quotes enclosing a whole title
    const QUOTE_BEGIN: char = '\u{201C}';
    const QUOTE_END: char = '\u{201D}';
    for entry in &mut entries {
        let title = &entry.title;
        if title.len() > QUOTE_BEGIN.len_utf8() + QUOTE_END.len_utf8()
            && title.starts_with(QUOTE_BEGIN)
            && title.ends_with(QUOTE_END)
        {
            let inner = &title[QUOTE_BEGIN.len_utf8()..title.len() - QUOTE_END.len_utf8()];
            if !inner.contains(QUOTE_BEGIN) && !inner.contains(QUOTE_END) {
                entry.title = inner.to_string();
            }
        }
    }

    // Remove trailing periods from single-sentence titles. The ". " test is
    // crude on purpose.
    for entry in &mut entries {
        let stripped = entry.title.trim_end();
        if !stripped.contains(". ") {
            entry.title = stripped.trim_end_matches('.').to_string();
        }
    }

    // Recapitalize all-caps multi-word titles
    for entry in &mut entries {
        let multi_word = entry.title.split_whitespace().nth(1).is_some();
        if multi_word && is_all_caps(&entry.title) {
            entry.title = sentence_case(&entry.title);
        }
    }

    // Shorten titles to the byte budget
    for entry in &mut entries {
        entry.title = shorten_to_bytes_width(&entry.title, tunables.title_max_bytes);
    }

    // Remove duplicate URLs while preserving first-seen order
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.long_url.clone()));

    Ok(entries)
}
