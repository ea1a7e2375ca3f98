use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures_util::future::try_join_all;
use lru::LruCache;
use serde::Deserialize;
use tracing::debug;

use crate::error::ShortenError;

const DEFAULT_API_BASE: &str = "https://api-ssl.bitly.com/v4/shorten";

#[derive(Debug, Deserialize)]
struct ShortenResponse {
    link: Option<String>,
}

/// Batched URL shortener over the bit.ly v4 API. Tokens rotate round-robin
/// across requests; responses are cached so repeat batches stay cheap.
pub struct UrlShortener {
    client: reqwest::Client,
    api_base: String,
    tokens: Vec<String>,
    next_token: AtomicUsize,
    cache: Mutex<LruCache<String, String>>,
}

impl UrlShortener {
    pub fn new(tokens: Vec<String>, max_cache_size: usize) -> Result<Self, ShortenError> {
        Self::with_api_base(tokens, max_cache_size, DEFAULT_API_BASE.to_string())
    }

    pub fn with_api_base(
        tokens: Vec<String>,
        max_cache_size: usize,
        api_base: String,
    ) -> Result<Self, ShortenError> {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(ShortenError::NoTokens);
        }
        let capacity = NonZeroUsize::new(max_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            client: reqwest::Client::new(),
            api_base,
            tokens,
            next_token: AtomicUsize::new(0),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Shorten all `urls`, returning short URLs in the same order. Any
    /// failure fails the whole batch; the caller decides what to do with it.
    pub async fn shorten_urls(&self, urls: &[String]) -> Result<Vec<String>, ShortenError> {
        let mut results: Vec<Option<String>> = {
            let mut cache = self.cache.lock().expect("shortener cache poisoned");
            urls.iter().map(|url| cache.get(url).cloned()).collect()
        };
        let misses: Vec<(usize, &String)> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .map(|i| (i, &urls[i]))
            .collect();
        if !misses.is_empty() {
            debug!(total = urls.len(), misses = misses.len(), "shortening urls");
            let fetched = try_join_all(misses.iter().map(|(_, url)| self.shorten_one(url))).await?;
            let mut cache = self.cache.lock().expect("shortener cache poisoned");
            for ((index, url), short) in misses.into_iter().zip(fetched) {
                cache.put((*url).clone(), short.clone());
                results[index] = Some(short);
            }
        }
        Ok(results.into_iter().flatten().collect())
    }

    async fn shorten_one(&self, long_url: &str) -> Result<String, ShortenError> {
        let token = &self.tokens[self.next_token.fetch_add(1, Ordering::Relaxed) % self.tokens.len()];
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(token)
            .json(&serde_json::json!({ "long_url": long_url }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ShortenError::Status(status));
        }
        let body: ShortenResponse = response.json().await?;
        body.link.ok_or(ShortenError::MissingLink)
    }
}
