use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use lru::LruCache;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::util::hash::content_id;
use crate::util::urls::url_to_netloc;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub request_timeout: Duration,
    /// Extra attempts after the first, for transient failures only.
    pub max_retries: usize,
    /// Base for exponential backoff between attempts.
    pub retry_backoff: Duration,
    /// Concurrent requests allowed per host.
    pub per_host_limit: usize,
    /// How long fetched content stays reusable without a refetch.
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            per_host_limit: 2,
            cache_ttl: Duration::from_secs(720),
            cache_capacity: 512,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

struct CachedContent {
    bytes: Bytes,
    fetched_at: Instant,
    content_id: i64,
}

/// Fetches URL content with caching, bounded retries and per-host
/// politeness. Content is returned as raw bytes; interpretation belongs to
/// the parsers.
pub struct UrlFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    cache: Mutex<LruCache<String, CachedContent>>,
    netlocs: Mutex<LruCache<String, String>>,
}

impl UrlFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feedbot/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()?;
        let capacity = bounded(config.cache_capacity);
        Ok(Self {
            client,
            config,
            hosts: Mutex::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            netlocs: Mutex::new(LruCache::new(bounded(1024))),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        if let Some(bytes) = self.cached(url) {
            debug!(url, "serving content from cache");
            return Ok(bytes);
        }
        let semaphore = self.host_semaphore(url);
        let _permit = semaphore.acquire_owned().await.ok();

        let mut attempt = 0usize;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => {
                    self.remember(url, &bytes);
                    return Ok(bytes);
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_transient() || attempt > self.config.max_retries {
                        return Err(err);
                    }
                    let backoff = self.config.retry_backoff * (1u32 << (attempt - 1));
                    warn!(url, attempt, backoff_ms = backoff.as_millis() as u64, error = %err,
                        "retrying after transient error");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url)?;
        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let max = self.config.max_body_bytes;
        if let Some(len) = response.content_length() {
            if len > max as u64 {
                return Err(FetchError::TooLarge(len));
            }
        }
        let mut buf = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > max {
                return Err(FetchError::TooLarge((buf.len() + chunk.len()) as u64));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    fn cached(&self, url: &str) -> Option<Bytes> {
        let mut cache = self.cache.lock().expect("fetch cache poisoned");
        let entry = cache.get(url)?;
        (entry.fetched_at.elapsed() <= self.config.cache_ttl).then(|| entry.bytes.clone())
    }

    fn remember(&self, url: &str, bytes: &Bytes) {
        let id = content_id(bytes);
        let mut cache = self.cache.lock().expect("fetch cache poisoned");
        match cache.peek(url) {
            Some(prev) if prev.content_id == id => debug!(url, content_id = id, "content unchanged"),
            Some(_) => debug!(url, content_id = id, "content changed"),
            None => {}
        }
        cache.put(
            url.to_string(),
            CachedContent {
                bytes: bytes.clone(),
                fetched_at: Instant::now(),
                content_id: id,
            },
        );
    }

    fn host_semaphore(&self, url: &str) -> Arc<Semaphore> {
        let netloc = {
            let mut netlocs = self.netlocs.lock().expect("netloc cache poisoned");
            match netlocs.get(url) {
                Some(netloc) => netloc.clone(),
                None => {
                    let netloc = url_to_netloc(url);
                    netlocs.put(url.to_string(), netloc.clone());
                    netloc
                }
            }
        };
        let mut hosts = self.hosts.lock().expect("host map poisoned");
        hosts
            .entry(netloc)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_host_limit.max(1))))
            .clone()
    }
}

fn bounded(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)
}
