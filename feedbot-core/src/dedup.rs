use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::casefold;
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PostedData {
    // casefolded channel -> feed name -> posted long URLs
    posted: HashMap<String, HashMap<String, HashSet<String>>>,
}

/// Durable record of every (channel, feed, url) triple that has been posted.
/// Writes persist atomically before returning; a triple recorded here is
/// never posted again.
#[derive(Debug, Clone)]
pub struct DedupStore {
    inner: Arc<RwLock<PostedData>>,
    path: Option<PathBuf>,
}

impl DedupStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PostedData::default())),
            path: None,
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PostedData>(&bytes) {
                Ok(data) => data,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "unreadable posted store, starting empty");
                    PostedData::default()
                }
            },
            Err(_) => PostedData::default(),
        };
        Self {
            inner: Arc::new(RwLock::new(data)),
            path: Some(path),
        }
    }

    /// True iff nothing has ever been posted for this (channel, feed).
    pub async fn is_new_feed(&self, channel: &str, feed: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .posted
            .get(&casefold(channel))
            .and_then(|feeds| feeds.get(feed))
            .map_or(true, HashSet::is_empty)
    }

    /// Subset of `urls` not yet posted for this (channel, feed), order
    /// preserved.
    pub async fn select_unposted_for_feed(
        &self,
        channel: &str,
        feed: &str,
        urls: &[String],
    ) -> Vec<String> {
        let inner = self.inner.read().await;
        let seen = inner
            .posted
            .get(&casefold(channel))
            .and_then(|feeds| feeds.get(feed));
        urls.iter()
            .filter(|url| seen.map_or(true, |set| !set.contains(*url)))
            .cloned()
            .collect()
    }

    /// Subset of `urls` not yet posted to this channel by any feed, order
    /// preserved. The feed name is only for log context.
    pub async fn select_unposted_for_channel(
        &self,
        channel: &str,
        feed: &str,
        urls: &[String],
    ) -> Vec<String> {
        let inner = self.inner.read().await;
        let feeds = inner.posted.get(&casefold(channel));
        let unposted: Vec<String> = urls
            .iter()
            .filter(|url| {
                feeds.map_or(true, |feeds| !feeds.values().any(|set| set.contains(*url)))
            })
            .cloned()
            .collect();
        debug!(
            channel,
            feed,
            total = urls.len(),
            unposted = unposted.len(),
            "channel-scoped dedup query"
        );
        unposted
    }

    /// Record the triples for all `urls` and persist before returning.
    /// Replaying the same call is a no-op.
    pub async fn insert_posted(
        &self,
        channel: &str,
        feed: &str,
        urls: &[String],
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.write().await;
            let set = inner
                .posted
                .entry(casefold(channel))
                .or_default()
                .entry(feed.to_string())
                .or_default();
            for url in urls {
                set.insert(url.clone());
            }
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            debug!("posted store is in-memory only, skipping persist");
            return Ok(());
        };
        let bytes = {
            let inner = self.inner.read().await;
            serde_json::to_vec_pretty(&*inner)?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Atomic replace so a crash mid-write cannot lose the whole store.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
