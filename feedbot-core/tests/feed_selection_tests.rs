use std::time::Duration;

use feedbot_core::config::{DedupScope, FeedConfig, Tunables};
use feedbot_core::{DedupStore, Feed, FeedEntry, FeedKey, FilterCache};

fn build(config: FeedConfig, entries: Vec<FeedEntry>) -> Feed {
    let filters = FilterCache::new(8);
    Feed::build(
        FeedKey::new("#news", "upstream"),
        config,
        &Tunables::default(),
        &filters,
        entries,
        1,
        Duration::ZERO,
    )
    .expect("pipeline")
}

fn entries() -> Vec<FeedEntry> {
    vec![
        FeedEntry::new("one", "https://e/1"),
        FeedEntry::new("two", "https://e/2"),
    ]
}

#[tokio::test]
async fn feed_scope_ignores_other_feeds_rows() {
    let db = DedupStore::in_memory();
    db.insert_posted("#news", "other", &["https://e/1".to_string()])
        .await
        .unwrap();
    let feed = build(FeedConfig::default(), entries());
    let unposted = feed.unposted_entries(&db).await.unwrap();
    assert_eq!(unposted.len(), 2);
}

#[tokio::test]
async fn channel_scope_sees_other_feeds_rows() {
    let db = DedupStore::in_memory();
    db.insert_posted("#news", "other", &["https://e/1".to_string()])
        .await
        .unwrap();
    let config = FeedConfig {
        dedup: Some(DedupScope::Channel),
        ..FeedConfig::default()
    };
    let feed = build(config, entries());
    let unposted = feed.unposted_entries(&db).await.unwrap();
    assert_eq!(unposted.len(), 1);
    assert_eq!(unposted[0].long_url, "https://e/2");
}

#[tokio::test]
async fn none_policy_posts_nothing_but_still_marks_seen() {
    let db = DedupStore::in_memory();
    let config = FeedConfig {
        new: Some("none".into()),
        ..FeedConfig::default()
    };
    let feed = build(config, entries());
    let postable = feed.postable_entries(&db, None).await.unwrap();
    assert!(postable.is_empty());
    // The poster records unposted entries, not postable ones.
    let unposted = feed.unposted_entries(&db).await.unwrap();
    assert_eq!(unposted.len(), 2);
}

#[tokio::test]
async fn cap_does_not_apply_to_established_feeds() {
    let db = DedupStore::in_memory();
    db.insert_posted("#news", "upstream", &["https://e/0".to_string()])
        .await
        .unwrap();
    let config = FeedConfig {
        new: Some("none".into()),
        ..FeedConfig::default()
    };
    let feed = build(config, entries());
    let postable = feed.postable_entries(&db, None).await.unwrap();
    assert_eq!(postable.len(), 2);
}

#[tokio::test]
async fn selections_are_computed_once_and_cached() {
    let db = DedupStore::in_memory();
    let feed = build(FeedConfig::default(), entries());
    let first = feed.postable_entries(&db, None).await.unwrap().to_vec();
    // New rows appearing afterwards do not change the cached selection.
    db.insert_posted("#news", "upstream", &["https://e/1".to_string()])
        .await
        .unwrap();
    let second = feed.postable_entries(&db, None).await.unwrap();
    assert_eq!(first.len(), second.len());
}
