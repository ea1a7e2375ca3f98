use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedbot_core::config::{FeedConfig, Tunables, UrlSpec};
use feedbot_core::{
    Bot, ChatEvent, ChatHandle, DedupStore, Deps, FetchConfig, InstanceConfig, OutboundMsg,
    UrlFetcher,
};

const NICK: &str = "newsbot";
const ALERTS: &str = "#bot-alerts";

fn rss_one(title: &str, url: &str) -> String {
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title><link>http://e/</link><description>d</description><item><title>{title}</title><link>{url}</link></item></channel></rss>"#
    )
}

async fn recv_within(
    rx: &mut mpsc::UnboundedReceiver<OutboundMsg>,
    secs: f64,
) -> Option<OutboundMsg> {
    tokio::time::timeout(Duration::from_secs_f64(secs), rx.recv())
        .await
        .ok()
        .flatten()
}

// Two feeds in one group: the fast one reads immediately but must wait at
// the barrier for its slow peer, so the channel gets both batches
// back-to-back.
#[tokio::test]
async fn grouped_feeds_enqueue_together() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/f1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_one("a1", "https://e/a1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/f2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss_one("b1", "https://e/b1")))
        .mount(&server)
        .await;

    let tunables = Tunables {
        seconds_per_message: 0.01,
        seconds_between_feed_urls: 0.0,
        period_hours_min: 0.0,
        period_hours_default: 1e-5,
        period_random_percent: 0.0,
        min_channel_idle_time: 0.0,
        ..Tunables::default()
    };
    // First reads land at roughly half the period: ~2 ms vs ~360 ms.
    let fast = FeedConfig {
        url: Some(UrlSpec::One(format!("{}/f1", server.uri()))),
        period: Some(1e-6),
        group: Some("journals".into()),
        new: Some("all".into()),
        ..FeedConfig::default()
    };
    let slow = FeedConfig {
        url: Some(UrlSpec::One(format!("{}/f2", server.uri()))),
        period: Some(2e-4),
        group: Some("journals".into()),
        new: Some("all".into()),
        ..FeedConfig::default()
    };
    let config = InstanceConfig {
        host: "irc.example.net".into(),
        ssl_port: 6697,
        nick: NICK.into(),
        mode: None,
        alerts_channel: ALERTS.into(),
        feeds: HashMap::from([(
            "#sync".to_string(),
            HashMap::from([("fast".to_string(), fast), ("slow".to_string(), slow)]),
        )]),
        defaults: FeedConfig::default(),
        once: true,
        state_file: "unused-posted.json".into(),
        tunables,
    };

    let (chat, mut outbound) = ChatHandle::new();
    let (events_tx, events_rx) = mpsc::channel(32);
    let fetcher = Arc::new(
        UrlFetcher::new(FetchConfig {
            cache_ttl: Duration::ZERO,
            max_retries: 0,
            ..FetchConfig::default()
        })
        .expect("build fetcher"),
    );
    let mut bot = Bot::start(
        config,
        Deps {
            db: DedupStore::in_memory(),
            fetcher,
            shortener: None,
            chat,
            events: events_rx,
        },
    )
    .expect("start bot");
    tokio::spawn(async move { bot.run().await });
    for channel in ["#sync", ALERTS] {
        events_tx
            .send(ChatEvent::Joined {
                nick: NICK.into(),
                channel: channel.into(),
            })
            .await
            .expect("send join");
    }
    let started = Instant::now();

    let first = recv_within(&mut outbound, 5.0).await.expect("first post");
    let first_elapsed = started.elapsed();
    let second = recv_within(&mut outbound, 5.0).await.expect("second post");
    let second_elapsed = started.elapsed();

    // The fast feed was held at the barrier until the slow one had read.
    assert!(
        first_elapsed >= Duration::from_millis(250),
        "first post arrived after only {first_elapsed:?}"
    );
    // Both batches arrive back-to-back once the barrier opens.
    assert!(
        second_elapsed - first_elapsed <= Duration::from_millis(300),
        "batches were {:?} apart",
        second_elapsed - first_elapsed
    );
    let posts: Vec<String> = vec![first.text, second.text];
    assert!(posts.iter().any(|t| t.contains("https://e/a1")));
    assert!(posts.iter().any(|t| t.contains("https://e/b1")));
}
