use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bot::BotState;
use crate::config::FeedConfig;
use crate::entry::FeedKey;
use crate::error::BotError;
use crate::feed::Feed;
use crate::parsers::{self, ParserKind};

/// Long-lived worker for one (channel, feed): sleep a jittered period, read
/// and parse every URL, run the pipeline, rendezvous with the feed's group
/// and enqueue the result for the channel poster.
pub(crate) async fn run(
    state: Arc<BotState>,
    channel: String,
    name: String,
    queue: mpsc::Sender<Feed>,
) {
    let key = FeedKey::new(channel.clone(), name.clone());
    let Some(config) = state.config.effective(&channel, &name) else {
        return;
    };
    let parser = match ParserKind::from_config(&config) {
        Ok(parser) => parser,
        Err(err) => {
            state
                .alerter
                .alert(&format!("Cannot start reader for {key}: {err}"));
            return;
        }
    };
    let tunables = &state.config.tunables;
    let period_avg = tunables.period_avg_secs(&config);
    let (period_min, period_max) = tunables.period_bounds_secs(&config);
    let mut shutdown = state.shutdown_rx.clone();

    debug!(feed = %key, "feed reader waiting for channel joins");
    state.join_event(&channel).wait().await;
    state.join_event(&state.config.alerts_channel).wait().await;
    debug!(feed = %key, "feed reader started");

    // Backdating by half a period spreads the first reads across startup.
    let mut query_time = Instant::now()
        .checked_sub(Duration::from_secs_f64(period_avg / 2.0))
        .unwrap_or_else(Instant::now);

    loop {
        let period = sample_period(period_min, period_max);
        query_time = Instant::now().max(query_time + period);
        tokio::select! {
            _ = tokio::time::sleep_until(query_time) => {}
            _ = shutdown.changed() => return,
        }

        match read_cycle(&state, &key, &config, &parser).await {
            Ok(feed) => {
                if let Some(group) = &config.group {
                    if let Some(barrier) = state.barriers.get(group) {
                        debug!(feed = %feed, %group, "waiting for other feeds in group");
                        barrier.wait().await;
                        debug!(feed = %feed, %group, "group is ready");
                    }
                }
                match queue.try_send(feed) {
                    Ok(()) => {}
                    Err(TrySendError::Full(feed)) => {
                        state.alerter.alert_warn(&format!(
                            "Queue for {channel} is full. Feed {name} of {channel} will be \
                             put in the queue in blocking mode."
                        ));
                        if queue.send(feed).await.is_err() {
                            return;
                        }
                    }
                    Err(TrySendError::Closed(_)) => return,
                }
                if state.config.once {
                    warn!(feed = %key, "discontinuing reader");
                    return;
                }
            }
            Err(err) => {
                state
                    .alerter
                    .alert(&format!("Error reading feed {name} of {channel}: {err}"));
            }
        }
    }
}

/// One poll: fetch every seed URL plus any follow URLs the parser surfaces,
/// then run the entry pipeline.
async fn read_cycle(
    state: &BotState,
    key: &FeedKey,
    config: &FeedConfig,
    parser: &ParserKind,
) -> Result<Feed, BotError> {
    let started = Instant::now();
    let tunables = &state.config.tunables;
    let mut urls_pending: VecDeque<String> = config.urls().into();
    let mut urls_read: Vec<String> = Vec::new();
    let mut entries = Vec::new();

    while let Some(url) = urls_pending.pop_front() {
        let fetched = state.fetcher.fetch(&url).await;
        let read_finished = Instant::now();
        urls_read.push(url.clone());

        match fetched {
            Ok(content) => {
                let parsed = parsers::parse(parser, key, &url, &content)?;
                let entry_count = parsed.entries.len();
                let follow_count = parsed.follow_urls.len();
                entries.extend(parsed.entries);
                for follow in parsed.follow_urls {
                    if !urls_read.contains(&follow) && !urls_pending.contains(&follow) {
                        urls_pending.push_back(follow);
                    }
                }
                if entry_count == 0 {
                    let msg = format!(
                        "Parsed 0 entries and {follow_count} followable URLs from {url} for \
                         feed {} of {} using the {} parser. Either check the feed \
                         configuration, or wait for its next read, or set alerts/empty to \
                         false for it.",
                        key.name,
                        key.channel,
                        parser.name()
                    );
                    if config.alerts_on_empty() {
                        state.alerter.alert(&msg);
                    } else {
                        warn!("{msg}");
                    }
                } else {
                    debug!(feed = %key, %url, entries = entry_count, follow = follow_count, "parsed url");
                }
            }
            // One bad URL does not fail the cycle; the rest still count.
            Err(err) => warn!(feed = %key, %url, error = %err, "failed to read feed url"),
        }

        if !urls_pending.is_empty() {
            let pacing = Duration::from_secs_f64(tunables.seconds_between_feed_urls.max(0.0));
            let elapsed = read_finished.elapsed();
            if pacing > elapsed {
                tokio::time::sleep(pacing - elapsed).await;
            }
        }
    }

    let num_urls_read = urls_read.len();
    let feed = Feed::build(
        key.clone(),
        config.clone(),
        tunables,
        &state.filters,
        entries,
        num_urls_read,
        started.elapsed(),
    )?;
    info!(
        feed = %feed,
        urls_read = num_urls_read,
        entries = feed.entries.len(),
        elapsed_secs = feed.read_elapsed.as_secs_f64(),
        "retrieved feed"
    );
    Ok(feed)
}

fn sample_period(min_secs: f64, max_secs: f64) -> Duration {
    let secs = if max_secs > min_secs {
        rand::thread_rng().gen_range(min_secs..max_secs)
    } else {
        min_secs
    };
    Duration::from_secs_f64(secs.max(0.0))
}
