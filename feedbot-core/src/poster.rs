use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bot::BotState;
use crate::error::{BotError, ConfigError};
use crate::feed::Feed;
use crate::util::text::render_template;

/// Long-lived worker for one channel: drains the channel queue and posts
/// each feed's entries, gated on channel idle time and the global send
/// token, then records what was posted.
pub(crate) async fn run(state: Arc<BotState>, channel: String, mut queue: mpsc::Receiver<Feed>) {
    debug!(%channel, "channel poster waiting for channel joins");
    state.join_event(&channel).wait().await;
    state.join_event(&state.config.alerts_channel).wait().await;
    info!(%channel, "channel poster started");
    let mut shutdown = state.shutdown_rx.clone();

    loop {
        let feed = tokio::select! {
            feed = queue.recv() => match feed {
                Some(feed) => feed,
                None => return,
            },
            _ = shutdown.changed() => return,
        };
        debug!(feed = %feed, "dequeued");
        if let Err(err) = post_feed(&state, &channel, &feed).await {
            state
                .alerter
                .alert(&format!("Error processing {feed}: {err}"));
        }
    }
}

async fn post_feed(state: &BotState, channel: &str, feed: &Feed) -> Result<(), BotError> {
    let tunables = &state.config.tunables;
    let postable = feed
        .postable_entries(&state.db, state.shortener.as_deref())
        .await?;

    if !postable.is_empty() {
        // Acquire the global send token, but never sleep while holding it:
        // the idle gate releases it, sleeps, and tries again.
        let token = loop {
            let guard = match state.send_token.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(feed = %feed, "waiting to acquire outgoing message lock");
                    state.send_token.lock().await
                }
            };
            let last_incoming = *state
                .last_incoming_for(channel)
                .lock()
                .expect("timestamp poisoned");
            let elapsed = last_incoming.elapsed();
            if elapsed >= feed.min_channel_idle_time {
                break guard;
            }
            let wait = feed.min_channel_idle_time - elapsed;
            drop(guard);
            info!(feed = %feed, wait_secs = wait.as_secs_f64(), "waiting for channel inactivity");
            tokio::time::sleep(wait).await;
        };

        // In case of a netsplit, hold off until the client reconnects.
        if !state.chat.is_connected() {
            warn!(feed = %feed, "waiting for chat client to reconnect");
            while !state.chat.is_connected() {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            info!(feed = %feed, "chat client is connected again");
        }

        info!(feed = %feed, entries = postable.len(), "posting entries");
        let spacing = Duration::from_secs_f64(tunables.seconds_per_message.max(0.0));
        for entry in postable {
            let params = HashMap::from([
                ("feed".to_string(), feed.key.name.clone()),
                ("title".to_string(), entry.title.clone()),
                ("url".to_string(), entry.post_url().to_string()),
            ]);
            let msg = render_template(&tunables.message_format, &params)
                .map_err(|err| ConfigError::Invalid(format!("bad message_format: {err}")))?;
            let sent_at = Instant::now();
            state.chat.send_message(channel, &msg)?;
            debug!(channel, msg = %msg, "sent message");
            tokio::time::sleep_until(sent_at + spacing).await;
        }
        info!(feed = %feed, entries = postable.len(), "posted entries");
        drop(token);
    }

    // Record every unposted entry, not just the postable subset, so entries
    // skipped by the new-feed cap are still marked seen.
    let unposted = feed.unposted_entries(&state.db).await?;
    if !unposted.is_empty() {
        let urls: Vec<String> = unposted.iter().map(|e| e.long_url.clone()).collect();
        state.db.insert_posted(channel, &feed.key.name, &urls).await?;
    }
    Ok(())
}
