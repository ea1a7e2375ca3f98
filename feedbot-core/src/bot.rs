use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Barrier};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{Alerter, ChatEvent, ChatHandle};
use crate::config::{casefold, InstanceConfig};
use crate::dedup::DedupStore;
use crate::error::{BotError, ShortenError};
use crate::feed::FilterCache;
use crate::fetch::UrlFetcher;
use crate::shorten::UrlShortener;
use crate::{poster, reader};

/// Write-once signal that the bot has joined a channel.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    tx: Arc<watch::Sender<bool>>,
}

impl JoinEvent {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(false).0),
        }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.subscribe().borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for JoinEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the workers share. Held on the orchestrator, handed to
/// workers as explicit references at spawn time.
pub(crate) struct BotState {
    pub config: InstanceConfig,
    pub db: DedupStore,
    pub fetcher: Arc<UrlFetcher>,
    pub shortener: Option<Arc<UrlShortener>>,
    pub chat: ChatHandle,
    pub alerter: Alerter,
    /// One token for all outbound posts, process-wide.
    pub send_token: tokio::sync::Mutex<()>,
    pub filters: FilterCache,
    pub shutdown_rx: watch::Receiver<bool>,
    // casefolded channel -> state
    join_events: HashMap<String, JoinEvent>,
    last_incoming: HashMap<String, Arc<Mutex<Instant>>>,
    pub barriers: HashMap<String, Arc<Barrier>>,
}

impl BotState {
    pub(crate) fn join_event(&self, channel: &str) -> JoinEvent {
        match self.join_events.get(&casefold(channel)) {
            Some(event) => event.clone(),
            None => {
                // Unknown channels never block a worker.
                let event = JoinEvent::new();
                event.set();
                event
            }
        }
    }

    pub(crate) fn last_incoming_for(&self, channel: &str) -> Arc<Mutex<Instant>> {
        match self.last_incoming.get(&casefold(channel)) {
            Some(timestamp) => timestamp.clone(),
            None => Arc::new(Mutex::new(Instant::now())),
        }
    }
}

/// External collaborators, injected so the transport can be a real IRC
/// connection or a test double.
pub struct Deps {
    pub db: DedupStore,
    pub fetcher: Arc<UrlFetcher>,
    pub shortener: Option<Arc<UrlShortener>>,
    pub chat: ChatHandle,
    pub events: mpsc::Receiver<ChatEvent>,
}

/// Owns all workers and cross-cutting state, and routes chat events to
/// them.
pub struct Bot {
    state: Arc<BotState>,
    events: mpsc::Receiver<ChatEvent>,
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Bot {
    /// Validate configuration, build shared state and spawn one poster per
    /// channel plus one reader per (channel, feed).
    pub fn start(config: InstanceConfig, deps: Deps) -> Result<Self, BotError> {
        config.validate()?;
        if config.wants_shortener() && deps.shortener.is_none() {
            return Err(BotError::Shorten(ShortenError::NoTokens));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut join_events = HashMap::new();
        let mut last_incoming = HashMap::new();
        for channel in config.known_channels() {
            join_events.insert(channel.clone(), JoinEvent::new());
            last_incoming.insert(channel, Arc::new(Mutex::new(Instant::now())));
        }

        let mut barrier_parties: HashMap<String, usize> = HashMap::new();
        let mut feed_count = 0usize;
        for (channel, feeds) in &config.feeds {
            for name in feeds.keys() {
                feed_count += 1;
                let cfg = config
                    .effective(channel, name)
                    .expect("feed exists by construction");
                if let Some(group) = cfg.group {
                    *barrier_parties.entry(group).or_default() += 1;
                }
            }
        }
        let barriers = barrier_parties
            .into_iter()
            .map(|(group, parties)| (group, Arc::new(Barrier::new(parties))))
            .collect();

        let alerter = Alerter::new(deps.chat.clone(), config.alerts_channel.clone());
        info!(alerts_channel = %config.alerts_channel, "alerts will be sent to the alerts channel");
        let filters = FilterCache::new((feed_count * 2).max(64));

        let state = Arc::new(BotState {
            config,
            db: deps.db,
            fetcher: deps.fetcher,
            shortener: deps.shortener,
            chat: deps.chat,
            alerter,
            send_token: tokio::sync::Mutex::new(()),
            filters,
            shutdown_rx,
            join_events,
            last_incoming,
            barriers,
        });

        let mut workers = Vec::new();
        for (channel, feeds) in &state.config.feeds {
            let (queue_tx, queue_rx) = mpsc::channel(feeds.len() * 2);
            workers.push(tokio::spawn(poster::run(
                state.clone(),
                channel.clone(),
                queue_rx,
            )));
            for name in feeds.keys() {
                workers.push(tokio::spawn(reader::run(
                    state.clone(),
                    channel.clone(),
                    name.clone(),
                    queue_tx.clone(),
                )));
            }
        }
        info!(
            channels = state.config.feeds.len(),
            feeds = feed_count,
            "started channel posters and feed readers"
        );

        Ok(Self {
            state,
            events: deps.events,
            workers,
            shutdown: shutdown_tx,
        })
    }

    /// Route chat events until the transport goes away.
    pub async fn run(&mut self) {
        while let Some(event) = self.events.recv().await {
            handle_event(&self.state, event);
        }
        info!("chat event stream closed, stopping");
    }

    /// Signal every worker and wait briefly for them to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for mut worker in self.workers {
            if tokio::time::timeout(Duration::from_secs(5), &mut worker)
                .await
                .is_err()
            {
                worker.abort();
            }
        }
    }
}

fn handle_event(state: &BotState, event: ChatEvent) {
    match event {
        ChatEvent::Connected => info!("chat client connected"),
        ChatEvent::Disconnected => warn!("chat client disconnected"),
        ChatEvent::Joined { nick, channel } => {
            if nick != state.config.nick {
                return;
            }
            let folded = casefold(&channel);
            let Some(event) = state.join_events.get(&folded) else {
                return;
            };
            event.set();
            if let Some(timestamp) = state.last_incoming.get(&folded) {
                *timestamp.lock().expect("timestamp poisoned") = Instant::now();
            }
            debug!(%channel, "joined channel");
        }
        ChatEvent::Message {
            nick,
            ident,
            host,
            target,
            text,
        } => {
            let folded = casefold(&target);
            if let Some(timestamp) = state.last_incoming.get(&folded) {
                *timestamp.lock().expect("timestamp poisoned") = Instant::now();
                debug!(channel = %target, "updated last incoming message time");
            } else if folded == casefold(&state.config.nick) {
                // A CTCP VERSION probe is routine; anything else is worth a look.
                if text != "\u{1}VERSION\u{1}" {
                    state.alerter.alert_warn(&format!(
                        "Ignoring private message from {nick} having ident {ident} and \
                         hostname {host}: {text}"
                    ));
                }
            }
        }
    }
}
