use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use feedbot_core::config::casefold;
use feedbot_core::irc::{self, IrcConfig};
use feedbot_core::{Bot, DedupStore, Deps, FetchConfig, InstanceConfig, UrlFetcher, UrlShortener};

#[derive(Debug, Parser)]
#[command(name = "feedbot", version, about = "Posts new web feed entries to IRC channels")]
struct Args {
    /// Path to the instance configuration (JSON).
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = InstanceConfig::load(&args.config)
        .with_context(|| format!("load config from {}", args.config.display()))?;

    // Secrets come from the environment, never from the config file.
    let password =
        std::env::var("IRC_PASSWORD").context("IRC_PASSWORD env var is required")?;
    let shortener = if config.wants_shortener() {
        let tokens = std::env::var("BITLY_TOKENS")
            .context("BITLY_TOKENS env var is required when any feed sets shorten")?;
        let tokens: Vec<String> = tokens.split(',').map(str::to_string).collect();
        Some(Arc::new(UrlShortener::new(
            tokens,
            config.tunables.shortener_max_cache_size,
        )?))
    } else {
        None
    };

    let db = DedupStore::load_from(&config.state_file).await;
    let fetch_config = FetchConfig {
        cache_ttl: Duration::from_secs_f64(config.tunables.period_hours_min * 3600.0),
        ..FetchConfig::default()
    };
    let fetcher = Arc::new(UrlFetcher::new(fetch_config)?);

    let mut channels: Vec<String> = config.feeds.keys().cloned().collect();
    if !channels
        .iter()
        .any(|c| casefold(c) == casefold(&config.alerts_channel))
    {
        channels.push(config.alerts_channel.clone());
    }
    let (chat, events, transport) = irc::spawn(IrcConfig {
        host: config.host.clone(),
        ssl_port: config.ssl_port,
        nick: config.nick.clone(),
        password: Some(password),
        mode: config.mode.clone(),
        channels,
    });

    let mut bot = Bot::start(
        config,
        Deps {
            db,
            fetcher,
            shortener,
            chat,
            events,
        },
    )?;

    tokio::select! {
        _ = bot.run() => {}
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }
    bot.shutdown().await;
    transport.abort();
    Ok(())
}
