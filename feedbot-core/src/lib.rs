pub mod bot;
pub mod chat;
pub mod config;
pub mod dedup;
pub mod entry;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod irc;
pub mod parsers;
mod poster;
mod reader;
pub mod shorten;
pub mod util;

pub use bot::{Bot, Deps, JoinEvent};
pub use chat::{Alerter, ChatEvent, ChatHandle, OutboundMsg};
pub use config::{FeedConfig, InstanceConfig, Tunables};
pub use dedup::DedupStore;
pub use entry::{FeedEntry, FeedKey};
pub use error::{BotError, ChatError, ConfigError, FetchError, ParseError, ShortenError, StoreError};
pub use feed::{Feed, FilterCache};
pub use fetch::{FetchConfig, UrlFetcher};
pub use parsers::ParserKind;
pub use shorten::UrlShortener;
