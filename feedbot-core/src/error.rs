use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("response too large: {0} bytes")]
    TooLarge(u64),
}

impl FetchError {
    /// Transient failures are retried by the fetcher; the rest fail the URL
    /// immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(err) => !err.is_builder(),
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::InvalidUrl(_) | FetchError::TooLarge(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("feed parsing error: {0}")]
    Rss(#[from] rss::Error),
    #[error("atom parsing error: {0}")]
    Atom(#[from] atom_syndication::Error),
    #[error("json parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad selector: {0}")]
    Selector(String),
    #[error("selector matched nothing at {0}")]
    NoMatch(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("no shortener tokens configured")]
    NoTokens,
    #[error("shortener request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("shortener returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("shortener response is missing the link field")]
    MissingLink,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("chat client is not running")]
    Disconnected,
}

/// Umbrella error for worker loops; every variant is alerted and the worker
/// continues.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("entry {url} has no {field:?} field to search with format.re")]
    MissingFormatField { field: String, url: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Shorten(#[from] ShortenError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}
