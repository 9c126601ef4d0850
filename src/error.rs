use thiserror::Error;

/// Failures talking to the TzKT REST API.
#[derive(Debug, Error)]
pub enum TzktError {
    #[error("request to tzkt failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("non 200 status code: {0}")]
    Status(u16),

    #[error("not found")]
    NotFound,

    #[error("failed to decode tzkt response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// Reasons the live event channel could not be (re)established.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("negotiation with events hub failed: {0}")]
    Negotiate(String),

    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("signalr handshake failed: {0}")]
    Handshake(String),

    #[error("subscribe to head failed: {0}")]
    Subscribe(String),

    #[error("connection closed")]
    Closed,
}

impl SubscriptionError {
    /// Short label used for the retry metric.
    pub fn cause(&self) -> &'static str {
        match self {
            SubscriptionError::Subscribe(_) => "subscribe",
            SubscriptionError::Closed => "drop",
            _ => "connect",
        }
    }
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Fetch(#[from] TzktError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0} is required")]
    Missing(&'static str),
}
