use thiserror::Error;

/// Failure of the backing log while fetching or appending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("transport closed")]
    Closed,
}

impl From<rusqlite::Error> for TransportError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// An established live subscription stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscription dropped: {0}")]
    Dropped(String),
    #[error("subscription lagged behind by {0} batches")]
    Lagged(u64),
    #[error("subscription source closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error("invalid feed configuration: {0}")]
    InvalidConfig(String),
    #[error("operation not allowed in state {0}")]
    InvalidState(&'static str),
    #[error("feed session is closed")]
    SessionClosed,
}
