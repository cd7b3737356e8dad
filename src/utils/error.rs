//! The `error` module defines the error type returned by every session,
//! transport and game operation.
//!
//! Lifecycle misuse on `connect`, `disconnect` and fire-and-forget publishes
//! is logged rather than returned, so most callers only ever see the network
//! related variants.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Settings were rejected before any network call was made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Part of the error vocabulary only. `Session::connect` on an active
    /// session logs a warning and returns `Ok`, so callers never receive it.
    #[error("a broker session is already active")]
    AlreadyConnected,

    #[error("not connected to the message broker")]
    NotConnected,

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    #[error("no queue consumer is active")]
    NotConsuming,

    /// The broker refused or could not complete the connection.
    #[error("connection to the message broker failed: {0}")]
    ConnectFailed(String),

    #[error("{0} timed out")]
    OperationTimeout(String),

    /// The broker explicitly rejected a correlated operation.
    #[error("operation rejected by the broker: {0}")]
    OperationRejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<tungstenite::Error> for SessionError {
    fn from(err: tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}
