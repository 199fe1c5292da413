use thiserror::Error;
use tokio_tungstenite::tungstenite;

use rowsync_core::SyncError;

/// Server-side failures.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("no data source registered for path {0}")]
    UnknownPath(String),
}

/// Remote table client failures.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("not connected")]
    NotConnected,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection task has stopped")]
    ChannelClosed,

    #[error("item has no valid `{0}` key")]
    MissingKey(String),
}
