//! Error taxonomy for the sync layer.
//!
//! Transport failures are retried automatically up to the configured
//! attempt cap and otherwise surface through the connection status.
//! Join rejections and acknowledged-request failures surface to the
//! immediate caller and are never retried automatically.
//! Fire-and-forget emissions while disconnected are dropped silently;
//! that gap is accepted and documented, not an error.

use crate::types::Vector3;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("connection handshake timed out")]
    HandshakeTimeout,
    #[error("transport is not connected")]
    NotConnected,
    #[error("no credential available for room join")]
    MissingCredential,
    #[error("room join rejected: {0}")]
    JoinRejected(String),
    #[error("{event} failed: {message}")]
    Request { event: String, message: String },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {code} on {path}")]
    Api { path: String, code: String },
    #[error("chat message is empty after trimming")]
    EmptyMessage,
    #[error("chat message exceeds {0} characters")]
    MessageTooLong(usize),
    #[error("non-finite transform component at {0:?}")]
    NonFiniteTransform(Vector3),
    #[error("sync client has shut down")]
    Closed,
}
