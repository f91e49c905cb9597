#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::fmt;
use std::time::Duration;

use crate::error::SyncError;

/// Tunables for the sync client.
///
/// Defaults follow the broker's published limits: a 10s handshake
/// window, five automatic reconnect attempts, and 3s throttle windows
/// for the low-value high-frequency streams (camera poses, transform
/// write-through, typing expiry).
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// HTTP base URL of the broker, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    /// Display name broadcast with presence-style events.
    pub display_name: String,
    /// Bound on the websocket handshake.
    pub handshake_timeout: Duration,
    /// Fixed delay before an automatic reconnect attempt.
    pub reconnect_delay: Duration,
    /// Failed attempts after which automatic reconnection stops.
    pub max_reconnect_attempts: u32,
    /// Minimum interval between outbound camera pose emissions.
    pub pose_throttle: Duration,
    /// Minimum interval between transform writes per model.
    pub transform_throttle: Duration,
    /// Typing indicators expire after this long without a refresh.
    pub typing_expiry: Duration,
    /// Client-side ceiling on chat message length (UX guidance, not a
    /// security boundary).
    pub chat_max_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_owned(),
            display_name: "Guest".to_owned(),
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 5,
            pose_throttle: Duration::from_millis(3000),
            transform_throttle: Duration::from_millis(3000),
            typing_expiry: Duration::from_millis(3000),
            chat_max_len: 1000,
        }
    }
}

impl SyncConfig {
    /// Derive the websocket URL from the HTTP base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidBaseUrl`] when the base URL has
    /// neither an `http://` nor an `https://` scheme.
    pub fn ws_url(&self) -> Result<String, SyncError> {
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("http://") {
            return Ok(format!("ws://{rest}/api/ws"));
        }
        if let Some(rest) = base.strip_prefix("https://") {
            return Ok(format!("wss://{rest}/api/ws"));
        }
        Err(SyncError::InvalidBaseUrl(self.base_url.clone()))
    }
}

/// Source of the auth credential attached to room joins and REST calls.
///
/// The token is fetched at call time, never cached by the sync layer,
/// so rotation in the host application takes effect immediately.
pub trait CredentialSource: Send + Sync {
    /// Current auth token, or `None` when the user is signed out.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// Fixed-token credential source, for CLIs and tests.
pub struct StaticCredential(pub String);

impl CredentialSource for StaticCredential {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the token itself.
        f.write_str("StaticCredential(..)")
    }
}
