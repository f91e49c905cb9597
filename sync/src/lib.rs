//! Real-time collaboration sync client for SceneRoom.
//!
//! ARCHITECTURE
//! ============
//! A SceneRoom client holds one websocket to the room broker and layers
//! four concerns on top of it:
//!
//! - [`transport`]: connection lifecycle, bounded reconnect, status
//!   subscriptions.
//! - [`bus`]: typed emit/listen over the single transport.
//! - [`room`]: authenticated room membership and the participant
//!   roster.
//! - the synchronizers ([`camera`], [`annotations`], [`chat`]): three
//!   structurally identical protocols riding the same transport.
//!
//! Pose edits to 3D models are not broadcast live; they flow through
//! the REST write-through in [`persist`] instead, so peers see settled
//! transforms on their next full fetch.
//!
//! Pure state machines live in plain structs with sibling unit tests;
//! [`client::SyncClient`] owns the async driver task that wires them to
//! the socket.

pub mod annotations;
pub mod api;
pub mod bus;
pub mod camera;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod persist;
pub mod room;
pub mod session;
pub mod throttle;
pub mod transport;
pub mod types;

pub use client::SyncClient;
pub use config::{CredentialSource, StaticCredential, SyncConfig};
pub use error::SyncError;
pub use session::SyncEvent;
pub use transport::ConnectionStatus;
