//! Chat synchronization state.
//!
//! Messages are append-only and arrive exclusively through the inbound
//! broadcast. There is no local echo, so the sender's own message
//! shows up the same way everyone else's does. Sends are acknowledged
//! (at-least-once), which is why [`ChatStore::push`] dedups by id.
//!
//! Typing indicators are ephemeral set membership keyed by display
//! name. Senders refresh `typing=true` on a rolling timer and send an
//! explicit `typing=false` on message send or input clear; the expiry
//! sweep is the backstop for a peer that vanished mid-type.

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::SyncError;
use crate::types::ChatMessage;

/// Validate and normalize an outgoing chat message.
///
/// Trims surrounding whitespace and enforces the configured length
/// ceiling. The ceiling is UX guidance; the broker enforces its own.
///
/// # Errors
///
/// [`SyncError::EmptyMessage`] when nothing is left after trimming,
/// [`SyncError::MessageTooLong`] past the ceiling.
pub fn prepare_outgoing(text: &str, max_len: usize) -> Result<String, SyncError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyncError::EmptyMessage);
    }
    if trimmed.chars().count() > max_len {
        return Err(SyncError::MessageTooLong(max_len));
    }
    Ok(trimmed.to_owned())
}

/// Append-only message list in broker delivery order.
#[derive(Debug, Default)]
pub struct ChatStore {
    messages: Vec<ChatMessage>,
}

impl ChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a REST backlog fetch into the list. A broadcast applied
    /// while the fetch was in flight is newer than the snapshot and is
    /// never redelivered on the socket, so it must survive the merge;
    /// fetched ids already present are dropped. The result is
    /// re-sorted by send time so backlog entries land before live
    /// ones.
    pub fn hydrate(&mut self, messages: Vec<ChatMessage>) {
        for message in messages {
            self.push(message);
        }
        self.messages
            .sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
    }

    /// Append a broadcast message. Redelivery of an id already present
    /// is dropped. Returns whether the list changed.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Who is typing right now, keyed by display name, with self-expiry.
#[derive(Debug)]
pub struct TypingSet {
    expiry: Duration,
    deadlines: HashMap<String, Instant>,
}

impl TypingSet {
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            deadlines: HashMap::new(),
        }
    }

    /// Apply a typing broadcast. `true` inserts or refreshes the
    /// deadline; `false` removes. Returns whether membership changed.
    pub fn apply(&mut self, display_name: &str, is_typing: bool, now: Instant) -> bool {
        if is_typing {
            let fresh = !self.deadlines.contains_key(display_name);
            self.deadlines
                .insert(display_name.to_owned(), now + self.expiry);
            fresh
        } else {
            self.deadlines.remove(display_name).is_some()
        }
    }

    /// Drop entries whose deadline has passed. Returns the expired
    /// names. Called from the housekeeping tick, so a peer that
    /// disconnected mid-type clears without any further events.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.deadlines.remove(name);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    #[must_use]
    pub fn contains(&self, display_name: &str) -> bool {
        self.deadlines.contains_key(display_name)
    }

    /// Names currently typing, sorted for stable display.
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<_> = self.deadlines.keys().cloned().collect();
        names.sort();
        names
    }
}
