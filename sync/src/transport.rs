//! Connection lifecycle state.
//!
//! DESIGN
//! ======
//! `ConnectionState` is the pure state machine behind the transport
//! manager: it decides whether a connect attempt may start, counts
//! failed attempts against the configured cap, and arbitrates the
//! single automatic retry after a server-initiated close. The async
//! driver in [`crate::client`] feeds it socket outcomes and acts on its
//! decisions; nothing here performs IO.
//!
//! `StatusBus` carries status transitions to subscribers synchronously,
//! in registration order. A subscriber may unsubscribe from within its
//! own callback; removal is deferred until the broadcast in progress
//! finishes so iteration never observes a torn list.

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Observable health of the single broker connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Outcome of asking the machine to start a connect attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Already connected; the call is a no-op.
    AlreadyConnected,
    /// An attempt is in flight; the caller awaits it instead of racing
    /// a duplicate handshake.
    AttemptInFlight,
    /// Start a new handshake.
    Begin,
}

/// Pure connection state machine. One per client.
#[derive(Debug)]
pub struct ConnectionState {
    status: ConnectionStatus,
    attempts: u32,
    max_attempts: u32,
    /// Set while a server-initiated-close retry is scheduled, so
    /// duplicate close notifications schedule exactly one.
    retry_scheduled: bool,
}

impl ConnectionState {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            max_attempts,
            retry_scheduled: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Guarded entry into `Connecting`. At most one attempt in flight.
    pub fn begin_connect(&mut self) -> ConnectDecision {
        match self.status {
            ConnectionStatus::Connected => ConnectDecision::AlreadyConnected,
            ConnectionStatus::Connecting => ConnectDecision::AttemptInFlight,
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                self.status = ConnectionStatus::Connecting;
                self.retry_scheduled = false;
                ConnectDecision::Begin
            }
        }
    }

    /// Handshake succeeded. Resets the attempt counter.
    pub fn established(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
    }

    /// Handshake or transport error. Returns `true` when another
    /// automatic attempt is allowed; at the cap the machine gives up
    /// and settles in `Disconnected`.
    pub fn attempt_failed(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            self.status = ConnectionStatus::Disconnected;
            false
        } else {
            self.status = ConnectionStatus::Error;
            true
        }
    }

    /// Connection dropped after being established. Returns `true` when
    /// exactly one automatic reconnect should be scheduled (only for
    /// server-initiated closes, and only once per disconnection).
    pub fn dropped(&mut self, server_initiated: bool) -> bool {
        self.status = ConnectionStatus::Disconnected;
        if server_initiated && !self.retry_scheduled {
            self.retry_scheduled = true;
            return true;
        }
        false
    }

    /// Explicit disconnect. Idempotent; always lands in `Disconnected`
    /// with no retry scheduled.
    pub fn shutdown(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.retry_scheduled = false;
        self.attempts = 0;
    }
}

type StatusCallback = Box<dyn FnMut(ConnectionStatus) + Send>;

struct BusInner {
    next_id: u64,
    entries: Vec<(u64, StatusCallback)>,
    /// Ids unsubscribed while a broadcast had the entries checked out.
    tombstones: HashSet<u64>,
    broadcasting: bool,
}

/// Synchronous status-change subscription list.
#[derive(Clone)]
pub struct StatusBus {
    inner: Arc<Mutex<BusInner>>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                entries: Vec::new(),
                tombstones: HashSet::new(),
                broadcasting: false,
            })),
        }
    }

    /// Register a callback; returns its subscription id. Callbacks run
    /// in registration order. A subscriber registered during a
    /// broadcast first fires on the next one.
    pub fn subscribe(&self, callback: impl FnMut(ConnectionStatus) + Send + 'static) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscription. Safe to call from within the callback
    /// being broadcast to.
    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.lock();
        if inner.broadcasting {
            inner.tombstones.insert(id);
        } else {
            inner.entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Invoke every live subscriber with `status`, synchronously.
    pub fn broadcast(&self, status: ConnectionStatus) {
        // Check the entries out so callbacks can re-enter the bus
        // (unsubscribe, even subscribe) without holding the lock.
        let mut checked_out = {
            let mut inner = self.lock();
            inner.broadcasting = true;
            std::mem::take(&mut inner.entries)
        };

        for (id, callback) in &mut checked_out {
            let dead = self.lock().tombstones.contains(id);
            if !dead {
                callback(status);
            }
        }

        let mut inner = self.lock();
        checked_out.retain(|(id, _)| !inner.tombstones.contains(id));
        // Subscribers added during the broadcast live in `entries`;
        // keep them after the checked-out batch to preserve order.
        let added = std::mem::take(&mut inner.entries);
        inner.entries = checked_out;
        inner.entries.extend(added);
        inner.tombstones.clear();
        inner.broadcasting = false;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A panicking subscriber must not wedge status delivery.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
