//! Typed event bus over the single transport.
//!
//! DESIGN
//! ======
//! Thin emit/listen layer with no business logic. Outbound frames go
//! through a channel drained by the driver's socket writer; `emit`
//! reports `false` instead of erroring when the transport is down, and
//! the frame is dropped. This layer has no queue or replay, so
//! fire-and-forget commands issued while disconnected are lost.
//!
//! Inbound dispatch keeps two registries per event name: any number of
//! independent listeners (`on`/`off`) and a single "latest handler"
//! slot (`set_latest`) that replaces in place, so a caller that keeps
//! rebuilding its closure does not have to unsubscribe first.

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use wire::Frame;

type FrameHandler = Box<dyn FnMut(&Frame) + Send>;

struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, FrameHandler)>>,
    latest: HashMap<String, FrameHandler>,
}

/// Type-safe emit/listen over the transport. Cloneable handle.
#[derive(Clone)]
pub struct EventBus {
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<Frame>,
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Build the bus and the receiving half of the outbound channel,
    /// which the socket writer drains.
    #[must_use]
    pub fn new(connected: Arc<AtomicBool>) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let bus = Self {
            connected,
            outbound,
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
                latest: HashMap::new(),
            })),
        };
        (bus, rx)
    }

    /// Queue a frame for the socket writer. Returns `false` and drops
    /// the frame when the transport is not connected.
    pub fn emit(&self, frame: Frame) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        self.outbound.send(frame).is_ok()
    }

    /// Register an independent listener for `event`. Returns a handle
    /// for [`EventBus::off`].
    pub fn on(&self, event: &str, handler: impl FnMut(&Frame) + Send + 'static) -> u64 {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .entry(event.to_owned())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Deregister a listener previously added with [`EventBus::on`].
    pub fn off(&self, event: &str, id: u64) {
        let mut registry = self.lock();
        if let Some(handlers) = registry.listeners.get_mut(event) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.is_empty() {
                registry.listeners.remove(event);
            }
        }
    }

    /// Install (or replace) the latest-handler slot for `event`.
    pub fn set_latest(&self, event: &str, handler: impl FnMut(&Frame) + Send + 'static) {
        self.lock().latest.insert(event.to_owned(), Box::new(handler));
    }

    /// Clear the latest-handler slot for `event`.
    pub fn clear_latest(&self, event: &str) {
        self.lock().latest.remove(event);
    }

    /// Deliver an inbound frame to every listener registered for its
    /// event name. Called by the driver after its own dispatch.
    pub fn dispatch(&self, frame: &Frame) {
        let mut registry = self.lock();
        let registry = &mut *registry;
        if let Some(handlers) = registry.listeners.get_mut(&frame.event) {
            for (_, handler) in handlers.iter_mut() {
                handler(frame);
            }
        }
        if let Some(handler) = registry.latest.get_mut(&frame.event) {
            handler(frame);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
