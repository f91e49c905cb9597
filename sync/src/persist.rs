//! Transform persistence bridge.
//!
//! DESIGN
//! ======
//! Model pose edits never ride the realtime socket. They are throttled
//! per object and written through to durable storage over REST; peers
//! only see the settled result on their next full fetch. There is no
//! live drag visibility between users.
//!
//! `WriteScheduler` is the pure half: it decides, per model, whether
//! an edit writes now or parks as the latest pending value until the
//! window reopens. `TransformBridge` drives it against the REST
//! client; write failures are logged and the value stays pending for
//! the next flush.

#[cfg(test)]
#[path = "persist_test.rs"]
mod tests;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::api::ApiClient;
use crate::error::SyncError;
use crate::throttle::Throttle;
use crate::types::{ModelTransform, Vector3};

#[derive(Debug)]
struct Slot {
    throttle: Throttle,
    pending: Option<ModelTransform>,
}

/// Per-model write scheduling. Leading edge writes immediately; edits
/// inside the window overwrite a single pending slot (only the latest
/// pose matters, intermediate drag states are noise).
#[derive(Debug)]
pub struct WriteScheduler {
    interval: Duration,
    slots: HashMap<String, Slot>,
}

impl WriteScheduler {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: HashMap::new(),
        }
    }

    /// Offer an edit. Returns the transform to write now, or `None`
    /// when it was parked as pending.
    pub fn offer(
        &mut self,
        model_id: &str,
        transform: ModelTransform,
        now: Instant,
    ) -> Option<ModelTransform> {
        let slot = self.slots.entry(model_id.to_owned()).or_insert(Slot {
            throttle: Throttle::new(self.interval),
            pending: None,
        });

        if slot.throttle.allow(now) {
            slot.pending = None;
            Some(transform)
        } else {
            slot.pending = Some(transform);
            None
        }
    }

    /// Pending transforms whose window has reopened by `now`. Each
    /// returned entry opens a fresh window.
    pub fn take_due(&mut self, now: Instant) -> Vec<(String, ModelTransform)> {
        let mut due = Vec::new();
        for (model_id, slot) in &mut self.slots {
            if slot.pending.is_some() && slot.throttle.allow(now) {
                if let Some(transform) = slot.pending.take() {
                    due.push((model_id.clone(), transform));
                }
            }
        }
        due
    }

    /// Drain every pending transform regardless of throttle windows.
    /// Used on teardown so the last edit of a drag is never lost.
    pub fn drain_pending(&mut self) -> Vec<(String, ModelTransform)> {
        self.slots
            .iter_mut()
            .filter_map(|(model_id, slot)| {
                slot.pending.take().map(|t| (model_id.clone(), t))
            })
            .collect()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|s| s.pending.is_some()).count()
    }
}

fn finite(v: Vector3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Reject transforms the storage layer cannot represent.
///
/// # Errors
///
/// [`SyncError::NonFiniteTransform`] for NaN or infinite components.
pub fn validate_transform(transform: &ModelTransform) -> Result<(), SyncError> {
    if finite(transform.position) && finite(transform.rotation) && finite(transform.scale) {
        Ok(())
    } else {
        Err(SyncError::NonFiniteTransform(transform.position))
    }
}

/// Throttled REST write-through of model transforms. Writes run as
/// detached tasks so the caller's event loop never waits on storage;
/// failures are logged, not returned, since the next write for that
/// model supersedes the lost one anyway.
pub struct TransformBridge {
    api: ApiClient,
    scheduler: WriteScheduler,
}

impl TransformBridge {
    #[must_use]
    pub fn new(api: ApiClient, interval: Duration) -> Self {
        Self {
            api,
            scheduler: WriteScheduler::new(interval),
        }
    }

    /// Record a pose edit from the rendering layer. Writes through
    /// immediately when the per-model window allows, otherwise parks
    /// the value for [`TransformBridge::tick`].
    pub fn model_edited(&mut self, model_id: &str, transform: ModelTransform) {
        if let Some(due) = self.scheduler.offer(model_id, transform, Instant::now()) {
            self.write(model_id.to_owned(), due);
        }
    }

    /// Write out pending transforms whose window has reopened. Called
    /// from the housekeeping tick.
    pub fn tick(&mut self) {
        for (model_id, transform) in self.scheduler.take_due(Instant::now()) {
            self.write(model_id, transform);
        }
    }

    /// Write out everything pending, ignoring throttle windows. Used on
    /// teardown so the last edit of a drag is never lost.
    pub fn flush(&mut self) {
        for (model_id, transform) in self.scheduler.drain_pending() {
            self.write(model_id, transform);
        }
    }

    fn write(&self, model_id: String, transform: ModelTransform) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(error) = api.update_transform(&model_id, &transform).await {
                warn!(%model_id, %error, "transform write-through failed");
            }
        });
    }
}
