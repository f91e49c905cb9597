//! Camera pose synchronization.
//!
//! One-way, throttled, fire-and-forget: local pose changes are rate
//! limited to one emission per window and broadcast without
//! acknowledgement. Remote poses land in a last-write-wins cache keyed
//! by participant and are only surfaced; applying a remote pose to
//! the local camera is an explicit opt-in left to the rendering layer,
//! never done here.

#[cfg(test)]
#[path = "camera_test.rs"]
mod tests;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::throttle::Throttle;
use crate::types::CameraPose;

/// A peer's last known camera pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RemotePose {
    pub pose: CameraPose,
    /// Broker timestamp of the update, milliseconds since epoch.
    pub ts: i64,
}

/// Throttled local broadcast plus the remote pose cache.
#[derive(Debug)]
pub struct CameraSync {
    throttle: Throttle,
    remote: HashMap<String, RemotePose>,
}

impl CameraSync {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            throttle: Throttle::new(interval),
            remote: HashMap::new(),
        }
    }

    /// Whether a local pose change at `now` should reach the wire.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        self.throttle.allow(now)
    }

    /// Merge a remote pose. Last write wins: an update older than the
    /// cached one (by broker timestamp) is dropped. Returns whether the
    /// cache changed.
    pub fn apply_remote(&mut self, participant_id: &str, pose: CameraPose, ts: i64) -> bool {
        match self.remote.get(participant_id) {
            Some(existing) if existing.ts > ts => false,
            _ => {
                self.remote
                    .insert(participant_id.to_owned(), RemotePose { pose, ts });
                true
            }
        }
    }

    /// Drop a peer's cached pose (participant left).
    pub fn remove(&mut self, participant_id: &str) {
        self.remote.remove(participant_id);
    }

    /// Clear the cache (room left or transport lost).
    pub fn clear(&mut self) {
        self.remote.clear();
        self.throttle.reset();
    }

    #[must_use]
    pub fn remote_pose(&self, participant_id: &str) -> Option<&RemotePose> {
        self.remote.get(participant_id)
    }

    #[must_use]
    pub fn remote_poses(&self) -> &HashMap<String, RemotePose> {
        &self.remote
    }
}
