//! Room membership state machine.
//!
//! LIFECYCLE
//! =========
//! `Idle → Joining → Joined` on success, `Idle → Joining → JoinFailed`
//! on rejection. A join needs three things at once: a connected
//! transport, a target room, and no join already in flight or complete
//! for that room; rapid re-invocation collapses into the one in-flight
//! request (the driver parks duplicate callers on a waiter list).
//!
//! Membership is tied to transport health: a disconnect while joined
//! resets to `Idle` and keeps the target room, so the driver can
//! rejoin automatically once the transport recovers. The roster is
//! only meaningful while `Joined`; it is populated from the broker's
//! authoritative join response, never assumed empty.

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;

use std::collections::HashMap;

use crate::types::Participant;

/// Join progress for the active room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinState {
    #[default]
    Idle,
    Joining,
    Joined,
    JoinFailed,
}

/// Outcome of asking the machine to start a join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinDecision {
    /// Already joined to this room; answer with the current roster.
    AlreadyJoined,
    /// A join for this room is in flight; park the caller on it.
    InFlight,
    /// Start a new join request.
    Begin,
}

/// Membership state for the single active room.
#[derive(Debug, Default)]
pub struct RoomMembership {
    target: Option<String>,
    join_state: JoinState,
    roster: HashMap<String, Participant>,
}

impl RoomMembership {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn join_state(&self) -> JoinState {
        self.join_state
    }

    /// The room this client is targeting (joined or trying to join).
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Current roster, unordered. Empty unless `Joined`.
    #[must_use]
    pub fn roster(&self) -> Vec<Participant> {
        self.roster.values().cloned().collect()
    }

    #[must_use]
    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Guarded entry into `Joining`.
    ///
    /// Changing rooms while joined to another implicitly leaves the old
    /// one first; the driver emits the leave notification.
    pub fn begin_join(&mut self, room_id: &str) -> JoinDecision {
        if self.target.as_deref() == Some(room_id) {
            match self.join_state {
                JoinState::Joined => return JoinDecision::AlreadyJoined,
                JoinState::Joining => return JoinDecision::InFlight,
                JoinState::Idle | JoinState::JoinFailed => {}
            }
        }

        self.target = Some(room_id.to_owned());
        self.join_state = JoinState::Joining;
        self.roster.clear();
        JoinDecision::Begin
    }

    /// Join acknowledged; roster comes from the broker's response.
    pub fn join_succeeded(&mut self, roster: Vec<Participant>) {
        self.join_state = JoinState::Joined;
        self.roster = roster
            .into_iter()
            .map(|participant| (participant.id.clone(), participant))
            .collect();
    }

    /// Join rejected. Releases the in-flight guard so a later call may
    /// retry.
    pub fn join_failed(&mut self) {
        self.join_state = JoinState::JoinFailed;
        self.roster.clear();
    }

    /// Leave the active room, clearing membership and target.
    pub fn leave(&mut self) {
        self.target = None;
        self.join_state = JoinState::Idle;
        self.roster.clear();
    }

    /// Transport dropped. Membership resets but the target room is
    /// kept so a reconnect can rejoin it. Returns the room to rejoin,
    /// if any.
    pub fn transport_lost(&mut self) -> Option<String> {
        self.join_state = JoinState::Idle;
        self.roster.clear();
        self.target.clone()
    }

    /// Apply a participant-joined broadcast. Idempotent by id; returns
    /// `false` for duplicates and events outside `Joined`.
    pub fn participant_joined(&mut self, participant: Participant) -> bool {
        if self.join_state != JoinState::Joined {
            return false;
        }
        if self.roster.contains_key(&participant.id) {
            return false;
        }
        self.roster.insert(participant.id.clone(), participant);
        true
    }

    /// Apply a participant-left broadcast. Returns the removed entry,
    /// `None` when the id was unknown.
    pub fn participant_left(&mut self, participant_id: &str) -> Option<Participant> {
        self.roster.remove(participant_id)
    }
}
