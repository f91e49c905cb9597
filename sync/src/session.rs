//! Session state and inbound event dispatch.
//!
//! DESIGN
//! ======
//! `SessionState` owns everything the sync layer knows: membership and
//! roster, the annotation and chat stores, the typing set, and the
//! camera pose cache. [`SessionState::apply_event`] routes broadcast
//! frames by event name, mirroring how the broker relays them. All
//! mutation paths are idempotent because our own optimistic applies
//! and their broadcast echoes race freely.
//!
//! Acknowledged responses (`Done`/`Error` frames) are correlated to
//! their requests by the driver, not here.

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;
use wire::Frame;

use crate::annotations::AnnotationStore;
use crate::camera::CameraSync;
use crate::chat::{ChatStore, TypingSet};
use crate::config::SyncConfig;
use crate::room::RoomMembership;
use crate::transport::ConnectionStatus;
use crate::types::{Annotation, AnnotationPatch, CameraPose, ChatMessage, MessageKind, Participant};

/// Notification delivered to sync client subscribers.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    StatusChanged(ConnectionStatus),
    RoomJoined {
        room_id: String,
        roster: Vec<Participant>,
    },
    RoomLeft {
        room_id: String,
    },
    ParticipantJoined(Participant),
    ParticipantLeft {
        participant_id: String,
    },
    /// A peer's camera moved. Surfaced only; following a remote camera
    /// is the rendering layer's opt-in, never applied here.
    CameraUpdated {
        participant_id: String,
        pose: CameraPose,
    },
    AnnotationCreated(Annotation),
    AnnotationUpdated {
        annotation_id: String,
    },
    AnnotationDeleted {
        annotation_id: String,
    },
    ChatMessage(ChatMessage),
    TypingChanged {
        display_name: String,
        is_typing: bool,
    },
}

/// Everything the sync layer knows about the active session.
pub struct SessionState {
    /// Server-assigned id for this connection, from the welcome frame.
    pub local_participant_id: Option<String>,
    pub membership: RoomMembership,
    pub annotations: AnnotationStore,
    pub chat: ChatStore,
    pub typing: TypingSet,
    pub camera: CameraSync,
}

impl SessionState {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            local_participant_id: None,
            membership: RoomMembership::new(),
            annotations: AnnotationStore::new(),
            chat: ChatStore::new(),
            typing: TypingSet::new(config.typing_expiry),
            camera: CameraSync::new(config.pose_throttle),
        }
    }

    /// Route an inbound broadcast frame to the owning store.
    ///
    /// Returns the notification to forward to subscribers, or `None`
    /// when the frame was unknown, malformed, or a no-op (an echo of
    /// state already applied).
    pub fn apply_event(&mut self, frame: &Frame, now: Instant) -> Option<SyncEvent> {
        match frame.event.as_str() {
            "session:connected" => {
                self.local_participant_id = frame
                    .data
                    .get("participant_id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned);
                None
            }

            "room:participant-joined" => {
                let participant = parse_participant(&frame.data)?;
                self.membership
                    .participant_joined(participant.clone())
                    .then_some(SyncEvent::ParticipantJoined(participant))
            }

            "room:participant-left" => {
                let id = frame.data.get("participant_id").and_then(Value::as_str)?;
                let removed = self.membership.participant_left(id)?;
                self.camera.remove(&removed.id);
                self.typing.apply(&removed.display_name, false, now);
                Some(SyncEvent::ParticipantLeft {
                    participant_id: removed.id,
                })
            }

            "camera:updated" => {
                let payload = CameraPayload::deserialize(&frame.data).ok()?;
                // Our own echo carries no new information.
                if self.local_participant_id.as_deref() == Some(payload.participant_id.as_str()) {
                    return None;
                }
                self.camera
                    .apply_remote(&payload.participant_id, payload.pose, frame.ts)
                    .then_some(SyncEvent::CameraUpdated {
                        participant_id: payload.participant_id,
                        pose: payload.pose,
                    })
            }

            "annotation:created" => {
                let annotation = Annotation::deserialize(&frame.data).ok()?;
                self.annotations
                    .upsert(annotation.clone())
                    .then_some(SyncEvent::AnnotationCreated(annotation))
            }

            "annotation:updated" => {
                let payload = AnnotationUpdatePayload::deserialize(&frame.data).ok()?;
                self.annotations
                    .apply_patch(&payload.annotation_id, &payload.patch, frame.ts)
                    .then_some(SyncEvent::AnnotationUpdated {
                        annotation_id: payload.annotation_id,
                    })
            }

            "annotation:deleted" => {
                let id = frame.data.get("annotation_id").and_then(Value::as_str)?;
                self.annotations
                    .remove(id)
                    .then_some(SyncEvent::AnnotationDeleted {
                        annotation_id: id.to_owned(),
                    })
            }

            "chat:message" => {
                let message = parse_chat_message(frame)?;
                self.chat
                    .push(message.clone())
                    .then_some(SyncEvent::ChatMessage(message))
            }

            "chat:typing" => {
                let payload = TypingPayload::deserialize(&frame.data).ok()?;
                // The broker relays our own typing signal back too.
                if self.local_participant_id.is_some()
                    && frame.from == self.local_participant_id
                {
                    return None;
                }
                self.typing
                    .apply(&payload.display_name, payload.is_typing, now)
                    .then_some(SyncEvent::TypingChanged {
                        display_name: payload.display_name,
                        is_typing: payload.is_typing,
                    })
            }

            _ => None,
        }
    }

    /// Transport dropped: reset membership and ephemeral state. The
    /// chat and annotation stores are kept for display and re-synced on
    /// the next join's hydration. Returns the room to rejoin, if any.
    pub fn transport_lost(&mut self) -> Option<String> {
        self.camera.clear();
        self.typing.clear();
        self.membership.transport_lost()
    }

    /// Explicit leave: clear everything room-scoped.
    pub fn left_room(&mut self) {
        self.membership.leave();
        self.annotations.clear();
        self.chat.clear();
        self.typing.clear();
        self.camera.clear();
    }
}

fn parse_participant(data: &Value) -> Option<Participant> {
    let id = data
        .get("participant_id")
        .or_else(|| data.get("id"))
        .and_then(Value::as_str)?
        .to_owned();
    let display_name = data
        .get("display_name")
        .and_then(Value::as_str)
        .unwrap_or("Guest")
        .to_owned();
    Some(Participant { id, display_name })
}

/// Parse a chat broadcast, tolerating older brokers' field names.
fn parse_chat_message(frame: &Frame) -> Option<ChatMessage> {
    let data = &frame.data;
    let body = data
        .get("body")
        .or_else(|| data.get("text"))
        .and_then(Value::as_str)?
        .to_owned();

    let id = data
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(|| frame.id.clone(), ToOwned::to_owned);

    let author_id = data
        .get("author_id")
        .and_then(Value::as_str)
        .or(frame.from.as_deref())
        .unwrap_or("unknown")
        .to_owned();

    let author_display_name = data
        .get("author_display_name")
        .and_then(Value::as_str)
        .unwrap_or("Guest")
        .to_owned();

    let kind = data
        .get("kind")
        .cloned()
        .and_then(|v| MessageKind::deserialize(v).ok())
        .unwrap_or(MessageKind::UserText);

    let sent_at = data
        .get("sent_at")
        .and_then(Value::as_i64)
        .unwrap_or(frame.ts);

    Some(ChatMessage {
        id,
        room_id: frame.room_id.clone().unwrap_or_default(),
        author_id,
        author_display_name,
        body,
        kind,
        sent_at,
    })
}

#[derive(Deserialize)]
struct CameraPayload {
    participant_id: String,
    pose: CameraPose,
}

#[derive(Deserialize)]
struct AnnotationUpdatePayload {
    annotation_id: String,
    #[serde(flatten)]
    patch: AnnotationPatch,
}

#[derive(Deserialize)]
struct TypingPayload {
    display_name: String,
    is_typing: bool,
}
