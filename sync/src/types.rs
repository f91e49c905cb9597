//! Shared data model for the sync layer.
//!
//! These mirror the broker's wire and REST representations. Everything
//! here is plain data; behavior lives in the per-protocol modules.

use serde::{Deserialize, Serialize};

/// World-space vector used for poses, anchors, and transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A user currently joined to a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
}

/// Ephemeral viewer camera pose. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vector3,
    pub rotation: Vector3,
    pub target: Vector3,
    pub zoom_factor: f64,
}

/// Point-anchored note attached to the 3D scene. Persisted; the `id` is
/// always server-assigned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub text: String,
    pub anchor: Vector3,
    pub color_tag: String,
    pub visible: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Client-side fields for an annotation create request, before the
/// server has assigned identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnotationDraft {
    pub text: String,
    pub anchor: Vector3,
    pub color_tag: String,
    pub visible: bool,
}

/// Partial annotation update. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Vector3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl AnnotationPatch {
    /// True when no field is set, i.e. applying it changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.anchor.is_none()
            && self.color_tag.is_none()
            && self.visible.is_none()
    }
}

/// Kind of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserText,
    System,
    Notification,
}

/// Persisted, append-only chat message. Delivered only through the
/// inbound broadcast, including the sender's own copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub body: String,
    pub kind: MessageKind,
    pub sent_at: i64,
}

/// Pose of a 3D model. The authoritative copy lives in durable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTransform {
    pub position: Vector3,
    pub rotation: Vector3,
    pub scale: Vector3,
}
