//! Shared frame model and protobuf codec for the realtime transport.
//!
//! Every message between a SceneRoom client and the room broker is a
//! [`Frame`]: a named event plus a flexible JSON payload, encoded over
//! protobuf for compact binary transport. Acknowledged commands
//! correlate their responses via `parent_id`; fire-and-forget commands
//! and server broadcasts have none.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `kind` integer on the wire does not map to a known [`Kind`] variant.
    #[error("invalid frame kind: {0}")]
    InvalidKind(i32),
}

/// Role of a frame in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Client command. May or may not expect a response.
    Request,
    /// Server-initiated broadcast (participant joined, chat message, ...).
    Event,
    /// Successful terminal response to an acknowledged command.
    Done,
    /// Error terminal response to an acknowledged command.
    Error,
}

impl Kind {
    /// Terminal kinds end a request/response exchange.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Kind::Done | Kind::Error)
    }

    fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireKind::Request as i32,
            Self::Event => WireKind::Event as i32,
            Self::Done => WireKind::Done as i32,
            Self::Error => WireKind::Error as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireKind::try_from(value) {
            Ok(WireKind::Request) => Ok(Self::Request),
            Ok(WireKind::Event) => Ok(Self::Event),
            Ok(WireKind::Done) => Ok(Self::Done),
            Ok(WireKind::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidKind(value)),
        }
    }
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    /// ID of the request frame this responds to, if any.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch at construction.
    pub ts: i64,
    /// Room context, if any (UUID string).
    pub room_id: Option<String>,
    /// Sender identifier (participant ID or broker label).
    pub from: Option<String>,
    /// Namespaced event name, e.g. `"room:join"` or `"chat:message"`.
    pub event: String,
    /// Role of this frame in the protocol.
    pub kind: Kind,
    /// Arbitrary JSON payload.
    pub data: Value,
}

impl Frame {
    /// Create a client command frame.
    #[must_use]
    pub fn request(event: &str, room_id: Option<&str>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            room_id: room_id.map(ToOwned::to_owned),
            from: None,
            event: event.to_owned(),
            kind: Kind::Request,
            data,
        }
    }

    /// Create a broadcast event frame (broker side, and tests).
    #[must_use]
    pub fn event(event: &str, room_id: Option<&str>, data: Value) -> Self {
        Self {
            kind: Kind::Event,
            ..Self::request(event, room_id, data)
        }
    }

    /// Create a successful terminal response to `request`.
    #[must_use]
    pub fn done_for(request: &Frame, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: Some(request.id.clone()),
            ts: now_ms(),
            room_id: request.room_id.clone(),
            from: None,
            event: request.event.clone(),
            kind: Kind::Done,
            data,
        }
    }

    /// Create an error terminal response to `request`.
    #[must_use]
    pub fn error_for(request: &Frame, message: &str) -> Self {
        Self {
            kind: Kind::Error,
            data: serde_json::json!({ "message": message }),
            ..Self::done_for(request, Value::Object(Map::new()))
        }
    }

    /// Extract the error message from an error frame's payload.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data
            .get("message")
            .or_else(|| self.data.get("error"))
            .and_then(Value::as_str)
    }
}

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        room_id: frame.room_id.clone(),
        from: frame.from.clone(),
        event: frame.event.clone(),
        kind: frame.kind.as_i32(),
        data: Some(value_to_proto(&frame.data)),
    };

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot fail; prost's only error here
    // is BufferTooSmall for fixed buffers.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidKind`] for out-of-range kind values.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        room_id: wire.room_id,
        from: wire.from,
        event: wire.event,
        kind: Kind::from_i32(wire.kind)?,
        data: wire
            .data
            .as_ref()
            .map_or(Value::Object(Map::new()), value_from_proto),
    })
}

fn value_to_proto(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind as K;

    let kind = match value {
        Value::Null => K::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(b) => K::BoolValue(*b),
        Value::Number(n) => K::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => K::StringValue(s.clone()),
        Value::Array(items) => K::ListValue(prost_types::ListValue {
            values: items.iter().map(value_to_proto).collect(),
        }),
        Value::Object(fields) => K::StructValue(prost_types::Struct {
            fields: fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_proto(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

fn value_from_proto(value: &prost_types::Value) -> Value {
    use prost_types::value::Kind as K;

    match &value.kind {
        None | Some(K::NullValue(_)) => Value::Null,
        Some(K::BoolValue(b)) => Value::Bool(*b),
        Some(K::NumberValue(n)) => number_from_proto(*n),
        Some(K::StringValue(s)) => Value::String(s.clone()),
        Some(K::ListValue(list)) => {
            Value::Array(list.values.iter().map(value_from_proto).collect())
        }
        Some(K::StructValue(st)) => Value::Object(
            st.fields
                .iter()
                .map(|(k, v)| (k.clone(), value_from_proto(v)))
                .collect(),
        ),
    }
}

/// Protobuf `Value` only carries doubles, but payload schemas use
/// integer timestamps and ids. Integral doubles in the i64 range come
/// back as JSON integers so typed deserialization keeps working.
fn number_from_proto(n: f64) -> Value {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    if n.is_finite() && n.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
        Value::Number(serde_json::Number::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    room_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    event: String,
    #[prost(enumeration = "WireKind", tag = "7")]
    kind: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireKind {
    Request = 0,
    Event = 1,
    Done = 2,
    Error = 3,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
