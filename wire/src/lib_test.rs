use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        room_id: Some("room-1".to_owned()),
        from: Some("participant-1".to_owned()),
        event: "annotation:update".to_owned(),
        kind: Kind::Done,
        data: serde_json::json!({
            "text": "check this panel",
            "anchor": {"x": 1.5, "y": 0.25, "z": -2.25},
            "visible": true,
            "tags": ["red", "blue"],
            "nil": null
        }),
    }
}

#[test]
fn kind_numeric_mapping_matches_wire_enum() {
    assert_eq!(Kind::Request.as_i32(), 0);
    assert_eq!(Kind::Event.as_i32(), 1);
    assert_eq!(Kind::Done.as_i32(), 2);
    assert_eq!(Kind::Error.as_i32(), 3);
}

#[test]
fn kind_round_trips_from_wire_values() {
    assert_eq!(Kind::from_i32(0).expect("kind"), Kind::Request);
    assert_eq!(Kind::from_i32(1).expect("kind"), Kind::Event);
    assert_eq!(Kind::from_i32(2).expect("kind"), Kind::Done);
    assert_eq!(Kind::from_i32(3).expect("kind"), Kind::Error);
}

#[test]
fn kind_from_wire_rejects_out_of_range_value() {
    let err = Kind::from_i32(42).expect_err("kind should be invalid");
    assert!(matches!(err, CodecError::InvalidKind(42)));
}

#[test]
fn only_done_and_error_are_terminal() {
    assert!(Kind::Done.is_terminal());
    assert!(Kind::Error.is_terminal());
    assert!(!Kind::Request.is_terminal());
    assert!(!Kind::Event.is_terminal());
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let bytes = encode_frame(&frame);
    let decoded = decode_frame(&bytes).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_kind() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "room:join".to_owned(),
        kind: 77,
        data: Some(value_to_proto(&serde_json::json!({}))),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("kind should fail");
    assert!(matches!(err, CodecError::InvalidKind(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "room:leave".to_owned(),
        kind: Kind::Request.as_i32(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "camera:update".to_owned(),
        kind: Kind::Request.as_i32(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn integer_json_numbers_round_trip_as_integers() {
    let frame = Frame::request(
        "chat:send",
        Some("room-1"),
        serde_json::json!({"sent_at": 1_725_000_000_123_i64}),
    );
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(
        decoded.data.get("sent_at"),
        Some(&serde_json::json!(1_725_000_000_123_i64))
    );
}

#[test]
fn integral_floats_decode_as_integers() {
    // Protobuf numbers are all doubles; integral ones come back as
    // JSON integers so i64 payload fields deserialize.
    let frame = Frame::request("camera:update", None, serde_json::json!({"zoom": 2.0}));
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("zoom"), Some(&serde_json::json!(2)));
}

#[test]
fn request_constructor_fills_identity_fields() {
    let frame = Frame::request("room:join", Some("room-9"), serde_json::json!({}));
    assert_eq!(frame.kind, Kind::Request);
    assert_eq!(frame.room_id.as_deref(), Some("room-9"));
    assert!(frame.parent_id.is_none());
    assert!(!frame.id.is_empty());
}

#[test]
fn done_for_correlates_via_parent_id() {
    let request = Frame::request("room:join", Some("room-9"), serde_json::json!({}));
    let done = Frame::done_for(&request, serde_json::json!({"participants": []}));
    assert_eq!(done.parent_id.as_deref(), Some(request.id.as_str()));
    assert_eq!(done.event, "room:join");
    assert_eq!(done.room_id, request.room_id);
    assert_eq!(done.kind, Kind::Done);
}

#[test]
fn error_for_carries_message() {
    let request = Frame::request("chat:send", Some("room-1"), serde_json::json!({}));
    let err = Frame::error_for(&request, "not a member");
    assert_eq!(err.kind, Kind::Error);
    assert_eq!(err.error_message(), Some("not a member"));
}

#[test]
fn error_message_prefers_message_then_error_key() {
    let mut frame = sample_frame();
    frame.data = serde_json::json!({"message": "m1", "error": "m2"});
    assert_eq!(frame.error_message(), Some("m1"));

    frame.data = serde_json::json!({"error": "m2"});
    assert_eq!(frame.error_message(), Some("m2"));

    frame.data = serde_json::json!({});
    assert_eq!(frame.error_message(), None);
}

#[test]
fn kind_serializes_as_lowercase_json() {
    assert_eq!(
        serde_json::to_string(&Kind::Request).expect("serialize"),
        "\"request\""
    );
    assert_eq!(
        serde_json::to_string(&Kind::Event).expect("serialize"),
        "\"event\""
    );
}

#[test]
fn kind_deserializes_from_lowercase_json() {
    assert_eq!(
        serde_json::from_str::<Kind>("\"error\"").expect("deserialize"),
        Kind::Error
    );
    assert!(serde_json::from_str::<Kind>("\"Error\"").is_err());
}
