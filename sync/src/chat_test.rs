use super::*;
use crate::types::MessageKind;

fn message(id: &str, body: &str) -> ChatMessage {
    message_at(id, body, 100)
}

fn message_at(id: &str, body: &str, sent_at: i64) -> ChatMessage {
    ChatMessage {
        id: id.to_owned(),
        room_id: "proj-1".to_owned(),
        author_id: "p-1".to_owned(),
        author_display_name: "Ada".to_owned(),
        body: body.to_owned(),
        kind: MessageKind::UserText,
        sent_at,
    }
}

// =============================================================================
// OUTGOING VALIDATION
// =============================================================================

#[test]
fn prepare_outgoing_trims_whitespace() {
    assert_eq!(
        prepare_outgoing("  hello there \n", 1000).expect("valid"),
        "hello there"
    );
}

#[test]
fn prepare_outgoing_rejects_whitespace_only() {
    assert!(matches!(
        prepare_outgoing("   \t\n", 1000),
        Err(SyncError::EmptyMessage)
    ));
}

#[test]
fn prepare_outgoing_enforces_length_ceiling() {
    let long = "x".repeat(1001);
    assert!(matches!(
        prepare_outgoing(&long, 1000),
        Err(SyncError::MessageTooLong(1000))
    ));
    assert!(prepare_outgoing(&"x".repeat(1000), 1000).is_ok());
}

#[test]
fn prepare_outgoing_counts_chars_not_bytes() {
    // 4 characters, 8 bytes.
    assert!(prepare_outgoing("éééé", 4).is_ok());
}

// =============================================================================
// MESSAGE STORE
// =============================================================================

#[test]
fn sent_message_appears_exactly_once_via_broadcast() {
    let mut store = ChatStore::new();

    // send("hello") acks, then the broadcast delivers the canonical
    // message. The store only ever sees the broadcast copy.
    assert!(store.push(message("m-1", "hello")));
    assert_eq!(store.len(), 1);
    assert_eq!(store.messages()[0].body, "hello");
}

#[test]
fn redelivered_message_id_is_dropped() {
    let mut store = ChatStore::new();
    store.push(message("m-1", "hello"));

    assert!(!store.push(message("m-1", "hello")));
    assert_eq!(store.len(), 1);
}

#[test]
fn messages_keep_delivery_order() {
    let mut store = ChatStore::new();
    store.push(message("m-1", "first"));
    store.push(message("m-2", "second"));
    store.push(message("m-3", "third"));

    let bodies: Vec<_> = store.messages().iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
}

#[test]
fn hydrate_keeps_messages_that_arrived_during_the_fetch() {
    let mut store = ChatStore::new();
    // A peer's broadcast lands while the backlog request is in
    // flight. The snapshot predates it and will never resend it.
    store.push(message_at("m-9", "live", 300));

    store.hydrate(vec![
        message_at("m-1", "first", 100),
        message_at("m-2", "second", 200),
    ]);

    let ids: Vec<_> = store.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m-1", "m-2", "m-9"]);
}

#[test]
fn hydrate_dedups_ids_already_delivered_live() {
    let mut store = ChatStore::new();
    store.push(message_at("m-2", "second", 200));

    store.hydrate(vec![
        message_at("m-1", "first", 100),
        message_at("m-2", "second", 200),
    ]);
    assert_eq!(store.len(), 2);
    assert_eq!(store.messages()[0].id, "m-1");
}

// =============================================================================
// TYPING SET
// =============================================================================

#[test]
fn typing_true_inserts_and_refresh_is_not_a_change() {
    let now = Instant::now();
    let mut typing = TypingSet::new(Duration::from_secs(3));

    assert!(typing.apply("Ada", true, now));
    assert!(!typing.apply("Ada", true, now + Duration::from_secs(1)));
    assert!(typing.contains("Ada"));
}

#[test]
fn typing_false_removes_immediately() {
    let now = Instant::now();
    let mut typing = TypingSet::new(Duration::from_secs(3));
    typing.apply("Ada", true, now);

    assert!(typing.apply("Ada", false, now));
    assert!(!typing.contains("Ada"));
    assert!(!typing.apply("Ada", false, now));
}

#[test]
fn unrefreshed_entry_expires_after_window() {
    let now = Instant::now();
    let mut typing = TypingSet::new(Duration::from_secs(3));
    typing.apply("Ada", true, now);

    // No further events at all; the sweep alone clears the entry.
    assert!(typing.expire(now + Duration::from_millis(2999)).is_empty());
    assert_eq!(typing.expire(now + Duration::from_secs(3)), vec!["Ada"]);
    assert!(!typing.contains("Ada"));
}

#[test]
fn refresh_pushes_deadline_forward() {
    let now = Instant::now();
    let mut typing = TypingSet::new(Duration::from_secs(3));
    typing.apply("Ada", true, now);
    typing.apply("Ada", true, now + Duration::from_secs(2));

    assert!(typing.expire(now + Duration::from_secs(4)).is_empty());
    assert!(typing.contains("Ada"));
}

#[test]
fn active_lists_names_sorted() {
    let now = Instant::now();
    let mut typing = TypingSet::new(Duration::from_secs(3));
    typing.apply("Grace", true, now);
    typing.apply("Ada", true, now);

    assert_eq!(typing.active(), vec!["Ada", "Grace"]);
}
