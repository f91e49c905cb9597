use std::sync::atomic::AtomicUsize;

use super::*;

fn connected_bus(connected: bool) -> (EventBus, mpsc::UnboundedReceiver<Frame>) {
    EventBus::new(Arc::new(AtomicBool::new(connected)))
}

fn frame(event: &str) -> Frame {
    Frame::request(event, Some("room-1"), serde_json::json!({}))
}

#[test]
fn emit_while_connected_queues_frame() {
    let (bus, mut rx) = connected_bus(true);
    assert!(bus.emit(frame("chat:typing")));

    let queued = rx.try_recv().expect("frame queued");
    assert_eq!(queued.event, "chat:typing");
}

#[test]
fn emit_while_disconnected_returns_false_and_drops() {
    let (bus, mut rx) = connected_bus(false);
    assert!(!bus.emit(frame("annotation:update")));
    assert!(rx.try_recv().is_err());
}

#[test]
fn multiple_listeners_per_event_all_fire() {
    let (bus, _rx) = connected_bus(true);
    let count = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let count = Arc::clone(&count);
        bus.on("chat:message", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    bus.dispatch(&frame("chat:message"));
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn listeners_only_receive_their_event() {
    let (bus, _rx) = connected_bus(true);
    let count = Arc::new(AtomicUsize::new(0));

    let chat_count = Arc::clone(&count);
    bus.on("chat:message", move |_| {
        chat_count.fetch_add(1, Ordering::SeqCst);
    });

    bus.dispatch(&frame("camera:updated"));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn off_removes_only_the_target_listener() {
    let (bus, _rx) = connected_bus(true);
    let count = Arc::new(AtomicUsize::new(0));

    let first_count = Arc::clone(&count);
    let first = bus.on("annotation:created", move |_| {
        first_count.fetch_add(1, Ordering::SeqCst);
    });
    let second_count = Arc::clone(&count);
    bus.on("annotation:created", move |_| {
        second_count.fetch_add(10, Ordering::SeqCst);
    });

    bus.off("annotation:created", first);
    bus.dispatch(&frame("annotation:created"));
    assert_eq!(count.load(Ordering::SeqCst), 10);
}

#[test]
fn set_latest_replaces_previous_handler_in_place() {
    let (bus, _rx) = connected_bus(true);
    let count = Arc::new(AtomicUsize::new(0));

    let stale_count = Arc::clone(&count);
    bus.set_latest("chat:typing", move |_| {
        stale_count.fetch_add(1, Ordering::SeqCst);
    });
    // A rebuilt closure replaces the slot without an explicit off.
    let fresh_count = Arc::clone(&count);
    bus.set_latest("chat:typing", move |_| {
        fresh_count.fetch_add(100, Ordering::SeqCst);
    });

    bus.dispatch(&frame("chat:typing"));
    assert_eq!(count.load(Ordering::SeqCst), 100);
}

#[test]
fn clear_latest_removes_the_slot() {
    let (bus, _rx) = connected_bus(true);
    let count = Arc::new(AtomicUsize::new(0));

    let latest_count = Arc::clone(&count);
    bus.set_latest("room:participant-joined", move |_| {
        latest_count.fetch_add(1, Ordering::SeqCst);
    });
    bus.clear_latest("room:participant-joined");

    bus.dispatch(&frame("room:participant-joined"));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn connection_flag_flip_is_observed_by_emit() {
    let connected = Arc::new(AtomicBool::new(false));
    let (bus, mut rx) = EventBus::new(Arc::clone(&connected));

    assert!(!bus.emit(frame("camera:update")));
    connected.store(true, Ordering::Release);
    assert!(bus.emit(frame("camera:update")));
    assert!(rx.try_recv().is_ok());
}
