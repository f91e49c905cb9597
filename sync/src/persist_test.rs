use super::*;

fn transform(x: f64) -> ModelTransform {
    ModelTransform {
        position: Vector3::new(x, 0.0, 0.0),
        rotation: Vector3::default(),
        scale: Vector3::new(1.0, 1.0, 1.0),
    }
}

#[test]
fn first_edit_writes_immediately() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));

    assert!(scheduler.offer("m-1", transform(1.0), start).is_some());
    assert_eq!(scheduler.pending_count(), 0);
}

#[test]
fn edits_inside_window_park_only_the_latest() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));
    scheduler.offer("m-1", transform(1.0), start);

    assert!(
        scheduler
            .offer("m-1", transform(2.0), start + Duration::from_millis(500))
            .is_none()
    );
    assert!(
        scheduler
            .offer("m-1", transform(3.0), start + Duration::from_millis(900))
            .is_none()
    );
    assert_eq!(scheduler.pending_count(), 1);

    let due = scheduler.take_due(start + Duration::from_secs(3));
    assert_eq!(due.len(), 1);
    // Intermediate drag states were discarded.
    assert_eq!(due[0].1.position.x, 3.0);
}

#[test]
fn take_due_respects_open_windows() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));
    scheduler.offer("m-1", transform(1.0), start);
    scheduler.offer("m-1", transform(2.0), start + Duration::from_millis(100));

    assert!(scheduler.take_due(start + Duration::from_secs(1)).is_empty());
    assert_eq!(scheduler.take_due(start + Duration::from_secs(3)).len(), 1);
}

#[test]
fn models_are_throttled_independently() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));

    assert!(scheduler.offer("m-1", transform(1.0), start).is_some());
    // A different model's first edit is not blocked by m-1's window.
    assert!(
        scheduler
            .offer("m-2", transform(2.0), start + Duration::from_millis(10))
            .is_some()
    );
}

#[test]
fn write_after_window_reopens_passes_through() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));
    scheduler.offer("m-1", transform(1.0), start);

    assert!(
        scheduler
            .offer("m-1", transform(2.0), start + Duration::from_secs(3))
            .is_some()
    );
}

#[test]
fn drain_pending_ignores_windows() {
    let start = Instant::now();
    let mut scheduler = WriteScheduler::new(Duration::from_secs(3));
    scheduler.offer("m-1", transform(1.0), start);
    scheduler.offer("m-1", transform(2.0), start + Duration::from_millis(100));
    scheduler.offer("m-2", transform(9.0), start + Duration::from_millis(100));
    scheduler.offer("m-2", transform(10.0), start + Duration::from_millis(200));

    let mut drained = scheduler.drain_pending();
    drained.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].1.position.x, 2.0);
    assert_eq!(drained[1].1.position.x, 10.0);
    assert_eq!(scheduler.pending_count(), 0);
}
