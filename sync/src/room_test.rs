use super::*;

fn participant(id: &str, name: &str) -> Participant {
    Participant {
        id: id.to_owned(),
        display_name: name.to_owned(),
    }
}

#[test]
fn starts_idle_with_no_target() {
    let membership = RoomMembership::new();
    assert_eq!(membership.join_state(), JoinState::Idle);
    assert_eq!(membership.target(), None);
    assert_eq!(membership.roster_len(), 0);
}

#[test]
fn concurrent_joins_for_same_room_collapse_into_one() {
    let mut membership = RoomMembership::new();

    assert_eq!(membership.begin_join("proj-1"), JoinDecision::Begin);
    // Effect re-runs and double clicks land here, not on the wire.
    assert_eq!(membership.begin_join("proj-1"), JoinDecision::InFlight);
    assert_eq!(membership.begin_join("proj-1"), JoinDecision::InFlight);
}

#[test]
fn join_after_success_is_answered_locally() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada")]);

    assert_eq!(membership.begin_join("proj-1"), JoinDecision::AlreadyJoined);
    assert_eq!(membership.roster_len(), 1);
}

#[test]
fn join_failure_releases_guard_for_retry() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_failed();

    assert_eq!(membership.join_state(), JoinState::JoinFailed);
    assert_eq!(membership.begin_join("proj-1"), JoinDecision::Begin);
}

#[test]
fn switching_rooms_starts_a_fresh_join() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada")]);

    assert_eq!(membership.begin_join("proj-2"), JoinDecision::Begin);
    assert_eq!(membership.target(), Some("proj-2"));
    assert_eq!(membership.roster_len(), 0);
}

#[test]
fn roster_comes_from_authoritative_join_response() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada"), participant("p-2", "Grace")]);

    assert_eq!(membership.join_state(), JoinState::Joined);
    assert_eq!(membership.roster_len(), 2);
    let mut names: Vec<_> = membership
        .roster()
        .into_iter()
        .map(|p| p.display_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Ada", "Grace"]);
}

#[test]
fn participant_joined_is_idempotent_by_id() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![]);

    assert!(membership.participant_joined(participant("p-9", "Edsger")));
    assert!(!membership.participant_joined(participant("p-9", "Edsger")));
    assert_eq!(membership.roster_len(), 1);
}

#[test]
fn participant_events_outside_joined_are_ignored() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");

    assert!(!membership.participant_joined(participant("p-9", "Edsger")));
    assert_eq!(membership.roster_len(), 0);
}

#[test]
fn participant_left_removes_by_id() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada")]);

    assert!(membership.participant_left("p-1").is_some());
    assert!(membership.participant_left("p-1").is_none());
    assert_eq!(membership.roster_len(), 0);
}

#[test]
fn leave_clears_membership_and_target() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada")]);

    membership.leave();
    assert_eq!(membership.join_state(), JoinState::Idle);
    assert_eq!(membership.target(), None);
    assert_eq!(membership.roster_len(), 0);
}

#[test]
fn transport_loss_resets_membership_but_keeps_rejoin_target() {
    let mut membership = RoomMembership::new();
    membership.begin_join("proj-1");
    membership.join_succeeded(vec![participant("p-1", "Ada")]);

    assert_eq!(membership.transport_lost().as_deref(), Some("proj-1"));
    assert_eq!(membership.join_state(), JoinState::Idle);
    assert_eq!(membership.roster_len(), 0);
    // The kept target lets the driver rejoin on reconnect.
    assert_eq!(membership.begin_join("proj-1"), JoinDecision::Begin);
}
