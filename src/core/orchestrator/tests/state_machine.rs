use crate::core::orchestrator::{ProvisionState, can_transition};

#[test]
fn happy_path_transitions_are_allowed() {
    let path = [
        (ProvisionState::Absent, ProvisionState::LockHeld),
        (ProvisionState::LockHeld, ProvisionState::Validating),
        (ProvisionState::Validating, ProvisionState::ProvisioningRecord),
        (ProvisionState::ProvisioningRecord, ProvisionState::Launching),
        (ProvisionState::Launching, ProvisionState::Launched),
    ];
    for (from, to) in path {
        assert!(
            can_transition(from, to),
            "expected transition {:?} -> {:?} to be allowed",
            from,
            to
        );
    }
}

#[test]
fn any_active_state_may_fail() {
    let active = [
        ProvisionState::Absent,
        ProvisionState::LockHeld,
        ProvisionState::Validating,
        ProvisionState::ProvisioningRecord,
        ProvisionState::Launching,
    ];
    for from in active {
        assert!(
            can_transition(from, ProvisionState::Failed),
            "expected failure from {:?}",
            from
        );
    }
}

#[test]
fn terminal_states_have_no_exits() {
    for to in [
        ProvisionState::Absent,
        ProvisionState::LockHeld,
        ProvisionState::Validating,
        ProvisionState::ProvisioningRecord,
        ProvisionState::Launching,
        ProvisionState::Launched,
        ProvisionState::Failed,
    ] {
        assert!(!can_transition(ProvisionState::Launched, to));
        assert!(!can_transition(ProvisionState::Failed, to));
    }
}

#[test]
fn stages_cannot_be_skipped() {
    assert!(!can_transition(
        ProvisionState::Absent,
        ProvisionState::Validating
    ));
    assert!(!can_transition(
        ProvisionState::LockHeld,
        ProvisionState::Launching
    ));
    assert!(!can_transition(
        ProvisionState::Validating,
        ProvisionState::Launched
    ));
}
