//! tests/common/harness.rs
#![allow(dead_code)]

use std::sync::Once;
use ws_lifecycle::{ConnectionState, ConnectionStateMachine};

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ws_lifecycle=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// The setup sequence a healthy connection walks through.
pub const SETUP_SEQUENCE: [ConnectionState; 4] = [
    ConnectionState::Accepted,
    ConnectionState::Authenticated,
    ConnectionState::ServicesReady,
    ConnectionState::ProcessingReady,
];

/// A legal path from `CONNECTING` to the given state.
pub fn path_to(state: ConnectionState) -> Vec<ConnectionState> {
    use ConnectionState::*;

    let ready = SETUP_SEQUENCE.to_vec();
    let with = |mut base: Vec<ConnectionState>, extra: &[ConnectionState]| {
        base.extend_from_slice(extra);
        base
    };

    match state {
        Connecting => vec![],
        Accepted => vec![Accepted],
        Authenticated => vec![Accepted, Authenticated],
        ServicesReady => vec![Accepted, Authenticated, ServicesReady],
        ProcessingReady => ready,
        Processing => with(ready, &[Processing]),
        Idle => with(ready, &[Idle]),
        Degraded => with(ready, &[Degraded]),
        Reconnecting => with(ready, &[Degraded, Reconnecting]),
        Closing => with(ready, &[Closing]),
        Closed => vec![Closed],
        Failed => vec![Failed],
    }
}

/// Drives a machine along a legal path, panicking if any step is rejected.
pub fn drive(machine: &ConnectionStateMachine, states: &[ConnectionState]) {
    for state in states {
        assert!(
            machine.transition_to(*state, Some("test drive"), None),
            "transition to {state} rejected from {}",
            machine.current_state()
        );
    }
}

/// Checks that a history is one unbroken chain starting at `CONNECTING`, where
/// every non-emergency record is a legal edge.
pub fn assert_legal_history(machine: &ConnectionStateMachine) {
    let mut expected_from = ConnectionState::Connecting;
    for record in machine.get_state_history() {
        assert_eq!(record.from_state(), expected_from, "history chain broken");
        if !record.is_emergency() {
            assert!(
                ws_lifecycle::is_valid_transition(record.from_state(), record.to_state()),
                "illegal edge {} -> {} in history",
                record.from_state(),
                record.to_state()
            );
        }
        expected_from = record.to_state();
    }
    assert_eq!(machine.current_state(), expected_from);
}
