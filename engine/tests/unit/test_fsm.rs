//! FSM unit tests

use toolhost::deploy::fsm::{DeploymentStatus, HealthStatus};
use toolhost::models::deployment::Deployment;

const ALL: [DeploymentStatus; 4] = [
    DeploymentStatus::Starting,
    DeploymentStatus::Running,
    DeploymentStatus::Stopped,
    DeploymentStatus::Failed,
];

#[test]
fn test_fsm_initial_state() {
    let deployment = Deployment::new(
        "d-1".to_string(),
        "t-1".to_string(),
        8100,
        "http://127.0.0.1:8100".to_string(),
    );
    assert_eq!(deployment.status, DeploymentStatus::Starting);
    assert_eq!(deployment.health_status, HealthStatus::Unknown);
    assert_eq!(deployment.restart_count, 0);
    assert!(deployment.is_active());
    assert!(deployment.last_error.is_none());
}

#[test]
fn test_fsm_transition_table() {
    let allowed = [
        (DeploymentStatus::Starting, DeploymentStatus::Running),
        (DeploymentStatus::Starting, DeploymentStatus::Failed),
        (DeploymentStatus::Starting, DeploymentStatus::Stopped),
        (DeploymentStatus::Running, DeploymentStatus::Failed),
        (DeploymentStatus::Running, DeploymentStatus::Stopped),
        (DeploymentStatus::Failed, DeploymentStatus::Starting),
    ];

    for from in ALL {
        for to in ALL {
            let expected = allowed.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "{} -> {}",
                from,
                to
            );
            assert_eq!(from.transition(to).is_ok(), expected);
        }
    }
}

#[test]
fn test_fsm_crash_restart_flow() {
    // Running -> Failed -> Starting -> Running
    let status = DeploymentStatus::Running;
    let status = status.transition(DeploymentStatus::Failed).unwrap();
    assert!(!status.is_active());
    let status = status.transition(DeploymentStatus::Starting).unwrap();
    assert!(status.is_active());
    let status = status.transition(DeploymentStatus::Running).unwrap();
    assert_eq!(status, DeploymentStatus::Running);
}

#[test]
fn test_fsm_invalid_transition_message() {
    let err = DeploymentStatus::Stopped
        .transition(DeploymentStatus::Starting)
        .unwrap_err();
    assert_eq!(err, "STOPPED -> STARTING");
}

#[test]
fn test_status_strings_round_trip() {
    for status in ALL {
        assert_eq!(status.to_string().parse::<DeploymentStatus>(), Ok(status));
    }
    assert_eq!(HealthStatus::default(), HealthStatus::Unknown);
    assert_eq!(HealthStatus::Unhealthy.to_string(), "UNHEALTHY");
}
