//! Health monitor reconciliation

use std::sync::atomic::Ordering;
use std::time::Duration;

use toolhost::deploy::fsm::{DeploymentStatus, HealthStatus};
use toolhost::workers::health;

use crate::support::Harness;

#[tokio::test]
async fn test_crash_restarts_on_new_port() {
    let h = Harness::new(3);
    let deployment = h.engine.deploy("t-weather").await.unwrap();
    h.pass().await;
    let old_port = deployment.port.unwrap();

    h.launcher.control(&deployment.id).kill();
    let summary = h.pass().await;
    assert_eq!(summary.failed, 1);

    let restarted = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(restarted.status, DeploymentStatus::Starting);
    assert_eq!(restarted.restart_count, 1);
    let new_port = restarted.port.unwrap();
    assert_ne!(new_port, old_port);
    assert_ne!(restarted.endpoint_url, deployment.endpoint_url);
    assert!(!h.engine.ports().is_in_use(old_port));
    assert!(h.engine.ports().is_in_use(new_port));
    assert!(restarted.last_error.unwrap().contains("crashed"));

    h.pass().await;
    let running = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(running.status, DeploymentStatus::Running);
    assert_eq!(running.health_status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_exhausted_restarts_rest_in_failed() {
    let max_restarts = 2;
    let h = Harness::new(max_restarts);
    let deployment = h.engine.deploy("t-weather").await.unwrap();
    h.pass().await;

    for _ in 0..=max_restarts {
        h.launcher.control(&deployment.id).kill();
        h.pass().await;
        h.pass().await;
    }

    let failed = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.restart_count, max_restarts);
    assert_eq!(failed.port, None);
    assert_eq!(h.engine.ports().in_use(), 0);
    assert!(failed.last_error.unwrap().contains("Restart budget exhausted"));

    // The freed port range is usable again
    let next = h.engine.deploy("t-weather").await.unwrap();
    assert_eq!(next.status, DeploymentStatus::Starting);

    // No further restarts for the failed one
    h.pass().await;
    let still = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(still.restart_count, max_restarts);
}

#[tokio::test]
async fn test_failed_relaunch_consumes_budget() {
    let h = Harness::new(3);
    let deployment = h.engine.deploy("t-weather").await.unwrap();
    h.pass().await;

    h.launcher.fail_next(10);
    h.launcher.control(&deployment.id).kill();
    h.pass().await;

    let failed = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.restart_count, 3);
    assert_eq!(failed.port, None);
    assert_eq!(h.engine.ports().in_use(), 0);
    // Initial launch plus three relaunch attempts
    assert_eq!(h.launcher.launches(), 4);
}

#[tokio::test]
async fn test_sustained_unhealthy_triggers_restart() {
    let h = Harness::new(3);
    let deployment = h.engine.deploy("t-weather").await.unwrap();
    h.pass().await;

    h.launcher.control(&deployment.id).health.store(500, Ordering::SeqCst);

    h.pass().await;
    h.pass().await;
    let degraded = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(degraded.status, DeploymentStatus::Running);
    assert_eq!(degraded.health_status, HealthStatus::Unhealthy);
    assert_eq!(degraded.consecutive_unhealthy, 2);

    h.pass().await;
    let restarted = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(restarted.status, DeploymentStatus::Starting);
    assert_eq!(restarted.restart_count, 1);
    assert_eq!(restarted.consecutive_unhealthy, 0);
    assert!(restarted.last_error.unwrap().contains("unhealthy"));
    // The relaunched instance is a fresh one
    assert_eq!(h.launcher.control(&deployment.id).health.load(Ordering::SeqCst), 200);
}

#[tokio::test]
async fn test_first_launch_never_ready_is_not_restarted() {
    let mut h = Harness::new(3);
    h.health.startup_timeout = Duration::ZERO;
    h.launcher.set_initial_health(503);

    let deployment = h.engine.deploy("t-weather").await.unwrap();
    h.pass().await;

    let failed = h.engine.registry().get(&deployment.id).unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.restart_count, 0);
    assert_eq!(failed.port, None);
    assert_eq!(h.launcher.launches(), 1);
    assert!(!h.launcher.control(&deployment.id).is_alive());
}

#[tokio::test]
async fn test_busy_deployment_is_skipped() {
    let h = Harness::new(3);
    let deployment = h.engine.deploy("t-weather").await.unwrap();

    let guard = h.engine.registry().lock(&deployment.id).await.unwrap();
    let summary = h.pass().await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        h.engine.registry().get(&deployment.id).unwrap().status,
        DeploymentStatus::Starting
    );

    drop(guard);
    assert_eq!(h.pass().await.promoted, 1);
}

#[tokio::test]
async fn test_monitor_runs_until_shutdown() {
    let h = Harness::new(3);
    let deployment = h.engine.deploy("t-weather").await.unwrap();

    let (tx, mut rx) = tokio::sync::broadcast::channel::<()>(1);
    let engine = h.engine.clone();
    let client = h.client.clone();
    let options = h.health.clone();
    let monitor = tokio::spawn(async move {
        health::run(
            &options,
            engine.as_ref(),
            &client,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = rx.recv().await;
            }),
        )
        .await;
    });

    let mut status = DeploymentStatus::Starting;
    for _ in 0..100 {
        status = h.engine.registry().get(&deployment.id).unwrap().status;
        if status == DeploymentStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, DeploymentStatus::Running);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), monitor)
        .await
        .unwrap()
        .unwrap();
}
