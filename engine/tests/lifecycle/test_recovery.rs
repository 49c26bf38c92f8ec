//! Persistence and startup recovery

use std::sync::Arc;

use toolhost::deploy::fsm::DeploymentStatus;
use toolhost::deploy::store::{DeploymentStore, InMemoryStore, JsonFileStore};
use toolhost::deploy::DeploymentRegistry;
use toolhost::filesys::dir::Dir;
use toolhost::models::deployment::{Deployment, DeploymentFilter, ProcessRef};

use crate::support::Harness;

fn stale_record(id: &str, port: u16) -> Deployment {
    let mut deployment = Deployment::new(
        id.to_string(),
        "t-weather".to_string(),
        port,
        format!("http://127.0.0.1:{}", port),
    );
    deployment.status = DeploymentStatus::Running;
    deployment.process = Some(ProcessRef::InProcess {
        label: format!("in-process:{}", port),
    });
    deployment
}

#[tokio::test]
async fn test_recover_relaunches_active_deployments() {
    let h = Harness::new(3);
    let (stale_port, _) = h.engine.ports().range();
    h.store.save(&stale_record("d-stale", stale_port)).await.unwrap();

    assert_eq!(h.engine.registry().load().await.unwrap(), 1);
    assert_eq!(h.engine.recover().await.unwrap(), 1);

    let recovered = h.engine.registry().get("d-stale").unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Starting);
    assert_eq!(recovered.restart_count, 1);
    let new_port = recovered.port.unwrap();
    assert!(h.engine.ports().is_in_use(new_port));
    assert_eq!(h.engine.ports().in_use(), 1);
    assert_eq!(recovered.last_error.as_deref(), Some("engine restarted"));
    assert_eq!(h.launcher.launches(), 1);
    assert_eq!(h.launcher.orphans_terminated(), 1);

    h.pass().await;
    assert_eq!(
        h.engine.registry().get("d-stale").unwrap().status,
        DeploymentStatus::Running
    );
}

#[tokio::test]
async fn test_recover_honours_stop_request() {
    let h = Harness::new(3);
    let (stale_port, _) = h.engine.ports().range();
    let mut record = stale_record("d-stopping", stale_port);
    record.stop_requested = true;
    h.store.save(&record).await.unwrap();

    h.engine.registry().load().await.unwrap();
    h.engine.recover().await.unwrap();

    let recovered = h.engine.registry().get("d-stopping").unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Failed);
    assert_eq!(recovered.port, None);
    assert_eq!(h.launcher.launches(), 0);
    assert_eq!(h.engine.ports().in_use(), 0);
}

#[tokio::test]
async fn test_recover_keeps_port_of_surviving_orphan() {
    let h = Harness::new(3);
    let (stale_port, _) = h.engine.ports().range();
    h.store.save(&stale_record("d-orphan", stale_port)).await.unwrap();
    h.launcher.refuse_orphan_termination(true);

    h.engine.registry().load().await.unwrap();
    assert_eq!(h.engine.recover().await.unwrap(), 1);

    let recovered = h.engine.registry().get("d-orphan").unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Starting);
    let new_port = recovered.port.unwrap();
    assert_ne!(new_port, stale_port);
    assert!(h.engine.ports().is_in_use(stale_port));
    assert_eq!(h.engine.ports().in_use(), 2);
}

#[tokio::test]
async fn test_terminal_records_are_left_alone() {
    let store = Arc::new(InMemoryStore::new());
    let mut stopped = Deployment::new(
        "d-stopped".to_string(),
        "t-weather".to_string(),
        1,
        String::new(),
    );
    stopped.status = DeploymentStatus::Stopped;
    stopped.port = None;
    stopped.endpoint_url = None;
    store.save(&stopped).await.unwrap();

    let h = Harness::with_store(3, store);
    h.engine.registry().load().await.unwrap();
    assert_eq!(h.engine.recover().await.unwrap(), 0);
    assert_eq!(
        h.engine.registry().get("d-stopped").unwrap().status,
        DeploymentStatus::Stopped
    );
}

#[tokio::test]
async fn test_registry_survives_reload_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = Dir::new(tmp.path().join("deployments"));

    let (id, port) = {
        let registry = DeploymentRegistry::new(Arc::new(JsonFileStore::new(dir.clone())));
        let (deployment, _guard) = registry
            .create("t-weather", 8123, "http://127.0.0.1:8123".to_string())
            .await
            .unwrap();
        registry
            .mark_running(&deployment.id, chrono::Utc::now())
            .await
            .unwrap();
        (deployment.id, deployment.port)
    };

    let reloaded = DeploymentRegistry::new(Arc::new(JsonFileStore::new(dir)));
    assert_eq!(reloaded.load().await.unwrap(), 1);

    let deployment = reloaded.get(&id).unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Running);
    assert_eq!(deployment.port, port);
    assert_eq!(
        reloaded
            .list(&DeploymentFilter::tool("t-weather").with_status(DeploymentStatus::Running))
            .len(),
        1
    );
}
