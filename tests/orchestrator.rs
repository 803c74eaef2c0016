// ABOUTME: Tests for the spawn/stop/restart/remove flows against a mock runtime.
// ABOUTME: Covers the happy path to Healthy, capacity gating, and failure cleanup.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use apiary::error::ErrorCode;
use apiary::health::HealthMonitor;
use apiary::materializer::ConfigMaterializer;
use apiary::model::DeploymentStatus;
use apiary::orchestrator::Orchestrator;
use apiary::ports::PortAllocator;
use apiary::store::{DeploymentStore, MemoryStore};
use apiary::types::{ContainerId, DeploymentId};

use support::{MockRuntime, deployment, google_secrets, secret_box, test_settings};

struct Fixture {
    store: Arc<MemoryStore>,
    runtime: Arc<MockRuntime>,
    orchestrator: Arc<Orchestrator>,
    _tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let settings = test_settings(tmp.path().to_path_buf());
    let store = Arc::new(MemoryStore::new());
    let runtime = MockRuntime::with_image();

    let ports = Arc::new(PortAllocator::new(
        settings.min_agent_port,
        settings.max_agent_port,
        store.clone() as Arc<dyn DeploymentStore>,
        runtime.clone(),
    ));
    let health = Arc::new(HealthMonitor::new(
        settings.health_check_interval,
        settings.health_check_timeout,
    ));
    let materializer = Arc::new(ConfigMaterializer::new(
        settings.data_path.clone(),
        settings.agent_internal_port,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        store.clone() as Arc<dyn DeploymentStore>,
        runtime.clone(),
        ports,
        health,
        materializer,
    ));

    Fixture {
        store,
        runtime,
        orchestrator,
        _tmp: tmp,
    }
}

async fn wait_for_status(
    store: &Arc<MemoryStore>,
    id: &DeploymentId,
    status: DeploymentStatus,
) -> apiary::model::Deployment {
    for _ in 0..200 {
        let d = store.find_by_id(id).await.unwrap().unwrap();
        if d.status == status {
            return d;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("deployment never reached {status}");
}

#[tokio::test]
async fn spawn_happy_path_reaches_healthy() {
    let f = fixture();
    let sb = secret_box();
    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();

    let spawned = f
        .orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap();

    assert_eq!(spawned.status, DeploymentStatus::Starting);
    let port = spawned.internal_port.unwrap();
    assert!((20000..=30000).contains(&port));
    assert!(spawned.container_id.is_some());

    // The agent "comes up": accept on the published port so the probe lands.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });

    let healthy = wait_for_status(&f.store, &d.id, DeploymentStatus::Healthy).await;
    assert!(healthy.last_heartbeat.is_some());
    assert!(healthy.last_request_at.is_some());
    assert!(healthy.error_message.is_none());

    // The container spec carried the environment and bind contract.
    let created = f.runtime.created.lock();
    let spec = created.first().unwrap();
    assert_eq!(spec.name, format!("apiary-agent-{}", d.id));
    assert_eq!(spec.host_port, port);
    assert_eq!(spec.container_port, 18789);
    assert!(spec.env.iter().any(|e| e.starts_with("GOOGLE_API_KEY=")));
    assert!(spec.env.iter().any(|e| e.starts_with("NODE_OPTIONS=--max-old-space-size=")));
    assert!(spec.env.contains(&"NODE_ENV=production".to_string()));
    assert!(spec.binds.iter().any(|b| b.ends_with(":/config:rw")));
}

#[tokio::test]
async fn spawn_writes_agent_config_to_disk() {
    let f = fixture();
    let sb = secret_box();
    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();

    f.orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap();

    let config = f._tmp.path().join("d1/config/openclaw.json");
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(config).unwrap()).unwrap();
    assert_eq!(
        doc["agents"]["defaults"]["model"]["primary"],
        "google/gemini-3-pro-preview"
    );
}

#[tokio::test]
async fn fleet_capacity_rejects_seventh_agent() {
    let f = fixture();
    let sb = secret_box();

    for i in 0..6 {
        let mut d = deployment(&format!("d{i}"), "u1", &format!("agent{i}"), &sb);
        d.status = DeploymentStatus::Healthy;
        d.container_id = Some(ContainerId::new(format!("c{i}")));
        d.internal_port = Some(25000 + i as u16);
        f.store.insert(d).await.unwrap();
    }

    let seventh = f.store.insert(deployment("d7", "u2", "seventh", &sb)).await.unwrap();
    let err = f
        .orchestrator
        .spawn(&seventh, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::CapacityFull);

    let stored = f.store.find_by_id(&seventh.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Error);
    assert!(stored.error_message.unwrap().contains("capacity"));
}

#[tokio::test]
async fn spawn_failure_runs_shared_cleanup() {
    let f = fixture();
    let sb = secret_box();
    f.runtime.fail_start.store(true, Ordering::SeqCst);

    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();
    let err = f
        .orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("start refused"));

    let stored = f.store.find_by_id(&d.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Error);
    assert_eq!(stored.container_id, None);
    assert_eq!(stored.internal_port, None);
    assert!(stored.error_message.unwrap().contains("start refused"));

    // The created container was removed, and no container with the
    // canonical name survives in the runtime.
    let removed = f.runtime.removed_ids();
    assert_eq!(removed.len(), 1);
    let name = format!("apiary-agent-{}", d.id);
    assert!(!f.runtime.containers.lock().iter().any(|c| c.has_name(&name)));
}

#[tokio::test]
async fn spawn_removes_zombie_container_first() {
    let f = fixture();
    let sb = secret_box();
    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();

    f.runtime.add_container("zombie-1", &format!("apiary-agent-{}", d.id), Some(25001));

    f.orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap();

    assert!(f.runtime.removed_ids().contains(&"zombie-1".to_string()));
}

#[tokio::test]
async fn concurrent_spawns_share_one_image_pull() {
    let f = fixture();
    let sb = secret_box();
    f.runtime.image_present.store(false, Ordering::SeqCst);
    *f.runtime.pull_delay.lock() = Duration::from_millis(300);

    let d1 = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();
    let d2 = f.store.insert(deployment("d2", "u2", "bob", &sb)).await.unwrap();

    let o1 = Arc::clone(&f.orchestrator);
    let o2 = Arc::clone(&f.orchestrator);
    let s1 = google_secrets();
    let s2 = google_secrets();
    let limits = f.orchestrator.default_limits();

    let (r1, r2) = tokio::join!(
        async move { o1.spawn(&d1, &s1, None, limits).await },
        async move { o2.spawn(&d2, &s2, None, limits).await },
    );
    r1.unwrap();
    r2.unwrap();

    assert_eq!(f.runtime.pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_requires_running_state() {
    let f = fixture();
    let sb = secret_box();
    let idle = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();

    let err = f.orchestrator.stop(&idle).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[tokio::test]
async fn stop_clears_runtime_refs() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Healthy;
    d.container_id = Some(ContainerId::new("c1"));
    d.internal_port = Some(25002);
    let d = f.store.insert(d).await.unwrap();

    let stopped = f.orchestrator.stop(&d).await.unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Stopped);
    assert_eq!(stopped.container_id, None);
    assert_eq!(stopped.internal_port, None);
    assert_eq!(f.runtime.stopped_ids(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn restart_without_container_is_a_fresh_spawn() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Stopped;
    let d = f.store.insert(d).await.unwrap();

    let restarted = f
        .orchestrator
        .restart(&d, &google_secrets(), f.orchestrator.default_limits())
        .await
        .unwrap();

    assert_eq!(restarted.status, DeploymentStatus::Starting);
    assert_eq!(f.runtime.created.lock().len(), 1);
    assert!(f.runtime.restarted.lock().is_empty());
}

#[tokio::test]
async fn restart_with_container_restarts_in_place() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Healthy;
    d.container_id = Some(ContainerId::new("c1"));
    d.internal_port = Some(25003);
    let d = f.store.insert(d).await.unwrap();

    let restarted = f
        .orchestrator
        .restart(&d, &google_secrets(), f.orchestrator.default_limits())
        .await
        .unwrap();

    assert_eq!(restarted.status, DeploymentStatus::Restarting);
    assert_eq!(*f.runtime.restarted.lock(), vec!["c1".to_string()]);
    assert!(f.runtime.created.lock().is_empty());
}

#[tokio::test]
async fn remove_tears_down_container_and_data() {
    let f = fixture();
    let sb = secret_box();

    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();
    let spawned = f
        .orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap();

    assert!(f._tmp.path().join("d1").is_dir());
    f.orchestrator.remove(&spawned).await.unwrap();
    assert!(!f._tmp.path().join("d1").exists());

    let stored = f.store.find_by_id(&d.id).await.unwrap().unwrap();
    assert_eq!(stored.container_id, None);
    assert_eq!(stored.internal_port, None);
}

#[tokio::test]
async fn spawn_rejects_malformed_credentials() {
    let f = fixture();
    let sb = secret_box();
    let d = f.store.insert(deployment("d1", "u1", "alice", &sb)).await.unwrap();

    let mut secrets = google_secrets();
    secrets.google_api_key = Some("AIzaTooShort".to_string());

    let err = f
        .orchestrator
        .spawn(&d, &secrets, None, f.orchestrator.default_limits())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let stored = f.store.find_by_id(&d.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Error);
}

#[tokio::test]
async fn spawn_entry_requires_spawnable_state() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Healthy;
    d.container_id = Some(ContainerId::new("c1"));
    d.internal_port = Some(25004);
    let d = f.store.insert(d).await.unwrap();

    let err = f
        .orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[tokio::test]
async fn unconditional_port_fallback_when_status_moved_on() {
    // A deployment that drifts out of Configuring mid-reserve still gets its
    // port written by the fallback path inside spawn; exercised indirectly:
    // spawn from Stopped works end to end.
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Stopped;
    let d = f.store.insert(d).await.unwrap();

    let spawned = f
        .orchestrator
        .spawn(&d, &google_secrets(), None, f.orchestrator.default_limits())
        .await
        .unwrap();
    assert!(spawned.internal_port.is_some());
    assert_eq!(spawned.status, DeploymentStatus::Starting);
}
