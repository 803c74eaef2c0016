// ABOUTME: Tests for auto-wake coordination.
// ABOUTME: Deduplication, shared outcomes, and refusal outside Stopped/Error.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use apiary::health::HealthMonitor;
use apiary::materializer::ConfigMaterializer;
use apiary::model::DeploymentStatus;
use apiary::orchestrator::Orchestrator;
use apiary::ports::PortAllocator;
use apiary::proxy::{RouteCache, WakeCoordinator};
use apiary::store::{DeploymentStore, MemoryStore};
use apiary::types::{ContainerId, DeploymentId, Subdomain};

use support::{MockRuntime, deployment, secret_box, test_settings};

struct Fixture {
    store: Arc<MemoryStore>,
    runtime: Arc<MockRuntime>,
    cache: Arc<RouteCache>,
    wake: Arc<WakeCoordinator>,
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
    let allow_plaintext = settings.allow_plaintext_secrets;
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        store.clone() as Arc<dyn DeploymentStore>,
        runtime.clone(),
        ports,
        health,
        materializer,
    ));

    let cache = Arc::new(RouteCache::default());
    let wake = Arc::new(WakeCoordinator::new(
        store.clone() as Arc<dyn DeploymentStore>,
        orchestrator,
        Arc::new(secret_box()),
        Arc::clone(&cache),
        allow_plaintext,
    ));

    Fixture {
        store,
        runtime,
        cache,
        wake,
        _tmp: tmp,
    }
}

/// Background task that answers the health probe once the spawn publishes
/// a port.
fn answer_probe(store: Arc<MemoryStore>, id: DeploymentId) {
    tokio::spawn(async move {
        for _ in 0..400 {
            if let Ok(Some(d)) = store.find_by_id(&id).await
                && let Some(port) = d.internal_port
            {
                let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await
                else {
                    return;
                };
                loop {
                    let _ = listener.accept().await;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });
}

#[tokio::test]
async fn concurrent_wakes_share_one_spawn() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Stopped;
    let d = f.store.insert(d).await.unwrap();
    answer_probe(f.store.clone(), d.id.clone());

    let subdomain = Subdomain::new("alice").unwrap();
    let w1 = f.wake.clone();
    let w2 = f.wake.clone();
    let s1 = subdomain.clone();
    let s2 = subdomain.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { w1.wake(&s1).await }),
        tokio::spawn(async move { w2.wake(&s2).await }),
    );
    assert!(a.unwrap(), "first waiter must observe the wake outcome");
    assert!(b.unwrap(), "second waiter must share the same outcome");

    // Exactly one spawn ran.
    assert_eq!(f.runtime.created.lock().len(), 1);

    let woken = f.store.find_by_id(&d.id).await.unwrap().unwrap();
    assert_eq!(woken.status, DeploymentStatus::Healthy);
    assert!(woken.internal_port.is_some());
}

#[tokio::test]
async fn wake_invalidates_the_route_cache() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Stopped;
    let d = f.store.insert(d).await.unwrap();
    answer_probe(f.store.clone(), d.id.clone());

    // Simulate the stale entry the proxy acted on.
    f.cache
        .put("alice", d.id.clone(), DeploymentStatus::Stopped, None);

    assert!(f.wake.wake(&Subdomain::new("alice").unwrap()).await);
    assert!(f.cache.get("alice").is_none());
}

#[tokio::test]
async fn wake_refuses_unknown_subdomains() {
    let f = fixture();
    assert!(!f.wake.wake(&Subdomain::new("ghost").unwrap()).await);
}

#[tokio::test]
async fn wake_skips_agents_already_running() {
    let f = fixture();
    let sb = secret_box();

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Healthy;
    d.container_id = Some(ContainerId::new("c1"));
    d.internal_port = Some(25500);
    f.store.insert(d).await.unwrap();

    assert!(f.wake.wake(&Subdomain::new("alice").unwrap()).await);
    assert!(f.runtime.created.lock().is_empty());
}

#[tokio::test]
async fn failed_spawn_fails_the_wake() {
    let f = fixture();
    let sb = secret_box();
    f.runtime.fail_start.store(true, Ordering::SeqCst);

    let mut d = deployment("d1", "u1", "alice", &sb);
    d.status = DeploymentStatus::Stopped;
    let d = f.store.insert(d).await.unwrap();

    assert!(!f.wake.wake(&Subdomain::new("alice").unwrap()).await);

    let stored = f.store.find_by_id(&d.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeploymentStatus::Error);
}
