// ABOUTME: Auto-wake coordination for stopped or errored deployments.
// ABOUTME: One wake per subdomain at a time; concurrent requests share the outcome.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::cache::RouteCache;
use crate::crypto::SecretBox;
use crate::model::DeploymentStatus;
use crate::orchestrator::Orchestrator;
use crate::store::DeploymentStore;
use crate::types::Subdomain;

const WAKE_BUDGET: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

type SharedWake = Shared<BoxFuture<'static, bool>>;

/// Wakes hibernated deployments in response to inbound traffic.
pub struct WakeCoordinator {
    store: Arc<dyn DeploymentStore>,
    orchestrator: Arc<Orchestrator>,
    secret_box: Arc<SecretBox>,
    cache: Arc<RouteCache>,
    allow_plaintext: bool,
    in_flight: Mutex<HashMap<String, SharedWake>>,
}

impl WakeCoordinator {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        orchestrator: Arc<Orchestrator>,
        secret_box: Arc<SecretBox>,
        cache: Arc<RouteCache>,
        allow_plaintext: bool,
    ) -> Self {
        Self {
            store,
            orchestrator,
            secret_box,
            cache,
            allow_plaintext,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Wake the deployment behind `subdomain`, or join the wake already in
    /// progress for it. Returns true once the deployment is healthy with a
    /// port, false on error or after the 60 second budget.
    pub async fn wake(&self, subdomain: &Subdomain) -> bool {
        let key = subdomain.as_str().to_string();

        let wake = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let fut = Self::run(
                        Arc::clone(&self.store),
                        Arc::clone(&self.orchestrator),
                        Arc::clone(&self.secret_box),
                        Arc::clone(&self.cache),
                        self.allow_plaintext,
                        subdomain.clone(),
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let woke = wake.await;
        // Every waiter clears the handle; removing an already-removed key is
        // harmless, and the entry never outlives the outcome.
        self.in_flight.lock().remove(&key);
        woke
    }

    async fn run(
        store: Arc<dyn DeploymentStore>,
        orchestrator: Arc<Orchestrator>,
        secret_box: Arc<SecretBox>,
        cache: Arc<RouteCache>,
        allow_plaintext: bool,
        subdomain: Subdomain,
    ) -> bool {
        let deployment = match store.find_by_subdomain(&subdomain).await {
            Ok(Some(d)) => d,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(subdomain = %subdomain, error = %e, "wake lookup failed");
                return false;
            }
        };

        if !matches!(
            deployment.status,
            DeploymentStatus::Stopped | DeploymentStatus::Error
        ) {
            // Someone else already moved it; let the caller re-resolve.
            return deployment.status == DeploymentStatus::Healthy;
        }

        let secrets = match deployment.secrets.decrypt(&secret_box, allow_plaintext) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subdomain = %subdomain, error = %e, "wake cannot decrypt secrets");
                return false;
            }
        };

        tracing::info!(subdomain = %subdomain, deployment = %deployment.id, "waking agent");
        if let Err(e) = orchestrator
            .spawn(
                &deployment,
                &secrets,
                deployment.config.model.as_ref(),
                orchestrator.default_limits(),
            )
            .await
        {
            tracing::warn!(subdomain = %subdomain, error = %e, "wake spawn failed");
            return false;
        }

        // Poll until the probe reports healthy, the spawn collapses to
        // error, or the budget lapses.
        let deadline = tokio::time::Instant::now() + WAKE_BUDGET;
        loop {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(subdomain = %subdomain, "wake budget exhausted");
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            match store.find_by_id(&deployment.id).await {
                Ok(Some(d)) => match d.status {
                    DeploymentStatus::Healthy if d.internal_port.is_some() => {
                        cache.invalidate(subdomain.as_str());
                        return true;
                    }
                    DeploymentStatus::Error => return false,
                    _ => {}
                },
                Ok(None) => return false,
                Err(e) => {
                    tracing::error!(subdomain = %subdomain, error = %e, "wake poll failed");
                    return false;
                }
            }
        }
    }
}
