// ABOUTME: TCP health probes for starting agents, one active probe per deployment.
// ABOUTME: First success fires a callback; exhausting the budget drops the probe silently.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::types::DeploymentId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Registry of in-flight probes, keyed by deployment id.
///
/// Registering a probe for a deployment aborts any prior probe for the same
/// id, so at most one is ever active per deployment.
pub struct HealthMonitor {
    interval: Duration,
    budget: Duration,
    probes: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl HealthMonitor {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self {
            interval,
            budget,
            probes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start probing `127.0.0.1:port`; await `on_healthy` on the first
    /// successful connect. If the budget lapses first the probe exits without
    /// side effects and the reaper reconciles the record later.
    pub fn watch<F>(&self, id: &DeploymentId, port: u16, on_healthy: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = id.as_str().to_string();
        let interval = self.interval;
        let budget = self.budget;
        let probes = Arc::clone(&self.probes);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let started = tokio::time::Instant::now();

            loop {
                if started.elapsed() >= budget {
                    tracing::debug!(deployment = %task_key, port, "health probe budget exhausted");
                    break;
                }

                let connect = TcpStream::connect(("127.0.0.1", port));
                if let Ok(Ok(stream)) = tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                    drop(stream);
                    tracing::debug!(deployment = %task_key, port, "health probe succeeded");
                    on_healthy.await;
                    break;
                }

                tokio::time::sleep(interval).await;
            }

            probes.lock().remove(&task_key);
        });

        if let Some(prior) = self.probes.lock().insert(key, handle) {
            prior.abort();
        }
    }

    /// Stop any probe for this deployment.
    pub fn cancel(&self, id: &DeploymentId) {
        if let Some(handle) = self.probes.lock().remove(id.as_str()) {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn active(&self, id: &DeploymentId) -> bool {
        self.probes.lock().contains_key(id.as_str())
    }
}
