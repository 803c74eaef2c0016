// ABOUTME: Process-local route cache and the last-request touch throttle.
// ABOUTME: TTL-evicted, last-writer-wins; non-healthy entries expire faster.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::DeploymentStatus;
use crate::types::DeploymentId;

/// Cached routing decision for a subdomain.
///
/// Non-healthy statuses are cached too so wake retries skip the store, just
/// with a shorter TTL so a freshly healthy deployment is picked up promptly.
#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub deployment_id: DeploymentId,
    pub port: Option<u16>,
    pub status: DeploymentStatus,
    cached_at: Instant,
}

pub struct RouteCache {
    healthy_ttl: Duration,
    unhealthy_ttl: Duration,
    entries: Mutex<HashMap<String, CachedRoute>>,
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(1))
    }
}

impl RouteCache {
    pub fn new(healthy_ttl: Duration, unhealthy_ttl: Duration) -> Self {
        Self {
            healthy_ttl,
            unhealthy_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, subdomain: &str) -> Option<CachedRoute> {
        let mut entries = self.entries.lock();
        let route = entries.get(subdomain)?;
        let ttl = if route.status == DeploymentStatus::Healthy {
            self.healthy_ttl
        } else {
            self.unhealthy_ttl
        };
        if route.cached_at.elapsed() >= ttl {
            entries.remove(subdomain);
            return None;
        }
        Some(route.clone())
    }

    pub fn put(
        &self,
        subdomain: &str,
        deployment_id: DeploymentId,
        status: DeploymentStatus,
        port: Option<u16>,
    ) {
        self.entries.lock().insert(
            subdomain.to_string(),
            CachedRoute {
                deployment_id,
                port,
                status,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, subdomain: &str) {
        self.entries.lock().remove(subdomain);
    }
}

/// Per-subdomain throttle for `last_request_at` writes: at most one store
/// write per window, regardless of request volume.
pub struct TouchThrottle {
    window: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl TouchThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when this call wins the window; the stamp is advanced
    /// so concurrent callers lose.
    pub fn should_touch(&self, subdomain: &str) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        match last.get(subdomain) {
            Some(stamp) if now.duration_since(*stamp) < self.window => false,
            _ => {
                last.insert(subdomain.to_string(), now);
                true
            }
        }
    }
}
