// ABOUTME: In-memory reference store with the unique-index semantics of the contract.
// ABOUTME: Backs the binary's default mode and the test suites.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{DeploymentFilter, DeploymentStore, StoreError, UserStore};
use crate::model::{Deployment, DeploymentPatch, DeploymentStatus, User, UserPatch};
use crate::types::{DeploymentId, Subdomain, UserId};

#[derive(Default)]
struct Collections {
    deployments: HashMap<String, Deployment>,
    users: HashMap<String, User>,
}

/// Process-local store. The production driver is an external collaborator;
/// this implementation exists so the core runs and tests without one.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_deployment_patch(d: &mut Deployment, patch: DeploymentPatch) {
        if let Some(status) = patch.status {
            d.status = status;
        }
        if let Some(container_id) = patch.container_id {
            d.container_id = container_id;
        }
        if let Some(internal_port) = patch.internal_port {
            d.internal_port = internal_port;
        }
        if let Some(error_message) = patch.error_message {
            d.error_message = error_message;
        }
        if let Some(provisioning_step) = patch.provisioning_step {
            d.provisioning_step = provisioning_step;
        }
        if let Some(at) = patch.last_heartbeat {
            d.last_heartbeat = Some(at);
        }
        if let Some(at) = patch.last_request_at {
            d.last_request_at = Some(at);
        }
        if let Some(secrets) = patch.secrets {
            d.secrets = secrets;
        }
        if let Some(config) = patch.config {
            d.config = config;
        }
        d.updated_at = Utc::now();
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, deployment: Deployment) -> Result<Deployment, StoreError> {
        let mut inner = self.inner.write();
        if inner
            .deployments
            .values()
            .any(|d| d.subdomain == deployment.subdomain)
        {
            return Err(StoreError::Duplicate("subdomain"));
        }
        if let Some(port) = deployment.internal_port
            && inner
                .deployments
                .values()
                .any(|d| d.internal_port == Some(port))
        {
            return Err(StoreError::Duplicate("internal_port"));
        }
        inner
            .deployments
            .insert(deployment.id.as_str().to_string(), deployment.clone());
        Ok(deployment)
    }

    async fn find_by_id(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        Ok(self.inner.read().deployments.get(id.as_str()).cloned())
    }

    async fn find_by_subdomain(
        &self,
        subdomain: &Subdomain,
    ) -> Result<Option<Deployment>, StoreError> {
        Ok(self
            .inner
            .read()
            .deployments
            .values()
            .find(|d| &d.subdomain == subdomain)
            .cloned())
    }

    async fn list(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .inner
            .read()
            .deployments
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: DeploymentFilter) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .deployments
            .values()
            .filter(|d| filter.matches(d))
            .count())
    }

    async fn update(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
        expect_status: Option<DeploymentStatus>,
    ) -> Result<Option<Deployment>, StoreError> {
        let mut inner = self.inner.write();

        // Partial unique index on internal_port: reject before mutating.
        if let Some(Some(port)) = patch.internal_port
            && inner
                .deployments
                .values()
                .any(|d| d.id.as_str() != id.as_str() && d.internal_port == Some(port))
        {
            return Err(StoreError::Duplicate("internal_port"));
        }

        let Some(d) = inner.deployments.get_mut(id.as_str()) else {
            return Ok(None);
        };
        if let Some(expected) = expect_status
            && d.status != expected
        {
            return Ok(None);
        }

        Self::apply_deployment_patch(d, patch);
        Ok(Some(d.clone()))
    }

    async fn delete(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        Ok(self.inner.write().deployments.remove(id.as_str()).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        inner.users.insert(user.id.as_str().to_string(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().users.get(id.as_str()).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_lowercase();
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.read().users.values().cloned().collect())
    }

    async fn update_user(
        &self,
        id: &UserId,
        patch: UserPatch,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write();
        let Some(u) = inner.users.get_mut(id.as_str()) else {
            return Ok(None);
        };
        if let Some(status) = patch.subscription_status {
            u.subscription_status = status;
        }
        if let Some(tier) = patch.tier {
            u.tier = tier;
        }
        if let Some(at) = patch.subscription_expires_at {
            u.subscription_expires_at = at;
        }
        if let Some(sent) = patch.expiry_reminder_sent {
            u.expiry_reminder_sent = sent;
        }
        if let Some(max) = patch.max_agents {
            u.max_agents = max;
        }
        u.updated_at = Utc::now();
        Ok(Some(u.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentConfig, SecretBundle};

    fn deployment(id: &str, subdomain: &str) -> Deployment {
        Deployment::new(
            DeploymentId::new(id),
            UserId::new("u1"),
            Subdomain::new(subdomain).unwrap(),
            SecretBundle::default(),
            AgentConfig::default(),
        )
    }

    #[tokio::test]
    async fn subdomain_uniqueness() {
        let store = MemoryStore::new();
        store.insert(deployment("d1", "alice")).await.unwrap();
        let err = store.insert(deployment("d2", "alice")).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn internal_port_partial_index() {
        let store = MemoryStore::new();
        store.insert(deployment("d1", "alice")).await.unwrap();
        store.insert(deployment("d2", "bob")).await.unwrap();

        let mut patch = DeploymentPatch::default();
        patch.internal_port = Some(Some(20001));
        store
            .update(&DeploymentId::new("d1"), patch.clone(), None)
            .await
            .unwrap()
            .unwrap();

        let err = store
            .update(&DeploymentId::new("d2"), patch, None)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        // Clearing a port never collides.
        let mut clear = DeploymentPatch::default();
        clear.internal_port = Some(None);
        store
            .update(&DeploymentId::new("d1"), clear, None)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cas_on_status() {
        let store = MemoryStore::new();
        store.insert(deployment("d1", "alice")).await.unwrap();

        let updated = store
            .update(
                &DeploymentId::new("d1"),
                DeploymentPatch::status(DeploymentStatus::Configuring),
                Some(DeploymentStatus::Idle),
            )
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, DeploymentStatus::Configuring);

        // Second CAS expecting Idle now misses.
        let missed = store
            .update(
                &DeploymentId::new("d1"),
                DeploymentPatch::status(DeploymentStatus::Provisioning),
                Some(DeploymentStatus::Idle),
            )
            .await
            .unwrap();
        assert!(missed.is_none());
    }

    #[tokio::test]
    async fn filter_matching() {
        let store = MemoryStore::new();
        let mut d = deployment("d1", "alice");
        d.status = DeploymentStatus::Healthy;
        d.container_id = Some(crate::types::ContainerId::new("c1"));
        store.insert(d).await.unwrap();
        store.insert(deployment("d2", "bob")).await.unwrap();

        let running = store
            .count(DeploymentFilter {
                statuses: Some(vec![DeploymentStatus::Healthy]),
                has_container: Some(true),
                ..DeploymentFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(running, 1);

        // Absent last_request_at matches an idle-before cutoff.
        let idle = store
            .list(DeploymentFilter {
                statuses: Some(vec![DeploymentStatus::Healthy]),
                last_request_before: Some(Utc::now()),
                ..DeploymentFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(idle.len(), 1);
    }
}
