// ABOUTME: Persistence adapter contract for deployments and users.
// ABOUTME: Conditional (CAS-on-status) updates and counted queries; driver is external.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{Deployment, DeploymentPatch, DeploymentStatus, User, UserPatch};
use crate::types::{DeploymentId, Subdomain, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique index violation on {0}")]
    Duplicate(&'static str),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

/// Query filter over deployments. All present conditions must match.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub user_id: Option<UserId>,
    pub statuses: Option<Vec<DeploymentStatus>>,
    pub has_container: Option<bool>,
    pub last_request_before: Option<DateTime<Utc>>,
}

impl DeploymentFilter {
    pub fn with_statuses(statuses: impl Into<Vec<DeploymentStatus>>) -> Self {
        Self {
            statuses: Some(statuses.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, d: &Deployment) -> bool {
        if let Some(user_id) = &self.user_id
            && &d.user_id != user_id
        {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&d.status)
        {
            return false;
        }
        if let Some(has) = self.has_container
            && d.container_id.is_some() != has
        {
            return false;
        }
        if let Some(before) = self.last_request_before {
            // An absent last_request_at counts as idle-forever.
            match d.last_request_at {
                Some(at) if at >= before => return false,
                _ => {}
            }
        }
        true
    }
}

/// Deployment collection contract.
///
/// `update` applies a patch and returns the new document, or `None` when the
/// record is gone or the CAS condition failed. A unique index on `subdomain`
/// and a partial unique index on `internal_port` back the insert/update
/// paths; violations surface as [`StoreError::Duplicate`].
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert(&self, deployment: Deployment) -> Result<Deployment, StoreError>;

    async fn find_by_id(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError>;

    async fn find_by_subdomain(
        &self,
        subdomain: &Subdomain,
    ) -> Result<Option<Deployment>, StoreError>;

    async fn list(&self, filter: DeploymentFilter) -> Result<Vec<Deployment>, StoreError>;

    async fn count(&self, filter: DeploymentFilter) -> Result<usize, StoreError>;

    /// Patch a deployment, optionally compare-and-swapping on the current
    /// status. Returns the updated document, or `None` if the record is
    /// missing or the expected status did not match.
    async fn update(
        &self,
        id: &DeploymentId,
        patch: DeploymentPatch,
        expect_status: Option<DeploymentStatus>,
    ) -> Result<Option<Deployment>, StoreError>;

    async fn delete(&self, id: &DeploymentId) -> Result<bool, StoreError>;
}

/// User collection contract.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;

    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn update_user(
        &self,
        id: &UserId,
        patch: UserPatch,
    ) -> Result<Option<User>, StoreError>;
}
