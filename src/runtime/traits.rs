// ABOUTME: Capability traits for the container runtime the control plane consumes.
// ABOUTME: Image and container lifecycle operations; implementations live behind them.

use async_trait::async_trait;
use std::time::Duration;

use super::error::RuntimeError;
use super::types::{ContainerDetails, ContainerSummary, CreateSpec, LogOptions};
use crate::types::{ContainerId, ImageRef};

/// Image operations: existence checks and pulls.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Check if an image exists locally.
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, RuntimeError>;

    /// Pull an image from a registry, consuming the progress stream.
    async fn pull_image(&self, reference: &ImageRef) -> Result<(), RuntimeError>;
}

/// Container lifecycle operations.
///
/// Implementations treat 304 responses on start/stop as success and surface
/// 404 as [`RuntimeError::NotFound`]; callers decide whether not-found is
/// tolerable for their path.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// List containers, optionally including stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Create a container from the given spec. Does not start it.
    async fn create_container(&self, spec: &CreateSpec) -> Result<ContainerId, RuntimeError>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Stop a running container within the graceful deadline.
    async fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<(), RuntimeError>;

    /// Restart a container within the graceful deadline.
    async fn restart_container(
        &self,
        id: &ContainerId,
        grace: Duration,
    ) -> Result<(), RuntimeError>;

    /// Remove a container.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), RuntimeError>;

    /// Get detailed information about a container.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError>;

    /// Fetch container logs as text.
    async fn container_logs(
        &self,
        id: &ContainerId,
        options: LogOptions,
    ) -> Result<String, RuntimeError>;
}

/// Full runtime capability - convenience trait combining the sub-traits.
///
/// Auto-implemented for any type that implements both.
pub trait AgentRuntime: ImageOps + ContainerOps {}

impl<T> AgentRuntime for T where T: ImageOps + ContainerOps {}
