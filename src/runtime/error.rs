// ABOUTME: Error categories for container runtime operations.
// ABOUTME: NotFound and port-allocation failures carry meaning for callers; the rest do not.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("host port already allocated: {0}")]
    PortAllocated(String),

    #[error("image pull failed: {0}")]
    PullFailed(String),

    #[error("runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::ImageNotFound(_))
    }

    pub fn is_port_allocated(&self) -> bool {
        matches!(self, RuntimeError::PortAllocated(_))
    }
}
