// ABOUTME: Abstract interface over the container runtime.
// ABOUTME: Capability traits, shared types, and the bollard implementation.

mod bollard;
mod error;
mod traits;
mod types;

pub use bollard::BollardRuntime;
pub use error::RuntimeError;
pub use traits::{AgentRuntime, ContainerOps, ImageOps};
pub use types::{ContainerDetails, ContainerSummary, CreateSpec, LogOptions, PublishedPort};
