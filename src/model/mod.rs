// ABOUTME: Domain records and the deployment state machine.
// ABOUTME: Deployments, users, statuses, and their store patch types.

mod deployment;
mod status;
mod user;

pub use deployment::{
    AgentConfig, AgentSecrets, Deployment, DeploymentPatch, SecretBundle, SecretError,
};
pub use status::{DeploymentStatus, TransitionError, transition};
pub use user::{AuthProvider, SubscriptionStatus, Tier, User, UserPatch};
