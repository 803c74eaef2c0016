// ABOUTME: Error types for orchestration using SNAFU with the ErrorKind pattern.
// ABOUTME: Opaque error with kind() and wire-code accessors for stable handling.

use snafu::Snafu;

use crate::error::ErrorCode;
use crate::model::{DeploymentStatus, SecretError, TransitionError};
use crate::ports::PortError;
use crate::runtime::RuntimeError;
use crate::store::StoreError;
use crate::types::ApiKeyError;

/// Categories of orchestration errors.
///
/// Use `OrchestratorError::kind()` to get this value for programmatic
/// error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OrchestratorErrorKind {
    Capacity,
    PortsExhausted,
    NoModel,
    ModelKeyMismatch,
    InvalidKey,
    InvalidTransition,
    WrongState,
    Gone,
    Secrets,
    Store,
    Runtime,
    Config,
}

/// Errors that can occur while orchestrating a deployment.
///
/// This is an opaque error type. Use `kind()` to determine the category and
/// `code()` for the wire-level error code.
#[derive(Debug)]
pub struct OrchestratorError(InnerError);

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> OrchestratorErrorKind {
        match &self.0 {
            InnerError::CapacityFull { .. } => OrchestratorErrorKind::Capacity,
            InnerError::PortsExhausted { .. } => OrchestratorErrorKind::PortsExhausted,
            InnerError::NoModel => OrchestratorErrorKind::NoModel,
            InnerError::ModelKeyMismatch { .. } => OrchestratorErrorKind::ModelKeyMismatch,
            InnerError::InvalidKey { .. } => OrchestratorErrorKind::InvalidKey,
            InnerError::InvalidTransition { .. } => OrchestratorErrorKind::InvalidTransition,
            InnerError::WrongState { .. } => OrchestratorErrorKind::WrongState,
            InnerError::Gone { .. } => OrchestratorErrorKind::Gone,
            InnerError::Secrets { .. } => OrchestratorErrorKind::Secrets,
            InnerError::Store { .. } => OrchestratorErrorKind::Store,
            InnerError::Runtime { .. } => OrchestratorErrorKind::Runtime,
            InnerError::Config { .. } => OrchestratorErrorKind::Config,
        }
    }

    /// The stable wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self.kind() {
            OrchestratorErrorKind::Capacity => ErrorCode::CapacityFull,
            OrchestratorErrorKind::PortsExhausted => ErrorCode::PortAllocationExhausted,
            OrchestratorErrorKind::NoModel => ErrorCode::NoModel,
            OrchestratorErrorKind::ModelKeyMismatch => ErrorCode::ModelKeyMismatch,
            OrchestratorErrorKind::InvalidKey => ErrorCode::ValidationError,
            OrchestratorErrorKind::InvalidTransition | OrchestratorErrorKind::WrongState => {
                ErrorCode::InvalidStateTransition
            }
            OrchestratorErrorKind::Gone => ErrorCode::DeploymentNotFound,
            OrchestratorErrorKind::Secrets => ErrorCode::TamperedData,
            OrchestratorErrorKind::Store
            | OrchestratorErrorKind::Runtime
            | OrchestratorErrorKind::Config => ErrorCode::Internal,
        }
    }
}

/// Internal error type with full context - not exposed in public API.
#[derive(Debug, Snafu)]
enum InnerError {
    #[snafu(display("agent capacity reached ({running}/{limit} running)"))]
    CapacityFull { running: usize, limit: usize },

    #[snafu(display("port allocation failed: {source}"))]
    PortsExhausted { source: PortError },

    #[snafu(display("no model specified and no credential provides a default"))]
    NoModel,

    #[snafu(display("model {model} requires a {vendor} credential"))]
    ModelKeyMismatch { model: String, vendor: String },

    #[snafu(display("credential rejected: {source}"))]
    InvalidKey { source: ApiKeyError },

    #[snafu(display("{source}"))]
    InvalidTransition { source: TransitionError },

    #[snafu(display("cannot {action} a deployment in state {status}"))]
    WrongState {
        action: &'static str,
        status: DeploymentStatus,
    },

    #[snafu(display("deployment {id} no longer exists"))]
    Gone { id: String },

    #[snafu(display("secrets unavailable: {source}"))]
    Secrets { source: SecretError },

    #[snafu(display("store failure: {source}"))]
    Store { source: StoreError },

    #[snafu(display("runtime failure: {source}"))]
    Runtime { source: RuntimeError },

    #[snafu(display("config materialization failed: {source}"))]
    Config { source: std::io::Error },
}

// Factory functions keep call sites terse while the inner enum stays private.
impl OrchestratorError {
    pub fn capacity_full(running: usize, limit: usize) -> Self {
        Self(InnerError::CapacityFull { running, limit })
    }

    pub fn no_model() -> Self {
        Self(InnerError::NoModel)
    }

    pub fn model_key_mismatch(model: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self(InnerError::ModelKeyMismatch {
            model: model.into(),
            vendor: vendor.into(),
        })
    }

    pub fn wrong_state(action: &'static str, status: DeploymentStatus) -> Self {
        Self(InnerError::WrongState { action, status })
    }

    pub fn gone(id: impl Into<String>) -> Self {
        Self(InnerError::Gone { id: id.into() })
    }
}

impl From<PortError> for OrchestratorError {
    fn from(source: PortError) -> Self {
        Self(InnerError::PortsExhausted { source })
    }
}

impl From<ApiKeyError> for OrchestratorError {
    fn from(source: ApiKeyError) -> Self {
        Self(InnerError::InvalidKey { source })
    }
}

impl From<TransitionError> for OrchestratorError {
    fn from(source: TransitionError) -> Self {
        Self(InnerError::InvalidTransition { source })
    }
}

impl From<SecretError> for OrchestratorError {
    fn from(source: SecretError) -> Self {
        Self(InnerError::Secrets { source })
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(source: StoreError) -> Self {
        Self(InnerError::Store { source })
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(source: RuntimeError) -> Self {
        Self(InnerError::Runtime { source })
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(source: std::io::Error) -> Self {
        Self(InnerError::Config { source })
    }
}
