// ABOUTME: Application-wide error types and the stable wire error codes.
// ABOUTME: Every caller-visible failure maps to a code with an HTTP status.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::model::{SecretError, TransitionError};
use crate::store::StoreError;

/// Stable error codes surfaced in JSON envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    CapacityFull,
    PortAllocationExhausted,
    AgentWaking,
    AgentNotReady,
    DeploymentNotFound,
    ProxyError,
    InvalidStateTransition,
    TamperedData,
    NoModel,
    ModelKeyMismatch,
    ValidationError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CapacityFull => "CAPACITY_FULL",
            ErrorCode::PortAllocationExhausted => "PORT_ALLOCATION_EXHAUSTED",
            ErrorCode::AgentWaking => "AGENT_WAKING",
            ErrorCode::AgentNotReady => "AGENT_NOT_READY",
            ErrorCode::DeploymentNotFound => "DEPLOYMENT_NOT_FOUND",
            ErrorCode::ProxyError => "PROXY_ERROR",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::TamperedData => "TAMPERED_DATA",
            ErrorCode::NoModel => "NO_MODEL",
            ErrorCode::ModelKeyMismatch => "MODEL_KEY_MISMATCH",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::CapacityFull
            | ErrorCode::PortAllocationExhausted
            | ErrorCode::AgentWaking
            | ErrorCode::AgentNotReady => 503,
            ErrorCode::DeploymentNotFound => 404,
            ErrorCode::ProxyError => 502,
            ErrorCode::InvalidStateTransition
            | ErrorCode::NoModel
            | ErrorCode::ModelKeyMismatch
            | ErrorCode::ValidationError => 400,
            ErrorCode::TamperedData | ErrorCode::Internal => 500,
        }
    }
}

/// The JSON envelope body for an error response.
pub fn error_envelope(code: ErrorCode, message: &str) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": {
            "code": code.as_str(),
            "message": message,
        }
    })
}

/// Top-level application error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, Error>;
