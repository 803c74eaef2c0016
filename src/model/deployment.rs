// ABOUTME: The Deployment record: a tenant's agent instance and its credentials.
// ABOUTME: Secrets live encrypted at rest; patches carry store updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, CryptoError, SecretBox};
use crate::model::DeploymentStatus;
use crate::types::{
    ApiKeyError, ContainerId, DeploymentId, ModelRef, Subdomain, UserId, validate_anthropic_key,
    validate_google_key, validate_openai_key, validate_telegram_token,
};

/// Agent behavior settings chosen by the tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: Option<ModelRef>,
    pub system_prompt: Option<String>,
}

/// Credential fields as stored: every present value is an
/// `iv:tag:ciphertext` triple.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretBundle {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub web_ui_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("plaintext secret at rest in field {0}")]
    PlaintextAtRest(&'static str),

    #[error(transparent)]
    BadKey(#[from] ApiKeyError),
}

impl SecretBundle {
    /// Decrypt every field.
    ///
    /// A stored value that is not in encrypted triple form is an integrity
    /// failure unless `allow_plaintext` (the explicit migration mode) is set,
    /// in which case the value is passed through as-is.
    pub fn decrypt(
        &self,
        secret_box: &SecretBox,
        allow_plaintext: bool,
    ) -> Result<AgentSecrets, SecretError> {
        let field = |value: &Option<String>, name| -> Result<Option<String>, SecretError> {
            match value {
                None => Ok(None),
                Some(v) if crypto::is_encrypted(v) => Ok(Some(secret_box.decrypt(v)?)),
                Some(v) if allow_plaintext => Ok(Some(v.clone())),
                Some(_) => Err(SecretError::PlaintextAtRest(name)),
            }
        };

        let web_ui_token = if crypto::is_encrypted(&self.web_ui_token) {
            secret_box.decrypt(&self.web_ui_token)?
        } else if allow_plaintext {
            self.web_ui_token.clone()
        } else {
            return Err(SecretError::PlaintextAtRest("web_ui_token"));
        };

        Ok(AgentSecrets {
            openai_api_key: field(&self.openai_api_key, "openai_api_key")?,
            anthropic_api_key: field(&self.anthropic_api_key, "anthropic_api_key")?,
            google_api_key: field(&self.google_api_key, "google_api_key")?,
            telegram_bot_token: field(&self.telegram_bot_token, "telegram_bot_token")?,
            web_ui_token,
        })
    }
}

/// Decrypted credentials, held only in memory while spawning or waking.
#[derive(Debug, Clone, Default)]
pub struct AgentSecrets {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub web_ui_token: String,
}

impl AgentSecrets {
    /// Validate every present credential against its vendor's shape.
    pub fn validate(&self) -> Result<(), ApiKeyError> {
        if let Some(k) = &self.google_api_key {
            validate_google_key(k)?;
        }
        if let Some(k) = &self.openai_api_key {
            validate_openai_key(k)?;
        }
        if let Some(k) = &self.anthropic_api_key {
            validate_anthropic_key(k)?;
        }
        if let Some(t) = &self.telegram_bot_token {
            validate_telegram_token(t)?;
        }
        Ok(())
    }

    /// Encrypt every field for storage. Writes always encrypt; the migration
    /// mode only relaxes reads.
    pub fn encrypt(&self, secret_box: &SecretBox) -> SecretBundle {
        let field = |v: &Option<String>| v.as_deref().map(|s| secret_box.encrypt(s));
        SecretBundle {
            openai_api_key: field(&self.openai_api_key),
            anthropic_api_key: field(&self.anthropic_api_key),
            google_api_key: field(&self.google_api_key),
            telegram_bot_token: field(&self.telegram_bot_token),
            web_ui_token: secret_box.encrypt(&self.web_ui_token),
        }
    }
}

/// A tenant's agent instance.
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub user_id: UserId,
    pub subdomain: Subdomain,
    pub status: DeploymentStatus,
    pub container_id: Option<ContainerId>,
    pub internal_port: Option<u16>,
    // Never serialized to external consumers.
    #[serde(skip_serializing)]
    pub secrets: SecretBundle,
    pub config: AgentConfig,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub provisioning_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// A fresh record in `Idle`, as the tenant-facing API creates them.
    pub fn new(
        id: DeploymentId,
        user_id: UserId,
        subdomain: Subdomain,
        secrets: SecretBundle,
        config: AgentConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            subdomain,
            status: DeploymentStatus::Idle,
            container_id: None,
            internal_port: None,
            secrets,
            config,
            last_heartbeat: None,
            last_request_at: None,
            error_message: None,
            provisioning_step: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical container name for this deployment.
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }
}

/// Store update for a deployment. `None` leaves a field untouched; the nested
/// `Option` distinguishes set from clear.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub container_id: Option<Option<ContainerId>>,
    pub internal_port: Option<Option<u16>>,
    pub error_message: Option<Option<String>>,
    pub provisioning_step: Option<Option<String>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub secrets: Option<SecretBundle>,
    pub config: Option<AgentConfig>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Transition plus the container/port clearing the target state demands.
    pub fn status_cleared(status: DeploymentStatus) -> Self {
        let mut patch = Self::status(status);
        if status.clears_container() {
            patch.container_id = Some(None);
            patch.internal_port = Some(None);
        }
        patch
    }

    /// The atomic side effects of reaching `Healthy`: error cleared,
    /// heartbeat and last-request initialized.
    pub fn healthy(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(DeploymentStatus::Healthy),
            error_message: Some(None),
            last_heartbeat: Some(now),
            last_request_at: Some(now),
            ..Self::default()
        }
    }

    /// Failure transition preserving the diagnostic message.
    pub fn errored(message: impl Into<String>) -> Self {
        let mut patch = Self::status_cleared(DeploymentStatus::Error);
        patch.error_message = Some(Some(message.into()));
        patch
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.provisioning_step = Some(Some(step.into()));
        self
    }
}
