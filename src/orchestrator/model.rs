// ABOUTME: Model selection and vendor/credential agreement.
// ABOUTME: Picks a default for keyless requests; rejects vendor mismatches.

use super::error::OrchestratorError;
use crate::model::AgentSecrets;
use crate::types::{ModelRef, Vendor};

/// Preferred defaults, in order, when no model is requested.
const DEFAULT_MODELS: &[(Vendor, &str)] = &[
    (Vendor::Google, "google/gemini-3-pro-preview"),
    (Vendor::Anthropic, "anthropic/claude-sonnet-4"),
    (Vendor::OpenAi, "openai/gpt-4o"),
];

fn key_for(secrets: &AgentSecrets, vendor: Vendor) -> Option<&str> {
    match vendor {
        Vendor::Google => secrets.google_api_key.as_deref(),
        Vendor::Anthropic => secrets.anthropic_api_key.as_deref(),
        Vendor::OpenAi => secrets.openai_api_key.as_deref(),
    }
}

/// Resolve the model to run: the requested one if its vendor credential is
/// present, otherwise the first default with a matching credential.
///
/// Deprecated model names are already mapped forward by [`ModelRef::parse`].
pub fn resolve_model(
    requested: Option<&ModelRef>,
    secrets: &AgentSecrets,
) -> Result<ModelRef, OrchestratorError> {
    match requested {
        Some(model) => {
            if key_for(secrets, model.vendor()).is_none() {
                return Err(OrchestratorError::model_key_mismatch(
                    model.as_str(),
                    model.vendor().as_str(),
                ));
            }
            Ok(model.clone())
        }
        None => DEFAULT_MODELS
            .iter()
            .find(|(vendor, _)| key_for(secrets, *vendor).is_some())
            .map(|(_, name)| ModelRef::parse(name).expect("default models are well-formed"))
            .ok_or_else(OrchestratorError::no_model),
    }
}
