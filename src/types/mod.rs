// ABOUTME: Domain newtypes shared across the crate.
// ABOUTME: Validated identifiers, subdomains, image and model references, key shapes.

mod api_key;
mod id;
mod image_ref;
mod model_ref;
mod subdomain;

pub use api_key::{
    ApiKeyError, validate_anthropic_key, validate_google_key, validate_openai_key,
    validate_telegram_token,
};
pub use id::{ContainerId, DeploymentId, Id, UserId};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use model_ref::{ModelRef, ParseModelRefError, Vendor};
pub use subdomain::{Subdomain, SubdomainError};
