// ABOUTME: Tenant subdomain validation.
// ABOUTME: First Host label routing a request to a deployment; DNS-label shaped.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubdomainError {
    #[error("subdomain must be at least 3 characters")]
    TooShort,

    #[error("subdomain exceeds maximum length of 63 characters")]
    TooLong,

    #[error("subdomain must start and end with a letter or digit")]
    BadEdge,

    #[error("subdomain must be lowercase")]
    NotLowercase,

    #[error("invalid character in subdomain: '{0}'")]
    InvalidChar(char),
}

/// A validated tenant subdomain: 3-63 chars of `[a-z0-9-_]`, starting and
/// ending with `[a-z0-9]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Subdomain(String);

impl Subdomain {
    pub fn new(value: &str) -> Result<Self, SubdomainError> {
        if value.len() < 3 {
            return Err(SubdomainError::TooShort);
        }

        if value.len() > 63 {
            return Err(SubdomainError::TooLong);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(SubdomainError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
                return Err(SubdomainError::InvalidChar(c));
            }
        }

        let first = value.chars().next().unwrap_or('-');
        let last = value.chars().next_back().unwrap_or('-');
        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            return Err(SubdomainError::BadEdge);
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subdomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Subdomain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Subdomain::new(&value).map_err(serde::de::Error::custom)
    }
}
