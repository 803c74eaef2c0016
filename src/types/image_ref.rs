// ABOUTME: Container image reference parsing and validation.
// ABOUTME: Handles formats like agent, agent:tag, registry/agent:tag.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),
}

/// A container image reference: `[registry/]name[:tag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    reference: String,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric()
                && c != '/'
                && c != ':'
                && c != '.'
                && c != '-'
                && c != '_'
                && c != '@'
            {
                return Err(ParseImageRefError::InvalidChar(c));
            }
        }

        Ok(Self {
            reference: input.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.reference
    }

    /// The reference with an explicit tag, defaulting to `latest`.
    ///
    /// Digested references are returned untouched.
    pub fn with_default_tag(&self) -> String {
        if self.reference.contains('@') {
            return self.reference.clone();
        }
        // A colon after the last slash is a tag; earlier ones are a registry port.
        let after_slash = self
            .reference
            .rsplit_once('/')
            .map_or(self.reference.as_str(), |(_, rest)| rest);
        if after_slash.contains(':') {
            self.reference.clone()
        } else {
            format!("{}:latest", self.reference)
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.reference.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        ImageRef::parse(&value).map_err(serde::de::Error::custom)
    }
}
