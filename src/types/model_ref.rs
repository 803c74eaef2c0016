// ABOUTME: Vendor-prefixed model references like google/gemini-3-pro-preview.
// ABOUTME: Carries the vendor for key-agreement checks; maps deprecated aliases forward.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Model vendors this control plane can route credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Google,
    Anthropic,
    OpenAi,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Google => "google",
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseModelRefError {
    #[error("model reference cannot be empty")]
    Empty,

    #[error("model reference must be vendor/model")]
    MissingVendor,

    #[error("unknown model vendor: {0}")]
    UnknownVendor(String),
}

/// Retired model names and their successors. Applied before any other check.
const DEPRECATED_ALIASES: &[(&str, &str)] = &[
    ("google/gemini-2.5-pro", "google/gemini-3-pro-preview"),
    ("anthropic/claude-3-5-sonnet", "anthropic/claude-sonnet-4"),
    ("openai/gpt-4-turbo", "openai/gpt-4o"),
];

/// A `vendor/model` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    vendor: Vendor,
    reference: String,
}

impl ModelRef {
    pub fn parse(input: &str) -> Result<Self, ParseModelRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseModelRefError::Empty);
        }

        let input = DEPRECATED_ALIASES
            .iter()
            .find(|(old, _)| *old == input)
            .map_or(input, |(_, new)| *new);

        let (vendor, _) = input
            .split_once('/')
            .ok_or(ParseModelRefError::MissingVendor)?;

        let vendor = match vendor {
            "google" => Vendor::Google,
            "anthropic" => Vendor::Anthropic,
            "openai" => Vendor::OpenAi,
            other => return Err(ParseModelRefError::UnknownVendor(other.to_string())),
        };

        Ok(Self {
            vendor,
            reference: input.to_string(),
        })
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn as_str(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

impl Serialize for ModelRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.reference.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ModelRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        ModelRef::parse(&value).map_err(serde::de::Error::custom)
    }
}
