//! Qualitative tag references carried by edges and scoring inputs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// A reference to a qualitative descriptor, optionally pinned to a scale.
///
/// Written as `"scale:descriptor"` (e.g. `"core.trust:wary"`) or as a bare
/// `"descriptor"` when the scale is implied by context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TagRef {
    pub scale: Option<String>,
    pub descriptor: String,
}

impl TagRef {
    /// Create a tag pinned to a scale.
    pub fn new(scale: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            scale: Some(scale.into()),
            descriptor: normalize_descriptor(&descriptor.into()),
        }
    }

    /// Create a tag that names only a descriptor.
    pub fn bare(descriptor: impl Into<String>) -> Self {
        Self {
            scale: None,
            descriptor: normalize_descriptor(&descriptor.into()),
        }
    }

    /// Parse the authored string form.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let malformed = |reason| ValidationError::MalformedTag {
            raw: raw.to_string(),
            reason,
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(malformed("empty tag"));
        }

        let mut parts = trimmed.split(':');
        let first = parts.next().unwrap_or_default().trim();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Self::bare(first)),
            (Some(descriptor), None) => {
                let descriptor = descriptor.trim();
                if first.is_empty() {
                    return Err(malformed("empty scale"));
                }
                if descriptor.is_empty() {
                    return Err(malformed("empty descriptor"));
                }
                Ok(Self::new(first, descriptor))
            }
            (Some(_), Some(_)) => Err(malformed("more than one ':' separator")),
        }
    }

    /// Return a copy pinned to `scale` when this tag has no scale of its own.
    pub fn or_scale(&self, scale: &str) -> Self {
        match self.scale {
            Some(_) => self.clone(),
            None => Self {
                scale: Some(scale.to_string()),
                descriptor: self.descriptor.clone(),
            },
        }
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scale {
            Some(scale) => write!(f, "{}:{}", scale, self.descriptor),
            None => write!(f, "{}", self.descriptor),
        }
    }
}

impl TryFrom<String> for TagRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TagRef> for String {
    fn from(tag: TagRef) -> Self {
        tag.to_string()
    }
}

/// Canonical descriptor spelling: trimmed, lowercase, spaces and hyphens as `_`.
pub fn normalize_descriptor(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
