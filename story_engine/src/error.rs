//! Error types for the decision layer.

use thiserror::Error;
use world_graph::ValidationError;

/// A qualitative tag with no registered scale/descriptor and no persona override.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown qualitative tag '{scale}:{descriptor}'")]
pub struct UnknownTagError {
    pub scale: String,
    pub descriptor: String,
}

/// Persona registration and activation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersonaError {
    #[error("unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("slider '{slider}' value {value} outside [{lo}, {hi}]")]
    SliderOutOfRange {
        slider: String,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("persona '{persona}' is invalid: {reason}")]
    InvalidPersona { persona: String, reason: String },
}

/// Why an outcome bundle produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("unknown outcome bundle '{0}'")]
    UnknownBundle(String),

    #[error("no eligible outcome in bundle '{bundle}'")]
    NoEligibleOutcome { bundle: String },
}

/// Failures of the external asset catalog boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("asset catalog unavailable: {0}")]
    Unavailable(String),

    #[error("asset catalog query timed out after {0} ms")]
    Timeout(u64),
}

/// Asset selection failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssetError {
    #[error("no matching asset for outcome '{outcome}': {reason}")]
    NoMatchingAsset { outcome: String, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Configuration that cannot start a session.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// The only errors a sweep returns. Node-local problems go into the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweepError {
    #[error("a sweep is already in flight")]
    AlreadyRunning,

    #[error("sweep cancelled before commit")]
    Cancelled,

    #[error("asset catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

/// Node-local reason a node did not advance this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoEligibleOutcome { bundle: String },
    NoMatchingAsset { outcome: String, reason: String },
    CatalogTimeout { outcome: String },
    UnknownBundle(String),
    UnknownTag(UnknownTagError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoEligibleOutcome { bundle } => {
                write!(f, "no eligible outcome in bundle '{}'", bundle)
            }
            SkipReason::NoMatchingAsset { outcome, reason } => {
                write!(f, "no matching asset for '{}': {}", outcome, reason)
            }
            SkipReason::CatalogTimeout { outcome } => {
                write!(f, "catalog timed out resolving '{}'", outcome)
            }
            SkipReason::UnknownBundle(bundle) => write!(f, "unknown bundle '{}'", bundle),
            SkipReason::UnknownTag(err) => write!(f, "{}", err),
        }
    }
}

impl From<SelectionError> for SkipReason {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::UnknownBundle(bundle) => SkipReason::UnknownBundle(bundle),
            SelectionError::NoEligibleOutcome { bundle } => SkipReason::NoEligibleOutcome { bundle },
        }
    }
}

impl From<UnknownTagError> for SkipReason {
    fn from(err: UnknownTagError) -> Self {
        SkipReason::UnknownTag(err)
    }
}

