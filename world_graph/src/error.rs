//! Error types for graph loading and state persistence.

use std::fmt;

use thiserror::Error;

use crate::node::{NodeCategory, NodeId};

/// Which end of an edge a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEndpoint {
    Source,
    Target,
}

impl fmt::Display for EdgeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeEndpoint::Source => write!(f, "source"),
            EdgeEndpoint::Target => write!(f, "target"),
        }
    }
}

/// A graph or schema that cannot be admitted into play.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    #[error("edge {edge} references missing {endpoint} node '{node}'")]
    DanglingEdge {
        edge: String,
        endpoint: EdgeEndpoint,
        node: NodeId,
    },

    #[error("node '{node}' has unknown category '{category}'")]
    UnknownCategory { node: NodeId, category: String },

    #[error("node '{node}' has unregistered kind '{kind}'")]
    UnknownKind { node: NodeId, kind: String },

    #[error("node '{node}' of kind '{kind}' must be a {expected}, found {found}")]
    CategoryMismatch {
        node: NodeId,
        kind: String,
        expected: NodeCategory,
        found: NodeCategory,
    },

    #[error("node '{node}' is missing metadata field '{field}' required by kind '{kind}'")]
    MissingMetadata {
        node: NodeId,
        kind: String,
        field: String,
    },

    #[error("node '{node}' carries metadata field '{field}' not allowed for kind '{kind}'")]
    UnexpectedMetadata {
        node: NodeId,
        kind: String,
        field: String,
    },

    #[error("node '{node}' carries role '{role}' not allowed for kind '{kind}'")]
    IllegalRole {
        node: NodeId,
        kind: String,
        role: String,
    },

    #[error("relation '{relation}' on edge {edge} does not allow {source_category} -> {target_category}")]
    IllegalRelation {
        edge: String,
        relation: String,
        source_category: NodeCategory,
        target_category: NodeCategory,
    },

    #[error("malformed qualitative tag '{raw}': {reason}")]
    MalformedTag { raw: String, reason: &'static str },

    #[error("stat '{stat}' has invalid bounds [{lo}, {hi}]")]
    InvalidBounds { stat: String, lo: f64, hi: f64 },

    #[error("'{0}' is reserved and cannot name a stat")]
    ReservedStat(String),
}

/// Errors surfaced by graph loading and lookup.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("node '{0}' not found")]
    NotFound(NodeId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by state snapshots and schema loading.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("snapshot schema {found} is newer than supported schema {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("state schema invalid: {0}")]
    Validation(#[from] ValidationError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
