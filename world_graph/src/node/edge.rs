//! Directed, semantically labelled edges between nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::NodeId;
use crate::error::ValidationError;
use crate::tag::TagRef;

/// An authored relation from `source` to `target`.
///
/// The qualitative tag is read-only: the orchestrator may reinterpret it
/// numerically every cycle, but never writes it back.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: Option<String>,
    pub source: NodeId,
    pub target: NodeId,

    /// Semantic descriptor, e.g. "lives_at", "hosts", "uses".
    pub relation: String,
    pub qualitative: Option<TagRef>,
    pub weight: Option<f64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Edge {
    /// Edge with weight 1.0 and no qualitative tag.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source: NodeId::new(source),
            target: NodeId::new(target),
            relation: relation.into(),
            qualitative: None,
            weight: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a qualitative tag.
    pub fn with_qualitative(mut self, tag: TagRef) -> Self {
        self.qualitative = Some(tag);
        self
    }

    /// Set the edge weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Label used in diagnostics: the authored id, or the position in the edge list.
    pub fn label(&self, index: usize) -> String {
        match &self.id {
            Some(id) => format!("'{}'", id),
            None => format!("#{}", index),
        }
    }
}

/// Authored form of an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(alias = "relation_type")]
    pub relation: String,
    #[serde(default)]
    pub qualitative: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EdgeDefinition {
    /// Authored edge with no id or tag.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            qualitative: None,
            weight: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a qualitative tag in `scale:descriptor` form. Parsed on load.
    pub fn with_qualitative(mut self, tag: impl Into<String>) -> Self {
        self.qualitative = Some(tag.into());
        self
    }

    /// Parse the qualitative tag and build the runtime edge.
    pub fn into_edge(self) -> Result<Edge, ValidationError> {
        let qualitative = self.qualitative.as_deref().map(TagRef::parse).transpose()?;
        Ok(Edge {
            id: self.id,
            source: NodeId::new(self.source),
            target: NodeId::new(self.target),
            relation: self.relation,
            qualitative,
            weight: self.weight,
            metadata: self.metadata,
        })
    }
}

impl From<&Edge> for EdgeDefinition {
    fn from(edge: &Edge) -> Self {
        Self {
            id: edge.id.clone(),
            source: edge.source.0.clone(),
            target: edge.target.0.clone(),
            relation: edge.relation.clone(),
            qualitative: edge.qualitative.as_ref().map(|t| t.to_string()),
            weight: edge.weight,
            metadata: edge.metadata.clone(),
        }
    }
}
