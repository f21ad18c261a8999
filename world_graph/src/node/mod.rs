//! Node definitions for the scenario graph.

mod edge;

pub use edge::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ValidationError;

/// Stable, authored identifier for a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create an identifier from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed set of base categories a node can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Person,
    Location,
    Activity,
    Event,
    AssetPool,
    StateTrigger,
}

impl NodeCategory {
    /// Every category, in declaration order.
    pub const ALL: [NodeCategory; 6] = [
        NodeCategory::Person,
        NodeCategory::Location,
        NodeCategory::Activity,
        NodeCategory::Event,
        NodeCategory::AssetPool,
        NodeCategory::StateTrigger,
    ];

    /// Parse an authored category name (`"asset_pool"`, `"AssetPool"`, `"asset pool"`).
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "person" => Some(NodeCategory::Person),
            "location" => Some(NodeCategory::Location),
            "activity" => Some(NodeCategory::Activity),
            "event" => Some(NodeCategory::Event),
            "assetpool" => Some(NodeCategory::AssetPool),
            "statetrigger" => Some(NodeCategory::StateTrigger),
            _ => None,
        }
    }

    /// Snake-case name used in authored data.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeCategory::Person => "person",
            NodeCategory::Location => "location",
            NodeCategory::Activity => "activity",
            NodeCategory::Event => "event",
            NodeCategory::AssetPool => "asset_pool",
            NodeCategory::StateTrigger => "state_trigger",
        }
    }
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed node of a loaded graph.
///
/// The base category is fixed at construction; there is no setter.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    category: NodeCategory,

    /// Custom type tag dispatched through the node-type registry.
    pub kind: Option<String>,
    pub label: String,

    /// Region used for scoped persona resolution.
    pub region: Option<String>,

    /// Role descriptors; a node may hold several at once ("workplace", "hangout").
    pub roles: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Outcome bundles this node drives, in authored order.
    pub bundles: Vec<String>,
}

impl Node {
    /// Node with no kind, metadata or bundles.
    pub fn new(id: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: NodeId::new(id),
            category,
            kind: None,
            label: String::new(),
            region: None,
            roles: BTreeSet::new(),
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            bundles: Vec::new(),
        }
    }

    /// The node's category.
    pub fn category(&self) -> NodeCategory {
        self.category
    }

    /// Set the custom type tag checked against the registry.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set a display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the region used for persona scoping.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Add a free-form tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Insert a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach an outcome bundle by id.
    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundles.push(bundle.into());
        self
    }

    /// Whether the node carries `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether the node carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Whether the node drives any outcome bundle.
    pub fn drives_outcomes(&self) -> bool {
        !self.bundles.is_empty()
    }
}

/// Authored form of a node, as it appears in a graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(alias = "type")]
    pub category: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub bundles: Vec<String>,
}

impl NodeDefinition {
    /// Authored node with a category name still to be checked.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            kind: None,
            label: String::new(),
            region: None,
            roles: Vec::new(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            bundles: Vec::new(),
        }
    }

    /// Check the category and build the runtime node.
    pub fn into_node(self) -> Result<Node, ValidationError> {
        let id = NodeId::new(self.id);
        let category =
            NodeCategory::parse(&self.category).ok_or_else(|| ValidationError::UnknownCategory {
                node: id.clone(),
                category: self.category.clone(),
            })?;

        Ok(Node {
            id,
            category,
            kind: self.kind,
            label: self.label,
            region: self.region,
            roles: self.roles.into_iter().collect(),
            tags: self.tags.into_iter().collect(),
            metadata: self.metadata,
            bundles: self.bundles,
        })
    }
}

impl From<&Node> for NodeDefinition {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.0.clone(),
            category: node.category.as_str().to_string(),
            kind: node.kind.clone(),
            label: node.label.clone(),
            region: node.region.clone(),
            roles: node.roles.iter().cloned().collect(),
            tags: node.tags.iter().cloned().collect(),
            metadata: node.metadata.clone(),
            bundles: node.bundles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_variants() {
        assert_eq!(NodeCategory::parse("person"), Some(NodeCategory::Person));
        assert_eq!(NodeCategory::parse("AssetPool"), Some(NodeCategory::AssetPool));
        assert_eq!(NodeCategory::parse("asset_pool"), Some(NodeCategory::AssetPool));
        assert_eq!(NodeCategory::parse("State Trigger"), Some(NodeCategory::StateTrigger));
        assert_eq!(NodeCategory::parse("vehicle"), None);
    }

    #[test]
    fn test_category_round_trips_through_as_str() {
        for category in NodeCategory::ALL {
            assert_eq!(NodeCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new("bar", NodeCategory::Location)
            .with_role("workplace")
            .with_role("hangout")
            .with_tag("night")
            .with_region("downtown")
            .with_bundle("bar_evening");

        assert_eq!(node.category(), NodeCategory::Location);
        assert!(node.has_role("workplace"));
        assert!(node.has_role("hangout"));
        assert!(node.has_tag("night"));
        assert!(node.drives_outcomes());
        assert_eq!(node.region.as_deref(), Some("downtown"));
    }

    #[test]
    fn test_definition_rejects_unknown_category() {
        let err = NodeDefinition::new("x", "spaceship").into_node().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownCategory { ref category, .. } if category == "spaceship"));
    }

    #[test]
    fn test_definition_accepts_type_alias() {
        let def: NodeDefinition =
            serde_json::from_str(r#"{"id": "mia", "type": "person", "roles": ["friend"]}"#).unwrap();
        let node = def.into_node().unwrap();
        assert_eq!(node.category(), NodeCategory::Person);
        assert!(node.has_role("friend"));
    }
}
