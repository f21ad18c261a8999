//! Node-type capability registry.
//!
//! Custom node types are data, not subclasses: a type tag maps to a
//! [`NodeTypeDescriptor`] naming its base category, the metadata fields it
//! needs or tolerates, the roles it may carry, and whether the orchestrator
//! drives it. Relation descriptors constrain which categories an edge may join.
//!
//! An empty registry accepts everything, so plain graphs load without one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{GraphError, ValidationError};
use crate::node::{Edge, Node, NodeCategory};

fn default_true() -> bool {
    true
}

/// Capabilities of a custom node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeDescriptor {
    pub id: String,
    pub category: NodeCategory,
    #[serde(default)]
    pub required_metadata: BTreeSet<String>,
    /// `None` allows any metadata field.
    #[serde(default)]
    pub allowed_metadata: Option<BTreeSet<String>>,
    /// `None` allows any role.
    #[serde(default)]
    pub allowed_roles: Option<BTreeSet<String>>,
    #[serde(default = "default_true")]
    pub orchestrated: bool,
}

impl NodeTypeDescriptor {
    /// Orchestrated node type with no metadata or role rules.
    pub fn new(id: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            category,
            required_metadata: BTreeSet::new(),
            allowed_metadata: None,
            allowed_roles: None,
            orchestrated: true,
        }
    }

    /// Require a metadata field.
    pub fn requiring(mut self, field: impl Into<String>) -> Self {
        self.required_metadata.insert(field.into());
        self
    }

    /// Restrict roles to this set.
    pub fn allowing_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Mark the type as never driven by the orchestrator.
    pub fn passive(mut self) -> Self {
        self.orchestrated = false;
        self
    }
}

/// Which categories a relation may connect. Empty sets mean "any".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationTypeDescriptor {
    pub id: String,
    #[serde(default)]
    pub source_categories: BTreeSet<NodeCategory>,
    #[serde(default)]
    pub target_categories: BTreeSet<NodeCategory>,
}

impl RelationTypeDescriptor {
    /// Relation allowed between any categories.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_categories: BTreeSet::new(),
            target_categories: BTreeSet::new(),
        }
    }

    /// Restrict legal source categories.
    pub fn from_categories(mut self, categories: impl IntoIterator<Item = NodeCategory>) -> Self {
        self.source_categories.extend(categories);
        self
    }

    /// Restrict legal target categories.
    pub fn to_categories(mut self, categories: impl IntoIterator<Item = NodeCategory>) -> Self {
        self.target_categories.extend(categories);
        self
    }

    fn allows(&self, source: NodeCategory, target: NodeCategory) -> bool {
        (self.source_categories.is_empty() || self.source_categories.contains(&source))
            && (self.target_categories.is_empty() || self.target_categories.contains(&target))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    node_types: Vec<NodeTypeDescriptor>,
    #[serde(default)]
    relation_types: Vec<RelationTypeDescriptor>,
}

/// Registry of custom node and relation types.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeRegistry {
    node_types: BTreeMap<String, NodeTypeDescriptor>,
    relation_types: BTreeMap<String, RelationTypeDescriptor>,
}

impl NodeTypeRegistry {
    /// Empty, permissive registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load descriptors from a TOML document with `[[node_types]]` and
    /// `[[relation_types]]` tables.
    pub fn from_toml_str(source: &str) -> Result<Self, GraphError> {
        let file: RegistryFile = toml::from_str(source)?;
        let mut registry = Self::new();
        for descriptor in file.node_types {
            registry.register_node_type(descriptor);
        }
        for descriptor in file.relation_types {
            registry.register_relation_type(descriptor);
        }
        Ok(registry)
    }

    /// Register (or replace) a node type.
    pub fn register_node_type(&mut self, descriptor: NodeTypeDescriptor) {
        tracing::debug!(kind = %descriptor.id, category = %descriptor.category, "registered node type");
        self.node_types.insert(descriptor.id.clone(), descriptor);
    }

    /// Register (or replace) a relation type.
    pub fn register_relation_type(&mut self, descriptor: RelationTypeDescriptor) {
        tracing::debug!(relation = %descriptor.id, "registered relation type");
        self.relation_types.insert(descriptor.id.clone(), descriptor);
    }

    /// Descriptor for a custom node kind.
    pub fn node_type(&self, kind: &str) -> Option<&NodeTypeDescriptor> {
        self.node_types.get(kind)
    }

    /// Descriptor for a relation.
    pub fn relation_type(&self, relation: &str) -> Option<&RelationTypeDescriptor> {
        self.relation_types.get(relation)
    }

    /// True when nothing is registered; every node and edge is then accepted.
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty() && self.relation_types.is_empty()
    }

    /// Check a node against its kind's capabilities.
    pub fn validate_node(&self, node: &Node) -> Result<(), ValidationError> {
        let Some(kind) = node.kind.as_deref() else {
            return Ok(());
        };

        let Some(descriptor) = self.node_types.get(kind) else {
            if self.node_types.is_empty() {
                return Ok(());
            }
            return Err(ValidationError::UnknownKind {
                node: node.id.clone(),
                kind: kind.to_string(),
            });
        };

        if descriptor.category != node.category() {
            return Err(ValidationError::CategoryMismatch {
                node: node.id.clone(),
                kind: kind.to_string(),
                expected: descriptor.category,
                found: node.category(),
            });
        }

        if let Some(field) = descriptor
            .required_metadata
            .iter()
            .find(|field| !node.metadata.contains_key(*field))
        {
            return Err(ValidationError::MissingMetadata {
                node: node.id.clone(),
                kind: kind.to_string(),
                field: field.clone(),
            });
        }

        if let Some(allowed) = &descriptor.allowed_metadata {
            if let Some(field) = node
                .metadata
                .keys()
                .find(|field| !allowed.contains(*field) && !descriptor.required_metadata.contains(*field))
            {
                return Err(ValidationError::UnexpectedMetadata {
                    node: node.id.clone(),
                    kind: kind.to_string(),
                    field: field.clone(),
                });
            }
        }

        if let Some(allowed) = &descriptor.allowed_roles {
            if let Some(role) = node.roles.iter().find(|role| !allowed.contains(*role)) {
                return Err(ValidationError::IllegalRole {
                    node: node.id.clone(),
                    kind: kind.to_string(),
                    role: role.clone(),
                });
            }
        }

        Ok(())
    }

    /// Check an edge's relation against the categories of its endpoints.
    pub fn validate_edge(
        &self,
        edge: &Edge,
        index: usize,
        source: NodeCategory,
        target: NodeCategory,
    ) -> Result<(), ValidationError> {
        match self.relation_types.get(&edge.relation) {
            Some(descriptor) if !descriptor.allows(source, target) => {
                Err(ValidationError::IllegalRelation {
                    edge: edge.label(index),
                    relation: edge.relation.clone(),
                    source_category: source,
                    target_category: target,
                })
            }
            _ => Ok(()),
        }
    }

    /// Whether the orchestrator should consider this node at all.
    pub fn is_orchestrated(&self, node: &Node) -> bool {
        node.kind
            .as_deref()
            .and_then(|kind| self.node_types.get(kind))
            .map(|descriptor| descriptor.orchestrated)
            .unwrap_or(true)
    }
}
