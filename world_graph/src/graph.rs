//! Graph store - the frozen topology of a play session.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{EdgeEndpoint, GraphError, ValidationError};
use crate::node::{Edge, EdgeDefinition, Node, NodeDefinition, NodeId};
use crate::registry::NodeTypeRegistry;

fn default_version() -> String {
    "1.0".to_string()
}

/// Serializable authoring form of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GraphDefinition {
    /// Empty definition with the given graph id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: default_version(),
            ..Default::default()
        }
    }

    /// Append a node; authored order is kept.
    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an edge; authored order is kept.
    pub fn with_edge(mut self, edge: EdgeDefinition) -> Self {
        self.edges.push(edge);
        self
    }
}

/// The validated, read-only graph.
///
/// Nodes live in an arena indexed by position; edges refer to nodes by id and
/// each node keeps the indices of its outgoing and incoming edges. There are no
/// mutating methods: authoring tools edit a [`GraphDefinition`] and load again.
#[derive(Debug, Clone)]
pub struct GraphStore {
    id: String,
    version: String,
    metadata: BTreeMap<String, serde_json::Value>,

    /// All nodes in authored order.
    nodes: Vec<Node>,

    /// Index: node id -> arena position.
    index: HashMap<NodeId, usize>,

    /// All edges in authored order.
    edges: Vec<Edge>,

    /// Per-node outgoing edge indices, in authored order.
    outgoing: Vec<Vec<usize>>,

    /// Per-node incoming edge indices, in authored order.
    incoming: Vec<Vec<usize>>,
}

impl GraphStore {
    /// Validate a definition and build the store. Fails fast on the first problem.
    pub fn load(
        definition: GraphDefinition,
        registry: &NodeTypeRegistry,
    ) -> Result<Self, ValidationError> {
        let GraphDefinition {
            id,
            version,
            nodes: node_defs,
            edges: edge_defs,
            metadata,
        } = definition;

        let mut nodes = Vec::with_capacity(node_defs.len());
        let mut index = HashMap::with_capacity(node_defs.len());
        for def in node_defs {
            let node = def.into_node()?;
            if index.insert(node.id.clone(), nodes.len()).is_some() {
                return Err(ValidationError::DuplicateNode(node.id));
            }
            nodes.push(node);
        }

        for node in &nodes {
            registry.validate_node(node)?;
        }

        let mut edges = Vec::with_capacity(edge_defs.len());
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        for (position, def) in edge_defs.into_iter().enumerate() {
            let edge = def.into_edge()?;
            let source = Self::endpoint(&index, &edge, position, EdgeEndpoint::Source)?;
            let target = Self::endpoint(&index, &edge, position, EdgeEndpoint::Target)?;
            registry.validate_edge(
                &edge,
                position,
                nodes[source].category(),
                nodes[target].category(),
            )?;
            outgoing[source].push(position);
            incoming[target].push(position);
            edges.push(edge);
        }

        tracing::info!(
            graph = %id,
            nodes = nodes.len(),
            edges = edges.len(),
            "graph loaded"
        );

        Ok(Self {
            id,
            version,
            metadata,
            nodes,
            index,
            edges,
            outgoing,
            incoming,
        })
    }

    fn endpoint(
        index: &HashMap<NodeId, usize>,
        edge: &Edge,
        position: usize,
        endpoint: EdgeEndpoint,
    ) -> Result<usize, ValidationError> {
        let id = match endpoint {
            EdgeEndpoint::Source => &edge.source,
            EdgeEndpoint::Target => &edge.target,
        };
        index
            .get(id)
            .copied()
            .ok_or_else(|| ValidationError::DanglingEdge {
                edge: edge.label(position),
                endpoint,
                node: id.clone(),
            })
    }

    /// Parse a JSON graph definition and load it.
    pub fn from_json_str(source: &str, registry: &NodeTypeRegistry) -> Result<Self, GraphError> {
        let definition: GraphDefinition = serde_json::from_str(source)?;
        Ok(Self::load(definition, registry)?)
    }

    /// Read a JSON graph definition from disk and load it.
    pub fn load_from_path(path: &Path, registry: &NodeTypeRegistry) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, registry)
    }

    /// Re-check the loaded graph against a (possibly reloaded) registry.
    pub fn revalidate(&self, registry: &NodeTypeRegistry) -> Result<(), ValidationError> {
        for node in &self.nodes {
            registry.validate_node(node)?;
        }
        for (position, edge) in self.edges.iter().enumerate() {
            let source = self.index[&edge.source];
            let target = self.index[&edge.target];
            registry.validate_edge(
                edge,
                position,
                self.nodes[source].category(),
                self.nodes[target].category(),
            )?;
        }
        Ok(())
    }

    /// Export back to the authoring form.
    pub fn to_definition(&self) -> GraphDefinition {
        GraphDefinition {
            id: self.id.clone(),
            version: self.version.clone(),
            nodes: self.nodes.iter().map(NodeDefinition::from).collect(),
            edges: self.edges.iter().map(EdgeDefinition::from).collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// Graph id from the definition.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Authored version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Free-form graph metadata.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Result<&Node, GraphError> {
        self.index
            .get(id)
            .map(|&position| &self.nodes[position])
            .ok_or_else(|| GraphError::NotFound(id.clone()))
    }

    /// Whether a node with this id exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// All nodes in authored order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// All edges in authored order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Outgoing edges of a node in authored order. Unknown ids have none.
    pub fn edges_from(&self, id: &NodeId) -> Vec<&Edge> {
        self.collect_edges(id, &self.outgoing)
    }

    /// Incoming edges of a node in authored order. Unknown ids have none.
    pub fn edges_to(&self, id: &NodeId) -> Vec<&Edge> {
        self.collect_edges(id, &self.incoming)
    }

    /// Outgoing edges filtered by relation.
    pub fn edges_from_by_relation(&self, id: &NodeId, relation: &str) -> Vec<&Edge> {
        self.edges_from(id)
            .into_iter()
            .filter(|edge| edge.relation == relation)
            .collect()
    }

    fn collect_edges(&self, id: &NodeId, adjacency: &[Vec<usize>]) -> Vec<&Edge> {
        self.index
            .get(id)
            .map(|&position| adjacency[position].iter().map(|&e| &self.edges[e]).collect())
            .unwrap_or_default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
