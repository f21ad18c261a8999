//! StateStore - mutable runtime state keyed by node id.
//!
//! Topology lives in [`crate::GraphStore`]; this store only ever holds values.
//! Writes go through [`StateStore::apply_delta`] or [`StateStore::commit`], and
//! readers always see the last fully committed state.

mod runtime;
mod schema;

pub use runtime::*;
pub use schema::*;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StateError;
use crate::node::NodeId;

/// Version tag written into every snapshot.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Unique identifier for a play session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of applying one delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaOutcome {
    /// Stats that had to be clamped back into bounds.
    pub clamped: Vec<String>,
}

impl DeltaOutcome {
    /// Whether any stat was clamped.
    pub fn was_clamped(&self) -> bool {
        !self.clamped.is_empty()
    }
}

/// Result of committing one sweep's batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    pub cycle: u64,
    pub applied: usize,
    pub clamped: BTreeMap<NodeId, Vec<String>>,
}

/// Persisted form of a session's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_schema")]
    pub schema: u32,
    #[serde(default)]
    pub session: SessionId,
    #[serde(default)]
    pub cycle: u64,
    #[serde(default)]
    pub world_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, RuntimeState>,
}

fn default_schema() -> u32 {
    STATE_SCHEMA_VERSION
}

#[derive(Debug)]
struct Inner {
    session: SessionId,
    cycle: u64,
    world_flags: BTreeMap<String, bool>,
    nodes: BTreeMap<NodeId, RuntimeState>,
}

impl Inner {
    fn fresh() -> Self {
        Self {
            session: SessionId::new(),
            cycle: 0,
            world_flags: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    fn entry<'a>(&'a mut self, node: &NodeId, schema: &StatSchema) -> &'a mut RuntimeState {
        self.nodes
            .entry(node.clone())
            .or_insert_with(|| RuntimeState::new(node.clone(), schema))
    }
}

/// Runtime state for every node touched in the current session.
pub struct StateStore {
    schema: StatSchema,
    inner: RwLock<Inner>,
}

impl StateStore {
    /// Empty store at cycle zero with a fresh session.
    pub fn new(schema: StatSchema) -> Self {
        Self {
            schema,
            inner: RwLock::new(Inner::fresh()),
        }
    }

    /// Schema the store clamps against.
    pub fn schema(&self) -> &StatSchema {
        &self.schema
    }

    /// Current session id.
    pub fn session(&self) -> SessionId {
        self.inner.read().session
    }

    /// Last committed cycle.
    pub fn cycle(&self) -> u64 {
        self.inner.read().cycle
    }

    /// State for a node, created from schema defaults on first access.
    pub fn get(&self, node: &NodeId) -> RuntimeState {
        if let Some(state) = self.inner.read().nodes.get(node) {
            return state.clone();
        }
        let mut inner = self.inner.write();
        inner.entry(node, &self.schema).clone()
    }

    /// State for a node without creating it.
    pub fn peek(&self, node: &NodeId) -> Option<RuntimeState> {
        self.inner.read().nodes.get(node).cloned()
    }

    /// Ids of every node with stored state.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.read().nodes.keys().cloned().collect()
    }

    /// Apply one delta, clamping every stat it touches.
    pub fn apply_delta(&self, node: &NodeId, delta: &StateDelta) -> DeltaOutcome {
        let mut inner = self.inner.write();
        let clamped = inner.entry(node, &self.schema).apply(delta, &self.schema);
        if !clamped.is_empty() {
            tracing::debug!(node = %node, stats = ?clamped, "clamped stats");
        }
        DeltaOutcome { clamped }
    }

    /// Designer/debug write path. Same contract as [`StateStore::apply_delta`].
    pub fn apply_debug_override(&self, node: &NodeId, delta: &StateDelta) -> DeltaOutcome {
        tracing::info!(node = %node, ?delta, "applying debug override");
        self.apply_delta(node, delta)
    }

    /// Commit a sweep's batch as `cycle`.
    ///
    /// Timers tick once, then every delta applies in order, then the cycle
    /// advances; all under one write lock.
    pub fn commit(&self, deltas: Vec<(NodeId, StateDelta)>, cycle: u64) -> CommitSummary {
        let mut inner = self.inner.write();

        for state in inner.nodes.values_mut() {
            state.tick_timers();
        }

        let mut summary = CommitSummary {
            cycle,
            ..CommitSummary::default()
        };
        for (node, delta) in &deltas {
            let clamped = inner.entry(node, &self.schema).apply(delta, &self.schema);
            if !clamped.is_empty() {
                tracing::debug!(node = %node, stats = ?clamped, cycle, "clamped stats on commit");
                summary.clamped.entry(node.clone()).or_default().extend(clamped);
            }
            summary.applied += 1;
        }
        inner.cycle = cycle;

        tracing::debug!(cycle, applied = summary.applied, "committed state");
        summary
    }

    /// Set a world-level flag outside of a commit.
    pub fn set_world_flag(&self, flag: impl Into<String>, value: bool) {
        self.inner.write().world_flags.insert(flag.into(), value);
    }

    /// A world-level flag; unset reads as `false`.
    pub fn world_flag(&self, flag: &str) -> bool {
        self.inner.read().world_flags.get(flag).copied().unwrap_or(false)
    }

    /// Copy of every world-level flag.
    pub fn world_flags(&self) -> BTreeMap<String, bool> {
        self.inner.read().world_flags.clone()
    }

    /// Copy of the last committed state.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read();
        StateSnapshot {
            schema: STATE_SCHEMA_VERSION,
            session: inner.session,
            cycle: inner.cycle,
            world_flags: inner.world_flags.clone(),
            nodes: inner.nodes.clone(),
        }
    }

    /// Replace the session with a snapshot.
    ///
    /// Values outside the current schema's bounds are clamped on the way in.
    pub fn restore(&self, snapshot: StateSnapshot) -> Result<(), StateError> {
        if snapshot.schema > STATE_SCHEMA_VERSION {
            return Err(StateError::UnsupportedSchema {
                found: snapshot.schema,
                supported: STATE_SCHEMA_VERSION,
            });
        }

        let mut nodes = snapshot.nodes;
        for (id, state) in nodes.iter_mut() {
            state.node = id.clone();
            let moved = state.clamp_all(&self.schema);
            if !moved.is_empty() {
                tracing::warn!(node = %id, stats = ?moved, "restored stats outside bounds");
            }
        }

        let mut inner = self.inner.write();
        inner.session = snapshot.session;
        inner.cycle = snapshot.cycle;
        inner.world_flags = snapshot.world_flags;
        inner.nodes = nodes;
        tracing::info!(session = %inner.session, cycle = inner.cycle, nodes = inner.nodes.len(), "restored state");
        Ok(())
    }

    /// Snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Restore from JSON written by [`StateStore::to_json`].
    pub fn from_json(&self, json: &str) -> Result<(), StateError> {
        let snapshot: StateSnapshot = serde_json::from_str(json)?;
        self.restore(snapshot)
    }

    /// Start a new session: empty state, cycle zero.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::fresh();
        tracing::info!(session = %inner.session, "started new session");
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("StateStore")
            .field("session", &inner.session)
            .field("cycle", &inner.cycle)
            .field("nodes", &inner.nodes.len())
            .finish()
    }
}
