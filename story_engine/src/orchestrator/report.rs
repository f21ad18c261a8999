//! Per-sweep diagnostic report.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use world_graph::NodeId;

use crate::error::SkipReason;
use crate::persona::PersonaSwap;

/// Unique identifier for one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SweepId(pub Uuid);

impl SweepId {
    /// Fresh random sweep id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SweepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SweepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node whose chosen outcome was committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedNode {
    pub node: NodeId,
    pub bundle: String,
    pub outcome: String,
    pub score: f64,

    /// Bound asset ids, in chain order.
    pub assets: Vec<String>,

    /// Stats the write-back had to clamp.
    pub clamped: Vec<String>,
}

/// A node that did not advance this cycle, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedNode {
    pub node: NodeId,
    pub reason: SkipReason,
}

/// What one sweep did. Every gathered node is in exactly one of the lists.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub id: SweepId,
    pub cycle: u64,
    pub advanced: Vec<AdvancedNode>,
    pub skipped: Vec<SkippedNode>,
    pub persona_swaps: Vec<PersonaSwap>,
}

impl SweepReport {
    pub(crate) fn new(cycle: u64) -> Self {
        Self {
            id: SweepId::new(),
            cycle,
            advanced: Vec::new(),
            skipped: Vec::new(),
            persona_swaps: Vec::new(),
        }
    }

    /// Nothing gathered and no persona swapped.
    pub fn is_empty(&self) -> bool {
        self.advanced.is_empty() && self.skipped.is_empty() && self.persona_swaps.is_empty()
    }

    /// Result for `node` if it advanced.
    pub fn advanced_node(&self, node: &NodeId) -> Option<&AdvancedNode> {
        self.advanced.iter().find(|a| &a.node == node)
    }

    /// Reason `node` was skipped, if it was.
    pub fn skip_reason(&self, node: &NodeId) -> Option<&SkipReason> {
        self.skipped.iter().find(|s| &s.node == node).map(|s| &s.reason)
    }
}
