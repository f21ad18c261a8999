//! Conditional persona swaps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use world_graph::{NodeId, StateStore};

use super::Scope;

/// What the trigger conditions can observe: committed state only.
pub struct TriggerView<'a> {
    pub cycle: u64,
    pub state: &'a StateStore,
}

impl<'a> TriggerView<'a> {
    /// View of committed state at `cycle`.
    pub fn new(cycle: u64, state: &'a StateStore) -> Self {
        Self { cycle, state }
    }
}

/// When a trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    WorldFlag {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
    CycleAtLeast {
        cycle: u64,
    },
    Counter {
        node: NodeId,
        counter: String,
        at_least: u32,
    },
    StatAtLeast {
        node: NodeId,
        stat: String,
        value: f64,
    },
    StatAtMost {
        node: NodeId,
        stat: String,
        value: f64,
    },
    All {
        conditions: Vec<TriggerCondition>,
    },
}

fn default_true() -> bool {
    true
}

impl TriggerCondition {
    /// Whether the condition holds for `view`.
    pub fn holds(&self, view: &TriggerView<'_>) -> bool {
        match self {
            TriggerCondition::WorldFlag { flag, value } => view.state.world_flag(flag) == *value,
            TriggerCondition::CycleAtLeast { cycle } => view.cycle >= *cycle,
            TriggerCondition::Counter {
                node,
                counter,
                at_least,
            } => view
                .state
                .peek(node)
                .map(|s| s.counter(counter) >= *at_least)
                .unwrap_or(false),
            TriggerCondition::StatAtLeast { node, stat, value } => view
                .state
                .peek(node)
                .and_then(|s| s.stat(stat))
                .map(|v| v >= *value)
                .unwrap_or(false),
            TriggerCondition::StatAtMost { node, stat, value } => view
                .state
                .peek(node)
                .and_then(|s| s.stat(stat))
                .map(|v| v <= *value)
                .unwrap_or(false),
            TriggerCondition::All { conditions } => conditions.iter().all(|c| c.holds(view)),
        }
    }
}

/// Swap `scope` to `persona` whenever `when` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaTrigger {
    pub id: String,
    #[serde(default = "global_scope")]
    pub scope: Scope,
    pub persona: String,
    pub when: TriggerCondition,
    #[serde(default)]
    pub overrides: BTreeMap<String, f64>,
}

fn global_scope() -> Scope {
    Scope::Global
}

impl PersonaTrigger {
    /// Trigger with no slider overrides.
    pub fn new(
        id: impl Into<String>,
        scope: Scope,
        persona: impl Into<String>,
        when: TriggerCondition,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            persona: persona.into(),
            when,
            overrides: BTreeMap::new(),
        }
    }
}
