//! Weight adjusters - pluggable scoring hooks.
//!
//! An adjuster is a pure function of the scoring context returning a weight
//! delta. It sees state by shared reference only, so it has no way to write to
//! the graph or the state store.

use std::collections::HashMap;
use std::sync::Arc;

use world_graph::{Node, RuntimeState};

use crate::outcome::Outcome;
use crate::persona::ActivePersona;

/// Read-only inputs handed to an adjuster.
pub struct AdjusterContext<'a> {
    pub node: &'a Node,
    pub outcome: &'a Outcome,
    pub state: &'a RuntimeState,
    pub persona: &'a ActivePersona,
    pub cycle: u64,
}

/// A named scoring hook.
pub trait WeightAdjuster: Send + Sync {
    fn name(&self) -> &str;

    /// Weight delta for one candidate. Non-finite results count as zero.
    fn adjust(&self, context: &AdjusterContext<'_>) -> f64;
}

/// Adapter for closures.
pub struct FnAdjuster<F> {
    name: String,
    f: F,
}

impl<F> FnAdjuster<F>
where
    F: Fn(&AdjusterContext<'_>) -> f64 + Send + Sync,
{
    /// Wrap a closure under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> WeightAdjuster for FnAdjuster<F>
where
    F: Fn(&AdjusterContext<'_>) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn adjust(&self, context: &AdjusterContext<'_>) -> f64 {
        (self.f)(context)
    }
}

/// Adjuster registry for looking up adjusters by name.
#[derive(Clone, Default)]
pub struct AdjusterRegistry {
    adjusters: HashMap<String, Arc<dyn WeightAdjuster>>,
}

impl AdjusterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adjuster, replacing any with the same name.
    pub fn register(&mut self, adjuster: Arc<dyn WeightAdjuster>) {
        tracing::debug!(adjuster = %adjuster.name(), "registered weight adjuster");
        self.adjusters.insert(adjuster.name().to_string(), adjuster);
    }

    /// Adjuster registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn WeightAdjuster>> {
        self.adjusters.get(name).cloned()
    }

    /// Whether an adjuster is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.adjusters.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adjusters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sum of the named adjusters. Unknown names and non-finite results contribute nothing.
    pub fn total(&self, names: &[String], context: &AdjusterContext<'_>) -> f64 {
        names
            .iter()
            .filter_map(|name| {
                let adjuster = self.adjusters.get(name)?;
                let delta = adjuster.adjust(context);
                if delta.is_finite() {
                    Some(delta)
                } else {
                    tracing::warn!(adjuster = %name, node = %context.node.id, "adjuster returned non-finite weight");
                    None
                }
            })
            .sum()
    }
}

impl std::fmt::Debug for AdjusterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdjusterRegistry")
            .field("adjusters", &self.names())
            .finish()
    }
}
