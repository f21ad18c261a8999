//! Per-node runtime state and the deltas that change it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::StatSchema;
use crate::node::NodeId;

/// Direction of the last change applied to a stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Steady,
}

/// Mutable state of one node during a play session.
///
/// `node` is a lookup key back into the graph, not ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub node: NodeId,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,

    /// Remaining cycles per timer; absent means idle.
    #[serde(default)]
    pub timers: BTreeMap<String, u32>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,

    /// Recent-event counters.
    #[serde(default)]
    pub counters: BTreeMap<String, u32>,

    /// Signed change applied to each stat by its last write.
    #[serde(default)]
    pub trends: BTreeMap<String, f64>,
}

impl RuntimeState {
    /// Fresh state seeded with every declared stat's default.
    pub fn new(node: NodeId, schema: &StatSchema) -> Self {
        Self {
            node,
            stats: schema
                .declared()
                .map(|(name, _)| (name.clone(), schema.default_value(name)))
                .collect(),
            timers: BTreeMap::new(),
            flags: BTreeMap::new(),
            counters: BTreeMap::new(),
            trends: BTreeMap::new(),
        }
    }

    /// Current value of a stat, if it was ever set.
    pub fn stat(&self, name: &str) -> Option<f64> {
        self.stats.get(name).copied()
    }

    /// A flag; unset reads as `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Remaining cycles on a timer; `0` when not running.
    pub fn timer(&self, name: &str) -> u32 {
        self.timers.get(name).copied().unwrap_or(0)
    }

    /// Whether a timer is not running.
    pub fn timer_idle(&self, name: &str) -> bool {
        self.timer(name) == 0
    }

    /// A counter; unset reads as `0`.
    pub fn counter(&self, name: &str) -> u32 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Direction of the last change to `stat`.
    pub fn trend(&self, stat: &str) -> Trend {
        match self.trends.get(stat) {
            Some(delta) if *delta > 0.0 => Trend::Rising,
            Some(delta) if *delta < 0.0 => Trend::Falling,
            _ => Trend::Steady,
        }
    }

    /// Count one elapsed cycle on every running timer.
    pub(crate) fn tick_timers(&mut self) {
        for remaining in self.timers.values_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        self.timers.retain(|_, remaining| *remaining > 0);
    }

    /// Apply a delta, clamping every stat it touches. Returns the clamped stat names.
    pub(crate) fn apply(&mut self, delta: &StateDelta, schema: &StatSchema) -> Vec<String> {
        let mut clamped = Vec::new();

        for change in &delta.stats {
            let stat = change.stat();
            let bounds = schema.bounds(stat);
            let previous = self
                .stats
                .get(stat)
                .copied()
                .unwrap_or_else(|| schema.default_value(stat));
            let raw = match change {
                StatChange::Add { amount, .. } => previous + amount,
                StatChange::Set { value, .. } => *value,
            };
            let (value, moved) = bounds.clamp(raw);
            if moved && !clamped.iter().any(|name: &String| name == stat) {
                clamped.push(stat.to_string());
            }
            self.trends.insert(stat.to_string(), value - previous);
            self.stats.insert(stat.to_string(), value);
        }

        for change in &delta.timers {
            match change {
                TimerChange::Set { timer, cycles } if *cycles > 0 => {
                    self.timers.insert(timer.clone(), *cycles);
                }
                TimerChange::Set { timer, .. } | TimerChange::Clear { timer } => {
                    self.timers.remove(timer);
                }
            }
        }

        for (flag, value) in &delta.flags {
            self.flags.insert(flag.clone(), *value);
        }

        for change in &delta.counters {
            match change {
                CounterChange::Increment { counter, by } => {
                    let entry = self.counters.entry(counter.clone()).or_insert(0);
                    *entry = entry.saturating_add(*by);
                }
                CounterChange::Reset { counter } => {
                    self.counters.remove(counter);
                }
            }
        }

        clamped
    }

    /// Pull every stat back into bounds. Returns the names that moved.
    pub(crate) fn clamp_all(&mut self, schema: &StatSchema) -> Vec<String> {
        let mut moved = Vec::new();
        for (name, value) in self.stats.iter_mut() {
            let (clamped, changed) = schema.bounds(name).clamp(*value);
            if changed {
                *value = clamped;
                moved.push(name.clone());
            }
        }
        moved
    }
}

/// A change to one stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StatChange {
    Add { stat: String, amount: f64 },
    Set { stat: String, value: f64 },
}

impl StatChange {
    /// Name of the stat this change targets.
    pub fn stat(&self) -> &str {
        match self {
            StatChange::Add { stat, .. } | StatChange::Set { stat, .. } => stat,
        }
    }
}

/// A change to one timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TimerChange {
    Set { timer: String, cycles: u32 },
    Clear { timer: String },
}

/// A change to one recent-event counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CounterChange {
    Increment { counter: String, by: u32 },
    Reset { counter: String },
}

/// A batch of changes to one node's state, applied in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default)]
    pub stats: Vec<StatChange>,
    #[serde(default)]
    pub timers: Vec<TimerChange>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub counters: Vec<CounterChange>,
}

impl StateDelta {
    /// Empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to a stat; the result is clamped on apply.
    pub fn add_stat(mut self, stat: impl Into<String>, amount: f64) -> Self {
        self.stats.push(StatChange::Add {
            stat: stat.into(),
            amount,
        });
        self
    }

    /// Set a stat; the value is clamped on apply.
    pub fn set_stat(mut self, stat: impl Into<String>, value: f64) -> Self {
        self.stats.push(StatChange::Set {
            stat: stat.into(),
            value,
        });
        self
    }

    /// Start or restart a timer.
    pub fn set_timer(mut self, timer: impl Into<String>, cycles: u32) -> Self {
        self.timers.push(TimerChange::Set {
            timer: timer.into(),
            cycles,
        });
        self
    }

    /// Stop a timer.
    pub fn clear_timer(mut self, timer: impl Into<String>) -> Self {
        self.timers.push(TimerChange::Clear {
            timer: timer.into(),
        });
        self
    }

    /// Set a node flag.
    pub fn set_flag(mut self, flag: impl Into<String>, value: bool) -> Self {
        self.flags.insert(flag.into(), value);
        self
    }

    /// Increment a counter, saturating.
    pub fn increment(mut self, counter: impl Into<String>, by: u32) -> Self {
        self.counters.push(CounterChange::Increment {
            counter: counter.into(),
            by,
        });
        self
    }

    /// Reset a counter to zero.
    pub fn reset_counter(mut self, counter: impl Into<String>) -> Self {
        self.counters.push(CounterChange::Reset {
            counter: counter.into(),
        });
        self
    }

    /// Append another delta's changes after this one's.
    pub fn merge(mut self, other: &StateDelta) -> Self {
        self.stats.extend(other.stats.iter().cloned());
        self.timers.extend(other.timers.iter().cloned());
        self.flags
            .extend(other.flags.iter().map(|(k, v)| (k.clone(), *v)));
        self.counters.extend(other.counters.iter().cloned());
        self
    }

    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
            && self.timers.is_empty()
            && self.flags.is_empty()
            && self.counters.is_empty()
    }
}
