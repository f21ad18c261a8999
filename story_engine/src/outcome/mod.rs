//! Outcome Pool Selector - outcome bundles and the rules that pick from them.

mod scoring;

pub use scoring::*;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use world_graph::{StateDelta, TagRef};

use crate::asset::AssetRequirement;
use crate::error::SelectionError;

/// How a bundle turns scores into one winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Highest score wins; ties go to the lowest authored index.
    #[default]
    HighestScore,
    /// Scores become weights for a cycle-seeded draw.
    WeightedRandom,
    /// First eligible candidate in authored order.
    FirstEligible,
}

/// Where a bundle's qualitative input comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum InputSource {
    /// A fixed tag.
    Tag { tag: TagRef },
    /// The qualitative tag on the node's first outgoing edge with this relation.
    Edge { relation: String },
}

/// A named qualitative value resolved once per node before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitativeInput {
    pub name: String,
    #[serde(flatten)]
    pub source: InputSource,
}

impl QualitativeInput {
    /// Input read from a tag on the node.
    pub fn tag(name: impl Into<String>, tag: TagRef) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Tag { tag },
        }
    }

    /// Input read from the node's strongest edge of `relation`.
    pub fn edge(name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Edge {
                relation: relation.into(),
            },
        }
    }
}

fn default_true() -> bool {
    true
}

/// An eligibility requirement on a candidate outcome.
///
/// Numeric thresholds are half-open: `at_least <= value < below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Precondition {
    /// A resolved qualitative input.
    Resolved {
        input: String,
        #[serde(default)]
        at_least: Option<f64>,
        #[serde(default)]
        below: Option<f64>,
    },
    Stat {
        stat: String,
        #[serde(default)]
        at_least: Option<f64>,
        #[serde(default)]
        below: Option<f64>,
    },
    Flag {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
    WorldFlag {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
    TimerIdle {
        timer: String,
    },
}

/// One candidate in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    #[serde(default)]
    pub base_weight: f64,

    /// Weight per qualitative input, applied to its normalised value.
    #[serde(default)]
    pub input_weights: BTreeMap<String, f64>,

    /// How risky the outcome is, in `[0, 1]`; scaled by the persona's risk bias.
    #[serde(default)]
    pub risk: f64,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    /// Cycles before the outcome can be chosen again.
    #[serde(default)]
    pub cooldown: Option<u32>,

    /// Written back to the node when chosen.
    #[serde(default)]
    pub effects: StateDelta,
    #[serde(default)]
    pub adjusters: Vec<String>,
    #[serde(default)]
    pub asset: Option<AssetRequirement>,
}

impl Outcome {
    /// Outcome with no inputs, effects or asset.
    pub fn new(id: impl Into<String>, base_weight: f64) -> Self {
        Self {
            id: id.into(),
            base_weight,
            input_weights: BTreeMap::new(),
            risk: 0.0,
            preconditions: Vec::new(),
            cooldown: None,
            effects: StateDelta::default(),
            adjusters: Vec::new(),
            asset: None,
        }
    }

    /// Weight of a named input in the score.
    pub fn with_input_weight(mut self, input: impl Into<String>, weight: f64) -> Self {
        self.input_weights.insert(input.into(), weight);
        self
    }

    /// Risk in `[0, 1]`, weighed against the persona's risk bias.
    pub fn with_risk(mut self, risk: f64) -> Self {
        self.risk = risk;
        self
    }

    /// Add a precondition.
    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Cycles before the outcome may fire again on the same node.
    pub fn with_cooldown(mut self, cycles: u32) -> Self {
        self.cooldown = Some(cycles);
        self
    }

    /// State changes committed when the outcome is chosen.
    pub fn with_effects(mut self, effects: StateDelta) -> Self {
        self.effects = effects;
        self
    }

    /// Apply a registered weight adjuster.
    pub fn with_adjuster(mut self, name: impl Into<String>) -> Self {
        self.adjusters.push(name.into());
        self
    }

    /// Bind an asset requirement.
    pub fn with_asset(mut self, asset: AssetRequirement) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Timer that blocks this outcome while it runs.
    pub fn cooldown_timer(&self) -> String {
        format!("cooldown:{}", self.id)
    }

    /// Counter bumped each time this outcome is chosen.
    pub fn counter(&self) -> String {
        format!("outcome:{}", self.id)
    }
}

/// A named group of candidate outcomes with a selection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeBundle {
    pub id: String,
    #[serde(default)]
    pub rule: SelectionRule,
    #[serde(default)]
    pub inputs: Vec<QualitativeInput>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

impl OutcomeBundle {
    /// Empty bundle using `rule`.
    pub fn new(id: impl Into<String>, rule: SelectionRule) -> Self {
        Self {
            id: id.into(),
            rule,
            inputs: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Add a qualitative input.
    pub fn with_input(mut self, input: QualitativeInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add an outcome.
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcomes.push(outcome);
        self
    }

    /// Outcome with this id.
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.id == id)
    }
}

/// A scored candidate, aligned with the bundle's authored order by `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub index: usize,
    pub score: f64,
    pub eligible: bool,
}

impl ScoredCandidate {
    /// Eligible candidate with `score`.
    pub fn new(index: usize, score: f64) -> Self {
        Self {
            index,
            score,
            eligible: true,
        }
    }

    /// Candidate that failed a precondition.
    pub fn ineligible(index: usize) -> Self {
        Self {
            index,
            score: 0.0,
            eligible: false,
        }
    }
}

/// The winner of one selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub bundle: String,
    pub index: usize,
    pub outcome: String,
    pub score: f64,
    pub rule: SelectionRule,
}

/// Maps bundle ids to bundles and applies their selection rules.
#[derive(Debug, Clone, Default)]
pub struct OutcomePoolSelector {
    bundles: HashMap<String, OutcomeBundle>,
    order: Vec<String>,
}

impl OutcomePoolSelector {
    /// Selector over `bundles`. Later duplicates replace earlier ones.
    pub fn new(bundles: Vec<OutcomeBundle>) -> Self {
        let mut selector = Self::default();
        for bundle in bundles {
            selector.insert(bundle);
        }
        selector
    }

    /// Add or replace a bundle.
    pub fn insert(&mut self, bundle: OutcomeBundle) {
        if !self.bundles.contains_key(&bundle.id) {
            self.order.push(bundle.id.clone());
        }
        self.bundles.insert(bundle.id.clone(), bundle);
    }

    /// Bundle with this id.
    pub fn bundle(&self, id: &str) -> Option<&OutcomeBundle> {
        self.bundles.get(id)
    }

    /// Bundles in insertion order.
    pub fn bundles(&self) -> impl Iterator<Item = &OutcomeBundle> {
        self.order.iter().filter_map(|id| self.bundles.get(id))
    }

    /// Number of bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether there are no bundles.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Pick one outcome from scored candidates.
    ///
    /// `seed` drives the weighted-random rule and nothing else.
    pub fn select(
        &self,
        bundle_id: &str,
        candidates: &[ScoredCandidate],
        seed: u64,
    ) -> Result<Selection, SelectionError> {
        let bundle = self
            .bundles
            .get(bundle_id)
            .ok_or_else(|| SelectionError::UnknownBundle(bundle_id.to_string()))?;

        let mut eligible: Vec<&ScoredCandidate> = candidates
            .iter()
            .filter(|c| c.eligible && c.index < bundle.outcomes.len())
            .collect();
        eligible.sort_by_key(|c| c.index);

        let chosen = match bundle.rule {
            SelectionRule::HighestScore => highest_score(&eligible),
            SelectionRule::FirstEligible => eligible.first().copied(),
            SelectionRule::WeightedRandom => weighted_random(&eligible, seed),
        };

        let chosen = chosen.ok_or_else(|| SelectionError::NoEligibleOutcome {
            bundle: bundle_id.to_string(),
        })?;

        Ok(Selection {
            bundle: bundle.id.clone(),
            index: chosen.index,
            outcome: bundle.outcomes[chosen.index].id.clone(),
            score: chosen.score,
            rule: bundle.rule,
        })
    }
}

/// `NaN` ranks as zero, the same floor `score_candidate` applies.
fn ranking_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score
    }
}

fn highest_score<'a>(eligible: &[&'a ScoredCandidate]) -> Option<&'a ScoredCandidate> {
    let mut best: Option<&'a ScoredCandidate> = None;
    for candidate in eligible {
        match best {
            // Strictly greater, so the earliest index keeps ties.
            Some(current) if ranking_score(candidate.score) <= ranking_score(current.score) => {}
            _ => best = Some(*candidate),
        }
    }
    best
}

fn weighted_random<'a>(eligible: &[&'a ScoredCandidate], seed: u64) -> Option<&'a ScoredCandidate> {
    if eligible.is_empty() {
        return None;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let weights: Vec<f64> = eligible
        .iter()
        .map(|c| if c.score.is_finite() { c.score.max(0.0) } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 {
        return Some(eligible[rng.gen_range(0..eligible.len())]);
    }

    let mut roll = rng.gen_range(0.0..total);
    for (candidate, weight) in eligible.iter().zip(&weights) {
        if roll < *weight {
            return Some(*candidate);
        }
        roll -= weight;
    }
    eligible
        .iter()
        .zip(&weights)
        .rev()
        .find(|(_, w)| **w > 0.0)
        .map(|(c, _)| *c)
}
