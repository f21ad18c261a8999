//! Candidate scoring and eligibility.
//!
//! score = base_weight
//!       + sum(input_weight * normalised input)
//!       + (risk_bias - 0.5) * risk
//!       + sum(adjusters)
//!
//! floored at zero.

use std::collections::BTreeMap;

use world_graph::{Node, RuntimeState};

use super::{Outcome, OutcomeBundle, Precondition, ScoredCandidate};
use crate::adjuster::{AdjusterContext, AdjusterRegistry};
use crate::persona::ActivePersona;
use crate::qualitative::ResolvedValue;

/// Everything scoring reads for one node.
pub struct ScoringInputs<'a> {
    pub node: &'a Node,
    pub cycle: u64,
    pub state: &'a RuntimeState,
    pub world_flags: &'a BTreeMap<String, bool>,
    pub persona: &'a ActivePersona,
    pub resolved: &'a BTreeMap<String, ResolvedValue>,
    pub adjusters: &'a AdjusterRegistry,
}

fn in_window(value: f64, at_least: Option<f64>, below: Option<f64>) -> bool {
    at_least.map_or(true, |lo| value >= lo) && below.map_or(true, |hi| value < hi)
}

impl Precondition {
    /// Whether the precondition holds for these inputs.
    pub fn holds(&self, inputs: &ScoringInputs<'_>) -> bool {
        match self {
            Precondition::Resolved {
                input,
                at_least,
                below,
            } => inputs
                .resolved
                .get(input)
                .map(|r| in_window(r.value, *at_least, *below))
                .unwrap_or(false),
            Precondition::Stat {
                stat,
                at_least,
                below,
            } => inputs
                .state
                .stat(stat)
                .map(|v| in_window(v, *at_least, *below))
                .unwrap_or(false),
            Precondition::Flag { flag, value } => inputs.state.flag(flag) == *value,
            Precondition::WorldFlag { flag, value } => {
                inputs.world_flags.get(flag).copied().unwrap_or(false) == *value
            }
            Precondition::TimerIdle { timer } => inputs.state.timer_idle(timer),
        }
    }
}

/// Whether an outcome may be chosen: off cooldown and every precondition holds.
pub fn is_eligible(outcome: &Outcome, inputs: &ScoringInputs<'_>) -> bool {
    inputs.state.timer_idle(&outcome.cooldown_timer())
        && outcome.preconditions.iter().all(|p| p.holds(inputs))
}

/// Scalar score for one outcome.
pub fn score_candidate(outcome: &Outcome, inputs: &ScoringInputs<'_>) -> f64 {
    let qualitative: f64 = outcome
        .input_weights
        .iter()
        .filter_map(|(name, weight)| inputs.resolved.get(name).map(|r| weight * r.normalised()))
        .sum();

    let risk = (inputs.persona.risk_bias() - 0.5) * outcome.risk;

    let adjusters = if outcome.adjusters.is_empty() {
        0.0
    } else {
        let context = AdjusterContext {
            node: inputs.node,
            outcome,
            state: inputs.state,
            persona: inputs.persona,
            cycle: inputs.cycle,
        };
        inputs.adjusters.total(&outcome.adjusters, &context)
    };

    let score = outcome.base_weight + qualitative + risk + adjusters;
    if score.is_finite() {
        score.max(0.0)
    } else {
        0.0
    }
}

/// Score every outcome of a bundle, in authored order.
pub fn evaluate_bundle(bundle: &OutcomeBundle, inputs: &ScoringInputs<'_>) -> Vec<ScoredCandidate> {
    bundle
        .outcomes
        .iter()
        .enumerate()
        .map(|(index, outcome)| {
            if is_eligible(outcome, inputs) {
                ScoredCandidate::new(index, score_candidate(outcome, inputs))
            } else {
                ScoredCandidate::ineligible(index)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomePoolSelector, SelectionRule};
    use crate::persona::{Persona, PersonaManager, Scope, RISK_BIAS};
    use crate::qualitative::ValueRange;
    use world_graph::{NodeCategory, StatBounds, StatSchema};

    const EPSILON: f64 = 1e-9;

    fn resolved(value: f64) -> ResolvedValue {
        ResolvedValue {
            scale: "core.rapport".into(),
            descriptor: "warming_up".into(),
            value,
            bounds: StatBounds::new(0.0, 100.0),
            base: ValueRange::new(30.0, 50.0),
            effective: ValueRange::new(40.0, 60.0),
            jitter: 0.0,
            factors: vec!["context".into()],
            persona_override: false,
        }
    }

    struct Fixture {
        node: Node,
        state: RuntimeState,
        flags: BTreeMap<String, bool>,
        persona: ActivePersona,
        adjusters: AdjusterRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let node = Node::new("mia", NodeCategory::Person);
            let schema = StatSchema::new().with_stat("trust", 0.0, 100.0, 20.0).unwrap();
            Self {
                state: RuntimeState::new(node.id.clone(), &schema),
                node,
                flags: BTreeMap::new(),
                persona: PersonaManager::new().active_persona(&Scope::Global),
                adjusters: AdjusterRegistry::new(),
            }
        }

        fn inputs<'a>(&'a self, resolved: &'a BTreeMap<String, ResolvedValue>) -> ScoringInputs<'a> {
            ScoringInputs {
                node: &self.node,
                cycle: 1,
                state: &self.state,
                world_flags: &self.flags,
                persona: &self.persona,
                resolved,
                adjusters: &self.adjusters,
            }
        }
    }

    fn warming_up_bundle() -> OutcomeBundle {
        OutcomeBundle::new("evening", SelectionRule::HighestScore)
            .with_outcome(
                Outcome::new("a", 2.0).with_precondition(Precondition::Resolved {
                    input: "trust".into(),
                    at_least: Some(55.0),
                    below: None,
                }),
            )
            .with_outcome(Outcome::new("b", 1.0))
    }

    #[test]
    fn test_resolved_threshold_picks_branch() {
        let fixture = Fixture::new();
        let bundle = warming_up_bundle();
        let selector = OutcomePoolSelector::new(vec![bundle.clone()]);

        for (value, expected) in [(42.0, "b"), (58.0, "a")] {
            let mut resolved_inputs = BTreeMap::new();
            resolved_inputs.insert("trust".to_string(), resolved(value));
            let candidates = evaluate_bundle(&bundle, &fixture.inputs(&resolved_inputs));
            let selection = selector.select("evening", &candidates, 0).unwrap();
            assert_eq!(selection.outcome, expected, "resolved value {}", value);
        }
    }

    #[test]
    fn test_score_formula() {
        let mut fixture = Fixture::new();
        let mut manager = PersonaManager::new();
        manager
            .register(Persona::new("bold").with_slider(RISK_BIAS, 1.0))
            .unwrap();
        manager.set_persona(Scope::Global, "bold", BTreeMap::new()).unwrap();
        fixture.persona = manager.active_persona(&Scope::Global);

        let outcome = Outcome::new("dare", 1.0)
            .with_input_weight("trust", 2.0)
            .with_risk(0.8);
        let mut resolved_inputs = BTreeMap::new();
        resolved_inputs.insert("trust".to_string(), resolved(50.0));

        let score = score_candidate(&outcome, &fixture.inputs(&resolved_inputs));
        // 1.0 + 2.0 * 0.5 + 0.5 * 0.8
        assert!((score - 2.4).abs() < EPSILON);
    }

    #[test]
    fn test_score_floored_at_zero() {
        let fixture = Fixture::new();
        let outcome = Outcome::new("bad", -5.0);
        let resolved_inputs = BTreeMap::new();
        assert_eq!(score_candidate(&outcome, &fixture.inputs(&resolved_inputs)), 0.0);
    }

    #[test]
    fn test_cooldown_blocks_outcome() {
        let mut fixture = Fixture::new();
        let outcome = Outcome::new("kiss", 1.0).with_cooldown(2);
        let resolved_inputs = BTreeMap::new();
        assert!(is_eligible(&outcome, &fixture.inputs(&resolved_inputs)));

        fixture.state.timers.insert(outcome.cooldown_timer(), 2);
        assert!(!is_eligible(&outcome, &fixture.inputs(&resolved_inputs)));
    }

    #[test]
    fn test_preconditions() {
        let mut fixture = Fixture::new();
        fixture.flags.insert("storm".into(), true);
        fixture.state.flags.insert("met".into(), true);
        let resolved_inputs = BTreeMap::new();
        let inputs = fixture.inputs(&resolved_inputs);

        assert!(Precondition::WorldFlag { flag: "storm".into(), value: true }.holds(&inputs));
        assert!(Precondition::Flag { flag: "met".into(), value: true }.holds(&inputs));
        assert!(!Precondition::Flag { flag: "kissed".into(), value: true }.holds(&inputs));
        assert!(Precondition::Stat {
            stat: "trust".into(),
            at_least: Some(10.0),
            below: Some(30.0)
        }
        .holds(&inputs));
        assert!(!Precondition::Stat {
            stat: "trust".into(),
            at_least: None,
            below: Some(20.0)
        }
        .holds(&inputs));
        assert!(Precondition::TimerIdle { timer: "rest".into() }.holds(&inputs));
        assert!(!Precondition::Resolved {
            input: "missing".into(),
            at_least: None,
            below: None
        }
        .holds(&inputs));
    }
}
