//! Qualitative Resolver - turns authored descriptors into numbers.
//!
//! Resolution of a tag such as `core.rapport:warming_up` for one node:
//! 1. **Base range**: the active persona's override, else the taxonomy range
//! 2. **Context**: scaling rules that fire on world flags, recent-event counters
//!    or stat trends, plus any caller-supplied factors
//! 3. **Envelope**: multiplicative factors combine into one product clamped to
//!    `1 ± max_factor_scale`; additive factors sum into one shift clamped to
//!    `± max_factor_shift`; the shifted range is clamped into the scale bounds
//! 4. **Jitter**: a bounded offset around the effective midpoint, seeded from
//!    `(node, tag, cycle)` and clamped back into the effective range

mod jitter;
mod scale;

pub use jitter::*;
pub use scale::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use world_graph::{NodeId, RuntimeState, StatBounds, TagRef, Trend};

use crate::error::UnknownTagError;
use crate::persona::ActivePersona;

/// A single context adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FactorKind {
    /// Shift the range by `amount`.
    Add { amount: f64 },
    /// Multiply both ends of the range by `factor`.
    Scale { factor: f64 },
}

/// A named context adjustment applied during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFactor {
    pub name: String,
    #[serde(flatten)]
    pub kind: FactorKind,
}

impl ContextFactor {
    /// Factor that shifts the value by `amount`.
    pub fn add(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            kind: FactorKind::Add { amount },
        }
    }

    /// Factor that multiplies the value by `factor`.
    pub fn scale(name: impl Into<String>, factor: f64) -> Self {
        Self {
            name: name.into(),
            kind: FactorKind::Scale { factor },
        }
    }
}

/// When a scaling rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    WorldFlag {
        flag: String,
        #[serde(default = "default_true")]
        value: bool,
    },
    Counter {
        counter: String,
        at_least: u32,
    },
    Trend {
        stat: String,
        direction: Trend,
    },
}

fn default_true() -> bool {
    true
}

/// A context factor that applies whenever its condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingRule {
    pub name: String,
    /// Restrict to one scale; `None` applies to every scale.
    #[serde(default)]
    pub scale: Option<String>,
    pub when: RuleCondition,
    pub effect: FactorKind,
}

impl ScalingRule {
    fn applies_to(&self, scale: &str) -> bool {
        self.scale.as_deref().map_or(true, |s| s == scale)
    }

    fn fires(&self, context: &ResolveContext<'_>) -> bool {
        match &self.when {
            RuleCondition::WorldFlag { flag, value } => context
                .world_flags
                .map(|flags| flags.get(flag).copied().unwrap_or(false) == *value)
                .unwrap_or(false),
            RuleCondition::Counter { counter, at_least } => context
                .state
                .map(|s| s.counter(counter) >= *at_least)
                .unwrap_or(false),
            RuleCondition::Trend { stat, direction } => context
                .state
                .map(|s| s.trend(stat) == *direction)
                .unwrap_or(false),
        }
    }
}

/// Everything resolution may look at for one node in one cycle.
#[derive(Debug, Clone)]
pub struct ResolveContext<'a> {
    pub node: &'a NodeId,
    pub cycle: u64,
    pub persona: Option<&'a ActivePersona>,
    pub state: Option<&'a RuntimeState>,
    pub world_flags: Option<&'a BTreeMap<String, bool>>,
    /// Scale used for bare tags.
    pub default_scale: Option<&'a str>,
    /// Caller-supplied factors, applied after the scaling rules.
    pub extra: Vec<ContextFactor>,
}

impl<'a> ResolveContext<'a> {
    /// Context with no persona, state or factors.
    pub fn new(node: &'a NodeId, cycle: u64) -> Self {
        Self {
            node,
            cycle,
            persona: None,
            state: None,
            world_flags: None,
            default_scale: None,
            extra: Vec::new(),
        }
    }

    /// Persona whose overrides and mystery level apply.
    pub fn with_persona(mut self, persona: &'a ActivePersona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Runtime state read by scaling rules.
    pub fn with_state(mut self, state: &'a RuntimeState) -> Self {
        self.state = Some(state);
        self
    }

    /// World flags read by scaling rules.
    pub fn with_world_flags(mut self, flags: &'a BTreeMap<String, bool>) -> Self {
        self.world_flags = Some(flags);
        self
    }

    /// Scale used for bare tags.
    pub fn with_default_scale(mut self, scale: &'a str) -> Self {
        self.default_scale = Some(scale);
        self
    }

    /// Add a caller-supplied factor.
    pub fn with_factor(mut self, factor: ContextFactor) -> Self {
        self.extra.push(factor);
        self
    }
}

/// A resolved number with enough provenance to explain it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedValue {
    pub scale: String,
    pub descriptor: String,
    pub value: f64,
    pub bounds: StatBounds,
    pub base: ValueRange,
    pub effective: ValueRange,
    pub jitter: f64,
    pub factors: Vec<String>,
    pub persona_override: bool,
}

impl ResolvedValue {
    /// The value mapped onto `[0, 1]` over the scale bounds.
    pub fn normalised(&self) -> f64 {
        let span = self.bounds.span();
        if span <= 0.0 {
            return 0.0;
        }
        ((self.value - self.bounds.lo) / span).clamp(0.0, 1.0)
    }
}

/// Limits on how far context factors can move a range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorEnvelope {
    pub max_shift: f64,
    pub max_scale: f64,
}

impl Default for FactorEnvelope {
    fn default() -> Self {
        Self {
            max_shift: 25.0,
            max_scale: 0.5,
        }
    }
}

/// Converts qualitative tags into numeric values.
#[derive(Debug, Clone)]
pub struct QualitativeResolver {
    taxonomy: Taxonomy,
    rules: Vec<ScalingRule>,
    envelope: FactorEnvelope,
    seed: u64,
}

impl QualitativeResolver {
    /// Resolver with no scaling rules and the default envelope.
    pub fn new(taxonomy: Taxonomy, seed: u64) -> Self {
        Self {
            taxonomy,
            rules: Vec::new(),
            envelope: FactorEnvelope::default(),
            seed,
        }
    }

    /// Replace the scaling rules.
    pub fn with_rules(mut self, rules: Vec<ScalingRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the factor envelope.
    pub fn with_envelope(mut self, envelope: FactorEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// The taxonomy tags resolve against.
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Scaling rules in evaluation order.
    pub fn rules(&self) -> &[ScalingRule] {
        &self.rules
    }

    /// Root seed for jitter.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Whether a tag resolves with no persona in play.
    pub fn knows(&self, tag: &TagRef, default_scale: Option<&str>) -> bool {
        match tag.scale.as_deref().or(default_scale) {
            Some(scale) => self.taxonomy.contains(scale, &tag.descriptor),
            None => false,
        }
    }

    /// Resolve a tag for one node in one cycle.
    pub fn resolve(
        &self,
        tag: &TagRef,
        context: &ResolveContext<'_>,
    ) -> Result<ResolvedValue, UnknownTagError> {
        let scale_id = tag
            .scale
            .as_deref()
            .or(context.default_scale)
            .ok_or_else(|| UnknownTagError {
                scale: String::new(),
                descriptor: tag.descriptor.clone(),
            })?;
        self.resolve_descriptor(scale_id, Some(&tag.descriptor), context)
    }

    /// Resolve a scale's default descriptor.
    pub fn resolve_default(
        &self,
        scale: &str,
        context: &ResolveContext<'_>,
    ) -> Result<ResolvedValue, UnknownTagError> {
        self.resolve_descriptor(scale, None, context)
    }

    fn resolve_descriptor(
        &self,
        scale_id: &str,
        descriptor: Option<&str>,
        context: &ResolveContext<'_>,
    ) -> Result<ResolvedValue, UnknownTagError> {
        let unknown = || UnknownTagError {
            scale: scale_id.to_string(),
            descriptor: descriptor.unwrap_or("<default>").to_string(),
        };

        let scale = self.taxonomy.scale(scale_id);
        let entry = match (scale, descriptor) {
            (Some(scale), Some(name)) => scale.descriptor(name),
            (Some(scale), None) => scale.default_descriptor(),
            (None, _) => None,
        };
        let descriptor_name = match (entry, descriptor) {
            (Some(entry), _) => entry.name.clone(),
            (None, Some(name)) => world_graph::normalize_descriptor(name),
            (None, None) => return Err(unknown()),
        };

        // Step 1: base range
        let tag_override = context
            .persona
            .and_then(|p| p.tag_override(scale_id, &descriptor_name));
        let override_range = tag_override.and_then(|o| o.range);
        let (base, persona_override) = match (override_range, entry) {
            (Some(range), _) => (range, true),
            (None, Some(entry)) => (entry.range, false),
            (None, None) => return Err(unknown()),
        };
        let base_jitter = tag_override
            .and_then(|o| o.jitter)
            .or(entry.map(|e| e.jitter))
            .unwrap_or(0.0);
        let bounds = match scale {
            Some(scale) => scale.bounds,
            None => StatBounds::new(base.lo.min(0.0), base.hi.max(100.0)),
        };

        // Step 2: context factors
        let mut product = 1.0;
        let mut shift = 0.0;
        let mut applied = Vec::new();
        let fired = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(scale_id) && rule.fires(context))
            .map(|rule| (rule.name.as_str(), rule.effect));
        let extra = context.extra.iter().map(|f| (f.name.as_str(), f.kind));
        for (name, kind) in fired.chain(extra) {
            match kind {
                FactorKind::Add { amount } if amount.is_finite() => shift += amount,
                FactorKind::Scale { factor } if factor.is_finite() => product *= factor,
                _ => continue,
            }
            applied.push(name.to_string());
        }

        // Step 3: envelope
        let max_scale = self.envelope.max_scale.abs();
        let max_shift = self.envelope.max_shift.abs();
        let product = product.max(1.0 - max_scale).min(1.0 + max_scale);
        let shift = shift.max(-max_shift).min(max_shift);
        let effective =
            ValueRange::new(base.lo * product + shift, base.hi * product + shift).clamp_to(bounds);

        // Step 4: jitter
        let persona_scale = context.persona.map(|p| p.jitter_scale()).unwrap_or(1.0);
        let amplitude = jitter_amplitude(base_jitter, base) * persona_scale;
        let key = format!("{}:{}", scale_id, descriptor_name);
        let mut rng = cycle_rng(self.seed, context.node.as_str(), &key, context.cycle);
        let offset = sample_offset(&mut rng, amplitude);
        let value = effective.clamp(effective.midpoint() + offset);

        tracing::trace!(
            node = %context.node,
            tag = %key,
            cycle = context.cycle,
            value,
            "resolved qualitative tag"
        );

        Ok(ResolvedValue {
            scale: scale_id.to_string(),
            descriptor: descriptor_name,
            value,
            bounds,
            base,
            effective,
            jitter: value - effective.midpoint(),
            factors: applied,
            persona_override,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{Persona, PersonaManager, Scope, TagOverride, MYSTERY_LEVEL};
    use world_graph::StatSchema;

    const EPSILON: f64 = 1e-9;

    fn resolver() -> QualitativeResolver {
        QualitativeResolver::new(Taxonomy::with_defaults(), 42)
    }

    fn calm_persona() -> ActivePersona {
        let mut manager = PersonaManager::new();
        manager
            .register(Persona::new("calm").with_slider(MYSTERY_LEVEL, 0.0))
            .unwrap();
        manager
            .set_persona(Scope::Global, "calm", BTreeMap::new())
            .unwrap();
        manager.active_persona(&Scope::Global)
    }

    #[test]
    fn test_zero_jitter_lands_on_midpoint() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let persona = calm_persona();
        let context = ResolveContext::new(&node, 1).with_persona(&persona);

        let value = resolver
            .resolve(&TagRef::new("core.trust", "open"), &context)
            .unwrap();
        assert!((value.value - 65.0).abs() < EPSILON);
        assert_eq!(value.base, ValueRange::new(55.0, 75.0));
        assert!(!value.persona_override);
    }

    #[test]
    fn test_additive_factor_shifts_range() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let persona = calm_persona();
        let context = ResolveContext::new(&node, 1)
            .with_persona(&persona)
            .with_factor(ContextFactor::add("date_night", 10.0));

        let value = resolver
            .resolve(&TagRef::new("core.rapport", "warming up"), &context)
            .unwrap();
        assert_eq!(value.effective, ValueRange::new(40.0, 60.0));
        assert!((40.0..=60.0).contains(&value.value));
        assert_eq!(value.factors, vec!["date_night".to_string()]);
    }

    #[test]
    fn test_envelope_limits_factors() {
        let resolver = resolver().with_envelope(FactorEnvelope {
            max_shift: 5.0,
            max_scale: 0.1,
        });
        let node = NodeId::from("mia");
        let persona = calm_persona();
        let context = ResolveContext::new(&node, 1)
            .with_persona(&persona)
            .with_factor(ContextFactor::add("a", 50.0))
            .with_factor(ContextFactor::scale("b", 3.0));

        let value = resolver
            .resolve(&TagRef::new("core.rapport", "warming_up"), &context)
            .unwrap();
        assert!((value.effective.lo - (30.0 * 1.1 + 5.0)).abs() < EPSILON);
        assert!((value.effective.hi - (50.0 * 1.1 + 5.0)).abs() < EPSILON);
    }

    #[test]
    fn test_effective_range_stays_in_bounds() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let context = ResolveContext::new(&node, 9).with_factor(ContextFactor::add("big", 25.0));

        let value = resolver
            .resolve(&TagRef::new("core.trust", "ride_or_die"), &context)
            .unwrap();
        assert_eq!(value.effective, ValueRange::new(100.0, 100.0));
        assert_eq!(value.value, 100.0);
    }

    #[test]
    fn test_deterministic_per_cycle() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let tag = TagRef::new("core.trust", "wary");

        let a = resolver.resolve(&tag, &ResolveContext::new(&node, 3)).unwrap();
        let b = resolver.resolve(&tag, &ResolveContext::new(&node, 3)).unwrap();
        assert_eq!(a.value, b.value);

        let values: Vec<f64> = (0..20)
            .map(|cycle| resolver.resolve(&tag, &ResolveContext::new(&node, cycle)).unwrap().value)
            .collect();
        assert!(values.iter().all(|v| (15.0..=35.0).contains(v)));
        assert!(values.iter().any(|v| (v - values[0]).abs() > EPSILON));
    }

    #[test]
    fn test_alias_and_default_descriptor() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let context = ResolveContext::new(&node, 0);

        let flirty = resolver
            .resolve(&TagRef::new("core.arousal", "spark"), &context)
            .unwrap();
        assert_eq!(flirty.descriptor, "flirty");

        let calm = resolver.resolve_default("core.arousal", &context).unwrap();
        assert_eq!(calm.descriptor, "calm");
        assert!((10.0..=35.0).contains(&calm.value));
    }

    #[test]
    fn test_bare_tag_uses_default_scale() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let tag = TagRef::bare("wary");

        assert!(resolver.resolve(&tag, &ResolveContext::new(&node, 0)).is_err());
        let context = ResolveContext::new(&node, 0).with_default_scale("core.trust");
        assert_eq!(resolver.resolve(&tag, &context).unwrap().scale, "core.trust");
    }

    #[test]
    fn test_unknown_tag() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let err = resolver
            .resolve(&TagRef::new("core.trust", "smitten"), &ResolveContext::new(&node, 0))
            .unwrap_err();
        assert_eq!(err.scale, "core.trust");
        assert_eq!(err.descriptor, "smitten");
    }

    #[test]
    fn test_persona_override_wins() {
        let mut manager = PersonaManager::new();
        manager.register(Persona::new("romantic").with_tag_override(
            "core.trust",
            "open",
            TagOverride {
                range: Some(ValueRange::new(70.0, 80.0)),
                jitter: Some(0.0),
            },
        ))
        .unwrap();
        manager
            .set_persona(Scope::Global, "romantic", BTreeMap::new())
            .unwrap();
        let persona = manager.active_persona(&Scope::Global);

        let resolver = resolver();
        let node = NodeId::from("mia");
        let context = ResolveContext::new(&node, 0).with_persona(&persona);
        let value = resolver
            .resolve(&TagRef::new("core.trust", "open"), &context)
            .unwrap();
        assert!(value.persona_override);
        assert!((value.value - 75.0).abs() < EPSILON);
    }

    #[test]
    fn test_override_makes_unregistered_tag_resolvable() {
        let mut manager = PersonaManager::new();
        manager.register(Persona::new("p").with_tag_override(
            "custom.heat",
            "simmer",
            TagOverride {
                range: Some(ValueRange::new(20.0, 40.0)),
                jitter: None,
            },
        ))
        .unwrap();
        manager.set_persona(Scope::Global, "p", BTreeMap::new()).unwrap();
        let persona = manager.active_persona(&Scope::Global);

        let resolver = resolver();
        let node = NodeId::from("mia");
        let context = ResolveContext::new(&node, 0).with_persona(&persona);
        let value = resolver
            .resolve(&TagRef::new("custom.heat", "simmer"), &context)
            .unwrap();
        assert!((value.value - 30.0).abs() < EPSILON);
    }

    #[test]
    fn test_scaling_rules_fire_from_state() {
        let rules = vec![
            ScalingRule {
                name: "festival".into(),
                scale: Some("core.rapport".into()),
                when: RuleCondition::WorldFlag {
                    flag: "festival".into(),
                    value: true,
                },
                effect: FactorKind::Add { amount: 10.0 },
            },
            ScalingRule {
                name: "many_dates".into(),
                scale: None,
                when: RuleCondition::Counter {
                    counter: "outcome:date".into(),
                    at_least: 2,
                },
                effect: FactorKind::Scale { factor: 1.2 },
            },
            ScalingRule {
                name: "cooling".into(),
                scale: None,
                when: RuleCondition::Trend {
                    stat: "trust".into(),
                    direction: Trend::Falling,
                },
                effect: FactorKind::Add { amount: -5.0 },
            },
        ];
        let resolver = resolver().with_rules(rules);
        let node = NodeId::from("mia");

        let mut state = RuntimeState::new(node.clone(), &StatSchema::new());
        state.counters.insert("outcome:date".to_string(), 2);

        let mut flags = BTreeMap::new();
        flags.insert("festival".to_string(), true);
        let persona = calm_persona();
        let context = ResolveContext::new(&node, 0)
            .with_persona(&persona)
            .with_state(&state)
            .with_world_flags(&flags);

        let value = resolver
            .resolve(&TagRef::new("core.rapport", "warming_up"), &context)
            .unwrap();
        assert_eq!(value.factors, vec!["festival".to_string(), "many_dates".to_string()]);
        assert!((value.effective.lo - 46.0).abs() < EPSILON);
        assert!((value.effective.hi - 70.0).abs() < EPSILON);

        let trust = resolver
            .resolve(&TagRef::new("core.trust", "neutral"), &context)
            .unwrap();
        assert_eq!(trust.factors, vec!["many_dates".to_string()]);
    }

    #[test]
    fn test_normalised() {
        let resolver = resolver();
        let node = NodeId::from("mia");
        let persona = calm_persona();
        let context = ResolveContext::new(&node, 0).with_persona(&persona);
        let value = resolver
            .resolve(&TagRef::new("core.trust", "neutral"), &context)
            .unwrap();
        assert!((value.normalised() - 0.45).abs() < EPSILON);
    }
}
