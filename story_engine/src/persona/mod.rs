//! Persona Manager - bias profiles for scoring, with scoped activation.
//!
//! A persona is a named set of sliders plus optional tag-range overrides.
//! Activation is per [`Scope`] and resolves hierarchically:
//! node > region > global > the built-in neutral persona. Exactly one persona
//! applies to a node at evaluation time.
//!
//! Sweeps never read the manager directly. They take a [`PersonaContext`],
//! an immutable snapshot, so scoring sees one consistent set of personas.

mod trigger;

pub use trigger::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use world_graph::NodeId;

use crate::error::PersonaError;
use crate::qualitative::ValueRange;

/// Preference for risky outcomes.
pub const RISK_BIAS: &str = "risk_bias";
/// Multiplier on descriptor jitter.
pub const MYSTERY_LEVEL: &str = "mystery_level";
/// How hard mood tags filter assets.
pub const MOOD_STRICTNESS: &str = "mood_strictness";

/// Id of the persona used when nothing else is active.
pub const NEUTRAL_PERSONA: &str = "neutral";

/// Default value of a well-known slider.
pub fn default_slider(name: &str) -> Option<f64> {
    match name {
        RISK_BIAS => Some(0.5),
        MYSTERY_LEVEL => Some(0.5),
        MOOD_STRICTNESS => Some(0.0),
        _ => None,
    }
}

/// Where an activation applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Region(String),
    Node(NodeId),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Region(region) => write!(f, "region:{}", region),
            Scope::Node(node) => write!(f, "node:{}", node),
        }
    }
}

/// Per-persona replacement for a descriptor's range or jitter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagOverride {
    #[serde(default)]
    pub range: Option<ValueRange>,
    #[serde(default)]
    pub jitter: Option<f64>,
}

/// A named bias profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub sliders: BTreeMap<String, f64>,

    /// Sliders that may leave `[0, 1]`.
    #[serde(default)]
    pub slider_bounds: BTreeMap<String, ValueRange>,

    /// scale id -> descriptor -> override
    #[serde(default)]
    pub tag_overrides: BTreeMap<String, BTreeMap<String, TagOverride>>,

    /// Asset tags this persona favours.
    #[serde(default)]
    pub mood_tags: BTreeSet<String>,
}

impl Persona {
    /// Persona with default sliders and no overrides.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            sliders: BTreeMap::new(),
            slider_bounds: BTreeMap::new(),
            tag_overrides: BTreeMap::new(),
            mood_tags: BTreeSet::new(),
        }
    }

    /// The persona every scope falls back to.
    pub fn neutral() -> Self {
        Self::new(NEUTRAL_PERSONA).with_label("Neutral")
    }

    /// Set a display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set a slider value.
    pub fn with_slider(mut self, name: impl Into<String>, value: f64) -> Self {
        self.sliders.insert(name.into(), value);
        self
    }

    /// Widen or narrow the bounds of a slider.
    pub fn with_slider_bounds(mut self, name: impl Into<String>, lo: f64, hi: f64) -> Self {
        self.slider_bounds.insert(name.into(), ValueRange::new(lo, hi));
        self
    }

    /// Replace a descriptor's range while this persona is active.
    pub fn with_tag_override(
        mut self,
        scale: impl Into<String>,
        descriptor: &str,
        tag_override: TagOverride,
    ) -> Self {
        self.tag_overrides
            .entry(scale.into())
            .or_default()
            .insert(world_graph::normalize_descriptor(descriptor), tag_override);
        self
    }

    /// Add a mood tag preferred during asset selection.
    pub fn with_mood_tag(mut self, tag: impl Into<String>) -> Self {
        self.mood_tags.insert(tag.into());
        self
    }

    /// Bounds of a slider; `[0, 1]` unless declared.
    pub fn slider_range(&self, name: &str) -> ValueRange {
        self.slider_bounds
            .get(name)
            .copied()
            .unwrap_or(ValueRange::new(0.0, 1.0))
    }

    /// Override for a descriptor, if any.
    pub fn tag_override(&self, scale: &str, descriptor: &str) -> Option<&TagOverride> {
        self.tag_overrides
            .get(scale)
            .and_then(|descriptors| descriptors.get(&world_graph::normalize_descriptor(descriptor)))
    }

    /// Slider bounds and override ranges must be finite with `lo <= hi`;
    /// slider values and override jitter must be finite.
    pub fn validate(&self) -> Result<(), PersonaError> {
        let invalid = |reason: String| PersonaError::InvalidPersona {
            persona: self.id.clone(),
            reason,
        };

        for (slider, range) in &self.slider_bounds {
            if !range.is_valid() {
                return Err(invalid(format!("slider '{}' has bounds {}", slider, range)));
            }
        }
        for (slider, value) in &self.sliders {
            if !value.is_finite() {
                return Err(invalid(format!("slider '{}' is {}", slider, value)));
            }
        }
        for (scale, descriptors) in &self.tag_overrides {
            for (descriptor, tag_override) in descriptors {
                if let Some(range) = tag_override.range.filter(|range| !range.is_valid()) {
                    return Err(invalid(format!(
                        "override '{}:{}' has range {}",
                        scale, descriptor, range
                    )));
                }
                if let Some(jitter) = tag_override.jitter.filter(|jitter| !jitter.is_finite()) {
                    return Err(invalid(format!(
                        "override '{}:{}' has jitter {}",
                        scale, descriptor, jitter
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Activation-time overrides must be finite and inside the persona's slider bounds.
fn check_overrides(persona: &Persona, overrides: &BTreeMap<String, f64>) -> Result<(), PersonaError> {
    for (slider, value) in overrides {
        let range = persona.slider_range(slider);
        if !value.is_finite() || !range.contains(*value) {
            return Err(PersonaError::SliderOutOfRange {
                slider: slider.clone(),
                value: *value,
                lo: range.lo,
                hi: range.hi,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
struct Activation {
    persona: String,
    overrides: BTreeMap<String, f64>,
}

/// The persona that applies somewhere, with any activation-time slider overrides.
#[derive(Debug, Clone)]
pub struct ActivePersona {
    persona: Arc<Persona>,
    overrides: BTreeMap<String, f64>,
    scope: Option<Scope>,
}

impl ActivePersona {
    fn neutral(persona: Arc<Persona>) -> Self {
        Self {
            persona,
            overrides: BTreeMap::new(),
            scope: None,
        }
    }

    /// Id of the winning persona.
    pub fn id(&self) -> &str {
        &self.persona.id
    }

    /// The winning persona definition.
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Scope of the activation that won, or `None` for the built-in neutral persona.
    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Slider value, clamped into the slider's bounds.
    pub fn slider(&self, name: &str) -> Option<f64> {
        let raw = self
            .overrides
            .get(name)
            .or_else(|| self.persona.sliders.get(name))
            .copied()
            .or_else(|| default_slider(name))?;
        Some(self.persona.slider_range(name).clamp(raw))
    }

    /// Risk bias; `0.5` by default.
    pub fn risk_bias(&self) -> f64 {
        self.slider(RISK_BIAS).unwrap_or(0.5)
    }

    /// Mystery level; `0.5` by default.
    pub fn mystery_level(&self) -> f64 {
        self.slider(MYSTERY_LEVEL).unwrap_or(0.5)
    }

    /// Mood strictness; `0.0` by default.
    pub fn mood_strictness(&self) -> f64 {
        self.slider(MOOD_STRICTNESS).unwrap_or(0.0)
    }

    /// Multiplier on descriptor jitter: 1.0 at the default mystery level.
    pub fn jitter_scale(&self) -> f64 {
        2.0 * self.mystery_level()
    }

    /// Override for a descriptor, if any.
    pub fn tag_override(&self, scale: &str, descriptor: &str) -> Option<&TagOverride> {
        self.persona.tag_override(scale, descriptor)
    }

    /// Tags preferred during asset selection.
    pub fn mood_tags(&self) -> &BTreeSet<String> {
        &self.persona.mood_tags
    }
}

/// A persona change made by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSwap {
    pub trigger: String,
    pub scope: Scope,
    pub from: Option<String>,
    pub to: String,
}

/// Immutable view of personas and activations for one sweep.
#[derive(Debug, Clone)]
pub struct PersonaContext {
    personas: Arc<BTreeMap<String, Arc<Persona>>>,
    active: Arc<BTreeMap<Scope, Activation>>,
    neutral: Arc<Persona>,
}

impl PersonaContext {
    /// Exact scope, else global, else neutral.
    pub fn active_persona(&self, scope: &Scope) -> ActivePersona {
        self.lookup(scope)
            .or_else(|| self.lookup(&Scope::Global))
            .unwrap_or_else(|| ActivePersona::neutral(self.neutral.clone()))
    }

    /// Node, then region, then global.
    pub fn resolve_for(&self, node: &NodeId, region: Option<&str>) -> ActivePersona {
        let node_scope = Scope::Node(node.clone());
        if let Some(active) = self.lookup(&node_scope) {
            return active;
        }
        if let Some(region) = region {
            if let Some(active) = self.lookup(&Scope::Region(region.to_string())) {
                return active;
            }
        }
        self.active_persona(&Scope::Global)
    }

    fn lookup(&self, scope: &Scope) -> Option<ActivePersona> {
        let activation = self.active.get(scope)?;
        let persona = self.personas.get(&activation.persona)?;
        Some(ActivePersona {
            persona: persona.clone(),
            overrides: activation.overrides.clone(),
            scope: Some(scope.clone()),
        })
    }
}

/// Owns personas, scoped activations, and conditional swaps.
#[derive(Debug, Clone)]
pub struct PersonaManager {
    personas: BTreeMap<String, Arc<Persona>>,
    active: BTreeMap<Scope, Activation>,
    triggers: Vec<PersonaTrigger>,
    fired: BTreeMap<String, u64>,
    neutral: Arc<Persona>,
}

impl Default for PersonaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonaManager {
    /// Manager with no personas and no activations.
    pub fn new() -> Self {
        let neutral = Arc::new(Persona::neutral());
        let mut personas = BTreeMap::new();
        personas.insert(neutral.id.clone(), neutral.clone());
        Self {
            personas,
            active: BTreeMap::new(),
            triggers: Vec::new(),
            fired: BTreeMap::new(),
            neutral,
        }
    }

    /// Register (or replace) a persona definition after checking its ranges.
    pub fn register(&mut self, persona: Persona) -> Result<(), PersonaError> {
        persona.validate()?;
        tracing::debug!(persona = %persona.id, "registered persona");
        self.personas.insert(persona.id.clone(), Arc::new(persona));
        Ok(())
    }

    /// Registered persona with this id.
    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.get(id).map(|p| p.as_ref())
    }

    /// Every registered persona.
    pub fn personas(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values().map(|p| p.as_ref())
    }

    /// Activate a persona for a scope, replacing whatever was active there.
    ///
    /// Overrides must lie inside the persona's slider bounds.
    pub fn set_persona(
        &mut self,
        scope: Scope,
        id: &str,
        overrides: BTreeMap<String, f64>,
    ) -> Result<(), PersonaError> {
        let persona = self
            .personas
            .get(id)
            .ok_or_else(|| PersonaError::UnknownPersona(id.to_string()))?;
        persona.validate()?;
        check_overrides(persona, &overrides)?;

        tracing::info!(scope = %scope, persona = %id, "activated persona");
        self.active.insert(
            scope,
            Activation {
                persona: id.to_string(),
                overrides,
            },
        );
        Ok(())
    }

    /// Remove the activation for a scope. Returns whether one existed.
    pub fn clear_persona(&mut self, scope: &Scope) -> bool {
        let removed = self.active.remove(scope).is_some();
        if removed {
            tracing::info!(scope = %scope, "cleared persona");
        }
        removed
    }

    /// Persona active at exactly `scope`, or the neutral persona.
    pub fn active_persona(&self, scope: &Scope) -> ActivePersona {
        self.context().active_persona(scope)
    }

    /// Most specific persona for a node: node, then region, then global.
    pub fn resolve_for(&self, node: &NodeId, region: Option<&str>) -> ActivePersona {
        self.context().resolve_for(node, region)
    }

    /// Register a conditional swap, evaluated by [`PersonaManager::evaluate_triggers`].
    ///
    /// Overrides are checked the same way [`PersonaManager::set_persona`] checks them.
    pub fn swap_on_trigger(&mut self, trigger: PersonaTrigger) -> Result<(), PersonaError> {
        let persona = self
            .personas
            .get(&trigger.persona)
            .ok_or_else(|| PersonaError::UnknownPersona(trigger.persona.clone()))?;
        persona.validate()?;
        check_overrides(persona, &trigger.overrides)?;
        self.triggers.retain(|existing| existing.id != trigger.id);
        self.triggers.push(trigger);
        Ok(())
    }

    /// Registered triggers in insertion order.
    pub fn triggers(&self) -> &[PersonaTrigger] {
        &self.triggers
    }

    /// Fire every trigger whose condition holds, at most once per cycle each.
    ///
    /// A trigger whose target persona is already active on its scope does nothing.
    pub fn evaluate_triggers(&mut self, view: &TriggerView<'_>) -> Vec<PersonaSwap> {
        let mut swaps = Vec::new();

        for trigger in &self.triggers {
            if self.fired.get(&trigger.id) == Some(&view.cycle) {
                continue;
            }
            if !trigger.when.holds(view) {
                continue;
            }

            let current = self.active.get(&trigger.scope).map(|a| a.persona.clone());
            if current.as_deref() == Some(trigger.persona.as_str()) {
                continue;
            }

            self.fired.insert(trigger.id.clone(), view.cycle);
            self.active.insert(
                trigger.scope.clone(),
                Activation {
                    persona: trigger.persona.clone(),
                    overrides: trigger.overrides.clone(),
                },
            );
            tracing::info!(
                trigger = %trigger.id,
                scope = %trigger.scope,
                to = %trigger.persona,
                cycle = view.cycle,
                "persona swapped"
            );
            swaps.push(PersonaSwap {
                trigger: trigger.id.clone(),
                scope: trigger.scope.clone(),
                from: current,
                to: trigger.persona.clone(),
            });
        }

        swaps
    }

    /// Snapshot for one sweep.
    pub fn context(&self) -> PersonaContext {
        PersonaContext {
            personas: Arc::new(self.personas.clone()),
            active: Arc::new(self.active.clone()),
            neutral: self.neutral.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PersonaManager {
        let mut manager = PersonaManager::new();
        manager
            .register(Persona::new("bold").with_slider(RISK_BIAS, 0.9))
            .unwrap();
        manager
            .register(
                Persona::new("shy")
                    .with_slider(RISK_BIAS, 0.1)
                    .with_slider(MYSTERY_LEVEL, 0.0),
            )
            .unwrap();
        manager
    }

    #[test]
    fn test_neutral_fallback() {
        let manager = PersonaManager::new();
        let active = manager.active_persona(&Scope::Global);
        assert_eq!(active.id(), NEUTRAL_PERSONA);
        assert!(active.scope().is_none());
        assert_eq!(active.risk_bias(), 0.5);
        assert_eq!(active.mystery_level(), 0.5);
        assert_eq!(active.mood_strictness(), 0.0);
        assert_eq!(active.jitter_scale(), 1.0);
    }

    #[test]
    fn test_scope_hierarchy() {
        let mut manager = manager();
        manager.set_persona(Scope::Global, "bold", BTreeMap::new()).unwrap();
        manager
            .set_persona(Scope::Region("harbor".into()), "shy", BTreeMap::new())
            .unwrap();

        let mia = NodeId::from("mia");
        assert_eq!(manager.resolve_for(&mia, None).id(), "bold");
        assert_eq!(manager.resolve_for(&mia, Some("harbor")).id(), "shy");
        assert_eq!(manager.resolve_for(&mia, Some("uptown")).id(), "bold");

        manager
            .set_persona(Scope::Node(mia.clone()), "bold", BTreeMap::new())
            .unwrap();
        assert_eq!(manager.resolve_for(&mia, Some("harbor")).id(), "bold");
        assert_eq!(
            manager.resolve_for(&mia, Some("harbor")).scope(),
            Some(&Scope::Node(mia.clone()))
        );
    }

    #[test]
    fn test_active_persona_falls_back_to_global() {
        let mut manager = manager();
        manager.set_persona(Scope::Global, "shy", BTreeMap::new()).unwrap();
        let active = manager.active_persona(&Scope::Region("nowhere".into()));
        assert_eq!(active.id(), "shy");
    }

    #[test]
    fn test_overrides_and_bounds() {
        let mut manager = manager();
        let mut overrides = BTreeMap::new();
        overrides.insert(RISK_BIAS.to_string(), 0.3);
        manager.set_persona(Scope::Global, "bold", overrides).unwrap();
        assert_eq!(manager.active_persona(&Scope::Global).risk_bias(), 0.3);

        let mut bad = BTreeMap::new();
        bad.insert(RISK_BIAS.to_string(), 1.5);
        assert!(matches!(
            manager.set_persona(Scope::Global, "bold", bad),
            Err(PersonaError::SliderOutOfRange { .. })
        ));
    }

    #[test]
    fn test_declared_slider_bounds() {
        let mut manager = PersonaManager::new();
        manager
            .register(
                Persona::new("wild")
                    .with_slider_bounds("heat", 0.0, 10.0)
                    .with_slider("heat", 7.0)
                    .with_slider(RISK_BIAS, 4.0),
            )
            .unwrap();
        manager.set_persona(Scope::Global, "wild", BTreeMap::new()).unwrap();
        let active = manager.active_persona(&Scope::Global);
        assert_eq!(active.slider("heat"), Some(7.0));
        assert_eq!(active.risk_bias(), 1.0);
        assert_eq!(active.slider("unknown"), None);
    }

    #[test]
    fn test_unknown_persona() {
        let mut manager = manager();
        assert!(matches!(
            manager.set_persona(Scope::Global, "ghost", BTreeMap::new()),
            Err(PersonaError::UnknownPersona(_))
        ));
    }

    #[test]
    fn test_clear_persona() {
        let mut manager = manager();
        manager.set_persona(Scope::Global, "bold", BTreeMap::new()).unwrap();
        assert!(manager.clear_persona(&Scope::Global));
        assert!(!manager.clear_persona(&Scope::Global));
        assert_eq!(manager.active_persona(&Scope::Global).id(), NEUTRAL_PERSONA);
    }

    #[test]
    fn test_context_is_a_snapshot() {
        let mut manager = manager();
        manager.set_persona(Scope::Global, "bold", BTreeMap::new()).unwrap();
        let context = manager.context();
        manager.set_persona(Scope::Global, "shy", BTreeMap::new()).unwrap();
        assert_eq!(context.active_persona(&Scope::Global).id(), "bold");
    }

    #[test]
    fn test_register_rejects_inverted_or_nan_slider_bounds() {
        let mut manager = PersonaManager::new();
        assert!(matches!(
            manager.register(Persona::new("odd").with_slider_bounds(MYSTERY_LEVEL, 1.0, 0.0)),
            Err(PersonaError::InvalidPersona { .. })
        ));
        assert!(matches!(
            manager.register(Persona::new("odd").with_slider_bounds(RISK_BIAS, 0.0, f64::NAN)),
            Err(PersonaError::InvalidPersona { .. })
        ));
        assert!(matches!(
            manager.register(Persona::new("odd").with_slider(RISK_BIAS, f64::INFINITY)),
            Err(PersonaError::InvalidPersona { .. })
        ));
        assert!(manager.persona("odd").is_none());
    }

    #[test]
    fn test_register_rejects_bad_override_range() {
        let mut manager = PersonaManager::new();
        let inverted = Persona::new("odd").with_tag_override(
            "core.trust",
            "open",
            TagOverride {
                range: Some(ValueRange::new(80.0, 70.0)),
                jitter: None,
            },
        );
        assert!(matches!(
            manager.register(inverted),
            Err(PersonaError::InvalidPersona { .. })
        ));

        let noisy = Persona::new("odd").with_tag_override(
            "core.trust",
            "open",
            TagOverride {
                range: None,
                jitter: Some(f64::NAN),
            },
        );
        assert!(manager.register(noisy).is_err());
    }

    #[test]
    fn test_set_persona_rejects_invalid_definition() {
        let mut manager = PersonaManager::new();
        let mut odd = Persona::new("odd");
        odd.slider_bounds
            .insert(MYSTERY_LEVEL.to_string(), ValueRange::new(1.0, 0.0));
        // Bypass `register` to reach the activation-time check.
        manager.personas.insert(odd.id.clone(), Arc::new(odd));

        assert!(matches!(
            manager.set_persona(Scope::Global, "odd", BTreeMap::new()),
            Err(PersonaError::InvalidPersona { .. })
        ));
        assert_eq!(manager.active_persona(&Scope::Global).mystery_level(), 0.5);
    }

    #[test]
    fn test_trigger_overrides_checked_like_set_persona() {
        let mut manager = manager();
        let mut trigger = PersonaTrigger::new(
            "dare",
            Scope::Global,
            "bold",
            TriggerCondition::CycleAtLeast { cycle: 0 },
        );
        trigger.overrides.insert(RISK_BIAS.to_string(), 1.5);
        assert!(matches!(
            manager.swap_on_trigger(trigger.clone()),
            Err(PersonaError::SliderOutOfRange { .. })
        ));
        assert!(manager.triggers().is_empty());

        trigger.overrides.insert(RISK_BIAS.to_string(), f64::NAN);
        assert!(manager.swap_on_trigger(trigger.clone()).is_err());

        trigger.overrides.insert(RISK_BIAS.to_string(), 0.8);
        manager.swap_on_trigger(trigger).unwrap();
        assert_eq!(manager.triggers().len(), 1);
    }

    #[test]
    fn test_tag_override_lookup_normalises() {
        let persona = Persona::new("p").with_tag_override(
            "core.trust",
            "Open",
            TagOverride {
                range: Some(ValueRange::new(70.0, 80.0)),
                jitter: Some(0.0),
            },
        );
        assert!(persona.tag_override("core.trust", "open").is_some());
        assert!(persona.tag_override("core.trust", "wary").is_none());
    }
}
