//! Engine configuration, loaded once at startup and immutable for the session.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use world_graph::StatSchema;

use crate::error::ConfigError;
use crate::outcome::{InputSource, OutcomeBundle, OutcomePoolSelector};
use crate::persona::{Persona, PersonaManager, PersonaTrigger, Scope};
use crate::qualitative::{FactorEnvelope, QualitativeResolver, Scale, ScalingRule, Taxonomy};

/// Settings for the sweep itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Envelope for the summed additive context shift.
    pub max_factor_shift: f64,

    /// Envelope for the multiplicative product: `1 ± max_factor_scale`.
    pub max_factor_scale: f64,

    /// Bound on each asset catalog call.
    pub catalog_timeout_ms: u64,

    /// World flags that must all be set for any node to be gathered.
    pub required_world_flags: Vec<String>,

    /// Score and resolve nodes on the rayon pool.
    pub parallel: bool,

    /// How many past cycles of asset use count as "recent".
    pub recent_asset_window: usize,

    /// Scale used for bare qualitative tags.
    pub default_scale: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_factor_shift: 25.0,
            max_factor_scale: 0.5,
            catalog_timeout_ms: 250,
            required_world_flags: Vec::new(),
            parallel: true,
            recent_asset_window: 3,
            default_scale: None,
        }
    }
}

impl OrchestratorConfig {
    /// Bounds applied to every context factor.
    pub fn envelope(&self) -> FactorEnvelope {
        FactorEnvelope {
            max_shift: self.max_factor_shift,
            max_scale: self.max_factor_scale,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_factor_shift.is_finite() || self.max_factor_shift < 0.0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_factor_shift must be >= 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.max_factor_scale) {
            return Err(ConfigError::Invalid(
                "orchestrator.max_factor_scale must be in [0, 1)".to_string(),
            ));
        }
        if self.catalog_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.catalog_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A persona active from session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationConfig {
    pub scope: Scope,
    pub persona: String,
    #[serde(default)]
    pub overrides: BTreeMap<String, f64>,
}

fn default_true() -> bool {
    true
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Register the built-in `core.*` scales before `scales`.
    #[serde(default = "default_true")]
    pub builtin_scales: bool,
    #[serde(default)]
    pub scales: Vec<Scale>,
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub activations: Vec<ActivationConfig>,
    #[serde(default)]
    pub persona_triggers: Vec<PersonaTrigger>,
    #[serde(default)]
    pub bundles: Vec<OutcomeBundle>,
    #[serde(default)]
    pub scaling_rules: Vec<ScalingRule>,
    #[serde(default)]
    pub stats: StatSchema,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            orchestrator: OrchestratorConfig::default(),
            builtin_scales: true,
            scales: Vec::new(),
            personas: Vec::new(),
            activations: Vec::new(),
            persona_triggers: Vec::new(),
            bundles: Vec::new(),
            scaling_rules: Vec::new(),
            stats: StatSchema::default(),
        }
    }
}

/// Load and validate an engine configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    EngineConfig::from_toml_str(&content)
}

impl EngineConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Every built-in and configured scale.
    pub fn taxonomy(&self) -> Result<Taxonomy, ConfigError> {
        let mut taxonomy = if self.builtin_scales {
            Taxonomy::with_defaults()
        } else {
            Taxonomy::new()
        };
        for scale in &self.scales {
            taxonomy.register(scale.clone())?;
        }
        Ok(taxonomy)
    }

    /// Resolver over the taxonomy and scaling rules.
    pub fn resolver(&self) -> Result<QualitativeResolver, ConfigError> {
        Ok(QualitativeResolver::new(self.taxonomy()?, self.seed)
            .with_rules(self.scaling_rules.clone())
            .with_envelope(self.orchestrator.envelope()))
    }

    /// Selector over the configured bundles.
    pub fn selector(&self) -> OutcomePoolSelector {
        OutcomePoolSelector::new(self.bundles.clone())
    }

    /// Personas, initial activations and triggers.
    pub fn persona_manager(&self) -> Result<PersonaManager, ConfigError> {
        let mut manager = PersonaManager::new();
        for persona in &self.personas {
            manager
                .register(persona.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        for activation in &self.activations {
            manager
                .set_persona(
                    activation.scope.clone(),
                    &activation.persona,
                    activation.overrides.clone(),
                )
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        for trigger in &self.persona_triggers {
            manager
                .swap_on_trigger(trigger.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(manager)
    }

    /// Check the configuration as a whole before any sweep runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.orchestrator.validate()?;
        self.stats.validate()?;

        let taxonomy = self.taxonomy()?;
        for scale in &self.scales {
            require_id("scale", &scale.id)?;
        }
        require_unique("scale", self.scales.iter().map(|s| s.id.as_str()))?;

        for persona in &self.personas {
            require_id("persona", &persona.id)?;
            persona
                .validate()
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
            for scale in persona.tag_overrides.keys() {
                if taxonomy.scale(scale).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "persona '{}' overrides unregistered scale '{}'",
                        persona.id, scale
                    )));
                }
            }
        }
        require_unique("persona", self.personas.iter().map(|p| p.id.as_str()))?;

        for rule in &self.scaling_rules {
            require_id("scaling rule", &rule.name)?;
            if let Some(scale) = &rule.scale {
                if taxonomy.scale(scale).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "scaling rule '{}' targets unregistered scale '{}'",
                        rule.name, scale
                    )));
                }
            }
        }

        for bundle in &self.bundles {
            require_id("bundle", &bundle.id)?;
            require_unique(
                &format!("outcome in bundle '{}'", bundle.id),
                bundle.outcomes.iter().map(|o| o.id.as_str()),
            )?;
            require_unique(
                &format!("input in bundle '{}'", bundle.id),
                bundle.inputs.iter().map(|i| i.name.as_str()),
            )?;
            for outcome in &bundle.outcomes {
                require_id("outcome", &outcome.id)?;
            }
            for input in &bundle.inputs {
                if let InputSource::Tag { tag } = &input.source {
                    let scale = tag.scale.as_deref().or(self.orchestrator.default_scale.as_deref());
                    if !scale.map_or(false, |s| taxonomy.contains(s, &tag.descriptor)) {
                        return Err(ConfigError::Invalid(format!(
                            "bundle '{}' input '{}' uses unregistered tag '{}'",
                            bundle.id, input.name, tag
                        )));
                    }
                }
            }
        }
        require_unique("bundle", self.bundles.iter().map(|b| b.id.as_str()))?;

        // Builds the manager once to check activations and triggers.
        self.persona_manager()?;
        Ok(())
    }
}

fn require_id(kind: &str, id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} with empty id", kind)));
    }
    Ok(())
}

fn require_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::Invalid(format!("duplicate {} id '{}'", kind, id)));
        }
    }
    Ok(())
}
