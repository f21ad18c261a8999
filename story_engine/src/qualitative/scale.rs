//! Qualitative scales: named descriptors mapped onto numeric ranges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use world_graph::{normalize_descriptor, StatBounds};

use crate::error::ConfigError;

/// A closed numeric interval, authored as `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ValueRange {
    pub lo: f64,
    pub hi: f64,
}

impl ValueRange {
    /// Range from `lo` to `hi`; see [`ValueRange::is_valid`].
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Midpoint of the range.
    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    /// `hi - lo`.
    pub fn span(&self) -> f64 {
        self.hi - self.lo
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }

    /// Clamp a value into the range.
    ///
    /// Never panics: on an inverted range the result is `hi`, and a `NaN` end is ignored.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lo).min(self.hi)
    }

    /// Intersect with scale bounds. Both ends land inside the bounds.
    pub fn clamp_to(&self, bounds: StatBounds) -> Self {
        let lo = self.lo.max(bounds.lo).min(bounds.hi);
        let hi = self.hi.max(bounds.lo).min(bounds.hi);
        Self { lo, hi: hi.max(lo) }
    }

    /// Both ends finite and `lo <= hi`.
    pub fn is_valid(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite() && self.lo <= self.hi
    }
}

impl From<[f64; 2]> for ValueRange {
    fn from([lo, hi]: [f64; 2]) -> Self {
        Self { lo, hi }
    }
}

impl From<ValueRange> for [f64; 2] {
    fn from(range: ValueRange) -> Self {
        [range.lo, range.hi]
    }
}

impl std::fmt::Display for ValueRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// One named step on a scale, e.g. `wary` on `core.trust`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub range: ValueRange,

    /// Jitter amplitude: absolute when `|jitter| > 1`, otherwise a fraction of the range span.
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub label: Option<String>,
}

impl Descriptor {
    /// Descriptor over `[lo, hi]` with no jitter.
    pub fn new(name: impl Into<String>, lo: f64, hi: f64) -> Self {
        Self {
            name: normalize_descriptor(&name.into()),
            aliases: Vec::new(),
            range: ValueRange::new(lo, hi),
            jitter: 0.0,
            label: None,
        }
    }

    /// Jitter: a fraction of the span up to `1.0`, an absolute amount above it.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Another name that resolves to this descriptor.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(normalize_descriptor(&alias.into()));
        self
    }

    fn answers_to(&self, normalized: &str) -> bool {
        normalize_descriptor(&self.name) == normalized
            || self
                .aliases
                .iter()
                .any(|alias| normalize_descriptor(alias) == normalized)
    }
}

/// Absolute jitter amplitude for a descriptor over a range.
pub fn jitter_amplitude(jitter: f64, range: ValueRange) -> f64 {
    let jitter = jitter.abs();
    if jitter > 1.0 {
        jitter
    } else {
        jitter * range.span()
    }
}

fn default_bounds() -> StatBounds {
    StatBounds::new(0.0, 100.0)
}

/// A qualitative scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scale {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub default_descriptor: Option<String>,
    #[serde(default = "default_bounds")]
    pub bounds: StatBounds,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

impl Scale {
    /// Empty scale.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            default_descriptor: None,
            bounds: default_bounds(),
            descriptors: Vec::new(),
        }
    }

    /// Add a descriptor.
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Descriptor used when a tag names only the scale.
    pub fn with_default(mut self, descriptor: impl Into<String>) -> Self {
        self.default_descriptor = Some(normalize_descriptor(&descriptor.into()));
        self
    }

    /// Set a display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Case-insensitive, alias-aware descriptor lookup.
    pub fn descriptor(&self, name: &str) -> Option<&Descriptor> {
        let normalized = normalize_descriptor(name);
        self.descriptors.iter().find(|d| d.answers_to(&normalized))
    }

    /// The default descriptor, if one is set and exists.
    pub fn default_descriptor(&self) -> Option<&Descriptor> {
        self.default_descriptor
            .as_deref()
            .and_then(|name| self.descriptor(name))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("scale with empty id".to_string()));
        }
        if !self.bounds.lo.is_finite() || !self.bounds.hi.is_finite() || self.bounds.lo > self.bounds.hi {
            return Err(ConfigError::Invalid(format!(
                "scale '{}' has invalid bounds [{}, {}]",
                self.id, self.bounds.lo, self.bounds.hi
            )));
        }

        let mut seen = Vec::new();
        for descriptor in &self.descriptors {
            if !descriptor.range.is_valid()
                || !self.bounds.contains(descriptor.range.lo)
                || !self.bounds.contains(descriptor.range.hi)
            {
                return Err(ConfigError::Invalid(format!(
                    "descriptor '{}' on scale '{}' has range {} outside bounds",
                    descriptor.name, self.id, descriptor.range
                )));
            }
            let names = std::iter::once(&descriptor.name).chain(descriptor.aliases.iter());
            for name in names {
                let normalized = normalize_descriptor(name);
                if seen.contains(&normalized) {
                    return Err(ConfigError::Invalid(format!(
                        "descriptor name '{}' used twice on scale '{}'",
                        normalized, self.id
                    )));
                }
                seen.push(normalized);
            }
        }

        if let Some(default) = &self.default_descriptor {
            if self.descriptor(default).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "scale '{}' default descriptor '{}' is not defined",
                    self.id, default
                )));
            }
        }
        Ok(())
    }
}

/// Every registered qualitative scale, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    scales: BTreeMap<String, Scale>,
}

impl Taxonomy {
    /// Empty taxonomy.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `core.*` scales.
    pub fn with_defaults() -> Self {
        let mut taxonomy = Self::new();
        for scale in default_scales() {
            if let Err(err) = taxonomy.register(scale) {
                tracing::warn!(error = %err, "skipped built-in scale");
            }
        }
        taxonomy
    }

    /// Register (or replace) a scale after validating it.
    pub fn register(&mut self, scale: Scale) -> Result<(), ConfigError> {
        scale.validate()?;
        tracing::debug!(scale = %scale.id, descriptors = scale.descriptors.len(), "registered scale");
        self.scales.insert(scale.id.clone(), scale);
        Ok(())
    }

    /// Scale with this id.
    pub fn scale(&self, id: &str) -> Option<&Scale> {
        self.scales.get(id)
    }

    /// Every scale in id order.
    pub fn scales(&self) -> impl Iterator<Item = &Scale> {
        self.scales.values()
    }

    /// Whether `scale:descriptor` is known.
    pub fn contains(&self, scale: &str, descriptor: &str) -> bool {
        self.scale(scale)
            .and_then(|s| s.descriptor(descriptor))
            .is_some()
    }

    /// Number of scales.
    pub fn len(&self) -> usize {
        self.scales.len()
    }

    /// Whether no scale is registered.
    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }
}

fn default_scales() -> Vec<Scale> {
    let trust = Scale::new("core.trust")
        .with_label("Trust")
        .with_descriptor(
            Descriptor::new("ice_cold", 0.0, 15.0)
                .with_alias("hostile")
                .with_alias("frosty")
                .with_jitter(2.0),
        )
        .with_descriptor(Descriptor::new("wary", 15.0, 35.0).with_jitter(3.0))
        .with_descriptor(
            Descriptor::new("neutral", 35.0, 55.0)
                .with_alias("steady")
                .with_jitter(4.0),
        )
        .with_descriptor(Descriptor::new("open", 55.0, 75.0).with_jitter(4.0))
        .with_descriptor(
            Descriptor::new("bonded", 75.0, 90.0)
                .with_alias("loyal")
                .with_jitter(3.0),
        )
        .with_descriptor(
            Descriptor::new("ride_or_die", 90.0, 100.0)
                .with_alias("unshakable")
                .with_jitter(2.0),
        )
        .with_default("neutral");

    let arousal = Scale::new("core.arousal")
        .with_label("Arousal")
        .with_descriptor(
            Descriptor::new("flat", 0.0, 10.0)
                .with_alias("cooldown")
                .with_jitter(1.0),
        )
        .with_descriptor(Descriptor::new("calm", 10.0, 35.0).with_jitter(3.0))
        .with_descriptor(Descriptor::new("curious", 35.0, 60.0).with_jitter(4.0))
        .with_descriptor(
            Descriptor::new("flirty", 60.0, 80.0)
                .with_alias("spark")
                .with_jitter(5.0),
        )
        .with_descriptor(
            Descriptor::new("charged", 80.0, 95.0)
                .with_alias("heated")
                .with_jitter(4.0),
        )
        .with_descriptor(Descriptor::new("overdrive", 95.0, 100.0).with_jitter(2.0))
        .with_default("calm");

    let rapport = Scale::new("core.rapport")
        .with_label("Rapport")
        .with_descriptor(Descriptor::new("strangers", 0.0, 15.0).with_jitter(2.0))
        .with_descriptor(Descriptor::new("acquainted", 15.0, 30.0).with_jitter(3.0))
        .with_descriptor(Descriptor::new("warming_up", 30.0, 50.0).with_jitter(3.0))
        .with_descriptor(
            Descriptor::new("friendly", 50.0, 75.0)
                .with_alias("easy")
                .with_jitter(4.0),
        )
        .with_descriptor(Descriptor::new("close", 75.0, 100.0).with_jitter(3.0))
        .with_default("acquainted");

    vec![trust, arousal, rapport]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_register() {
        let taxonomy = Taxonomy::with_defaults();
        assert_eq!(taxonomy.len(), 3);
        assert!(taxonomy.contains("core.trust", "wary"));
        assert!(taxonomy.contains("core.rapport", "warming up"));
        assert!(!taxonomy.contains("core.trust", "warming_up"));
    }

    #[test]
    fn test_alias_and_case_lookup() {
        let taxonomy = Taxonomy::with_defaults();
        let arousal = taxonomy.scale("core.arousal").unwrap();
        assert_eq!(arousal.descriptor("Spark").unwrap().name, "flirty");
        assert_eq!(arousal.descriptor("FLIRTY").unwrap().name, "flirty");
        assert_eq!(arousal.default_descriptor().unwrap().name, "calm");
    }

    #[test]
    fn test_jitter_amplitude() {
        let range = ValueRange::new(30.0, 50.0);
        assert_eq!(jitter_amplitude(3.0, range), 3.0);
        assert_eq!(jitter_amplitude(0.1, range), 2.0);
        assert_eq!(jitter_amplitude(-0.5, range), 10.0);
        assert_eq!(jitter_amplitude(0.0, range), 0.0);
    }

    #[test]
    fn test_range_clamp_to_bounds() {
        let clamped = ValueRange::new(-10.0, 120.0).clamp_to(StatBounds::new(0.0, 100.0));
        assert_eq!(clamped, ValueRange::new(0.0, 100.0));

        let outside = ValueRange::new(110.0, 130.0).clamp_to(StatBounds::new(0.0, 100.0));
        assert_eq!(outside, ValueRange::new(100.0, 100.0));
    }

    #[test]
    fn test_clamp_on_inverted_or_nan_range() {
        assert_eq!(ValueRange::new(1.0, 0.0).clamp(0.5), 0.0);
        assert_eq!(ValueRange::new(0.0, f64::NAN).clamp(3.0), 3.0);
        assert_eq!(ValueRange::new(f64::NAN, 1.0).clamp(-2.0), -2.0);
        assert!(!ValueRange::new(1.0, 0.0).is_valid());
        assert!(!ValueRange::new(0.0, f64::INFINITY).is_valid());
        assert!(ValueRange::new(0.0, 0.0).is_valid());
    }

    #[test]
    fn test_rejects_descriptor_outside_bounds() {
        let mut taxonomy = Taxonomy::new();
        let scale = Scale::new("x").with_descriptor(Descriptor::new("too_high", 90.0, 120.0));
        assert!(matches!(taxonomy.register(scale), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let mut taxonomy = Taxonomy::new();
        let scale = Scale::new("x")
            .with_descriptor(Descriptor::new("a", 0.0, 10.0).with_alias("b"))
            .with_descriptor(Descriptor::new("b", 10.0, 20.0));
        assert!(taxonomy.register(scale).is_err());
    }

    #[test]
    fn test_rejects_missing_default() {
        let mut taxonomy = Taxonomy::new();
        let scale = Scale::new("x")
            .with_descriptor(Descriptor::new("a", 0.0, 10.0))
            .with_default("zzz");
        assert!(taxonomy.register(scale).is_err());
    }

    #[test]
    fn test_scale_from_toml() {
        let scale: Scale = toml::from_str(
            r#"
            id = "custom.mood"
            default_descriptor = "ok"
            bounds = { lo = 0, hi = 10 }

            [[descriptors]]
            name = "ok"
            range = [3, 7]
            jitter = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(scale.bounds.hi, 10.0);
        assert_eq!(scale.descriptor("ok").unwrap().range, ValueRange::new(3.0, 7.0));

        let mut taxonomy = Taxonomy::new();
        assert!(taxonomy.register(scale).is_ok());
    }
}
