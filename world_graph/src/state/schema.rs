//! Declared stat bounds and defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{StateError, ValidationError};

const FALLBACK_KEY: &str = "fallback";

/// Inclusive numeric bounds for a stat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatBounds {
    pub lo: f64,
    pub hi: f64,
}

impl StatBounds {
    /// Bounds from `lo` to `hi`. Checked when declared in a schema.
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Clamp a value into the bounds, reporting whether it had to move.
    ///
    /// Non-finite input lands on the nearest bound (`NaN` on `lo`).
    pub fn clamp(&self, value: f64) -> (f64, bool) {
        if value.is_nan() {
            return (self.lo, true);
        }
        let clamped = value.max(self.lo).min(self.hi);
        (clamped, clamped != value)
    }

    /// Whether `value` lies inside the bounds.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lo && value <= self.hi
    }

    /// `hi - lo`.
    pub fn span(&self) -> f64 {
        self.hi - self.lo
    }

    fn check(&self, stat: &str) -> Result<(), ValidationError> {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo > self.hi {
            return Err(ValidationError::InvalidBounds {
                stat: stat.to_string(),
                lo: self.lo,
                hi: self.hi,
            });
        }
        Ok(())
    }
}

impl Default for StatBounds {
    fn default() -> Self {
        Self { lo: 0.0, hi: 100.0 }
    }
}

/// A declared stat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatDeclaration {
    #[serde(flatten)]
    pub bounds: StatBounds,
    #[serde(default)]
    pub default: f64,
}

/// Schema of every stat a session tracks.
///
/// Authored as one table per stat next to an optional `fallback` table, so
/// `fallback` is not available as a stat name. Stats that were never declared
/// fall back to `fallback` bounds and a starting value of `fallback.lo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatSchema {
    #[serde(default)]
    fallback: StatBounds,
    #[serde(flatten)]
    stats: BTreeMap<String, StatDeclaration>,
}

impl StatSchema {
    /// Empty schema with `[0, 100]` fallback bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a stat. The default is clamped into the bounds.
    pub fn with_stat(
        mut self,
        name: impl Into<String>,
        lo: f64,
        hi: f64,
        default: f64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name == FALLBACK_KEY {
            return Err(ValidationError::ReservedStat(name));
        }
        let bounds = StatBounds::new(lo, hi);
        bounds.check(&name)?;
        let (default, _) = bounds.clamp(default);
        self.stats.insert(name, StatDeclaration { bounds, default });
        Ok(self)
    }

    /// Bounds for stats that were never declared.
    pub fn with_fallback(mut self, lo: f64, hi: f64) -> Result<Self, ValidationError> {
        let bounds = StatBounds::new(lo, hi);
        bounds.check("<fallback>")?;
        self.fallback = bounds;
        Ok(self)
    }

    /// Parse a TOML schema: `[trust] lo = 0 hi = 100 default = 50`.
    pub fn from_toml_str(source: &str) -> Result<Self, StateError> {
        let schema: StatSchema = toml::from_str(source)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check every declared bound.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.fallback.check("<fallback>")?;
        for (name, declaration) in &self.stats {
            declaration.bounds.check(name)?;
        }
        Ok(())
    }

    /// Bounds of a stat, or the fallback bounds.
    pub fn bounds(&self, stat: &str) -> StatBounds {
        self.stats
            .get(stat)
            .map(|declaration| declaration.bounds)
            .unwrap_or(self.fallback)
    }

    /// Starting value of a stat, always inside its bounds.
    pub fn default_value(&self, stat: &str) -> f64 {
        match self.stats.get(stat) {
            Some(declaration) => declaration.bounds.clamp(declaration.default).0,
            None => self.fallback.lo,
        }
    }

    /// Whether the stat was declared.
    pub fn is_declared(&self, stat: &str) -> bool {
        self.stats.contains_key(stat)
    }

    /// Every declared stat in name order.
    pub fn declared(&self) -> impl Iterator<Item = (&String, &StatDeclaration)> {
        self.stats.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_reports_movement() {
        let bounds = StatBounds::new(0.0, 100.0);
        assert_eq!(bounds.clamp(50.0), (50.0, false));
        assert_eq!(bounds.clamp(120.0), (100.0, true));
        assert_eq!(bounds.clamp(-3.0), (0.0, true));
        assert_eq!(bounds.clamp(f64::INFINITY), (100.0, true));
        assert_eq!(bounds.clamp(f64::NAN), (0.0, true));
    }

    #[test]
    fn test_declared_and_fallback_bounds() {
        let schema = StatSchema::new()
            .with_stat("trust", 0.0, 100.0, 20.0)
            .unwrap()
            .with_stat("mood", -10.0, 10.0, 50.0)
            .unwrap();

        assert_eq!(schema.bounds("mood"), StatBounds::new(-10.0, 10.0));
        assert_eq!(schema.default_value("mood"), 10.0);
        assert_eq!(schema.default_value("trust"), 20.0);
        assert_eq!(schema.bounds("unknown"), StatBounds::default());
        assert_eq!(schema.default_value("unknown"), 0.0);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        assert!(StatSchema::new().with_stat("x", 10.0, 0.0, 5.0).is_err());
        assert!(StatSchema::new().with_fallback(1.0, f64::NAN).is_err());
        assert!(matches!(
            StatSchema::new().with_stat("fallback", 0.0, 1.0, 0.0),
            Err(ValidationError::ReservedStat(_))
        ));
    }

    #[test]
    fn test_from_toml() {
        let schema = StatSchema::from_toml_str(
            r#"
            [fallback]
            lo = 0
            hi = 10

            [trust]
            lo = 0
            hi = 100
            default = 50
            "#,
        )
        .unwrap();
        assert_eq!(schema.bounds("trust").hi, 100.0);
        assert_eq!(schema.default_value("trust"), 50.0);
        assert_eq!(schema.bounds("other").hi, 10.0);
    }

    #[test]
    fn test_from_toml_rejects_bad_bounds() {
        let result = StatSchema::from_toml_str(
            r#"
            [trust]
            lo = 100
            hi = 0
            "#,
        );
        assert!(matches!(result, Err(StateError::Validation(_))));
    }
}
