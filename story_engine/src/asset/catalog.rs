//! Asset metadata and the catalog boundary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::CatalogError;

const DAY_HOURS: f64 = 24.0;

/// A span of the 24-hour day in hours, `[start, end)`.
///
/// `start > end` wraps past midnight; `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSlice {
    pub start: f64,
    pub end: f64,
}

impl TimeSlice {
    /// Window from `start` to `end` in hours. Wraps midnight when `end < start`.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start: start.rem_euclid(DAY_HOURS),
            end: end.rem_euclid(DAY_HOURS),
        }
    }

    /// Window covering all 24 hours.
    pub fn whole_day() -> Self {
        Self { start: 0.0, end: 0.0 }
    }

    /// Whether the window crosses midnight.
    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Whether `hour` falls inside the window.
    pub fn contains(&self, hour: f64) -> bool {
        let hour = hour.rem_euclid(DAY_HOURS);
        self.segments()
            .iter()
            .any(|(start, end)| hour >= *start && hour < *end)
    }

    /// Whether the two windows share any hour.
    pub fn overlaps(&self, other: &TimeSlice) -> bool {
        self.segments().iter().any(|(a_start, a_end)| {
            other
                .segments()
                .iter()
                .any(|(b_start, b_end)| a_start < b_end && b_start < a_end)
        })
    }

    /// Non-wrapping pieces of the slice.
    fn segments(&self) -> Vec<(f64, f64)> {
        if self.start == self.end {
            vec![(0.0, DAY_HOURS)]
        } else if self.wraps() {
            vec![(self.start, DAY_HOURS), (0.0, self.end)]
        } else {
            vec![(self.start, self.end)]
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// Catalog metadata for one media asset. Consumed, never owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: String,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub time_slice: Option<TimeSlice>,
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Asset ids this one may be followed by.
    #[serde(default)]
    pub can_precede: BTreeSet<String>,

    /// Asset ids this one may follow.
    #[serde(default)]
    pub can_follow: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AssetDescriptor {
    /// Untagged asset with weight 1.0 and no pool.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pool: None,
            tags: BTreeSet::new(),
            time_slice: None,
            weight: 1.0,
            can_precede: BTreeSet::new(),
            can_follow: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Place the asset in a pool.
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Limit the asset to a time-of-day window.
    pub fn with_time_slice(mut self, slice: TimeSlice) -> Self {
        self.time_slice = Some(slice);
        self
    }

    /// Set the selection weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Allow `next` to follow this asset in a chain.
    pub fn preceding(mut self, next: impl Into<String>) -> Self {
        self.can_precede.insert(next.into());
        self
    }

    /// Allow this asset to follow `previous` in a chain.
    pub fn following(mut self, previous: impl Into<String>) -> Self {
        self.can_follow.insert(previous.into());
        self
    }

    /// Both sides declare the `self -> next` transition.
    pub fn transitions_to(&self, next: &AssetDescriptor) -> bool {
        self.can_precede.contains(&next.id) && next.can_follow.contains(&self.id)
    }

    /// Whether the asset's time cue fits a window. No cue or no window always fits.
    pub fn fits_window(&self, window: Option<&TimeSlice>) -> bool {
        match (self.time_slice.as_ref(), window) {
            (Some(slice), Some(window)) => slice.overlaps(window),
            _ => true,
        }
    }
}

/// A tag query against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetQuery {
    /// Every returned asset must carry all of these.
    pub tags: BTreeSet<String>,
    pub pool: Option<String>,
    pub window: Option<TimeSlice>,
    pub timeout: Duration,
}

impl AssetQuery {
    /// Carries every query tag, sits in the query pool if one is named, and fits the window.
    pub fn matches(&self, asset: &AssetDescriptor) -> bool {
        self.tags.is_subset(&asset.tags)
            && self
                .pool
                .as_ref()
                .map_or(true, |pool| asset.pool.as_ref() == Some(pool))
            && asset.fits_window(self.window.as_ref())
    }
}

/// The external asset-metadata service.
///
/// Sweeps call the catalog while they hold the in-flight guard, so an
/// implementation must return within `query.timeout`: once the deadline passes it
/// gives up and answers [`CatalogError::Timeout`]. Remote clients should set the
/// deadline on the request itself. The selector also discards late answers and
/// re-checks every returned asset against the query.
pub trait AssetCatalog: Send + Sync {
    /// Assets carrying every query tag that fit the window, in catalog order.
    fn find_by_tags(&self, query: &AssetQuery) -> Result<Vec<AssetDescriptor>, CatalogError>;
}

/// Catalog held in memory, in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    assets: Vec<AssetDescriptor>,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    /// Catalog over a fixed asset list.
    pub fn new(assets: Vec<AssetDescriptor>) -> Self {
        Self {
            assets,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Load a JSON array of asset descriptors.
    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(source)?))
    }

    /// Add an asset.
    pub fn insert(&mut self, asset: AssetDescriptor) {
        self.assets.push(asset);
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the catalog holds no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Simulate the service going away.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }
}

impl AssetCatalog for InMemoryCatalog {
    fn find_by_tags(&self, query: &AssetQuery) -> Result<Vec<AssetDescriptor>, CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("in-memory catalog offline".to_string()));
        }
        Ok(self
            .assets
            .iter()
            .filter(|asset| query.matches(asset))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_contains_and_wraps() {
        let evening = TimeSlice::new(18.0, 23.0);
        assert!(evening.contains(18.0));
        assert!(evening.contains(22.5));
        assert!(!evening.contains(23.0));

        let late = TimeSlice::new(22.0, 4.0);
        assert!(late.wraps());
        assert!(late.contains(23.0));
        assert!(late.contains(1.0));
        assert!(!late.contains(12.0));

        assert!(TimeSlice::whole_day().contains(13.0));
    }

    #[test]
    fn test_slice_overlap() {
        let late = TimeSlice::new(22.0, 4.0);
        assert!(late.overlaps(&TimeSlice::new(3.0, 5.0)));
        assert!(late.overlaps(&TimeSlice::new(20.0, 23.0)));
        assert!(!late.overlaps(&TimeSlice::new(8.0, 12.0)));
        assert!(!TimeSlice::new(8.0, 10.0).overlaps(&TimeSlice::new(10.0, 12.0)));
    }

    #[test]
    fn test_transitions_require_both_sides() {
        let outro = AssetDescriptor::new("outro").preceding("intro");
        let intro = AssetDescriptor::new("intro").following("outro");
        let lonely = AssetDescriptor::new("lonely");
        assert!(outro.transitions_to(&intro));
        assert!(!intro.transitions_to(&outro));
        assert!(!outro.transitions_to(&lonely));
    }

    #[test]
    fn test_in_memory_query() {
        let catalog = InMemoryCatalog::new(vec![
            AssetDescriptor::new("a").with_tag("bar").with_tag("night").with_pool("clips"),
            AssetDescriptor::new("b")
                .with_tag("bar")
                .with_time_slice(TimeSlice::new(8.0, 12.0)),
            AssetDescriptor::new("c").with_tag("park"),
        ]);

        let query = AssetQuery {
            tags: ["bar".to_string()].into_iter().collect(),
            pool: None,
            window: Some(TimeSlice::new(20.0, 23.0)),
            timeout: Duration::from_millis(10),
        };
        let found = catalog.find_by_tags(&query).unwrap();
        assert_eq!(found.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["a"]);

        let pooled = AssetQuery {
            pool: Some("other".into()),
            window: None,
            ..query
        };
        assert!(catalog.find_by_tags(&pooled).unwrap().is_empty());

        catalog.set_available(false);
        assert!(matches!(
            catalog.find_by_tags(&pooled),
            Err(CatalogError::Unavailable(_))
        ));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = InMemoryCatalog::from_json_str(
            r#"[{"id": "clip", "tags": ["bar"], "time_slice": {"start": 22, "end": 2}}]"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
    }
}
