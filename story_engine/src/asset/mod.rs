//! Asset Selector - binds a chosen outcome to concrete media.
//!
//! Selection is a pure read over catalog metadata:
//! 1. **Query**: ask the catalog for assets carrying the outcome's tags in the
//!    current time window
//! 2. **Rank**: `weight x mood boost x recency factor`, ties in catalog order
//! 3. **Chain**: for multi-segment outcomes, search depth-first in rank order
//!    for a sequence whose neighbours declare each other compatible

mod catalog;

pub use catalog::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use world_graph::NodeId;

use crate::error::{AssetError, CatalogError};
use crate::outcome::Outcome;

/// Rank multiplier for assets sharing a tag with the persona's mood.
pub const MOOD_BOOST: f64 = 1.5;

/// Rank multiplier for assets the node used recently.
pub const RECENCY_PENALTY: f64 = 0.2;

/// One link of an asset chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSegment {
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// What an outcome needs from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetRequirement {
    #[serde(default)]
    pub pool: Option<String>,
    /// Required on every asset, including each chain segment.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Ordered segments, e.g. outro then intro. Empty means a single asset.
    #[serde(default)]
    pub chain: Vec<ChainSegment>,
}

impl AssetRequirement {
    /// Single-asset requirement on `tags`.
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pool: None,
            tags: tags.into_iter().map(Into::into).collect(),
            chain: Vec::new(),
        }
    }

    /// Restrict the query to one pool.
    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Append a chain segment with extra tags.
    pub fn then<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain.push(ChainSegment {
            tags: tags.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Tag sets to query, one per asset in the result.
    fn segment_tags(&self) -> Vec<BTreeSet<String>> {
        if self.chain.is_empty() {
            return vec![self.tags.clone()];
        }
        self.chain
            .iter()
            .map(|segment| self.tags.union(&segment.tags).cloned().collect())
            .collect()
    }
}

/// Per-node inputs to asset selection.
#[derive(Debug, Clone)]
pub struct AssetContext<'a> {
    pub node: &'a NodeId,
    pub window: Option<TimeSlice>,
    pub mood_tags: &'a BTreeSet<String>,
    /// `1.0` drops assets outside the mood entirely.
    pub mood_strictness: f64,
    /// Asset ids this node used in recent cycles.
    pub recent: &'a [String],
    pub timeout: Duration,
}

/// The asset(s) bound to an outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetChoice {
    pub assets: Vec<AssetDescriptor>,
}

impl AssetChoice {
    /// First asset of the choice.
    pub fn primary(&self) -> Option<&AssetDescriptor> {
        self.assets.first()
    }

    /// Ids in chain order.
    pub fn ids(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.id.clone()).collect()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Rank of one asset for this context; `None` when it is excluded.
pub fn rank_asset(asset: &AssetDescriptor, context: &AssetContext<'_>) -> Option<f64> {
    if !asset.weight.is_finite() || asset.weight <= 0.0 {
        return None;
    }

    let mood = if context.mood_tags.is_empty() {
        1.0
    } else if asset.tags.iter().any(|t| context.mood_tags.contains(t)) {
        MOOD_BOOST
    } else {
        1.0 - context.mood_strictness.clamp(0.0, 1.0)
    };
    if mood <= 0.0 {
        return None;
    }

    let recency = if context.recent.iter().any(|id| *id == asset.id) {
        RECENCY_PENALTY
    } else {
        1.0
    };

    Some(asset.weight * mood * recency)
}

/// Ranked candidates, best first; equal ranks keep catalog order.
///
/// Catalogs may match loosely, so each asset is checked against the query again.
fn ranked(
    candidates: Vec<AssetDescriptor>,
    query: &AssetQuery,
    context: &AssetContext<'_>,
) -> Vec<AssetDescriptor> {
    let mut scored: Vec<(f64, AssetDescriptor)> = candidates
        .into_iter()
        .filter(|asset| query.matches(asset))
        .filter_map(|asset| rank_asset(&asset, context).map(|rank| (rank, asset)))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, asset)| asset).collect()
}

/// Pick the asset, or asset chain, for a chosen outcome.
///
/// Outcomes without an asset requirement bind to nothing. A catalog answer that
/// arrives after `context.timeout` is discarded as [`CatalogError::Timeout`];
/// bounding the call itself is the catalog's job (see [`AssetCatalog`]).
pub fn select_asset(
    outcome: &Outcome,
    context: &AssetContext<'_>,
    catalog: &dyn AssetCatalog,
) -> Result<AssetChoice, AssetError> {
    let Some(requirement) = &outcome.asset else {
        return Ok(AssetChoice::default());
    };

    let started = Instant::now();
    let mut segments = Vec::new();
    for tags in requirement.segment_tags() {
        let query = AssetQuery {
            tags: tags.clone(),
            pool: requirement.pool.clone(),
            window: context.window,
            timeout: context.timeout,
        };
        let found = catalog.find_by_tags(&query)?;
        if started.elapsed() > context.timeout {
            tracing::warn!(node = %context.node, outcome = %outcome.id, "asset catalog query exceeded timeout");
            return Err(AssetError::Catalog(CatalogError::Timeout(
                context.timeout.as_millis() as u64,
            )));
        }

        let candidates = ranked(found, &query, context);
        if candidates.is_empty() {
            return Err(AssetError::NoMatchingAsset {
                outcome: outcome.id.clone(),
                reason: format!("no asset tagged {:?} fits the current time and mood", tags),
            });
        }
        segments.push(candidates);
    }

    if segments.len() == 1 {
        let assets = segments.into_iter().flatten().take(1).collect();
        return Ok(AssetChoice { assets });
    }

    let mut path = Vec::with_capacity(segments.len());
    if chain_search(&segments, &mut path) {
        let assets = path
            .iter()
            .enumerate()
            .map(|(depth, index)| segments[depth][*index].clone())
            .collect();
        Ok(AssetChoice { assets })
    } else {
        Err(AssetError::NoMatchingAsset {
            outcome: outcome.id.clone(),
            reason: "no compatible transition chain".to_string(),
        })
    }
}

/// Depth-first search over ranked segment candidates.
fn chain_search(segments: &[Vec<AssetDescriptor>], path: &mut Vec<usize>) -> bool {
    let depth = path.len();
    if depth == segments.len() {
        return true;
    }

    for (index, candidate) in segments[depth].iter().enumerate() {
        if let Some(previous) = path.last() {
            if !segments[depth - 1][*previous].transitions_to(candidate) {
                continue;
            }
        }
        path.push(index);
        if chain_search(segments, path) {
            return true;
        }
        path.pop();
    }
    false
}
