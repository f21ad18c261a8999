//! Orchestrator - one pass over the world graph per external trigger.
//!
//! A sweep moves through fixed phases and always ends back in `Idle`:
//! 1. **Gathering**: nodes that drive outcome bundles, are orchestrated by their
//!    node type, and pass the global world-flag gate
//! 2. **Scoring**: resolve each bundle's qualitative inputs and score candidates
//! 3. **Selecting**: pick at most one outcome per node
//! 4. **Resolving**: bind the chosen outcome to catalog assets
//! 5. **Committing**: apply every write-back in one state-store commit
//!
//! Scoring and resolving are per node and may run on the rayon pool. Nothing is
//! written before Committing, so a cancelled sweep leaves no trace.

mod report;

pub use report::*;

use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use world_graph::{GraphStore, Node, NodeId, NodeTypeRegistry, RuntimeState, StateDelta, StateStore};

use crate::adjuster::AdjusterRegistry;
use crate::asset::{select_asset, AssetCatalog, AssetChoice, AssetContext, TimeSlice};
use crate::config::{EngineConfig, OrchestratorConfig};
use crate::error::{AssetError, CatalogError, ConfigError, SkipReason, SweepError};
use crate::outcome::{
    evaluate_bundle, InputSource, Outcome, OutcomeBundle, OutcomePoolSelector, ScoredCandidate,
    ScoringInputs, Selection,
};
use crate::persona::{ActivePersona, PersonaContext, PersonaManager, TriggerView};
use crate::qualitative::{derive_seed, QualitativeResolver, ResolveContext, ResolvedValue};

/// Where a sweep currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepPhase {
    #[default]
    Idle,
    Gathering,
    Scoring,
    Selecting,
    Resolving,
    Committing,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepPhase::Idle => "idle",
            SweepPhase::Gathering => "gathering",
            SweepPhase::Scoring => "scoring",
            SweepPhase::Selecting => "selecting",
            SweepPhase::Resolving => "resolving",
            SweepPhase::Committing => "committing",
        };
        write!(f, "{}", name)
    }
}

/// Cooperative cancellation for a sweep. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Checked between phases.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything an orchestrator is built from.
pub struct EngineParts {
    pub graph: Arc<GraphStore>,
    pub registry: NodeTypeRegistry,
    pub state: Arc<StateStore>,
    pub resolver: QualitativeResolver,
    pub selector: OutcomePoolSelector,
    pub adjusters: AdjusterRegistry,
    pub config: OrchestratorConfig,
}

impl EngineParts {
    /// Parts for a fresh session: empty state under the configured stat schema.
    pub fn from_config(
        config: &EngineConfig,
        graph: GraphStore,
        registry: NodeTypeRegistry,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            graph: Arc::new(graph),
            registry,
            state: Arc::new(StateStore::new(config.stats.clone())),
            resolver: config.resolver()?,
            selector: config.selector(),
            adjusters: AdjusterRegistry::new(),
            config: config.orchestrator.clone(),
        })
    }

    /// Replace the adjuster registry.
    pub fn with_adjusters(mut self, adjusters: AdjusterRegistry) -> Self {
        self.adjusters = adjusters;
        self
    }
}

/// A gathered node and what it reads this sweep.
struct NodeWork<'a> {
    node: &'a Node,
    state: RuntimeState,
    persona: ActivePersona,
}

struct ScoredBundle<'a> {
    bundle: &'a OutcomeBundle,
    candidates: Vec<ScoredCandidate>,
}

struct Chosen<'a> {
    bundle: &'a OutcomeBundle,
    outcome: &'a Outcome,
    selection: Selection,
}

/// Clears the in-flight flag and returns to `Idle` however the sweep ends.
struct SweepGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> SweepGuard<'a> {
    fn acquire(orchestrator: &'a Orchestrator) -> Result<Self, SweepError> {
        orchestrator
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SweepError::AlreadyRunning)?;
        Ok(Self { orchestrator })
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        *self.orchestrator.phase.lock() = SweepPhase::Idle;
        self.orchestrator.in_flight.store(false, Ordering::Release);
    }
}

/// Drives sweeps over a frozen graph.
pub struct Orchestrator {
    graph: Arc<GraphStore>,
    registry: NodeTypeRegistry,
    state: Arc<StateStore>,
    resolver: QualitativeResolver,
    selector: OutcomePoolSelector,
    adjusters: AdjusterRegistry,
    config: OrchestratorConfig,
    phase: Mutex<SweepPhase>,
    in_flight: AtomicBool,
    time_window: Mutex<Option<TimeSlice>>,

    /// Per node: `(cycle, asset id)` of recently bound assets.
    recent_assets: Mutex<BTreeMap<NodeId, VecDeque<(u64, String)>>>,
}

impl Orchestrator {
    /// Check the parts against each other and build the orchestrator.
    pub fn new(parts: EngineParts) -> Result<Self, ConfigError> {
        parts.graph.revalidate(&parts.registry)?;
        let default_scale = parts.config.default_scale.as_deref();

        for node in parts.graph.nodes() {
            for bundle in &node.bundles {
                if parts.selector.bundle(bundle).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "node '{}' drives unknown bundle '{}'",
                        node.id, bundle
                    )));
                }
            }
        }

        for bundle in parts.selector.bundles() {
            for input in &bundle.inputs {
                if let InputSource::Tag { tag } = &input.source {
                    if !parts.resolver.knows(tag, default_scale) {
                        return Err(ConfigError::Invalid(format!(
                            "bundle '{}' input '{}' uses unregistered tag '{}'",
                            bundle.id, input.name, tag
                        )));
                    }
                }
            }
            for outcome in &bundle.outcomes {
                if let Some(name) = outcome.adjusters.iter().find(|n| !parts.adjusters.contains(n)) {
                    return Err(ConfigError::Invalid(format!(
                        "outcome '{}' in bundle '{}' names unregistered adjuster '{}'",
                        outcome.id, bundle.id, name
                    )));
                }
            }
        }

        for edge in parts.graph.edges() {
            if let Some(tag) = &edge.qualitative {
                if !parts.resolver.knows(tag, default_scale) {
                    return Err(ConfigError::Invalid(format!(
                        "edge {} -> {} carries unregistered tag '{}'",
                        edge.source, edge.target, tag
                    )));
                }
            }
        }

        tracing::info!(
            graph = %parts.graph.id(),
            nodes = parts.graph.node_count(),
            bundles = parts.selector.len(),
            "orchestrator ready"
        );

        Ok(Self {
            graph: parts.graph,
            registry: parts.registry,
            state: parts.state,
            resolver: parts.resolver,
            selector: parts.selector,
            adjusters: parts.adjusters,
            config: parts.config,
            phase: Mutex::new(SweepPhase::Idle),
            in_flight: AtomicBool::new(false),
            time_window: Mutex::new(None),
            recent_assets: Mutex::new(BTreeMap::new()),
        })
    }

    /// The shared graph.
    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    /// The shared state store.
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// The qualitative resolver.
    pub fn resolver(&self) -> &QualitativeResolver {
        &self.resolver
    }

    /// The outcome selector.
    pub fn selector(&self) -> &OutcomePoolSelector {
        &self.selector
    }

    /// Active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Phase of the sweep in progress, or `Idle`.
    pub fn phase(&self) -> SweepPhase {
        *self.phase.lock()
    }

    /// Time of day that asset time cues are matched against. `None` matches everything.
    pub fn set_time_window(&self, window: Option<TimeSlice>) {
        *self.time_window.lock() = window;
    }

    /// Time-of-day window used for asset selection.
    pub fn time_window(&self) -> Option<TimeSlice> {
        *self.time_window.lock()
    }

    /// Run one sweep.
    ///
    /// Node-local failures are reported, never returned. The persona manager is
    /// only updated when the sweep commits.
    pub fn sweep(
        &self,
        personas: &mut PersonaManager,
        catalog: &dyn AssetCatalog,
        cancel: &CancelToken,
    ) -> Result<SweepReport, SweepError> {
        let _guard = SweepGuard::acquire(self)?;
        let cycle = self.state.cycle() + 1;
        let mut report = SweepReport::new(cycle);
        tracing::info!(sweep = %report.id, cycle, "sweep started");

        // Gathering
        self.set_phase(SweepPhase::Gathering);
        let mut staged_personas = personas.clone();
        report.persona_swaps = staged_personas.evaluate_triggers(&TriggerView::new(cycle, &self.state));
        let persona_context = staged_personas.context();
        let world_flags = self.state.world_flags();
        let works = self.gather(&persona_context, &world_flags);
        tracing::debug!(cycle, nodes = works.len(), "gathered nodes");
        self.check_cancel(cancel)?;

        // Scoring
        self.set_phase(SweepPhase::Scoring);
        let scored = self.map_nodes(&works, |work| self.score_node(work, cycle, &world_flags));
        self.check_cancel(cancel)?;

        // Selecting
        self.set_phase(SweepPhase::Selecting);
        let mut selected = Vec::with_capacity(works.len());
        for (work, result) in works.iter().zip(scored) {
            match result.and_then(|bundles| self.select_for(work, cycle, bundles)) {
                Ok(chosen) => {
                    tracing::debug!(
                        node = %work.node.id,
                        bundle = %chosen.bundle.id,
                        outcome = %chosen.outcome.id,
                        score = chosen.selection.score,
                        "outcome selected"
                    );
                    selected.push((work, chosen));
                }
                Err(reason) => skip(&mut report, &work.node.id, reason),
            }
        }
        self.check_cancel(cancel)?;

        // Resolving
        self.set_phase(SweepPhase::Resolving);
        let window = self.time_window();
        let recent = self.recent_assets(cycle);
        let timeout = Duration::from_millis(self.config.catalog_timeout_ms);
        let resolved = self.map_nodes(&selected, |(work, chosen)| {
            let context = AssetContext {
                node: &work.node.id,
                window,
                mood_tags: work.persona.mood_tags(),
                mood_strictness: work.persona.mood_strictness(),
                recent: recent.get(&work.node.id).map(Vec::as_slice).unwrap_or(&[]),
                timeout,
            };
            select_asset(chosen.outcome, &context, catalog)
        });

        let mut advancing: Vec<(&NodeWork<'_>, Chosen<'_>, AssetChoice)> = Vec::with_capacity(selected.len());
        for ((work, chosen), result) in selected.into_iter().zip(resolved) {
            match result {
                Ok(assets) => advancing.push((work, chosen, assets)),
                Err(AssetError::Catalog(CatalogError::Unavailable(reason))) => {
                    tracing::warn!(cycle, reason = %reason, "asset catalog unavailable, sweep aborted");
                    return Err(SweepError::CatalogUnavailable(reason));
                }
                Err(AssetError::Catalog(CatalogError::Timeout(_))) => skip(
                    &mut report,
                    &work.node.id,
                    SkipReason::CatalogTimeout {
                        outcome: chosen.outcome.id.clone(),
                    },
                ),
                Err(AssetError::NoMatchingAsset { outcome, reason }) => skip(
                    &mut report,
                    &work.node.id,
                    SkipReason::NoMatchingAsset { outcome, reason },
                ),
            }
        }
        self.check_cancel(cancel)?;

        // Committing runs to completion once entered.
        self.set_phase(SweepPhase::Committing);
        let deltas = advancing
            .iter()
            .map(|(work, chosen, _)| (work.node.id.clone(), write_back(chosen.outcome)))
            .collect();
        let summary = self.state.commit(deltas, cycle);
        *personas = staged_personas;
        self.record_assets(cycle, &advancing);

        for (work, chosen, assets) in advancing {
            report.advanced.push(AdvancedNode {
                node: work.node.id.clone(),
                bundle: chosen.bundle.id.clone(),
                outcome: chosen.outcome.id.clone(),
                score: chosen.selection.score,
                assets: assets.ids(),
                clamped: summary.clamped.get(&work.node.id).cloned().unwrap_or_default(),
            });
        }

        tracing::info!(
            sweep = %report.id,
            cycle,
            advanced = report.advanced.len(),
            skipped = report.skipped.len(),
            swaps = report.persona_swaps.len(),
            "sweep finished"
        );
        Ok(report)
    }

    fn set_phase(&self, phase: SweepPhase) {
        *self.phase.lock() = phase;
        tracing::debug!(phase = %phase, "sweep phase");
    }

    fn check_cancel(&self, cancel: &CancelToken) -> Result<(), SweepError> {
        if cancel.is_cancelled() {
            tracing::info!(phase = %self.phase(), "sweep cancelled");
            return Err(SweepError::Cancelled);
        }
        Ok(())
    }

    fn map_nodes<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.config.parallel {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }

    fn gather(&self, personas: &PersonaContext, world_flags: &BTreeMap<String, bool>) -> Vec<NodeWork<'_>> {
        if let Some(flag) = self
            .config
            .required_world_flags
            .iter()
            .find(|flag| !world_flags.get(*flag).copied().unwrap_or(false))
        {
            tracing::debug!(flag = %flag, "world gate closed, nothing gathered");
            return Vec::new();
        }

        self.graph
            .nodes()
            .filter(|node| node.drives_outcomes() && self.registry.is_orchestrated(node))
            .map(|node| NodeWork {
                node,
                state: self
                    .state
                    .peek(&node.id)
                    .unwrap_or_else(|| RuntimeState::new(node.id.clone(), self.state.schema())),
                persona: personas.resolve_for(&node.id, node.region.as_deref()),
            })
            .collect()
    }

    fn score_node(
        &self,
        work: &NodeWork<'_>,
        cycle: u64,
        world_flags: &BTreeMap<String, bool>,
    ) -> Result<Vec<ScoredBundle<'_>>, SkipReason> {
        let mut scored = Vec::with_capacity(work.node.bundles.len());
        for bundle_id in &work.node.bundles {
            let bundle = self
                .selector
                .bundle(bundle_id)
                .ok_or_else(|| SkipReason::UnknownBundle(bundle_id.clone()))?;
            let resolved = self.resolve_inputs(work, bundle, cycle, world_flags)?;
            let inputs = ScoringInputs {
                node: work.node,
                cycle,
                state: &work.state,
                world_flags,
                persona: &work.persona,
                resolved: &resolved,
                adjusters: &self.adjusters,
            };
            let candidates = evaluate_bundle(bundle, &inputs);
            tracing::trace!(node = %work.node.id, bundle = %bundle.id, inputs = resolved.len(), "scored bundle");
            scored.push(ScoredBundle { bundle, candidates });
        }
        Ok(scored)
    }

    /// Resolve every input of a bundle for one node. An edge input with no tagged
    /// edge is simply absent.
    fn resolve_inputs(
        &self,
        work: &NodeWork<'_>,
        bundle: &OutcomeBundle,
        cycle: u64,
        world_flags: &BTreeMap<String, bool>,
    ) -> Result<BTreeMap<String, ResolvedValue>, SkipReason> {
        let mut context = ResolveContext::new(&work.node.id, cycle)
            .with_persona(&work.persona)
            .with_state(&work.state)
            .with_world_flags(world_flags);
        if let Some(scale) = self.config.default_scale.as_deref() {
            context = context.with_default_scale(scale);
        }

        let mut resolved = BTreeMap::new();
        for input in &bundle.inputs {
            let tag = match &input.source {
                InputSource::Tag { tag } => Some(tag),
                InputSource::Edge { relation } => self
                    .graph
                    .edges_from_by_relation(&work.node.id, relation)
                    .into_iter()
                    .find_map(|edge| edge.qualitative.as_ref()),
            };
            let Some(tag) = tag else {
                tracing::trace!(node = %work.node.id, input = %input.name, "input has no tagged source");
                continue;
            };
            resolved.insert(input.name.clone(), self.resolver.resolve(tag, &context)?);
        }
        Ok(resolved)
    }

    /// First bundle, in authored order, that yields a selection.
    fn select_for<'a>(
        &'a self,
        work: &NodeWork<'_>,
        cycle: u64,
        bundles: Vec<ScoredBundle<'a>>,
    ) -> Result<Chosen<'a>, SkipReason> {
        let mut first_failure = None;
        for scored in bundles {
            let key = format!("select:{}", scored.bundle.id);
            let seed = derive_seed(self.resolver.seed(), work.node.id.as_str(), &key, cycle);
            match self.selector.select(&scored.bundle.id, &scored.candidates, seed) {
                Ok(selection) => {
                    if let Some(outcome) = scored.bundle.outcomes.get(selection.index) {
                        return Ok(Chosen {
                            bundle: scored.bundle,
                            outcome,
                            selection,
                        });
                    }
                }
                Err(err) => {
                    first_failure.get_or_insert(SkipReason::from(err));
                }
            }
        }
        Err(first_failure.unwrap_or_else(|| SkipReason::NoEligibleOutcome {
            bundle: work.node.bundles.first().cloned().unwrap_or_default(),
        }))
    }

    /// Asset ids each node bound within the recency window before `cycle`.
    fn recent_assets(&self, cycle: u64) -> BTreeMap<NodeId, Vec<String>> {
        let window = self.config.recent_asset_window as u64;
        self.recent_assets
            .lock()
            .iter()
            .map(|(node, uses)| {
                let ids = uses
                    .iter()
                    .filter(|(used, _)| cycle.saturating_sub(*used) <= window)
                    .map(|(_, id)| id.clone())
                    .collect();
                (node.clone(), ids)
            })
            .collect()
    }

    fn record_assets(&self, cycle: u64, advancing: &[(&NodeWork<'_>, Chosen<'_>, AssetChoice)]) {
        let window = self.config.recent_asset_window as u64;
        let mut history = self.recent_assets.lock();
        for (work, _, assets) in advancing {
            let uses = history.entry(work.node.id.clone()).or_default();
            uses.extend(assets.ids().into_iter().map(|id| (cycle, id)));
        }
        for uses in history.values_mut() {
            uses.retain(|(used, _)| cycle.saturating_sub(*used) < window);
        }
        history.retain(|_, uses| !uses.is_empty());
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph.id())
            .field("bundles", &self.selector.len())
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish()
    }
}

/// The delta committed for a chosen outcome.
fn write_back(outcome: &Outcome) -> StateDelta {
    let mut delta = outcome.effects.clone().increment(outcome.counter(), 1);
    if let Some(cycles) = outcome.cooldown.filter(|cycles| *cycles > 0) {
        delta = delta.set_timer(outcome.cooldown_timer(), cycles);
    }
    delta
}

fn skip(report: &mut SweepReport, node: &NodeId, reason: SkipReason) {
    tracing::debug!(node = %node, reason = %reason, "node skipped");
    report.skipped.push(SkippedNode {
        node: node.clone(),
        reason,
    });
}
