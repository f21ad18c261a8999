use std::collections::BTreeMap;

use story_engine::{
    evaluate_bundle, load_config, AdjusterRegistry, CancelToken, EngineConfig, EngineParts,
    FnAdjuster, InMemoryCatalog, Orchestrator, PersonaManager, QualitativeResolver,
    ResolveContext, ResolvedValue, Scope, ScoringInputs, SkipReason, TimeSlice, ValueRange,
};
use world_graph::{
    GraphStore, NodeId, NodeTypeRegistry, RuntimeState, StatBounds, StateStore,
    TagRef,
};

const CONFIG: &str = r#"
seed = 2024

[orchestrator]
recent_asset_window = 2

[stats.trust]
lo = 0
hi = 100
default = 20

[[scaling_rules]]
name = "date_night"
scale = "core.rapport"
when = { kind = "world_flag", flag = "date_night" }
effect = { op = "add", amount = 10 }

[[personas]]
id = "steady"
sliders = { mystery_level = 0.0 }

[[personas]]
id = "guarded"
sliders = { mystery_level = 0.0 }

[personas.tag_overrides."core.rapport".warming_up]
range = [32, 32]
jitter = 0

[[personas]]
id = "smitten"
sliders = { mystery_level = 0.0 }
mood_tags = ["candlelight"]

[personas.tag_overrides."core.rapport".warming_up]
range = [48, 48]
jitter = 0

[[activations]]
scope = { kind = "global" }
persona = "steady"

[[bundles]]
id = "evening"
inputs = [{ name = "rapport", from = "tag", tag = "core.rapport:warming up" }]

[[bundles.outcomes]]
id = "a"
base_weight = 2.0
preconditions = [{ kind = "resolved", input = "rapport", at_least = 55.0 }]
effects = { stats = [{ op = "add", stat = "trust", amount = 10 }], flags = { kissed = true } }
cooldown = 3
asset = { tags = ["restaurant"] }

[[bundles.outcomes]]
id = "b"
base_weight = 1.0
effects = { stats = [{ op = "add", stat = "trust", amount = 2 }] }
"#;

const GRAPH: &str = r#"{
    "id": "harbor_town",
    "nodes": [
        {"id": "mia", "category": "person", "region": "harbor", "bundles": ["evening"]},
        {"id": "harbor_bar", "category": "location", "region": "harbor"},
        {"id": "clips", "category": "asset_pool"}
    ],
    "edges": [
        {"source": "mia", "target": "harbor_bar", "relation": "frequents", "qualitative": "core.trust:wary"}
    ]
}"#;

const CATALOG: &str = r#"[
    {"id": "bright_bistro", "tags": ["restaurant"], "time_slice": {"start": 11, "end": 15}},
    {"id": "candlelit_table", "tags": ["restaurant", "candlelight"], "time_slice": {"start": 18, "end": 1}},
    {"id": "diner_booth", "tags": ["restaurant"]}
]"#;

fn orchestrator() -> (Orchestrator, PersonaManager) {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let graph = GraphStore::from_json_str(GRAPH, &NodeTypeRegistry::new()).unwrap();
    let parts = EngineParts::from_config(&config, graph, NodeTypeRegistry::new()).unwrap();
    let personas = config.persona_manager().unwrap();
    (Orchestrator::new(parts).unwrap(), personas)
}

fn resolved(value: f64) -> ResolvedValue {
    ResolvedValue {
        scale: "core.rapport".into(),
        descriptor: "warming_up".into(),
        value,
        bounds: StatBounds::new(0.0, 100.0),
        base: ValueRange::new(30.0, 50.0),
        effective: ValueRange::new(40.0, 60.0),
        jitter: value - 50.0,
        factors: vec!["date_night".into()],
        persona_override: false,
    }
}

#[test]
fn scenario_warming_up_lands_in_shifted_range() {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let resolver: QualitativeResolver = config.resolver().unwrap();
    let personas = config.persona_manager().unwrap();
    let persona = personas.active_persona(&Scope::Global);

    let node = NodeId::new("mia");
    let state = RuntimeState::new(node.clone(), &config.stats);
    assert_eq!(state.stat("trust"), Some(20.0));

    let mut flags = BTreeMap::new();
    flags.insert("date_night".to_string(), true);
    let context = ResolveContext::new(&node, 1)
        .with_persona(&persona)
        .with_state(&state)
        .with_world_flags(&flags);

    let value = resolver
        .resolve(&TagRef::parse("core.rapport:warming up").unwrap(), &context)
        .unwrap();
    assert_eq!(value.base, ValueRange::new(30.0, 50.0));
    assert_eq!(value.effective, ValueRange::new(40.0, 60.0));
    assert!((40.0..=60.0).contains(&value.value));
}

#[test]
fn scenario_literal_values_pick_each_branch() {
    let config = EngineConfig::from_toml_str(CONFIG).unwrap();
    let selector = config.selector();
    let bundle = selector.bundle("evening").unwrap();
    let personas = config.persona_manager().unwrap();
    let persona = personas.active_persona(&Scope::Global);
    let adjusters = AdjusterRegistry::new();

    let node = world_graph::Node::new("mia", world_graph::NodeCategory::Person);
    let state = RuntimeState::new(node.id.clone(), &config.stats);
    let flags = BTreeMap::new();

    for (value, expected) in [(42.0, "b"), (58.0, "a")] {
        let mut inputs = BTreeMap::new();
        inputs.insert("rapport".to_string(), resolved(value));
        let scoring = ScoringInputs {
            node: &node,
            cycle: 1,
            state: &state,
            world_flags: &flags,
            persona: &persona,
            resolved: &inputs,
            adjusters: &adjusters,
        };
        let candidates = evaluate_bundle(bundle, &scoring);
        let selection = selector.select("evening", &candidates, 0).unwrap();
        assert_eq!(selection.outcome, expected, "resolved {}", value);
    }
}

#[test]
fn scenario_sweep_follows_resolved_value() {
    let (orchestrator, mut personas) = orchestrator();
    let catalog = InMemoryCatalog::from_json_str(CATALOG).unwrap();
    let mia = NodeId::new("mia");
    orchestrator.state().set_world_flag("date_night", true);

    // [32, 32] + 10 = 42: below the threshold.
    personas
        .set_persona(Scope::Region("harbor".into()), "guarded", BTreeMap::new())
        .unwrap();
    let report = orchestrator.sweep(&mut personas, &catalog, &CancelToken::new()).unwrap();
    let advanced = report.advanced_node(&mia).unwrap();
    assert_eq!(advanced.outcome, "b");
    assert!(advanced.assets.is_empty());
    assert_eq!(orchestrator.state().get(&mia).stat("trust"), Some(22.0));

    // [48, 48] + 10 = 58: above it.
    personas
        .set_persona(Scope::Node(mia.clone()), "smitten", BTreeMap::new())
        .unwrap();
    orchestrator.set_time_window(Some(TimeSlice::new(20.0, 23.0)));
    let report = orchestrator.sweep(&mut personas, &catalog, &CancelToken::new()).unwrap();
    let advanced = report.advanced_node(&mia).unwrap();
    assert_eq!(advanced.outcome, "a");
    assert_eq!(advanced.assets, vec!["candlelit_table".to_string()]);

    let state = orchestrator.state().get(&mia);
    assert_eq!(state.stat("trust"), Some(32.0));
    assert!(state.flag("kissed"));
    assert_eq!(state.timer("cooldown:a"), 3);
    assert_eq!(state.counter("outcome:a"), 1);
    assert_eq!(state.counter("outcome:b"), 1);

    // Cooldown holds "a" back even though the value still clears the threshold.
    let report = orchestrator.sweep(&mut personas, &catalog, &CancelToken::new()).unwrap();
    assert_eq!(report.advanced_node(&mia).unwrap().outcome, "b");
}

#[test]
fn scenario_adjuster_can_tip_the_balance() {
    let source = CONFIG.replace(
        "id = \"b\"\nbase_weight = 1.0",
        "id = \"b\"\nbase_weight = 1.0\nadjusters = [\"homebody\"]",
    );
    let config = EngineConfig::from_toml_str(&source).unwrap();
    let graph = GraphStore::from_json_str(GRAPH, &NodeTypeRegistry::new()).unwrap();

    let mut adjusters = AdjusterRegistry::new();
    adjusters.register(std::sync::Arc::new(FnAdjuster::new("homebody", |_ctx| 5.0)));
    let parts = EngineParts::from_config(&config, graph, NodeTypeRegistry::new())
        .unwrap()
        .with_adjusters(adjusters);
    let orchestrator = Orchestrator::new(parts).unwrap();
    let mut personas = config.persona_manager().unwrap();
    personas
        .set_persona(Scope::Global, "smitten", BTreeMap::new())
        .unwrap();
    orchestrator.state().set_world_flag("date_night", true);

    let report = orchestrator
        .sweep(&mut personas, &InMemoryCatalog::from_json_str(CATALOG).unwrap(), &CancelToken::new())
        .unwrap();
    assert_eq!(report.advanced_node(&NodeId::new("mia")).unwrap().outcome, "b");
}

#[test]
fn scenario_missing_asset_skips_node() {
    let (orchestrator, mut personas) = orchestrator();
    personas
        .set_persona(Scope::Global, "smitten", BTreeMap::new())
        .unwrap();
    orchestrator.state().set_world_flag("date_night", true);

    let catalog = InMemoryCatalog::default();
    let report = orchestrator.sweep(&mut personas, &catalog, &CancelToken::new()).unwrap();
    assert!(matches!(
        report.skip_reason(&NodeId::new("mia")),
        Some(SkipReason::NoMatchingAsset { .. })
    ));
    assert_eq!(orchestrator.state().get(&NodeId::new("mia")).stat("trust"), Some(20.0));
}

#[test]
fn scenario_snapshot_round_trip() {
    let (orchestrator, mut personas) = orchestrator();
    let catalog = InMemoryCatalog::from_json_str(CATALOG).unwrap();
    personas
        .set_persona(Scope::Global, "smitten", BTreeMap::new())
        .unwrap();
    orchestrator.state().set_world_flag("date_night", true);
    orchestrator.sweep(&mut personas, &catalog, &CancelToken::new()).unwrap();

    let json = orchestrator.state().to_json().unwrap();
    let restored = StateStore::new(orchestrator.state().schema().clone());
    restored.from_json(&json).unwrap();

    assert_eq!(restored.snapshot(), orchestrator.state().snapshot());
    let mia = restored.get(&NodeId::new("mia"));
    assert_eq!(mia.timer("cooldown:a"), 3);
    assert!(mia.flag("kissed"));
    assert_eq!(restored.cycle(), 1);
}

#[test]
fn scenario_config_file_loads() {
    let path = std::env::temp_dir().join(format!("story_engine_{}.toml", std::process::id()));
    std::fs::write(&path, CONFIG).unwrap();
    let config = load_config(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.seed, 2024);
    assert_eq!(config.orchestrator.recent_asset_window, 2);
    assert_eq!(config.personas.len(), 3);
    assert!(config.stats.is_declared("trust"));
}
