use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use canvas_layout_learner::config::StoreLimits;
use canvas_layout_learner::store::STORE_VERSION;
use canvas_layout_learner::{CanvasNode, CanvasSnapshot, CanvasWire, EngineConfig, PatternStore, StoreError};

struct TempFile(PathBuf);

impl TempFile {
    fn new(name: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!("cll-{}-{nanos}-{name}.json", std::process::id()));
        TempFile(path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Two clusters covering every pattern family: a fan-out, a fan-in, shared
/// columns for vertical order and enough nodes for templates.
fn rich_snapshot() -> CanvasSnapshot {
    let mut snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("n", "Number Slider", 0.0, 80.0),
            CanvasNode::new("add", "Addition", 150.0, 0.0),
            CanvasNode::new("sub", "Subtraction", 150.0, 160.0),
            CanvasNode::new("mul", "Multiplication", 300.0, 80.0),
            CanvasNode::new("panel", "Panel", 450.0, 80.0),
            CanvasNode::new("pt", "Construct Point", 0.0, 500.0),
            CanvasNode::new("circle", "Circle", 160.0, 500.0),
        ],
        vec![
            CanvasWire::new("n", "add"),
            CanvasWire::new("n", "sub"),
            CanvasWire::new("add", "mul"),
            CanvasWire::new("sub", "mul").with_ports(0, 1),
            CanvasWire::new("mul", "panel"),
            CanvasWire::new("pt", "circle"),
        ],
    );
    snapshot.label = Some("rich".to_string());
    snapshot
}

#[test]
fn corrupt_store_file_yields_a_fresh_store() {
    let file = TempFile::new("corrupt");
    std::fs::write(&file.0, "{ this is not json").expect("write failed");

    let mut store = PatternStore::load_or_default(&file.0, StoreLimits::default());
    assert!(store.is_empty());
    assert_eq!(store.summary().total_sessions, 0);

    let config = EngineConfig::default();
    store.learn(&rich_snapshot(), &config).expect("learn failed");
    store.save(&file.0).expect("save failed");
    let reloaded = PatternStore::load(&file.0, StoreLimits::default()).expect("reload failed");
    assert_eq!(reloaded.summary().total_sessions, 1);
}

#[test]
fn unversioned_or_foreign_store_is_ignored() {
    let file = TempFile::new("unversioned");
    std::fs::write(&file.0, r#"{ "metadata": { "totalSessions": 4 } }"#).expect("write failed");
    assert!(matches!(
        PatternStore::load(&file.0, StoreLimits::default()),
        Err(StoreError::IncompatibleVersion { found: None, .. })
    ));
    assert!(PatternStore::load_or_default(&file.0, StoreLimits::default()).is_empty());

    let future = format!(r#"{{ "version": {} }}"#, STORE_VERSION + 1);
    std::fs::write(&file.0, future).expect("write failed");
    assert!(PatternStore::load_or_default(&file.0, StoreLimits::default()).is_empty());
}

#[test]
fn missing_store_file_yields_a_fresh_store() {
    let file = TempFile::new("missing");
    assert!(PatternStore::load_or_default(&file.0, StoreLimits::default()).is_empty());
}

#[test]
fn save_load_save_is_byte_identical() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    for _ in 0..3 {
        store.learn(&rich_snapshot(), &config).expect("learn failed");
    }
    let summary = store.summary();
    assert!(summary.offset_patterns > 0);
    assert!(summary.connection_kinds > 0);
    assert!(summary.branching_patterns > 0);
    assert!(summary.merging_patterns > 0);
    assert!(summary.level_transitions > 0);
    assert!(summary.y_order_pairs > 0);
    assert!(summary.templates > 0);
    assert!(store.cluster_gap().is_some());

    let first = TempFile::new("first");
    let second = TempFile::new("second");
    store.save(&first.0).expect("save failed");
    let loaded = PatternStore::load(&first.0, config.limits.clone()).expect("load failed");
    loaded.save(&second.0).expect("second save failed");

    let a = std::fs::read(&first.0).expect("read failed");
    let b = std::fs::read(&second.0).expect("read failed");
    assert_eq!(a, b);
    assert_eq!(loaded.summary(), summary);
    assert_eq!(
        loaded.offset_for("Addition", "Multiplication"),
        store.offset_for("Addition", "Multiplication")
    );
    assert_eq!(
        loaded.branching_spacing_for("Number Slider", 2),
        store.branching_spacing_for("Number Slider", 2)
    );
}

#[test]
fn retention_never_exceeds_configured_caps() {
    let mut config = EngineConfig::default();
    config.limits = StoreLimits {
        pair_window: 3,
        connection_window: 3,
        global_window: 4,
        level_window: 3,
        branch_window: 2,
        max_raw_samples: 5,
        max_templates: 4,
        max_offset_patterns: 3,
        max_y_order_pairs: 2,
        max_sessions: 2,
        ..StoreLimits::default()
    };
    let mut store = PatternStore::with_config(&config);
    for _ in 0..6 {
        store.learn(&rich_snapshot(), &config).expect("learn failed");
    }

    let summary = store.summary();
    assert!(summary.offset_patterns <= 3);
    assert!(summary.branching_patterns <= 3);
    assert!(summary.merging_patterns <= 3);
    assert!(summary.level_names <= 3);
    assert!(summary.level_transitions <= 3);
    assert!(summary.y_order_pairs <= 2);
    assert!(summary.templates <= 4);
    assert!(summary.raw_samples <= 5);
    assert!(summary.recent_sessions.len() <= 2);
    assert_eq!(summary.total_sessions, 6);
    // Counts keep growing while the sample window stays bounded.
    if let Some(offset) = store.offset_for("Addition", "Multiplication") {
        assert_eq!(offset.samples, 6);
    }
    let document = store.to_document();
    assert!(!document.offsets.is_empty());
    for entry in &document.offsets {
        assert!(entry.window.samples().len() <= 3, "{} -> {}", entry.source, entry.target);
    }
    assert!(store.raw_samples().len() <= 5);
}

#[test]
fn parallel_wires_on_different_ports_are_both_sampled() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    let snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Addition", 0.0, 0.0),
            CanvasNode::new("m", "Multiplication", 150.0, 20.0),
        ],
        vec![CanvasWire::new("a", "m"), CanvasWire::new("a", "m").with_ports(0, 1)],
    );
    store.learn(&snapshot, &config).expect("learn failed");

    let ports: Vec<(usize, usize)> = store
        .raw_samples()
        .iter()
        .map(|sample| (sample.source_port, sample.target_port))
        .collect();
    assert_eq!(ports, vec![(0, 0), (0, 1)]);
    // The node pair itself is one observation.
    let offset = store.offset_for("Addition", "Multiplication").expect("pair not learned");
    assert_eq!(offset.samples, 1);
}

#[test]
fn empty_windows_in_a_loaded_store_are_not_reported() {
    let json = format!(
        r#"{{
            "version": {STORE_VERSION},
            "metadata": {{ "created_at": 1, "updated_at": 1, "total_sessions": 1, "total_nodes_learned": 2 }},
            "offsets": [
                {{
                    "source": "A",
                    "target": "B",
                    "window": {{ "samples": [], "mean": {{ "dx": 999.0, "dy": 0.0 }}, "observations": 0 }}
                }}
            ]
        }}"#
    );
    let store = PatternStore::from_json(&json, StoreLimits::default()).expect("load failed");
    assert!(store.offset_for("A", "B").is_none());
    assert_eq!(store.summary().offset_patterns, 0);
}
