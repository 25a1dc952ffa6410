use canvas_layout_learner::layout::SpacingBasis;
use canvas_layout_learner::{
    CanvasNode, CanvasSnapshot, CanvasWire, EngineConfig, EngineError, LayoutRequest, PatternStore, Point,
    compute_layout,
};

const TOLERANCE: f64 = 1.0;

fn assert_near(actual: f64, expected: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= TOLERANCE,
        "{what}: expected {expected}, got {actual}"
    );
}

fn position(report: &canvas_layout_learner::LayoutReport, id: &str) -> Point {
    *report.positions.get(id).expect("node missing from layout")
}

#[test]
fn unlearned_chain_lays_out_as_a_straight_row() {
    let snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 500.0, 500.0),
            CanvasNode::new("b", "Beta", 10.0, 900.0),
            CanvasNode::new("c", "Gamma", 40.0, 20.0),
        ],
        vec![CanvasWire::new("a", "b"), CanvasWire::new("b", "c")],
    );
    let store = PatternStore::default();
    let config = EngineConfig::default();
    let request = LayoutRequest::at(Point::new(100.0, 200.0));

    let report = compute_layout(&snapshot, &store, &config, &request).expect("layout failed");

    assert_eq!(position(&report, "a"), Point::new(100.0, 200.0));
    assert_eq!(position(&report, "b"), Point::new(250.0, 200.0));
    assert_eq!(position(&report, "c"), Point::new(400.0, 200.0));
    assert_eq!(report.stats.clusters, 1);
    assert_eq!(report.stats.levels_used, 3);
    assert_eq!(report.stats.templates_matched, 0);
    assert_eq!(report.stats.fallback_nodes, 0);
    assert!(report.column_gaps.iter().all(|gap| gap.basis == SpacingBasis::Default));
    assert_eq!(report.moves.len(), 3);
    assert_eq!(report.moves[0].id, "a");
}

#[test]
fn learned_fan_out_is_spread_around_its_source() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    let observed = CanvasSnapshot::new(
        vec![
            CanvasNode::new("s", "Series", 0.0, 80.0),
            CanvasNode::new("t1", "Sine", 150.0, 0.0),
            CanvasNode::new("t2", "Cosine", 150.0, 80.0),
            CanvasNode::new("t3", "Tangent", 150.0, 160.0),
        ],
        vec![
            CanvasWire::new("s", "t1"),
            CanvasWire::new("s", "t2"),
            CanvasWire::new("s", "t3"),
        ],
    );
    store.learn(&observed, &config).expect("learn failed");
    let fan = store.branching_spacing_for("Series", 3).expect("fan not learned");
    assert_eq!(fan.value.spacing, 80.0);

    let fresh = CanvasSnapshot::new(
        vec![
            CanvasNode::new("hub", "Series", 900.0, 40.0),
            CanvasNode::new("x", "Sine", 12.0, 700.0),
            CanvasNode::new("y", "Cosine", 300.0, 10.0),
            CanvasNode::new("z", "Tangent", 50.0, 350.0),
        ],
        vec![
            CanvasWire::new("hub", "x"),
            CanvasWire::new("hub", "y"),
            CanvasWire::new("hub", "z"),
        ],
    );
    let report = compute_layout(&fresh, &store, &config, &LayoutRequest::at(Point::new(0.0, 0.0)))
        .expect("layout failed");

    let hub = position(&report, "hub");
    let mut offsets: Vec<f64> = ["x", "y", "z"]
        .iter()
        .map(|id| position(&report, id).y - hub.y)
        .collect();
    offsets.sort_by(f64::total_cmp);
    assert_near(offsets[0], -80.0, "upper spoke");
    assert_near(offsets[1], 0.0, "middle spoke");
    assert_near(offsets[2], 80.0, "lower spoke");
    assert_eq!(report.stats.crossings_after, 0);
}

#[test]
fn repeated_pair_offset_is_reproduced() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    let mut nodes = Vec::new();
    let mut wires = Vec::new();
    for idx in 0..5 {
        let y = idx as f64 * 300.0;
        let foo = format!("foo{idx}");
        let bar = format!("bar{idx}");
        nodes.push(CanvasNode::new(&foo, "Foo", 0.0, y));
        nodes.push(CanvasNode::new(&bar, "Bar", 120.0, y));
        wires.push(CanvasWire::new(&foo, &bar));
    }
    store
        .learn(&CanvasSnapshot::new(nodes, wires), &config)
        .expect("learn failed");
    let learned = store.offset_for("Foo", "Bar").expect("pair not learned");
    assert_eq!(learned.samples, 5);
    assert!(learned.confidence > config.layout.learned_confidence_threshold);

    let fresh = CanvasSnapshot::new(
        vec![
            CanvasNode::new("f", "Foo", 0.0, 0.0),
            CanvasNode::new("b", "Bar", 400.0, 90.0),
        ],
        vec![CanvasWire::new("f", "b")],
    );
    let anchor = Point::new(1000.0, 500.0);
    let report = compute_layout(&fresh, &store, &config, &LayoutRequest::at(anchor)).expect("layout failed");

    assert_eq!(position(&report, "f"), anchor);
    let bar = position(&report, "b");
    assert_near(bar.x, anchor.x + 120.0, "bar x");
    assert_near(bar.y, anchor.y, "bar y");
    let gap = report.column_gaps.first().expect("missing column gap");
    assert_eq!(gap.basis, SpacingBasis::Pairwise);
    assert!(gap.confidence > config.layout.learned_confidence_threshold);
}

#[test]
fn learned_chain_spacing_beats_pairwise_mean() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    // Beta -> Gamma is also seen 400 apart outside the chain.
    let observed = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 0.0, 0.0),
            CanvasNode::new("b", "Beta", 100.0, 0.0),
            CanvasNode::new("c", "Gamma", 300.0, 0.0),
            CanvasNode::new("b2", "Beta", 0.0, 400.0),
            CanvasNode::new("c2", "Gamma", 400.0, 400.0),
        ],
        vec![
            CanvasWire::new("a", "b"),
            CanvasWire::new("b", "c"),
            CanvasWire::new("b2", "c2"),
        ],
    );
    for _ in 0..3 {
        store.learn(&observed, &config).expect("learn failed");
    }
    let pairwise = store.offset_for("Beta", "Gamma").expect("pair not learned");
    assert!(pairwise.value.dx > 250.0);

    let fresh = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 0.0, 0.0),
            CanvasNode::new("b", "Beta", 0.0, 0.0),
            CanvasNode::new("c", "Gamma", 0.0, 0.0),
        ],
        vec![CanvasWire::new("a", "b"), CanvasWire::new("b", "c")],
    );
    let report = compute_layout(&fresh, &store, &config, &LayoutRequest::at(Point::new(0.0, 0.0)))
        .expect("layout failed");

    assert_near(position(&report, "b").x, 100.0, "beta x");
    assert_near(position(&report, "c").x, 300.0, "gamma x");
    assert!(report.column_gaps.iter().all(|gap| gap.basis == SpacingBasis::Sequence));
}

#[test]
fn stacked_inputs_of_one_kind_use_their_group_spacing() {
    let config = EngineConfig::default();
    let mut store = PatternStore::with_config(&config);
    let sliders = CanvasSnapshot::new(
        vec![
            CanvasNode::new("s1", "Number Slider", 0.0, 0.0),
            CanvasNode::new("s2", "Number Slider", 0.0, 100.0),
            CanvasNode::new("s3", "Number Slider", 0.0, 200.0),
        ],
        Vec::new(),
    );
    store.learn(&sliders, &config).expect("learn failed");
    let group = store.input_group_spacing("Number Slider").expect("group not learned");
    assert_eq!(group.value, 100.0);

    let fresh = CanvasSnapshot::new(
        vec![
            CanvasNode::new("hub", "Series", 0.0, 0.0),
            CanvasNode::new("s1", "Number Slider", 0.0, 0.0),
            CanvasNode::new("s2", "Number Slider", 0.0, 0.0),
            CanvasNode::new("s3", "Number Slider", 0.0, 0.0),
        ],
        vec![
            CanvasWire::new("hub", "s1"),
            CanvasWire::new("hub", "s2"),
            CanvasWire::new("hub", "s3"),
        ],
    );
    let report = compute_layout(&fresh, &store, &config, &LayoutRequest::at(Point::new(0.0, 0.0)))
        .expect("layout failed");
    let s1 = position(&report, "s1").y;
    let s2 = position(&report, "s2").y;
    let s3 = position(&report, "s3").y;
    assert_near(s2 - s1, 100.0, "first step");
    assert_near(s3 - s2, 100.0, "second step");

    // Without the group the row gap applies.
    let cold = compute_layout(&fresh, &PatternStore::default(), &config, &LayoutRequest::at(Point::new(0.0, 0.0)))
        .expect("layout failed");
    let step = position(&cold, "s2").y - position(&cold, "s1").y;
    assert_near(step, config.layout.default_node_height + config.layout.row_gap, "row gap step");
}

#[test]
fn separate_clusters_stack_downward() {
    let snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 0.0, 0.0),
            CanvasNode::new("b", "Beta", 0.0, 0.0),
            CanvasNode::new("c", "Gamma", 0.0, 0.0),
            CanvasNode::new("d", "Delta", 0.0, 0.0),
        ],
        vec![CanvasWire::new("a", "b"), CanvasWire::new("c", "d")],
    );
    let config = EngineConfig::default();
    let report = compute_layout(&snapshot, &PatternStore::default(), &config, &LayoutRequest::default())
        .expect("layout failed");

    assert_eq!(report.stats.clusters, 2);
    let first = position(&report, "a");
    let second = position(&report, "c");
    assert_eq!(first, Point::new(0.0, 0.0));
    // Bottom of the first cluster plus the default cluster gap.
    assert_eq!(second.y, first.y + config.layout.default_node_height + config.layout.cluster_gap);
    assert_eq!(second.x, first.x);
}

#[test]
fn containers_and_dangling_wires_are_tolerated() {
    let snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("g", "Group", 0.0, 0.0),
            CanvasNode::new("a", "Alpha", 0.0, 0.0),
            CanvasNode::new("b", "Beta", 0.0, 0.0),
        ],
        vec![CanvasWire::new("a", "b"), CanvasWire::new("a", "ghost")],
    );
    let report = compute_layout(
        &snapshot,
        &PatternStore::default(),
        &EngineConfig::default(),
        &LayoutRequest::default(),
    )
    .expect("layout failed");

    assert_eq!(report.stats.dropped_edges, 1);
    assert!(!report.positions.contains_key("g"));
    assert_eq!(report.positions.len(), 2);
}

#[test]
fn cycles_still_place_every_node() {
    let snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 0.0, 0.0),
            CanvasNode::new("b", "Beta", 0.0, 0.0),
            CanvasNode::new("c", "Gamma", 0.0, 0.0),
        ],
        vec![
            CanvasWire::new("a", "b"),
            CanvasWire::new("b", "c"),
            CanvasWire::new("c", "a"),
        ],
    );
    let report = compute_layout(
        &snapshot,
        &PatternStore::default(),
        &EngineConfig::default(),
        &LayoutRequest::at(Point::new(0.0, 0.0)),
    )
    .expect("layout failed");

    assert_eq!(report.positions.len(), 3);
    assert_eq!(position(&report, "a").x, 0.0);
    assert_eq!(position(&report, "b").x, 150.0);
    assert_eq!(position(&report, "c").x, 300.0);
    assert!(report.positions.values().all(|p| p.y.is_finite()));
}

#[test]
fn degenerate_inputs_are_reported_not_laid_out() {
    let store = PatternStore::default();
    let config = EngineConfig::default();
    let request = LayoutRequest::default();

    let empty = CanvasSnapshot::default();
    assert_eq!(compute_layout(&empty, &store, &config, &request), Err(EngineError::NoNodes));

    let single = CanvasSnapshot::new(vec![CanvasNode::new("a", "Alpha", 0.0, 0.0)], Vec::new());
    assert_eq!(
        compute_layout(&single, &store, &config, &request),
        Err(EngineError::InsufficientData { nodes: 1 })
    );
}

#[test]
fn applying_a_report_updates_the_snapshot() {
    let mut snapshot = CanvasSnapshot::new(
        vec![
            CanvasNode::new("a", "Alpha", 3.0, 7.0),
            CanvasNode::new("b", "Beta", 3.0, 7.0),
        ],
        vec![CanvasWire::new("a", "b")],
    );
    let report = compute_layout(
        &snapshot,
        &PatternStore::default(),
        &EngineConfig::default(),
        &LayoutRequest::default().dry_run(),
    )
    .expect("layout failed");
    assert!(report.dry_run);

    assert_eq!(report.apply_to(&mut snapshot), 1);
    assert_eq!((snapshot.nodes[0].x, snapshot.nodes[0].y), (3.0, 7.0));
    assert_eq!((snapshot.nodes[1].x, snapshot.nodes[1].y), (153.0, 7.0));
}
