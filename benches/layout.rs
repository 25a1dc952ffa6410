use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use canvas_layout_learner::config::EngineConfig;
use canvas_layout_learner::crossing::{PortWire, count_for_positions};
use canvas_layout_learner::ir::{CanvasNode, CanvasSnapshot, CanvasWire, Point};
use canvas_layout_learner::layout::{LayoutRequest, compute_layout};
use canvas_layout_learner::store::PatternStore;
use std::collections::HashMap;
use std::hint::black_box;

const NAMES: [&str; 8] = [
    "Number Slider",
    "Addition",
    "Multiplication",
    "Series",
    "Sine",
    "Construct Point",
    "Circle",
    "Panel",
];

/// A dense layered canvas: a chain through every node plus `extra_wires`
/// skip connections, spread over `nodes / 6` columns.
fn dense_canvas(nodes: usize, extra_wires: usize) -> CanvasSnapshot {
    let mut snapshot = CanvasSnapshot::default();
    for i in 0..nodes {
        let id = format!("n{i}");
        let x = (i / 6) as f64 * 160.0;
        let y = (i % 6) as f64 * 90.0 + (i * 37 % 23) as f64;
        snapshot
            .nodes
            .push(CanvasNode::new(&id, NAMES[i % NAMES.len()], x, y));
    }
    for i in 0..nodes.saturating_sub(1) {
        snapshot
            .wires
            .push(CanvasWire::new(&format!("n{i}"), &format!("n{}", i + 1)));
    }
    let mut count = 0usize;
    for i in 0..nodes {
        for j in (i + 2)..nodes {
            if count >= extra_wires {
                break;
            }
            if (i + j) % 5 == 0 {
                snapshot
                    .wires
                    .push(CanvasWire::new(&format!("n{i}"), &format!("n{j}")).with_ports(0, j % 3));
                count += 1;
            }
        }
        if count >= extra_wires {
            break;
        }
    }
    snapshot
}

fn trained_store(config: &EngineConfig) -> PatternStore {
    let mut store = PatternStore::with_config(config);
    for size in [12, 24, 48] {
        // Benchmark setup; the canvases always have enough nodes.
        let _ = store.learn(&dense_canvas(size, size / 2), config);
    }
    store
}

fn bench_learn(c: &mut Criterion) {
    let mut group = c.benchmark_group("learn");
    let config = EngineConfig::default();
    for (nodes, extra) in [(12, 6), (48, 24), (120, 60)] {
        let snapshot = dense_canvas(nodes, extra);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &snapshot, |b, data| {
            b.iter(|| {
                let mut store = PatternStore::with_config(&config);
                let summary = store.learn(black_box(data), &config).expect("learn failed");
                black_box(summary.patterns_updated());
            });
        });
    }
    group.finish();
}

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");
    let config = EngineConfig::default();
    let cold = PatternStore::with_config(&config);
    let warm = trained_store(&config);
    let request = LayoutRequest::at(Point::new(0.0, 0.0));
    for (nodes, extra) in [(12, 6), (48, 24), (120, 60)] {
        let snapshot = dense_canvas(nodes, extra);
        for (label, store) in [("cold", &cold), ("warm", &warm)] {
            let id = BenchmarkId::new(label, nodes);
            group.bench_with_input(id, &snapshot, |b, data| {
                b.iter(|| {
                    let report = compute_layout(black_box(data), store, &config, &request).expect("layout failed");
                    black_box(report.moves.len());
                });
            });
        }
    }
    group.finish();
}

fn bench_crossings(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossings");
    for nodes in [48, 120, 240] {
        let snapshot = dense_canvas(nodes, nodes);
        let positions: HashMap<String, Point> = snapshot
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Point::new(n.x, n.y)))
            .collect();
        let wires: Vec<PortWire> = snapshot
            .wires
            .iter()
            .map(|w| PortWire {
                source: w.source.clone(),
                target: w.target.clone(),
                source_offset: 25.0,
                target_offset: 25.0,
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &wires, |b, data| {
            b.iter(|| black_box(count_for_positions(&positions, black_box(data))));
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets = bench_learn, bench_layout, bench_crossings
);
criterion_main!(benches);
