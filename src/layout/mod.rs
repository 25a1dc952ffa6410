mod columns;
mod overlap;
mod placement;
mod spread;
pub(crate) mod types;
pub use types::*;
use columns::*;
use overlap::*;
use placement::*;
use spread::*;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::classify;
use crate::config::EngineConfig;
use crate::crossing::{CrossingProblem, PortOrderKey, PortWire, count_for_positions, minimize_crossings};
use crate::error::EngineError;
use crate::graph::{CanvasGraph, Node};
use crate::ir::{CanvasSnapshot, NodeCategory, Point};
use crate::store::{Learned, PatternStore, TemplateMatch, VerticalOrder};
use crate::topology::{Cluster, Topology};

/// Read-only inputs shared by every stage.
pub(crate) struct LayoutContext<'a> {
    pub graph: &'a CanvasGraph,
    pub store: &'a PatternStore,
    pub config: &'a EngineConfig,
    pub categories: HashMap<String, NodeCategory>,
    pub topology: Topology,
    /// Learned X gap per (source id, target id) along matched chains.
    pub sequence_gaps: HashMap<(String, String), Learned<f64>>,
}

impl LayoutContext<'_> {
    /// Connectivity-aware category, falling back to the static one.
    pub fn category_of(&self, id: &str) -> NodeCategory {
        self.categories
            .get(id)
            .copied()
            .or_else(|| self.graph.node(id).map(|n| n.category))
            .unwrap_or(NodeCategory::Unknown)
    }
}

/// Positions assigned so far. Pinned nodes belong to an applied template
/// and are not moved by later stages.
#[derive(Debug, Default)]
pub(crate) struct LayoutState {
    pub positions: HashMap<String, Point>,
    pub pinned: HashSet<String>,
}

/// Vertical start and column X coordinates of the cluster being placed.
#[derive(Debug, Clone)]
pub(crate) struct ClusterFrame {
    pub top: f64,
    pub columns: Vec<f64>,
}

impl ClusterFrame {
    pub fn column_x(&self, level: usize) -> f64 {
        self.columns
            .get(level)
            .or(self.columns.last())
            .copied()
            .unwrap_or_default()
    }
}

struct StageTracker {
    stage: LayoutStage,
}

impl StageTracker {
    fn advance(&mut self, next: LayoutStage, cluster: Option<usize>) {
        tracing::debug!(from = ?self.stage, to = ?next, cluster, "layout stage");
        self.stage = next;
    }
}

/// Proposes new coordinates for every node in `snapshot`, consulting what
/// `store` has learned. The store is never modified.
pub fn compute_layout(
    snapshot: &CanvasSnapshot,
    store: &PatternStore,
    config: &EngineConfig,
    request: &LayoutRequest,
) -> Result<LayoutReport, EngineError> {
    if snapshot.nodes.is_empty() {
        return Err(EngineError::NoNodes);
    }
    let graph = CanvasGraph::build(snapshot, config);
    if graph.len() < 2 {
        return Err(EngineError::InsufficientData { nodes: graph.len() });
    }
    tracing::info!(
        nodes = graph.len(),
        wires = graph.wires.len(),
        dry_run = request.dry_run,
        "layout started"
    );
    let mut tracker = StageTracker {
        stage: LayoutStage::Built,
    };

    let categories = classify::dynamic_categories(&graph);
    tracker.advance(LayoutStage::Classified, None);

    let min_samples = config.layout.min_level_samples;
    let estimate = |node: &Node| -> Option<usize> {
        store
            .dominant_level_for_name(&node.name)
            .filter(|l| l.samples >= min_samples)
            .or_else(|| {
                let category = categories.get(&node.id).copied().unwrap_or(node.category);
                store
                    .dominant_level_for_category(category)
                    .filter(|l| l.samples >= min_samples)
            })
            .map(|l| l.value)
    };
    let topology = Topology::compute(&graph, &estimate);
    for pseudo in &topology.pseudo_sources {
        tracing::warn!(node = %pseudo, "cluster has no source; treating node as one");
    }
    tracker.advance(LayoutStage::Leveled, None);

    let ctx = LayoutContext {
        graph: &graph,
        store,
        config,
        categories,
        topology,
        sequence_gaps: sequence_gaps(&graph, store, config),
    };

    let anchor = request.anchor.unwrap_or_else(|| bounding_origin(&graph));
    let templates = store.matching_templates(&graph, config);
    let mut by_cluster: HashMap<usize, Vec<&TemplateMatch>> = HashMap::new();
    for found in &templates {
        if let Some(cluster) = found.members.first().and_then(|root| ctx.topology.cluster_of.get(root)) {
            by_cluster.entry(*cluster).or_default().push(found);
        }
    }

    let port_wires = port_wires(&graph, config.layout.port_spread_ratio);
    let original: HashMap<String, Point> = graph
        .iter()
        .map(|node| (node.id.clone(), node.position))
        .collect();

    let mut state = LayoutState::default();
    let mut stats = LayoutStats {
        clusters: ctx.topology.clusters.len(),
        dropped_edges: graph.dropped_wires,
        crossings_before: count_for_positions(&original, &port_wires),
        ..LayoutStats::default()
    };
    let mut column_gaps = Vec::new();
    let mut cursor = anchor.y;

    for (idx, cluster) in ctx.topology.clusters.iter().enumerate() {
        tracing::debug!(cluster = idx, members = cluster.len(), max_depth = cluster.max_depth, "placing cluster");
        let (columns, gaps) = column_positions(&ctx, idx, cluster, anchor.x);
        column_gaps.extend(gaps);
        let frame = ClusterFrame { top: cursor, columns };

        let cluster_templates = by_cluster.get(&idx).map(Vec::as_slice).unwrap_or(&[]);
        let template_bottom = place_templates(&ctx, &mut state, &frame, cluster_templates);
        stats.templates_matched += cluster_templates.len();
        tracker.advance(LayoutStage::TemplatesApplied, Some(idx));

        let dominance = dominance_scores(&ctx, cluster);
        let chain_top = template_bottom.map_or(frame.top, |bottom| bottom + config.layout.row_gap);
        place_chains(&ctx, &mut state, &frame, cluster, chain_top, &dominance);
        stats.fallback_nodes += stack_leftovers(&ctx, &mut state, &frame, cluster);
        tracker.advance(LayoutStage::ChainPlaced, Some(idx));

        let mut spread = HashSet::new();
        let branches = spread_branches(&ctx, &mut state, cluster, &mut spread);
        let merges = spread_merges(&ctx, &mut state, cluster, &mut spread);
        tracing::debug!(cluster = idx, branches, merges, "fans spread");
        tracker.advance(LayoutStage::BranchesSpread, Some(idx));

        minimize_cluster_crossings(&ctx, &mut state, cluster, &port_wires, &dominance);
        tracker.advance(LayoutStage::CrossingsMinimized, Some(idx));

        resolve_overlaps(&ctx, &mut state, cluster);
        tracker.advance(LayoutStage::OverlapResolved, Some(idx));

        let bottom = settle_cluster(&ctx, &mut state, cluster, frame.top);
        let gap = store
            .cluster_gap()
            .map_or(config.layout.cluster_gap, |learned| learned.value);
        cursor = bottom + gap;
    }

    stats.crossings_after = count_for_positions(&state.positions, &port_wires);
    stats.levels_used = ctx
        .topology
        .clusters
        .iter()
        .map(|c| c.max_depth + 1)
        .max()
        .unwrap_or(0);

    let threshold = config.layout.move_threshold;
    let mut moves = Vec::new();
    let mut positions = BTreeMap::new();
    for node in graph.iter() {
        let new = state.positions.get(&node.id).copied().unwrap_or(node.position);
        let old = node.position;
        if (new.x - old.x).abs() > threshold || (new.y - old.y).abs() > threshold {
            moves.push(NodeMove {
                id: node.id.clone(),
                old_x: old.x,
                old_y: old.y,
                new_x: new.x,
                new_y: new.y,
            });
        }
        positions.insert(node.id.clone(), new);
    }
    tracker.advance(LayoutStage::Done, None);
    tracing::info!(
        clusters = stats.clusters,
        templates = stats.templates_matched,
        moves = moves.len(),
        crossings_before = stats.crossings_before,
        crossings_after = stats.crossings_after,
        "layout finished"
    );

    Ok(LayoutReport {
        moves,
        positions,
        stats,
        column_gaps,
        dry_run: request.dry_run,
    })
}

fn bounding_origin(graph: &CanvasGraph) -> Point {
    let (x, y) = graph.iter().fold((f64::INFINITY, f64::INFINITY), |(x, y), node| {
        (x.min(node.position.x), y.min(node.position.y))
    });
    if x.is_finite() && y.is_finite() {
        Point::new(x, y)
    } else {
        Point::default()
    }
}

fn port_wires(graph: &CanvasGraph, ratio: f64) -> Vec<PortWire> {
    graph
        .wires
        .iter()
        .filter_map(|wire| {
            let source = graph.node(&wire.source)?;
            let target = graph.node(&wire.target)?;
            Some(PortWire {
                source: wire.source.clone(),
                target: wire.target.clone(),
                source_offset: output_port_offset(source, wire.source_port, ratio),
                target_offset: input_port_offset(target, wire.target_port, ratio),
            })
        })
        .collect()
}

/// Learned vertical preference of each node against the others on its
/// level: positive means it tends to sit above them. Category evidence
/// counts half.
fn dominance_scores(ctx: &LayoutContext<'_>, cluster: &Cluster) -> HashMap<String, f64> {
    let mut levels: BTreeMap<usize, Vec<&String>> = BTreeMap::new();
    for id in &cluster.members {
        levels.entry(ctx.topology.depth_of(id)).or_default().push(id);
    }

    let mut scores: HashMap<String, f64> = HashMap::new();
    for level in levels.values() {
        for (i, a) in level.iter().enumerate() {
            for b in &level[i + 1..] {
                let (Some(node_a), Some(node_b)) = (ctx.graph.node(a), ctx.graph.node(b)) else {
                    continue;
                };
                let preference = ctx
                    .store
                    .y_order_preference(&node_a.name, &node_b.name, &ctx.config.learn)
                    .map(|l| (l.value, l.confidence))
                    .or_else(|| {
                        ctx.store
                            .y_order_preference_by_category(ctx.category_of(a), ctx.category_of(b), &ctx.config.learn)
                            .map(|l| (l.value, l.confidence * 0.5))
                    });
                let Some((order, weight)) = preference else {
                    continue;
                };
                let signed = match order {
                    VerticalOrder::Above => weight,
                    VerticalOrder::Below => -weight,
                };
                *scores.entry((*a).clone()).or_default() += signed;
                *scores.entry((*b).clone()).or_default() -= signed;
            }
        }
    }
    scores
}

fn minimize_cluster_crossings(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    cluster: &Cluster,
    port_wires: &[PortWire],
    dominance: &HashMap<String, f64>,
) {
    let members: HashSet<&str> = cluster.members.iter().map(String::as_str).collect();
    let wires: Vec<PortWire> = port_wires
        .iter()
        .filter(|w| members.contains(w.source.as_str()) && members.contains(w.target.as_str()))
        .cloned()
        .collect();
    if wires.len() < 2 {
        return;
    }

    let mut levels: Vec<Vec<String>> = vec![Vec::new(); cluster.max_depth + 1];
    for id in &cluster.members {
        if state.pinned.contains(id) {
            continue;
        }
        let depth = ctx.topology.depth_of(id).min(cluster.max_depth);
        levels[depth].push(id.clone());
    }
    let positions: HashMap<String, Point> = cluster
        .members
        .iter()
        .filter_map(|id| state.positions.get(id).map(|p| (id.clone(), *p)))
        .collect();

    let port_order = port_order_keys(ctx, cluster);
    let problem = CrossingProblem {
        levels,
        wires: &wires,
        positions,
        preference: dominance,
        port_order: &port_order,
    };
    let outcome = minimize_crossings(&problem, &ctx.config.crossing);
    tracing::debug!(
        initial = outcome.initial,
        crossings = outcome.crossings,
        sweeps = outcome.sweeps,
        "crossings minimized"
    );
    state.positions.extend(outcome.positions);
}

/// Where each source of a multi-input node would sit if the sources followed
/// the port order learned for that node's name. A source feeding several
/// such nodes keys on the first one found.
fn port_order_keys(ctx: &LayoutContext<'_>, cluster: &Cluster) -> HashMap<String, PortOrderKey> {
    let ratio = ctx.config.layout.port_spread_ratio;
    let mut keys: HashMap<String, PortOrderKey> = HashMap::new();
    for id in &cluster.members {
        if ctx.graph.incoming(id).len() < 2 {
            continue;
        }
        let Some(target) = ctx.graph.node(id) else {
            continue;
        };
        let Some(order) = ctx.store.port_order_for(&target.name) else {
            continue;
        };
        for wire in ctx.graph.wires_into(id) {
            if keys.contains_key(&wire.source) {
                continue;
            }
            let Some(source) = ctx.graph.node(&wire.source) else {
                continue;
            };
            let Some(rank) = order.value.iter().position(|name| *name == source.name) else {
                continue;
            };
            let offset = input_port_offset(target, rank, ratio) - output_port_offset(source, wire.source_port, ratio);
            keys.insert(
                wire.source.clone(),
                PortOrderKey {
                    target: id.clone(),
                    offset,
                },
            );
        }
    }
    keys
}

/// Keeps the cluster from rising above `top` and returns its bottom edge.
fn settle_cluster(ctx: &LayoutContext<'_>, state: &mut LayoutState, cluster: &Cluster, top: f64) -> f64 {
    let min_y = cluster
        .members
        .iter()
        .filter_map(|id| state.positions.get(id))
        .map(|p| p.y)
        .fold(f64::INFINITY, f64::min);
    if min_y.is_finite() && min_y < top {
        let shift = top - min_y;
        for id in &cluster.members {
            if let Some(point) = state.positions.get_mut(id) {
                point.y += shift;
            }
        }
    }
    cluster
        .members
        .iter()
        .filter_map(|id| {
            let at = state.positions.get(id)?;
            Some(at.y + ctx.graph.node(id)?.height)
        })
        .fold(top, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CanvasNode, CanvasWire};

    fn learned(snapshots: &[&CanvasSnapshot], config: &EngineConfig) -> PatternStore {
        let mut store = PatternStore::with_config(config);
        for snapshot in snapshots {
            store.learn(snapshot, config).unwrap();
        }
        store
    }

    fn pair(source: &str, target: &str, dx: f64) -> CanvasSnapshot {
        CanvasSnapshot::new(
            vec![
                CanvasNode::new("s", source, 0.0, 0.0),
                CanvasNode::new("t", target, dx, 0.0),
            ],
            vec![CanvasWire::new("s", "t")],
        )
    }

    fn origin() -> LayoutRequest {
        LayoutRequest::at(Point::new(0.0, 0.0))
    }

    #[test]
    fn unrelated_names_fall_back_to_level_spacing() {
        let config = EngineConfig::default();
        let store = learned(&[&pair("Foo", "Bar", 200.0)], &config);
        let report = compute_layout(&pair("Qux", "Quux", 0.0), &store, &config, &origin()).unwrap();
        assert_eq!(report.column_gaps[0].basis, SpacingBasis::LevelTransition);
        assert_eq!(report.positions["t"].x, 200.0);
    }

    #[test]
    fn column_gap_never_drops_below_minimum() {
        let config = EngineConfig::default();
        let store = learned(&[&pair("Foo", "Bar", 10.0)], &config);
        let report = compute_layout(&pair("Qux", "Quux", 0.0), &store, &config, &origin()).unwrap();
        assert_eq!(report.column_gaps[0].gap, config.layout.min_column_gap);
    }

    #[test]
    fn nodes_in_narrow_adjacent_columns_do_not_overlap() {
        let config = EngineConfig::default();
        let store = learned(&[&pair("Foo", "Bar", 10.0)], &config);
        let report = compute_layout(&pair("Qux", "Quux", 0.0), &store, &config, &origin()).unwrap();
        let (s, t) = (report.positions["s"], report.positions["t"]);
        // The columns sit closer than one node width.
        assert!(t.x - s.x < config.layout.default_node_width);
        let apart = (t.y - s.y).abs();
        assert!(apart >= config.layout.default_node_height + config.layout.min_overlap_gap);
    }

    #[test]
    fn learned_vertical_order_decides_stacking() {
        let config = EngineConfig::default();
        let observed = CanvasSnapshot::new(
            vec![
                CanvasNode::new("s", "Source", 0.0, 50.0),
                CanvasNode::new("a", "Top", 150.0, 0.0),
                CanvasNode::new("b", "Bottom", 150.0, 100.0),
            ],
            vec![CanvasWire::new("s", "a"), CanvasWire::new("s", "b")],
        );
        let store = learned(&[&observed, &observed], &config);

        let fresh = CanvasSnapshot::new(
            vec![
                CanvasNode::new("s", "Source", 0.0, 0.0),
                CanvasNode::new("b", "Bottom", 0.0, 0.0),
                CanvasNode::new("a", "Top", 0.0, 0.0),
            ],
            vec![CanvasWire::new("s", "b"), CanvasWire::new("s", "a")],
        );
        let report = compute_layout(&fresh, &store, &config, &origin()).unwrap();
        assert!(report.positions["a"].y < report.positions["b"].y);
    }

    #[test]
    fn merge_sources_follow_learned_spacing() {
        let config = EngineConfig::default();
        let observed = CanvasSnapshot::new(
            vec![
                CanvasNode::new("a", "Alpha", 0.0, 0.0),
                CanvasNode::new("b", "Beta", 0.0, 160.0),
                CanvasNode::new("c", "Join", 150.0, 80.0),
            ],
            vec![CanvasWire::new("a", "c"), CanvasWire::new("b", "c")],
        );
        let store = learned(&[&observed], &config);

        let fresh = CanvasSnapshot::new(
            vec![
                CanvasNode::new("a", "Alpha", 0.0, 0.0),
                CanvasNode::new("b", "Beta", 0.0, 0.0),
                CanvasNode::new("c", "Join", 0.0, 0.0),
            ],
            vec![CanvasWire::new("a", "c"), CanvasWire::new("b", "c")],
        );
        let report = compute_layout(&fresh, &store, &config, &origin()).unwrap();
        let join = report.positions["c"].y;
        assert_eq!(report.positions["a"].y - join, -80.0);
        assert_eq!(report.positions["b"].y - join, 80.0);
        // Shifted back down so nothing sits above the anchor.
        assert_eq!(report.positions["a"].y, 0.0);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(LayoutStage::Built < LayoutStage::TemplatesApplied);
        assert!(LayoutStage::ChainPlaced < LayoutStage::BranchesSpread);
        assert!(LayoutStage::OverlapResolved < LayoutStage::Done);
    }
}
