use std::collections::{BTreeMap, HashMap};

use crate::config::EngineConfig;
use crate::graph::CanvasGraph;
use crate::ir::ConnectionKind;
use crate::predict::{OffsetQuery, PredictionSource, predict_offset};
use crate::store::{Learned, PatternStore};
use crate::topology::Cluster;

use super::LayoutContext;
use super::types::{ColumnGap, SpacingBasis};

/// Spacing evidence for one wire between adjacent levels.
struct EdgeEstimate {
    dx: f64,
    confidence: f64,
    basis: SpacingBasis,
}

/// X coordinate of every level in `cluster`, level 0 at `origin_x`, plus the
/// gap chosen for each level transition.
pub(super) fn column_positions(
    ctx: &LayoutContext<'_>,
    cluster_idx: usize,
    cluster: &Cluster,
    origin_x: f64,
) -> (Vec<f64>, Vec<ColumnGap>) {
    let mut columns = Vec::with_capacity(cluster.max_depth + 1);
    let mut gaps = Vec::with_capacity(cluster.max_depth);
    columns.push(origin_x);
    for level in 0..cluster.max_depth {
        let gap = level_gap(ctx, cluster_idx, cluster, level);
        tracing::debug!(
            cluster = cluster_idx,
            from = level,
            gap = gap.gap,
            basis = ?gap.basis,
            "column gap"
        );
        columns.push(columns[level] + gap.gap);
        gaps.push(gap);
    }
    (columns, gaps)
}

fn level_gap(ctx: &LayoutContext<'_>, cluster_idx: usize, cluster: &Cluster, level: usize) -> ColumnGap {
    let layout = &ctx.config.layout;
    let make = |gap: f64, basis: SpacingBasis, confidence: f64| ColumnGap {
        cluster: cluster_idx,
        from_level: level,
        to_level: level + 1,
        gap: gap.max(layout.min_column_gap),
        basis,
        confidence,
    };

    let crossing: Vec<(&str, &str)> = cluster
        .members
        .iter()
        .filter(|id| ctx.topology.depth_of(id) == level)
        .flat_map(|id| {
            ctx.graph
                .outgoing(id)
                .iter()
                .filter(|target| ctx.topology.depth_of(target) == level + 1)
                .map(move |target| (id.as_str(), target.as_str()))
        })
        .collect();

    let estimates: Vec<EdgeEstimate> = crossing
        .iter()
        .filter_map(|(source, target)| edge_estimate(ctx, source, target))
        .collect();
    if !estimates.is_empty() {
        let weight: f64 = estimates.iter().map(|e| e.confidence).sum();
        let dx = estimates.iter().map(|e| e.dx * e.confidence).sum::<f64>() / weight;
        let basis = estimates
            .iter()
            .map(|e| e.basis)
            .min()
            .unwrap_or(SpacingBasis::NearestNeighbour);
        return make(dx, basis, weight / estimates.len() as f64);
    }

    if let Some(learned) = ctx.store.level_transition_spacing(level, level + 1) {
        return make(learned.value, SpacingBasis::LevelTransition, learned.confidence);
    }

    // Mean learned dx over the connection kinds present, weighted by samples.
    let mut kinds: BTreeMap<ConnectionKind, usize> = BTreeMap::new();
    for (source, target) in &crossing {
        let kind = ConnectionKind::between(ctx.category_of(source), ctx.category_of(target));
        *kinds.entry(kind).or_default() += 1;
    }
    let learned: Vec<(f64, f64, usize)> = kinds
        .iter()
        .filter_map(|(kind, count)| {
            ctx.store
                .connection_spacing_for(*kind)
                .map(|l| (l.value.dx, l.confidence, *count))
        })
        .collect();
    if !learned.is_empty() {
        let total: usize = learned.iter().map(|(_, _, count)| count).sum();
        let dx = learned.iter().map(|(dx, _, count)| dx * *count as f64).sum::<f64>() / total as f64;
        let confidence = learned.iter().map(|(_, c, count)| c * *count as f64).sum::<f64>() / total as f64;
        return make(dx, SpacingBasis::ConnectionKind, confidence);
    }

    if let Some(global) = ctx.store.global_offset() {
        return make(global.value.dx, SpacingBasis::Global, global.confidence);
    }

    make(layout.default_spacing_x, SpacingBasis::Default, 0.0)
}

fn edge_estimate(ctx: &LayoutContext<'_>, source: &str, target: &str) -> Option<EdgeEstimate> {
    let layout = &ctx.config.layout;
    let source_node = ctx.graph.node(source)?;
    let target_node = ctx.graph.node(target)?;

    if let Some(learned) = ctx
        .sequence_gaps
        .get(&(source.to_string(), target.to_string()))
        .filter(|l| l.confidence >= layout.learned_confidence_threshold)
    {
        return Some(EdgeEstimate {
            dx: learned.value,
            confidence: learned.confidence,
            basis: SpacingBasis::Sequence,
        });
    }

    if let Some(learned) = ctx
        .store
        .offset_for(&source_node.name, &target_node.name)
        .filter(|l| l.confidence >= layout.learned_confidence_threshold)
    {
        return Some(EdgeEstimate {
            dx: learned.value.dx,
            confidence: learned.confidence,
            basis: SpacingBasis::Pairwise,
        });
    }

    let query = OffsetQuery {
        source_name: &source_node.name,
        target_name: &target_node.name,
        source_category: ctx.category_of(source),
        target_category: ctx.category_of(target),
        ports: ctx
            .graph
            .wires_from(source)
            .find(|wire| wire.target == target)
            .map(|wire| (wire.source_port, wire.target_port)),
    };
    predict_offset(ctx.store, &query, layout.knn_k)
        .filter(|p| p.source == PredictionSource::Neighbours)
        .filter(|p| p.confidence >= layout.knn_confidence_threshold)
        .map(|p| EdgeEstimate {
            dx: p.offset.dx,
            confidence: p.confidence,
            basis: SpacingBasis::NearestNeighbour,
        })
}

/// Learned X gap for every wire on a straight chain whose names match a
/// learned sequence, keyed by (source id, target id). The most confident
/// chain wins where chains overlap.
pub(super) fn sequence_gaps(
    graph: &CanvasGraph,
    store: &PatternStore,
    config: &EngineConfig,
) -> HashMap<(String, String), Learned<f64>> {
    let mut gaps: HashMap<(String, String), Learned<f64>> = HashMap::new();
    let min_len = config.learn.min_chain_length.max(2);
    for start in graph.iter() {
        if graph.outgoing(&start.id).len() != 1 {
            continue;
        }
        let chain = graph.chain_from(&start.id, config.learn.max_chain_length);
        if chain.len() < min_len {
            continue;
        }
        let names: Vec<&str> = chain
            .iter()
            .filter_map(|id| graph.node(id).map(|node| node.name.as_str()))
            .collect();
        if names.len() != chain.len() {
            continue;
        }
        let Some(learned) = store.sequence_spacing(&names) else {
            continue;
        };
        for (link, dx) in chain.windows(2).zip(learned.value) {
            let key = (link[0].to_string(), link[1].to_string());
            let candidate = Learned {
                value: *dx,
                confidence: learned.confidence,
                samples: learned.samples,
            };
            if gaps.get(&key).is_none_or(|known| known.confidence < candidate.confidence) {
                gaps.insert(key, candidate);
            }
        }
    }
    gaps
}
