use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::Node;
use crate::ir::Point;
use crate::store::TemplateMatch;
use crate::topology::Cluster;

use super::{ClusterFrame, LayoutContext, LayoutState};

/// Y of input `port` relative to the node's top edge.
pub(super) fn input_port_offset(node: &Node, port: usize, spread_ratio: f64) -> f64 {
    port_offset(node.height, node.inputs, port, spread_ratio)
}

/// Y of output `port` relative to the node's top edge.
pub(super) fn output_port_offset(node: &Node, port: usize, spread_ratio: f64) -> f64 {
    port_offset(node.height, node.outputs, port, spread_ratio)
}

fn port_offset(height: f64, count: usize, port: usize, spread_ratio: f64) -> f64 {
    let center = height / 2.0;
    if count <= 1 {
        return center;
    }
    let spread = height * spread_ratio;
    let port = port.min(count - 1) as f64;
    center - spread / 2.0 + port * spread / (count - 1) as f64
}

/// Pins every member of the cluster's matched templates. Roots stack
/// downward from the frame cursor. Returns the bottom of the placed block.
pub(super) fn place_templates(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    frame: &ClusterFrame,
    templates: &[&TemplateMatch],
) -> Option<f64> {
    let row_gap = ctx.config.layout.row_gap;
    let mut cursor = frame.top;
    let mut bottom: Option<f64> = None;
    for found in templates {
        let Some(root) = found.members.first() else {
            continue;
        };
        let origin = Point::new(frame.column_x(ctx.topology.depth_of(root)), cursor);
        let mut block_bottom = cursor;
        for (member, offset) in found.members.iter().zip(&found.offsets) {
            let point = origin.offset_by(*offset);
            state.positions.insert(member.clone(), point);
            state.pinned.insert(member.clone());
            if let Some(node) = ctx.graph.node(member) {
                block_bottom = block_bottom.max(point.y + node.height);
            }
        }
        tracing::debug!(
            template = %found.key,
            members = found.members.len(),
            confidence = found.confidence,
            "template applied"
        );
        bottom = Some(bottom.map_or(block_bottom, |b: f64| b.max(block_bottom)));
        cursor = block_bottom + row_gap;
    }
    bottom
}

/// Places the unpinned nodes of `cluster`: sinks stack from `top`, and every
/// other node takes the mean Y of the input ports it feeds, walking the wires
/// backwards.
pub(super) fn place_chains(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    frame: &ClusterFrame,
    cluster: &Cluster,
    top: f64,
    dominance: &HashMap<String, f64>,
) {
    let layout = &ctx.config.layout;
    let members: HashSet<&str> = cluster.members.iter().map(String::as_str).collect();
    let movable: Vec<&str> = cluster
        .members
        .iter()
        .map(String::as_str)
        .filter(|id| !state.pinned.contains(*id))
        .collect();
    if movable.is_empty() {
        return;
    }

    let mut sinks: Vec<&str> = movable
        .iter()
        .copied()
        .filter(|id| ctx.graph.outgoing(id).is_empty())
        .collect();
    if sinks.is_empty() {
        // A closed cycle: anchor it on its deepest node.
        let pseudo = movable
            .iter()
            .copied()
            .max_by(|a, b| {
                ctx.topology
                    .depth_of(a)
                    .cmp(&ctx.topology.depth_of(b))
                    .then_with(|| ctx.graph.order_of(b).cmp(&ctx.graph.order_of(a)))
            });
        if let Some(pseudo) = pseudo {
            tracing::warn!(node = pseudo, "cluster has no sink; using deepest node");
            sinks.push(pseudo);
        }
    }
    sinks.sort_by(|a, b| {
        let score = |id: &str| dominance.get(id).copied().unwrap_or(0.0);
        ctx.topology
            .depth_of(b)
            .cmp(&ctx.topology.depth_of(a))
            .then_with(|| score(b).total_cmp(&score(a)))
            .then_with(|| ctx.graph.order_of(a).cmp(&ctx.graph.order_of(b)))
    });

    let mut placed: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut y = top;
    let mut upper: Option<&Node> = None;
    for &sink in &sinks {
        let Some(node) = ctx.graph.node(sink) else {
            continue;
        };
        if let Some(upper) = upper {
            y += stack_step(ctx, upper, node);
        }
        let x = frame.column_x(ctx.topology.depth_of(sink));
        state.positions.insert(sink.to_string(), Point::new(x, y));
        upper = Some(node);
        placed.insert(sink);
        queue.push_back(sink);
    }

    // Targets still unplaced for each movable node; pinned nodes count as placed.
    let mut pending: HashMap<&str, usize> = movable
        .iter()
        .map(|id| {
            let open = ctx
                .graph
                .outgoing(id)
                .iter()
                .filter(|t| members.contains(t.as_str()) && !state.pinned.contains(t.as_str()))
                .count();
            (*id, open)
        })
        .collect();

    // Nodes feeding only pinned nodes are ready from the start.
    let mut ready: Vec<&str> = movable
        .iter()
        .copied()
        .filter(|id| !placed.contains(id) && !ctx.graph.outgoing(id).is_empty() && pending[id] == 0)
        .collect();
    ready.sort_by_key(|id| ctx.graph.order_of(id));
    for id in ready {
        if place_from_targets(ctx, state, frame, id) {
            placed.insert(id);
            queue.push_back(id);
        }
    }

    loop {
        while let Some(done) = queue.pop_front() {
            for source in ctx.graph.incoming(done) {
                let source = source.as_str();
                if placed.contains(source) || state.pinned.contains(source) {
                    continue;
                }
                let Some(open) = pending.get_mut(source) else {
                    continue;
                };
                *open = open.saturating_sub(1);
                if *open == 0 && place_from_targets(ctx, state, frame, source) {
                    placed.insert(source);
                    queue.push_back(source);
                }
            }
        }

        // Inside a cycle no node ever sees all its targets placed. Resume
        // from the deepest one that feeds something already placed.
        let next = movable
            .iter()
            .copied()
            .filter(|id| !placed.contains(id))
            .filter(|id| {
                ctx.graph
                    .outgoing(id)
                    .iter()
                    .any(|t| state.positions.contains_key(t))
            })
            .min_by(|a, b| {
                ctx.topology
                    .depth_of(b)
                    .cmp(&ctx.topology.depth_of(a))
                    .then_with(|| ctx.graph.order_of(a).cmp(&ctx.graph.order_of(b)))
            });
        match next {
            Some(id) if place_from_targets(ctx, state, frame, id) => {
                placed.insert(id);
                queue.push_back(id);
            }
            _ => break,
        }
    }
}

/// Positions `id` level with the input ports it feeds. False when none of
/// its targets has a position yet.
fn place_from_targets(ctx: &LayoutContext<'_>, state: &mut LayoutState, frame: &ClusterFrame, id: &str) -> bool {
    let Some(node) = ctx.graph.node(id) else {
        return false;
    };
    let ratio = ctx.config.layout.port_spread_ratio;
    let mut sum = 0.0;
    let mut count = 0usize;
    for wire in ctx.graph.wires_from(id) {
        let (Some(target), Some(at)) = (ctx.graph.node(&wire.target), state.positions.get(&wire.target)) else {
            continue;
        };
        sum += at.y + input_port_offset(target, wire.target_port, ratio)
            - output_port_offset(node, wire.source_port, ratio);
        count += 1;
    }
    if count == 0 {
        return false;
    }
    let x = frame.column_x(ctx.topology.depth_of(id));
    state.positions.insert(id.to_string(), Point::new(x, sum / count as f64));
    true
}

/// Stacks whatever is still unplaced below the cluster, one per row in its
/// level's column. Returns how many nodes needed it.
pub(super) fn stack_leftovers(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    frame: &ClusterFrame,
    cluster: &Cluster,
) -> usize {
    let layout = &ctx.config.layout;
    let leftovers: Vec<&String> = cluster
        .members
        .iter()
        .filter(|id| !state.positions.contains_key(*id))
        .collect();
    if leftovers.is_empty() {
        return 0;
    }

    let mut y = cluster
        .members
        .iter()
        .filter_map(|id| {
            let at = state.positions.get(id)?;
            Some(at.y + ctx.graph.node(id)?.height + layout.row_gap)
        })
        .fold(frame.top, f64::max);
    let mut upper: Option<&Node> = None;
    for id in &leftovers {
        let node = ctx.graph.node(id);
        match (upper, node) {
            (Some(upper), Some(node)) => y += stack_step(ctx, upper, node),
            (Some(upper), None) => y += upper.height + layout.row_gap,
            (None, _) => {}
        }
        let x = frame.column_x(ctx.topology.depth_of(id));
        tracing::warn!(node = %id, "no placement strategy applied; stacking");
        state.positions.insert((*id).clone(), Point::new(x, y));
        upper = node;
    }
    leftovers.len()
}

/// Vertical step from `upper` to the node stacked right below it. Two nodes
/// of the same name use the learned input-group spacing, never closer than
/// the overlap gap; anything else gets the row gap.
fn stack_step(ctx: &LayoutContext<'_>, upper: &Node, next: &Node) -> f64 {
    let layout = &ctx.config.layout;
    let learned = (upper.name == next.name)
        .then(|| ctx.store.input_group_spacing(&upper.name))
        .flatten();
    match learned {
        Some(spacing) => {
            tracing::debug!(name = %upper.name, spacing = spacing.value, "input group spacing applied");
            spacing.value.max(upper.height + layout.min_overlap_gap)
        }
        None => upper.height + layout.row_gap,
    }
}
