use std::collections::{HashSet, VecDeque};

use crate::ir::Point;
use crate::topology::Cluster;

use super::{LayoutContext, LayoutState};

/// Re-spaces the targets of every fan-out with a learned branching pattern.
/// Hubs are handled shallowest first; a fan touching a pinned or already
/// spread node is left alone. Returns the number of fans spread.
pub(super) fn spread_branches(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    cluster: &Cluster,
    spread: &mut HashSet<String>,
) -> usize {
    let mut hubs: Vec<&String> = cluster
        .members
        .iter()
        .filter(|id| ctx.graph.outgoing(id).len() >= 2)
        .collect();
    hubs.sort_by_key(|id| (ctx.topology.depth_of(id), ctx.graph.order_of(id)));

    let mut applied = 0;
    for hub in hubs {
        let (Some(node), Some(at)) = (ctx.graph.node(hub), state.positions.get(hub).copied()) else {
            continue;
        };
        let targets = ctx.graph.outgoing(hub);
        let Some(pattern) = ctx.store.branching_spacing_for(&node.name, targets.len()) else {
            continue;
        };
        if targets
            .iter()
            .any(|t| t == hub || state.pinned.contains(t) || spread.contains(t))
        {
            continue;
        }

        let mut ordered: Vec<&String> = targets.iter().collect();
        sort_by_y(ctx, state, &mut ordered);
        let offsets = pattern.value.shape.spoke_offsets(ordered.len(), pattern.value.spacing);
        for (target, dy) in ordered.into_iter().zip(offsets) {
            if let Some(point) = state.positions.get_mut(target) {
                point.y = at.y + dy;
            }
            spread.insert(target.clone());
        }
        tracing::debug!(
            hub = %hub,
            fan_out = targets.len(),
            spacing = pattern.value.spacing,
            shape = ?pattern.value.shape,
            "branch spread"
        );
        applied += 1;
    }
    applied
}

/// Re-spaces the sources of every fan-in with a learned merging pattern.
/// Each source moves together with the upstream nodes that feed only it.
pub(super) fn spread_merges(
    ctx: &LayoutContext<'_>,
    state: &mut LayoutState,
    cluster: &Cluster,
    spread: &mut HashSet<String>,
) -> usize {
    let members: HashSet<&str> = cluster.members.iter().map(String::as_str).collect();
    let mut joins: Vec<&String> = cluster
        .members
        .iter()
        .filter(|id| ctx.graph.incoming(id).len() >= 2)
        .collect();
    joins.sort_by_key(|id| (std::cmp::Reverse(ctx.topology.depth_of(id)), ctx.graph.order_of(id)));

    let mut applied = 0;
    for join in joins {
        let (Some(node), Some(at)) = (ctx.graph.node(join), state.positions.get(join).copied()) else {
            continue;
        };
        let sources = ctx.graph.incoming(join);
        let Some(pattern) = ctx.store.merging_spacing_for(&node.name, sources.len()) else {
            continue;
        };
        if sources
            .iter()
            .any(|s| s == join || state.pinned.contains(s) || spread.contains(s))
        {
            continue;
        }

        let mut ordered: Vec<&String> = sources.iter().collect();
        sort_by_y(ctx, state, &mut ordered);
        let offsets = pattern.value.shape.spoke_offsets(ordered.len(), pattern.value.spacing);
        for (source, dy) in ordered.into_iter().zip(offsets) {
            let Some(current) = state.positions.get(source).copied() else {
                continue;
            };
            let delta = at.y + dy - current.y;
            for id in exclusive_upstream(ctx, state, &members, source) {
                if let Some(point) = state.positions.get_mut(&id) {
                    *point = Point::new(point.x, point.y + delta);
                }
                spread.insert(id);
            }
        }
        tracing::debug!(
            join = %join,
            fan_in = sources.len(),
            spacing = pattern.value.spacing,
            "merge spread"
        );
        applied += 1;
    }
    applied
}

fn sort_by_y(ctx: &LayoutContext<'_>, state: &LayoutState, ids: &mut [&String]) {
    ids.sort_by(|a, b| {
        let ya = state.positions.get(*a).map_or(0.0, |p| p.y);
        let yb = state.positions.get(*b).map_or(0.0, |p| p.y);
        ya.total_cmp(&yb)
            .then_with(|| ctx.graph.order_of(a).cmp(&ctx.graph.order_of(b)))
    });
}

/// `start` plus every unpinned ancestor whose outputs all stay inside the
/// returned set.
fn exclusive_upstream(
    ctx: &LayoutContext<'_>,
    state: &LayoutState,
    members: &HashSet<&str>,
    start: &str,
) -> Vec<String> {
    let mut owned: HashSet<&str> = HashSet::from([start]);
    let mut order = vec![start.to_string()];
    let mut queue: VecDeque<&str> = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for parent in ctx.graph.incoming(current) {
            let parent = parent.as_str();
            if owned.contains(parent) || !members.contains(parent) || state.pinned.contains(parent) {
                continue;
            }
            if ctx.graph.outgoing(parent).iter().all(|t| owned.contains(t.as_str())) {
                owned.insert(parent);
                order.push(parent.to_string());
                queue.push_back(parent);
            }
        }
    }
    order
}
