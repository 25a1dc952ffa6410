use crate::topology::Cluster;

use super::{LayoutContext, LayoutState};

struct Extent<'a> {
    id: &'a str,
    left: f64,
    right: f64,
    height: f64,
}

/// Pushes nodes down until no two nodes whose X extents overlap come closer
/// than `min_overlap_gap` vertically. Nodes are settled top to bottom, so a
/// node only ever moves below nodes settled before it. Returns how many nodes
/// moved.
pub(super) fn resolve_overlaps(ctx: &LayoutContext<'_>, state: &mut LayoutState, cluster: &Cluster) -> usize {
    let layout = &ctx.config.layout;
    let gap = layout.min_overlap_gap;

    let mut pending: Vec<(f64, Extent<'_>)> = cluster
        .members
        .iter()
        .filter_map(|id| {
            let at = state.positions.get(id)?;
            let (width, height) = ctx.graph.node(id).map_or(
                (layout.default_node_width, layout.default_node_height),
                |n| (n.width, n.height),
            );
            Some((
                at.y,
                Extent {
                    id: id.as_str(),
                    left: at.x,
                    right: at.x + width,
                    height,
                },
            ))
        })
        .collect();
    pending.sort_by(|(ya, a), (yb, b)| {
        ya.total_cmp(yb)
            .then_with(|| ctx.graph.order_of(a.id).cmp(&ctx.graph.order_of(b.id)))
    });

    let mut settled: Vec<(f64, Extent<'_>)> = Vec::with_capacity(pending.len());
    let mut moved = 0;
    for (start, extent) in pending {
        let mut y = start;
        // Each push strictly lowers `y` past a settled node, so this ends.
        while let Some(bottom) = settled
            .iter()
            .filter(|(top, other)| {
                other.left < extent.right
                    && extent.left < other.right
                    && y < top + other.height + gap
                    && *top < y + extent.height + gap
            })
            .map(|(top, other)| top + other.height + gap)
            .max_by(f64::total_cmp)
        {
            y = bottom;
        }
        if y != start {
            if let Some(at) = state.positions.get_mut(extent.id) {
                at.y = y;
            }
            moved += 1;
        }
        settled.push((y, extent));
    }
    if moved > 0 {
        tracing::debug!(moved, "overlaps resolved");
    }
    moved
}
