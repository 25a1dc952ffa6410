//! Connected clusters and longest-path depths.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::graph::{CanvasGraph, Node};

/// A maximal weakly connected set of nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Members in declaration order.
    pub members: Vec<String>,
    pub max_depth: usize,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub depth: HashMap<String, usize>,
    /// Largest cluster first, ties by earliest declared member.
    pub clusters: Vec<Cluster>,
    pub cluster_of: HashMap<String, usize>,
    /// Nodes chosen to break cycles that had no discoverable source.
    pub pseudo_sources: Vec<String>,
}

impl Topology {
    /// Computes clusters and depths. `estimate` supplies a learned level for
    /// nodes that have no wiring to derive one from.
    pub fn compute(graph: &CanvasGraph, estimate: &dyn Fn(&Node) -> Option<usize>) -> Self {
        let mut topology = Topology::default();
        for members in find_clusters(graph) {
            let result = cluster_depths(graph, &members, estimate);
            let max_depth = members
                .iter()
                .filter_map(|id| result.depth.get(id))
                .copied()
                .max()
                .unwrap_or(0);
            let index = topology.clusters.len();
            for id in &members {
                topology.cluster_of.insert(id.clone(), index);
            }
            topology.depth.extend(result.depth);
            topology.pseudo_sources.extend(result.pseudo_sources);
            topology.clusters.push(Cluster { members, max_depth });
        }
        topology
    }

    pub fn depth_of(&self, id: &str) -> usize {
        self.depth.get(id).copied().unwrap_or(0)
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Weakly connected components, largest first.
pub fn find_clusters(graph: &CanvasGraph) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = graph
        .node_order
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.as_str(), idx))
        .collect();
    let mut sets = DisjointSet::new(graph.node_order.len());
    for wire in &graph.wires {
        if let (Some(&a), Some(&b)) = (index.get(wire.source.as_str()), index.get(wire.target.as_str())) {
            sets.union(a, b);
        }
    }

    let mut by_root: HashMap<usize, Vec<String>> = HashMap::new();
    let mut roots: Vec<usize> = Vec::new();
    for (idx, id) in graph.node_order.iter().enumerate() {
        let root = sets.find(idx);
        let members = by_root.entry(root).or_insert_with(|| {
            roots.push(root);
            Vec::new()
        });
        members.push(id.clone());
    }

    let mut clusters: Vec<Vec<String>> = roots
        .into_iter()
        .filter_map(|root| by_root.remove(&root))
        .collect();
    // Roots were recorded in first-member order, so a stable sort keeps that
    // as the tie-break.
    clusters.sort_by_key(|members| Reverse(members.len()));
    clusters
}

#[derive(Debug, Default)]
pub struct DepthResult {
    pub depth: HashMap<String, usize>,
    pub pseudo_sources: Vec<String>,
}

/// Longest-path depth from any source within one cluster. Cycles are broken
/// by promoting the remaining node with the lowest accumulated depth.
pub fn cluster_depths(
    graph: &CanvasGraph,
    members: &[String],
    estimate: &dyn Fn(&Node) -> Option<usize>,
) -> DepthResult {
    let set: HashSet<&str> = members.iter().map(String::as_str).collect();
    let mut indeg: HashMap<&str, usize> = HashMap::new();
    for id in members {
        let count = graph
            .incoming(id)
            .iter()
            .filter(|pred| set.contains(pred.as_str()))
            .count();
        indeg.insert(id.as_str(), count);
    }

    let mut result = DepthResult::default();
    let mut processed: HashSet<&str> = HashSet::new();
    let mut ready: BinaryHeap<Reverse<(usize, &str)>> = BinaryHeap::new();
    for id in members {
        if indeg.get(id.as_str()).copied().unwrap_or(0) == 0 {
            let depth = if graph.is_isolated(id) {
                graph.node(id).and_then(|node| estimate(node)).unwrap_or(0)
            } else {
                0
            };
            result.depth.insert(id.clone(), depth);
            ready.push(Reverse((graph.order_of(id), id.as_str())));
        }
    }

    loop {
        while let Some(Reverse((_order, id))) = ready.pop() {
            if !processed.insert(id) {
                continue;
            }
            let depth = result.depth.get(id).copied().unwrap_or(0);
            for next in graph.outgoing(id) {
                if !set.contains(next.as_str()) || processed.contains(next.as_str()) {
                    continue;
                }
                let entry = result.depth.entry(next.clone()).or_insert(0);
                *entry = (*entry).max(depth + 1);
                if let Some(deg) = indeg.get_mut(next.as_str()) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push(Reverse((graph.order_of(next), next.as_str())));
                    }
                }
            }
        }

        if processed.len() >= members.len() {
            break;
        }

        // Cycle: promote the earliest declared node already fed by a processed
        // node, treating its remaining incoming wires as back-edges.
        let mut best: Option<(bool, usize, &str)> = None;
        for id in members {
            if processed.contains(id.as_str()) {
                continue;
            }
            let unreached = !graph
                .incoming(id)
                .iter()
                .any(|pred| processed.contains(pred.as_str()));
            let key = (unreached, graph.order_of(id));
            if best.is_none_or(|(u, order, _)| key < (u, order)) {
                best = Some((key.0, key.1, id.as_str()));
            }
        }
        let Some((unreached, order, id)) = best else {
            break;
        };
        let depth = result.depth.get(id).copied().unwrap_or(0);
        let depth = if unreached {
            tracing::warn!(node = id, "cluster has no source; promoting pseudo-source");
            graph.node(id).and_then(|node| estimate(node)).unwrap_or(depth)
        } else {
            depth
        };
        result.pseudo_sources.push(id.to_string());
        result.depth.insert(id.to_string(), depth);
        ready.push(Reverse((order, id)));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ir::{CanvasNode, CanvasSnapshot, CanvasWire};

    fn graph(ids: &[&str], wires: &[(&str, &str)]) -> CanvasGraph {
        let nodes = ids
            .iter()
            .map(|id| CanvasNode::new(id, "Addition", 0.0, 0.0))
            .collect();
        let wires = wires.iter().map(|(s, t)| CanvasWire::new(s, t)).collect();
        CanvasGraph::build(&CanvasSnapshot::new(nodes, wires), &EngineConfig::default())
    }

    fn no_estimate(_: &Node) -> Option<usize> {
        None
    }

    #[test]
    fn depth_is_longest_path() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("a", "c"), ("c", "d")],
        );
        let topology = Topology::compute(&g, &no_estimate);
        assert_eq!(topology.depth_of("a"), 0);
        assert_eq!(topology.depth_of("b"), 1);
        assert_eq!(topology.depth_of("c"), 2);
        assert_eq!(topology.depth_of("d"), 3);
        for wire in &g.wires {
            assert!(topology.depth_of(&wire.target) > topology.depth_of(&wire.source));
        }
    }

    #[test]
    fn clusters_partition_nodes_largest_first() {
        let g = graph(
            &["x", "a", "b", "c", "y"],
            &[("a", "b"), ("c", "b"), ("x", "y")],
        );
        let topology = Topology::compute(&g, &no_estimate);
        assert_eq!(topology.clusters.len(), 2);
        assert_eq!(topology.clusters[0].members, vec!["a", "b", "c"]);
        assert_eq!(topology.clusters[1].members, vec!["x", "y"]);
        let total: usize = topology.clusters.iter().map(Cluster::len).sum();
        assert_eq!(total, g.len());
        for wire in &g.wires {
            assert_eq!(topology.cluster_of[&wire.source], topology.cluster_of[&wire.target]);
        }
    }

    #[test]
    fn cycles_are_broken_with_pseudo_source() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let topology = Topology::compute(&g, &no_estimate);
        assert_eq!(topology.pseudo_sources, vec!["a".to_string()]);
        assert_eq!(topology.depth_of("a"), 0);
        assert_eq!(topology.depth_of("b"), 1);
        assert_eq!(topology.depth_of("c"), 2);
    }

    #[test]
    fn cycle_fed_by_a_source_keeps_forward_depths() {
        let g = graph(
            &["s", "a", "b"],
            &[("s", "a"), ("a", "b"), ("b", "a")],
        );
        let topology = Topology::compute(&g, &no_estimate);
        assert_eq!(topology.depth_of("s"), 0);
        assert_eq!(topology.depth_of("a"), 1);
        assert_eq!(topology.depth_of("b"), 2);
    }

    #[test]
    fn isolated_nodes_use_estimate() {
        let g = graph(&["a", "b", "lonely"], &[("a", "b")]);
        let estimate = |node: &Node| (node.id == "lonely").then_some(3);
        let topology = Topology::compute(&g, &estimate);
        assert_eq!(topology.depth_of("lonely"), 3);
        assert_eq!(topology.clusters[1].max_depth, 3);
        assert_eq!(topology.depth_of("a"), 0);
    }
}
