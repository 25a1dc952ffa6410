use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;

use super::patterns::{
    CategoryStats, FanPattern, FanShape, InputGroupPattern, LearningSession, OffsetWindow,
    OrderCounter, PairSample, PortOrderPattern, RunningMean, ScalarWindow, SequencePattern,
    SubgraphTemplate,
};
use super::{PatternStore, now_unix, ordered_key};
use crate::config::{EngineConfig, LearnConfig};
use crate::error::EngineError;
use crate::graph::CanvasGraph;
use crate::ir::{CanvasSnapshot, ConnectionKind, NodeCategory, Offset};
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairConfidence {
    pub source: String,
    pub target: String,
    pub confidence: f64,
    pub samples: usize,
}

/// What one call to [`PatternStore::learn`] changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnSummary {
    pub session_id: u64,
    pub label: Option<String>,
    pub nodes: usize,
    pub wires: usize,
    pub dropped_wires: usize,
    pub offsets_updated: usize,
    pub connection_samples: Vec<(ConnectionKind, usize)>,
    pub branching_updated: usize,
    pub merging_updated: usize,
    pub levels_observed: usize,
    pub level_transitions_updated: usize,
    pub y_order_updates: usize,
    pub port_orders_updated: usize,
    pub input_groups_updated: usize,
    pub sequences_updated: usize,
    pub templates_created: usize,
    pub templates_updated: usize,
    pub raw_samples: usize,
    pub offset_confidence: Vec<PairConfidence>,
}

impl LearnSummary {
    pub fn patterns_updated(&self) -> usize {
        self.offsets_updated
            + self.branching_updated
            + self.merging_updated
            + self.level_transitions_updated
            + self.port_orders_updated
            + self.input_groups_updated
            + self.sequences_updated
            + self.templates_created
            + self.templates_updated
    }
}

/// A connected set reachable from `root` along outgoing wires, in canonical
/// order: BFS depth, then name, then declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootedSubgraph {
    pub members: Vec<String>,
    /// Internal wires as sorted index pairs into `members`.
    pub edges: Vec<(usize, usize)>,
}

impl RootedSubgraph {
    pub fn key(&self, graph: &CanvasGraph) -> String {
        self.members
            .iter()
            .map(|id| graph.node(id).map(|node| node.name.as_str()).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("->")
    }

    pub fn names(&self, graph: &CanvasGraph) -> Vec<String> {
        self.members
            .iter()
            .map(|id| graph.node(id).map(|node| node.name.clone()).unwrap_or_default())
            .collect()
    }
}

/// Every 2..=`max_template_nodes` node subgraph grown from `root` by
/// following outgoing wires, bounded in depth and count.
pub fn rooted_subgraphs(graph: &CanvasGraph, root: &str, config: &LearnConfig) -> Vec<RootedSubgraph> {
    let max_nodes = config.max_template_nodes.max(2);
    let cap = config.max_subgraphs_per_root.max(1);
    let mut depth_of: HashMap<&str, usize> = HashMap::from([(root, 0)]);
    let mut sets: Vec<Vec<&str>> = vec![vec![root]];
    let mut queue: VecDeque<&str> = VecDeque::from([root]);

    'walk: while let Some(current) = queue.pop_front() {
        let depth = depth_of.get(current).copied().unwrap_or(0);
        if depth >= config.template_depth {
            continue;
        }
        for next in graph.outgoing(current) {
            if depth_of.contains_key(next.as_str()) {
                continue;
            }
            depth_of.insert(next.as_str(), depth + 1);
            queue.push_back(next.as_str());
            let grown: Vec<Vec<&str>> = sets
                .iter()
                .filter(|set| set.len() < max_nodes && set.contains(&current))
                .map(|set| {
                    let mut set = set.clone();
                    set.push(next.as_str());
                    set
                })
                .collect();
            for set in grown {
                if sets.len() > cap {
                    break 'walk;
                }
                sets.push(set);
            }
        }
    }

    let mut seen: HashSet<Vec<&str>> = HashSet::new();
    let mut result = Vec::new();
    for mut set in sets.into_iter().filter(|set| set.len() >= 2) {
        set.sort_by(|a, b| {
            let depth_a = depth_of.get(a).copied().unwrap_or(0);
            let depth_b = depth_of.get(b).copied().unwrap_or(0);
            let name_a = graph.node(a).map(|node| node.name.as_str()).unwrap_or("");
            let name_b = graph.node(b).map(|node| node.name.as_str()).unwrap_or("");
            depth_a
                .cmp(&depth_b)
                .then_with(|| name_a.cmp(name_b))
                .then_with(|| graph.order_of(a).cmp(&graph.order_of(b)))
        });
        let mut identity = set.clone();
        identity.sort_unstable();
        if !seen.insert(identity) {
            continue;
        }
        let index: HashMap<&str, usize> = set.iter().enumerate().map(|(idx, id)| (*id, idx)).collect();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (from_idx, id) in set.iter().enumerate() {
            for next in graph.outgoing(id) {
                if let Some(&to_idx) = index.get(next.as_str()) {
                    edges.push((from_idx, to_idx));
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        result.push(RootedSubgraph {
            members: set.into_iter().map(str::to_string).collect(),
            edges,
        });
    }
    result
}

impl PatternStore {
    /// Folds one observed canvas into the aggregates.
    pub fn learn(&mut self, snapshot: &CanvasSnapshot, config: &EngineConfig) -> Result<LearnSummary, EngineError> {
        if snapshot.nodes.is_empty() {
            return Err(EngineError::NoNodes);
        }
        let graph = CanvasGraph::build(snapshot, config);
        if graph.len() < 2 {
            return Err(EngineError::InsufficientData { nodes: graph.len() });
        }
        self.configure(config);
        tracing::info!(
            nodes = graph.len(),
            wires = graph.wires.len(),
            label = snapshot.label.as_deref().unwrap_or(""),
            "learning from snapshot"
        );

        let topology = Topology::compute(&graph, &|_| None);
        let levels = observed_levels(&graph, &topology);
        let limits = self.limits.clone();
        let mut summary = LearnSummary {
            session_id: self.meta.total_sessions + 1,
            label: snapshot.label.clone(),
            nodes: graph.len(),
            wires: graph.wires.len(),
            dropped_wires: graph.dropped_wires,
            offsets_updated: 0,
            connection_samples: Vec::new(),
            branching_updated: 0,
            merging_updated: 0,
            levels_observed: 0,
            level_transitions_updated: 0,
            y_order_updates: 0,
            port_orders_updated: 0,
            input_groups_updated: 0,
            sequences_updated: 0,
            templates_created: 0,
            templates_updated: 0,
            raw_samples: 0,
            offset_confidence: Vec::new(),
        };

        // Pairwise, connection-kind, global and level-transition aggregates
        // count each node pair once; raw samples keep one entry per port pair.
        let mut seen_pairs: HashSet<(&str, &str)> = HashSet::new();
        let mut seen_ports: HashSet<(&str, &str, usize, usize)> = HashSet::new();
        let mut touched: Vec<(String, String)> = Vec::new();
        let mut kind_counts: BTreeMap<ConnectionKind, usize> = BTreeMap::new();
        for wire in &graph.wires {
            let (Some(source), Some(target)) = (graph.node(&wire.source), graph.node(&wire.target)) else {
                continue;
            };
            let offset = source.position.offset_to(target.position);
            if seen_ports.insert((wire.source.as_str(), wire.target.as_str(), wire.source_port, wire.target_port)) {
                self.raw_samples.push(PairSample {
                    source_name: source.name.clone(),
                    target_name: target.name.clone(),
                    source_category: source.category,
                    target_category: target.category,
                    offset,
                    source_port: wire.source_port,
                    target_port: wire.target_port,
                });
                summary.raw_samples += 1;
            }
            if !seen_pairs.insert((wire.source.as_str(), wire.target.as_str())) {
                continue;
            }
            let key = (source.name.clone(), target.name.clone());
            match self.offsets.get_mut(&key) {
                Some(window) => window.push(offset, limits.pair_window),
                None => {
                    self.offsets.insert(key.clone(), OffsetWindow::with_sample(offset));
                }
            }
            if !touched.contains(&key) {
                touched.push(key);
            }
            summary.offsets_updated += 1;

            let kind = ConnectionKind::between(source.category, target.category);
            match self.connection.get_mut(&kind) {
                Some(window) => window.push(offset, limits.connection_window),
                None => {
                    self.connection.insert(kind, OffsetWindow::with_sample(offset));
                }
            }
            *kind_counts.entry(kind).or_insert(0) += 1;

            match self.global.as_mut() {
                Some(window) => window.push(offset, limits.global_window),
                None => self.global = Some(OffsetWindow::with_sample(offset)),
            }

            let from = levels.get(source.id.as_str()).copied().unwrap_or(0);
            let to = levels.get(target.id.as_str()).copied().unwrap_or(0);
            if to > from {
                match self.level_spacing.get_mut(&(from, to)) {
                    Some(window) => window.push(offset.dx, limits.level_window),
                    None => {
                        self.level_spacing.insert((from, to), ScalarWindow::with_sample(offset.dx));
                    }
                }
                summary.level_transitions_updated += 1;
            }
        }
        summary.connection_samples = kind_counts.into_iter().collect();

        // Fan-out and fan-in shapes.
        for node in graph.iter() {
            let targets = graph.outgoing(&node.id);
            if targets.len() >= 2 {
                let spokes: Vec<f64> = targets
                    .iter()
                    .filter_map(|id| graph.node(id))
                    .map(|target| target.position.y - node.position.y)
                    .collect();
                observe_fan(&mut self.branching, &node.name, &spokes, config, limits.branch_window);
                summary.branching_updated += 1;
            }
            let sources = graph.incoming(&node.id);
            if sources.len() >= 2 {
                let spokes: Vec<f64> = sources
                    .iter()
                    .filter_map(|id| graph.node(id))
                    .map(|source| source.position.y - node.position.y)
                    .collect();
                observe_fan(&mut self.merging, &node.name, &spokes, config, limits.branch_window);
                summary.merging_updated += 1;
            }
        }

        // Level histograms and category statistics.
        for node in graph.iter() {
            let level = levels.get(node.id.as_str()).copied().unwrap_or(0);
            self.level_by_name.entry(node.name.clone()).or_default().observe(level);
            self.level_by_category.entry(node.category).or_default().observe(level);
            summary.levels_observed += 1;

            let stats: &mut CategoryStats = self.category_stats.entry(node.category).or_default();
            stats.nodes += 1;
            if !node.name.is_empty() && stats.names.len() < limits.max_category_names {
                stats.names.insert(node.name.clone());
            }
        }

        summary.y_order_updates = self.observe_vertical_order(&graph, &config.learn);
        summary.port_orders_updated = self.observe_port_order(&graph);
        summary.input_groups_updated = self.observe_input_groups(&graph, limits.branch_window);
        summary.sequences_updated = self.observe_sequences(&graph, &config.learn);
        let (created, updated) = self.observe_templates(&graph, &config.learn);
        summary.templates_created = created;
        summary.templates_updated = updated;
        self.observe_cluster_gaps(&graph, &topology);

        for (source, target) in &touched {
            let window = self.offsets.get(&(source.clone(), target.clone()));
            if let Some(learned) = window.and_then(OffsetWindow::learned) {
                summary.offset_confidence.push(PairConfidence {
                    source: source.clone(),
                    target: target.clone(),
                    confidence: learned.confidence,
                    samples: learned.samples,
                });
            }
        }

        let now = now_unix();
        self.meta.updated_at = now;
        self.meta.total_sessions += 1;
        self.meta.total_nodes_learned += graph.len() as u64;
        self.sessions.push(LearningSession {
            session_id: summary.session_id,
            timestamp: now,
            label: snapshot.label.clone(),
            node_count: graph.len(),
            edge_count: graph.wires.len(),
            patterns_updated: summary.patterns_updated(),
        });
        self.enforce_limits();

        tracing::info!(
            session = summary.session_id,
            offsets = summary.offsets_updated,
            templates_created = summary.templates_created,
            templates_updated = summary.templates_updated,
            "learning complete"
        );
        Ok(summary)
    }

    fn observe_vertical_order(&mut self, graph: &CanvasGraph, config: &LearnConfig) -> usize {
        let bucket_width = config.x_bucket.max(1.0);
        let mut buckets: BTreeMap<i64, Vec<&crate::graph::Node>> = BTreeMap::new();
        for node in graph.iter() {
            let bucket = (node.position.x / bucket_width).round() as i64;
            buckets.entry(bucket).or_default().push(node);
        }
        let mut updates = 0;
        for column in buckets.values() {
            for (idx, a) in column.iter().enumerate() {
                for b in &column[idx + 1..] {
                    let dy = b.position.y - a.position.y;
                    if dy == 0.0 {
                        continue;
                    }
                    let (upper, lower) = if dy > 0.0 { (a, b) } else { (b, a) };
                    if upper.name != lower.name {
                        let (key, flipped) = ordered_key(upper.name.clone(), lower.name.clone());
                        bump_order(self.y_order_by_name.entry(key).or_default(), flipped);
                        updates += 1;
                    }
                    if upper.category != lower.category {
                        let (key, flipped) = ordered_key(upper.category, lower.category);
                        bump_order(self.y_order_by_category.entry(key).or_default(), flipped);
                    }
                }
            }
        }
        updates
    }

    /// Records, for every node fed on two or more ports, the source names in
    /// port order when that order matches their top-to-bottom order.
    fn observe_port_order(&mut self, graph: &CanvasGraph) -> usize {
        let mut updates = 0;
        for node in graph.iter() {
            let mut fed: Vec<(usize, f64, &str)> = graph
                .wires_into(&node.id)
                .filter_map(|wire| {
                    let source = graph.node(&wire.source)?;
                    Some((wire.target_port, source.position.y, source.name.as_str()))
                })
                .collect();
            fed.sort_by_key(|(port, _, _)| *port);
            fed.dedup_by_key(|(port, _, _)| *port);
            if fed.len() < 2 {
                continue;
            }
            let by_port: Vec<String> = fed.iter().map(|(_, _, name)| name.to_string()).collect();
            let mut by_y = fed.clone();
            by_y.sort_by(|a, b| a.1.total_cmp(&b.1));
            if by_y.iter().map(|(_, _, name)| *name).ne(by_port.iter().map(String::as_str)) {
                continue;
            }
            let recorded = match self.port_order.get_mut(&node.name) {
                Some(pattern) => pattern.observe(&by_port),
                None => {
                    self.port_order.insert(node.name.clone(), PortOrderPattern::new(by_port));
                    true
                }
            };
            if recorded {
                updates += 1;
            }
        }
        updates
    }

    /// Mean top-to-top spacing of input parameters sharing a name.
    fn observe_input_groups(&mut self, graph: &CanvasGraph, cap: usize) -> usize {
        let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for node in graph.iter().filter(|node| node.category == NodeCategory::InputParam) {
            groups.entry(node.name.as_str()).or_default().push(node.position.y);
        }
        let mut updates = 0;
        for (name, mut ys) in groups {
            if ys.len() < 2 {
                continue;
            }
            ys.sort_by(f64::total_cmp);
            let count = ys.len();
            let spacing = (ys[count - 1] - ys[0]) / (count - 1) as f64;
            match self.input_groups.get_mut(name) {
                Some(group) => group.observe(spacing, count, cap),
                None => {
                    self.input_groups
                        .insert(name.to_string(), InputGroupPattern::new(spacing, count));
                }
            }
            updates += 1;
        }
        updates
    }

    /// X gaps along every straight chain of single-output nodes.
    fn observe_sequences(&mut self, graph: &CanvasGraph, config: &LearnConfig) -> usize {
        let mut updates = 0;
        for start in graph.iter() {
            if graph.outgoing(&start.id).len() != 1 {
                continue;
            }
            let chain = graph.chain_from(&start.id, config.max_chain_length);
            if chain.len() < config.min_chain_length.max(2) {
                continue;
            }
            let nodes: Vec<&crate::graph::Node> = chain.iter().filter_map(|id| graph.node(id)).collect();
            if nodes.len() != chain.len() {
                continue;
            }
            let names: Vec<String> = nodes.iter().map(|node| node.name.clone()).collect();
            let spacings: Vec<f64> = nodes
                .windows(2)
                .map(|pair| pair[1].position.x - pair[0].position.x)
                .collect();
            let key = names.join("->");
            match self.sequences.get_mut(&key) {
                Some(pattern) => pattern.observe(&spacings),
                None => {
                    self.sequences.insert(key, SequencePattern::new(names, spacings));
                }
            }
            updates += 1;
        }
        updates
    }

    fn observe_templates(&mut self, graph: &CanvasGraph, config: &LearnConfig) -> (usize, usize) {
        let mut created = 0;
        let mut updated = 0;
        for root in graph.iter() {
            if !graph.incoming(&root.id).is_empty() || graph.outgoing(&root.id).is_empty() {
                continue;
            }
            for subgraph in rooted_subgraphs(graph, &root.id, config) {
                let offsets: Vec<Offset> = subgraph
                    .members
                    .iter()
                    .filter_map(|id| graph.node(id))
                    .map(|node| root.position.offset_to(node.position))
                    .collect();
                if offsets.len() != subgraph.members.len() {
                    continue;
                }
                let key = subgraph.key(graph);
                match self.templates.get_mut(&key) {
                    Some(template) => {
                        if template.edges == subgraph.edges {
                            template.observe(&offsets);
                            updated += 1;
                        }
                    }
                    None => {
                        self.templates.insert(
                            key,
                            SubgraphTemplate {
                                names: subgraph.names(graph),
                                offsets,
                                edges: subgraph.edges.clone(),
                                observations: 1,
                            },
                        );
                        created += 1;
                    }
                }
            }
        }
        (created, updated)
    }

    fn observe_cluster_gaps(&mut self, graph: &CanvasGraph, topology: &Topology) {
        let mut bands: Vec<(f64, f64)> = topology
            .clusters
            .iter()
            .filter(|cluster| cluster.len() >= 2)
            .filter_map(|cluster| {
                let nodes: Vec<_> = cluster.members.iter().filter_map(|id| graph.node(id)).collect();
                let top = nodes.iter().map(|n| n.position.y).fold(f64::INFINITY, f64::min);
                let bottom = nodes
                    .iter()
                    .map(|n| n.position.y + n.height)
                    .fold(f64::NEG_INFINITY, f64::max);
                (top.is_finite() && bottom.is_finite()).then_some((top, bottom))
            })
            .collect();
        bands.sort_by(|a, b| a.0.total_cmp(&b.0));
        for pair in bands.windows(2) {
            let gap = pair[1].0 - pair[0].1;
            if gap > 0.0 {
                match self.cluster_gap.as_mut() {
                    Some(mean) => mean.push(gap),
                    None => self.cluster_gap = Some(RunningMean::with_sample(gap)),
                }
            }
        }
    }
}

fn bump_order(counter: &mut OrderCounter, flipped: bool) {
    // The upper node was passed first; `flipped` means it ended up second in the key.
    if flipped {
        counter.second_above += 1;
    } else {
        counter.first_above += 1;
    }
}

fn observe_fan(
    map: &mut BTreeMap<(String, usize), FanPattern>,
    name: &str,
    spokes: &[f64],
    config: &EngineConfig,
    cap: usize,
) {
    let min = spokes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = spokes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if spokes.len() < 2 || !min.is_finite() || !max.is_finite() {
        return;
    }
    let spacing = (max - min) / (spokes.len() - 1) as f64;
    let shape = FanShape::classify(spokes, config.learn.same_row_tolerance);
    let key = (name.to_string(), spokes.len());
    match map.get_mut(&key) {
        Some(pattern) => pattern.observe(spacing, shape, cap),
        None => {
            map.insert(key, FanPattern::new(spacing, shape));
        }
    }
}

/// Topology levels for learning. Unwired nodes take the level whose
/// connected nodes sit closest in X.
fn observed_levels<'a>(graph: &'a CanvasGraph, topology: &Topology) -> HashMap<&'a str, usize> {
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for node in graph.iter() {
        if graph.is_isolated(&node.id) {
            continue;
        }
        let entry = sums.entry(topology.depth_of(&node.id)).or_insert((0.0, 0));
        entry.0 += node.position.x;
        entry.1 += 1;
    }
    let columns: Vec<(usize, f64)> = sums
        .into_iter()
        .map(|(level, (sum, count))| (level, sum / count as f64))
        .collect();

    graph
        .iter()
        .map(|node| {
            let level = if graph.is_isolated(&node.id) {
                columns
                    .iter()
                    .min_by(|a, b| {
                        (a.1 - node.position.x)
                            .abs()
                            .total_cmp(&(b.1 - node.position.x).abs())
                    })
                    .map(|(level, _)| *level)
                    .unwrap_or(0)
            } else {
                topology.depth_of(&node.id)
            };
            (node.id.as_str(), level)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CanvasNode, CanvasWire};

    fn fan_snapshot() -> CanvasSnapshot {
        CanvasSnapshot::new(
            vec![
                CanvasNode::new("s", "Series", 0.0, 80.0),
                CanvasNode::new("t1", "Sine", 150.0, 0.0),
                CanvasNode::new("t2", "Cosine", 150.0, 80.0),
                CanvasNode::new("t3", "Tangent", 150.0, 160.0),
                CanvasNode::new("free", "Panel", 160.0, 400.0),
            ],
            vec![
                CanvasWire::new("s", "t1"),
                CanvasWire::new("s", "t2"),
                CanvasWire::new("s", "t3"),
            ],
        )
    }

    #[test]
    fn rejects_empty_and_tiny_snapshots() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        assert_eq!(
            store.learn(&CanvasSnapshot::default(), &config),
            Err(EngineError::NoNodes)
        );
        let single = CanvasSnapshot::new(vec![CanvasNode::new("a", "Sine", 0.0, 0.0)], vec![]);
        assert_eq!(
            store.learn(&single, &config),
            Err(EngineError::InsufficientData { nodes: 1 })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn learns_fan_out_shape_and_spacing() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        let summary = store.learn(&fan_snapshot(), &config).unwrap();
        assert_eq!(summary.branching_updated, 1);
        assert_eq!(summary.offsets_updated, 3);
        let fan = store.branching_spacing_for("Series", 3).unwrap();
        assert!((fan.value.spacing - 80.0).abs() < 1e-9);
        assert_eq!(fan.value.shape, FanShape::Centered);
        assert_eq!(fan.samples, 1);
        assert!(store.branching_spacing_for("Series", 2).is_none());
    }

    #[test]
    fn unwired_nodes_take_nearest_column_level() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        store.learn(&fan_snapshot(), &config).unwrap();
        let level = store.dominant_level_for_name("Panel").unwrap();
        assert_eq!(level.value, 1);
        let spacing = store.level_transition_spacing(0, 1).unwrap();
        assert!((spacing.value - 150.0).abs() < 1e-9);
        assert_eq!(spacing.samples, 3);
    }

    #[test]
    fn subgraphs_are_canonical_and_bounded() {
        let config = EngineConfig::default();
        let graph = CanvasGraph::build(&fan_snapshot(), &config);
        let subgraphs = rooted_subgraphs(&graph, "s", &config.learn);
        // 3 pairs, 3 triples and 1 quadruple rooted at the source.
        assert_eq!(subgraphs.len(), 7);
        let keys: Vec<String> = subgraphs.iter().map(|s| s.key(&graph)).collect();
        assert!(keys.contains(&"Series->Cosine->Sine".to_string()));
        assert!(keys.contains(&"Series->Cosine->Sine->Tangent".to_string()));
        for subgraph in &subgraphs {
            assert_eq!(subgraph.members[0], "s");
            assert!(subgraph.edges.iter().all(|(from, _)| *from == 0));
        }
    }

    #[test]
    fn parallel_wires_keep_their_ports_in_raw_samples() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        let snapshot = CanvasSnapshot::new(
            vec![
                CanvasNode::new("a", "Number Slider", 0.0, 0.0),
                CanvasNode::new("b", "Addition", 150.0, 0.0),
            ],
            vec![
                CanvasWire::new("a", "b").with_ports(0, 0),
                CanvasWire::new("a", "b").with_ports(0, 1),
                CanvasWire::new("a", "b").with_ports(0, 1),
            ],
        );
        let summary = store.learn(&snapshot, &config).unwrap();
        assert_eq!(summary.raw_samples, 2);
        let ports: Vec<(usize, usize)> = store
            .raw_samples()
            .iter()
            .map(|sample| (sample.source_port, sample.target_port))
            .collect();
        assert_eq!(ports, vec![(0, 0), (0, 1)]);
        // The node pair itself is one observation.
        assert_eq!(store.offset_for("Number Slider", "Addition").unwrap().samples, 1);
    }

    #[test]
    fn port_order_is_learned_only_when_it_matches_vertical_order() {
        let config = EngineConfig::default();
        let merge = |first_y: f64, second_y: f64| {
            CanvasSnapshot::new(
                vec![
                    CanvasNode::new("x", "Number Slider", 0.0, first_y),
                    CanvasNode::new("y", "Panel", 0.0, second_y),
                    CanvasNode::new("m", "Addition", 150.0, 50.0),
                ],
                vec![
                    CanvasWire::new("x", "m").with_ports(0, 0),
                    CanvasWire::new("y", "m").with_ports(0, 1),
                ],
            )
        };
        let mut store = PatternStore::with_config(&config);
        let crossed = store.learn(&merge(200.0, 0.0), &config).unwrap();
        assert_eq!(crossed.port_orders_updated, 0);
        assert!(store.port_order_for("Addition").is_none());

        store.learn(&merge(0.0, 100.0), &config).unwrap();
        store.learn(&merge(0.0, 120.0), &config).unwrap();
        let order = store.port_order_for("Addition").unwrap();
        assert_eq!(order.value, &["Number Slider".to_string(), "Panel".to_string()]);
        assert_eq!(order.samples, 2);
    }

    #[test]
    fn learns_input_groups_and_chain_spacing() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        let snapshot = CanvasSnapshot::new(
            vec![
                CanvasNode::new("s1", "Number Slider", 0.0, 0.0),
                CanvasNode::new("s2", "Number Slider", 0.0, 60.0),
                CanvasNode::new("s3", "Number Slider", 0.0, 120.0),
                CanvasNode::new("add", "Addition", 140.0, 0.0),
                CanvasNode::new("sin", "Sine", 300.0, 0.0),
                CanvasNode::new("out", "Panel", 480.0, 0.0),
            ],
            vec![
                CanvasWire::new("s1", "add"),
                CanvasWire::new("add", "sin"),
                CanvasWire::new("sin", "out"),
            ],
        );
        let summary = store.learn(&snapshot, &config).unwrap();
        assert_eq!(summary.input_groups_updated, 1);
        let group = store.input_group_spacing("Number Slider").unwrap();
        assert_eq!(group.value, 60.0);

        // Chains from s1 and from add; sin -> out is too short.
        assert_eq!(summary.sequences_updated, 2);
        let chain = store
            .sequence_spacing(&["Number Slider", "Addition", "Sine", "Panel"])
            .unwrap();
        assert_eq!(chain.value, &[140.0, 160.0, 180.0]);
        let tail = store.sequence_spacing(&["Addition", "Sine", "Panel"]).unwrap();
        assert_eq!(tail.value, &[160.0, 180.0]);
    }

    #[test]
    fn repeated_learning_updates_templates() {
        let config = EngineConfig::default();
        let mut store = PatternStore::with_config(&config);
        let first = store.learn(&fan_snapshot(), &config).unwrap();
        assert_eq!(first.templates_created, 7);
        let second = store.learn(&fan_snapshot(), &config).unwrap();
        assert_eq!(second.templates_created, 0);
        assert_eq!(second.templates_updated, 7);
        let template = store.template("Series->Sine").unwrap();
        assert_eq!(template.observations, 2);
        assert_eq!(template.offsets[1], Offset::new(150.0, -80.0));
        assert_eq!(store.sessions().len(), 2);
        assert_eq!(store.metadata().total_sessions, 2);
    }
}
