use std::collections::{BTreeMap, HashMap, HashSet};

use crate::classify::{self, ClassifyInput};
use crate::config::EngineConfig;
use crate::ir::{CanvasSnapshot, NodeCategory, Point};

/// A node with every optional attribute resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub category_label: String,
    pub subcategory_label: String,
    /// Static classification from name and category strings.
    pub category: NodeCategory,
    pub position: Point,
    pub width: f64,
    pub height: f64,
    pub inputs: usize,
    pub outputs: usize,
    /// Index in the snapshot's declaration order.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub source: String,
    pub target: String,
    pub source_port: usize,
    pub target_port: usize,
}

/// Adjacency view of one snapshot. Multi-edges are kept in `wires` and
/// collapsed in the neighbour lists.
#[derive(Debug, Clone, Default)]
pub struct CanvasGraph {
    pub nodes: BTreeMap<String, Node>,
    pub node_order: Vec<String>,
    pub wires: Vec<Wire>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
    pub dropped_wires: usize,
    pub filtered_nodes: usize,
}

impl CanvasGraph {
    pub fn build(snapshot: &CanvasSnapshot, config: &EngineConfig) -> Self {
        let mut graph = CanvasGraph::default();
        let containers: HashSet<&str> = config.container_names.iter().map(String::as_str).collect();

        let mut max_target_port: HashMap<&str, usize> = HashMap::new();
        let mut max_source_port: HashMap<&str, usize> = HashMap::new();
        for wire in &snapshot.wires {
            let entry = max_target_port.entry(wire.target.as_str()).or_insert(0);
            *entry = (*entry).max(wire.target_port + 1);
            let entry = max_source_port.entry(wire.source.as_str()).or_insert(0);
            *entry = (*entry).max(wire.source_port + 1);
        }

        for raw in &snapshot.nodes {
            if raw.id.is_empty()
                || containers.contains(raw.name.as_str())
                || graph.nodes.contains_key(&raw.id)
            {
                graph.filtered_nodes += 1;
                continue;
            }
            let classification = classify::classify_static(&ClassifyInput {
                name: &raw.name,
                category: &raw.category,
                subcategory: &raw.subcategory,
                has_inputs: raw.input_count.map(|count| count > 0),
                has_outputs: raw.output_count.map(|count| count > 0),
            });
            let wired_inputs = max_target_port.get(raw.id.as_str()).copied().unwrap_or(0);
            let wired_outputs = max_source_port.get(raw.id.as_str()).copied().unwrap_or(0);
            let node = Node {
                id: raw.id.clone(),
                name: raw.name.clone(),
                category_label: raw.category.clone(),
                subcategory_label: raw.subcategory.clone(),
                category: classification.category,
                position: Point::new(raw.x, raw.y),
                width: positive_or(raw.width, config.layout.default_node_width),
                height: positive_or(raw.height, config.layout.default_node_height),
                inputs: raw.input_count.unwrap_or(1).max(wired_inputs).max(1),
                outputs: raw.output_count.unwrap_or(1).max(wired_outputs).max(1),
                order: graph.node_order.len(),
            };
            graph.node_order.push(node.id.clone());
            graph.nodes.insert(node.id.clone(), node);
        }

        for raw in &snapshot.wires {
            if !graph.nodes.contains_key(&raw.source) || !graph.nodes.contains_key(&raw.target) {
                tracing::warn!(
                    source = %raw.source,
                    target = %raw.target,
                    "dropping wire with unknown endpoint"
                );
                graph.dropped_wires += 1;
                continue;
            }
            let outgoing = graph.outgoing.entry(raw.source.clone()).or_default();
            if !outgoing.contains(&raw.target) {
                outgoing.push(raw.target.clone());
            }
            let incoming = graph.incoming.entry(raw.target.clone()).or_default();
            if !incoming.contains(&raw.source) {
                incoming.push(raw.source.clone());
            }
            graph.wires.push(Wire {
                source: raw.source.clone(),
                target: raw.target.clone(),
                source_port: raw.source_port,
                target_port: raw.target_port,
            });
        }

        tracing::debug!(
            nodes = graph.len(),
            wires = graph.wires.len(),
            dropped = graph.dropped_wires,
            filtered = graph.filtered_nodes,
            "built canvas graph"
        );
        graph
    }

    pub fn len(&self) -> usize {
        self.node_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_order.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn outgoing(&self, id: &str) -> &[String] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming(&self, id: &str) -> &[String] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_isolated(&self, id: &str) -> bool {
        self.outgoing(id).is_empty() && self.incoming(id).is_empty()
    }

    pub fn wires_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Wire> + 'a {
        self.wires.iter().filter(move |wire| wire.source == id)
    }

    pub fn wires_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Wire> + 'a {
        self.wires.iter().filter(move |wire| wire.target == id)
    }

    pub fn order_of(&self, id: &str) -> usize {
        self.nodes.get(id).map(|node| node.order).unwrap_or(usize::MAX)
    }

    /// Straight run starting at `start`, following each node's only outgoing
    /// neighbour for at most `max_len` nodes. Stops at a fork or a revisit.
    pub fn chain_from<'a>(&'a self, start: &'a str, max_len: usize) -> Vec<&'a str> {
        let mut chain = vec![start];
        let mut current = start;
        while chain.len() < max_len {
            let [next] = self.outgoing(current) else {
                break;
            };
            if chain.contains(&next.as_str()) {
                break;
            }
            chain.push(next.as_str());
            current = next.as_str();
        }
        chain
    }
}

fn positive_or(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => fallback,
    }
}
