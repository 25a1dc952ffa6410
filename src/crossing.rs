//! Wire crossing detection and level-by-level crossing reduction.

use std::collections::HashMap;

use crate::config::CrossingConfig;
use crate::ir::Point;

/// A straight wire between two placed nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub source: String,
    pub target: String,
    pub from: Point,
    pub to: Point,
}

impl Segment {
    fn shares_node(&self, other: &Segment) -> bool {
        self.source == other.source
            || self.source == other.target
            || self.target == other.source
            || self.target == other.target
    }
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Proper intersection of segments `p1p2` and `p3p4`. Touching or collinear
/// segments do not count.
pub fn segments_intersect(p1: Point, p2: Point, p3: Point, p4: Point) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// Wires that share a node never cross.
pub fn wires_cross(a: &Segment, b: &Segment) -> bool {
    !a.shares_node(b) && segments_intersect(a.from, a.to, b.from, b.to)
}

pub fn count_crossings(segments: &[Segment]) -> usize {
    let mut count = 0;
    for (idx, a) in segments.iter().enumerate() {
        for b in &segments[idx + 1..] {
            if wires_cross(a, b) {
                count += 1;
            }
        }
    }
    count
}

/// Crossings involving at least one wire attached to `node`.
pub fn count_node_crossings(node: &str, segments: &[Segment]) -> usize {
    let mut count = 0;
    for (idx, a) in segments.iter().enumerate() {
        for b in &segments[idx + 1..] {
            let touches = a.source == node || a.target == node || b.source == node || b.target == node;
            if touches && wires_cross(a, b) {
                count += 1;
            }
        }
    }
    count
}

/// A wire between two nodes, with the vertical offsets of the ports it
/// attaches to relative to each node's position.
#[derive(Debug, Clone, PartialEq)]
pub struct PortWire {
    pub source: String,
    pub target: String,
    pub source_offset: f64,
    pub target_offset: f64,
}

pub fn build_segments(positions: &HashMap<String, Point>, wires: &[PortWire]) -> Vec<Segment> {
    wires
        .iter()
        .filter_map(|wire| {
            let from = positions.get(&wire.source)?;
            let to = positions.get(&wire.target)?;
            Some(Segment {
                source: wire.source.clone(),
                target: wire.target.clone(),
                from: Point::new(from.x, from.y + wire.source_offset),
                to: Point::new(to.x, to.y + wire.target_offset),
            })
        })
        .collect()
}

pub fn count_for_positions(positions: &HashMap<String, Point>, wires: &[PortWire]) -> usize {
    count_crossings(&build_segments(positions, wires))
}

/// Learned slot of a node among the sources of `target`: the node wants its
/// Y at `target.y + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortOrderKey {
    pub target: String,
    pub offset: f64,
}

/// Input to [`minimize_crossings`]. Only nodes listed in `levels` move; every
/// other node in `positions` stays put but still anchors the wires.
#[derive(Debug, Clone)]
pub struct CrossingProblem<'a> {
    /// Movable nodes grouped by level, shallowest level first.
    pub levels: Vec<Vec<String>>,
    pub wires: &'a [PortWire],
    pub positions: HashMap<String, Point>,
    /// Learned vertical preference, higher sorts above. Used to break ties.
    pub preference: &'a HashMap<String, f64>,
    /// Learned port-order keys for nodes without a positioned source.
    pub port_order: &'a HashMap<String, PortOrderKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelStep {
    pub level: usize,
    pub before: usize,
    pub barycenter: usize,
    pub after: usize,
}

#[derive(Debug, Clone)]
pub struct CrossingOutcome {
    pub positions: HashMap<String, Point>,
    pub initial: usize,
    pub crossings: usize,
    pub steps: Vec<LevelStep>,
    pub sweeps: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sweep {
    Forward,
    Backward,
}

/// Reorders each level's nodes over its existing Y slots: a barycenter sort
/// followed by adjacent swaps that strictly reduce crossings. A level never
/// ends with more crossings than it started with.
pub fn minimize_crossings(problem: &CrossingProblem<'_>, config: &CrossingConfig) -> CrossingOutcome {
    let mut positions = problem.positions.clone();
    let initial = count_for_positions(&positions, problem.wires);
    let mut incoming: HashMap<&str, Vec<&PortWire>> = HashMap::new();
    let mut outgoing: HashMap<&str, Vec<&PortWire>> = HashMap::new();
    for wire in problem.wires {
        incoming.entry(wire.target.as_str()).or_default().push(wire);
        outgoing.entry(wire.source.as_str()).or_default().push(wire);
    }

    let mut steps = Vec::new();
    let mut sweeps = 0;
    let mut current = initial;
    for sweep in 0..config.max_sweeps {
        if current == 0 {
            break;
        }
        sweeps += 1;
        let direction = if sweep % 2 == 0 {
            Sweep::Forward
        } else {
            Sweep::Backward
        };
        let level_indices: Vec<usize> = match direction {
            Sweep::Forward => (0..problem.levels.len()).collect(),
            Sweep::Backward => (0..problem.levels.len()).rev().collect(),
        };
        let mut changed = false;
        for level in level_indices {
            let ids = &problem.levels[level];
            if ids.len() < 2 {
                continue;
            }
            let key = |id: &str, positions: &HashMap<String, Point>| -> f64 {
                barycenter_key(id, direction, positions, &incoming, &outgoing, problem.port_order)
            };
            let (step, moved) = order_level(level, ids, &mut positions, problem, config, &key);
            changed |= moved;
            current = step.after;
            steps.push(step);
        }
        if !changed {
            break;
        }
    }

    let crossings = count_for_positions(&positions, problem.wires);
    CrossingOutcome {
        positions,
        initial,
        crossings,
        steps,
        sweeps,
    }
}

fn barycenter_key(
    id: &str,
    direction: Sweep,
    positions: &HashMap<String, Point>,
    incoming: &HashMap<&str, Vec<&PortWire>>,
    outgoing: &HashMap<&str, Vec<&PortWire>>,
    port_order: &HashMap<String, PortOrderKey>,
) -> f64 {
    let from_sources = || {
        mean(incoming.get(id).into_iter().flatten().filter_map(|wire| {
            positions
                .get(&wire.source)
                .map(|p| p.y + wire.source_offset - wire.target_offset)
        }))
    };
    let learned = || {
        let key = port_order.get(id)?;
        positions.get(&key.target).map(|p| p.y + key.offset)
    };
    // Where the wires land on each target.
    let from_targets = || {
        mean(outgoing.get(id).into_iter().flatten().filter_map(|wire| {
            positions
                .get(&wire.target)
                .map(|p| p.y + wire.target_offset - wire.source_offset)
        }))
    };
    let key = match direction {
        Sweep::Forward => from_sources().or_else(learned).or_else(from_targets),
        Sweep::Backward => learned().or_else(from_targets).or_else(from_sources),
    };
    key.or_else(|| positions.get(id).map(|p| p.y))
        .unwrap_or(0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

fn assign_slots(order: &[String], slots: &[f64], positions: &mut HashMap<String, Point>) {
    for (id, y) in order.iter().zip(slots) {
        if let Some(point) = positions.get_mut(id) {
            point.y = *y;
        }
    }
}

fn order_level(
    level: usize,
    ids: &[String],
    positions: &mut HashMap<String, Point>,
    problem: &CrossingProblem<'_>,
    config: &CrossingConfig,
    key: &dyn Fn(&str, &HashMap<String, Point>) -> f64,
) -> (LevelStep, bool) {
    let mut ranked: Vec<(f64, String)> = ids
        .iter()
        .map(|id| (positions.get(id).map(|p| p.y).unwrap_or(0.0), id.clone()))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    let slots: Vec<f64> = ranked.iter().map(|(y, _)| *y).collect();
    let original: Vec<String> = ranked.into_iter().map(|(_, id)| id).collect();
    let before = count_for_positions(positions, problem.wires);

    let keys: HashMap<&str, f64> = original
        .iter()
        .map(|id| (id.as_str(), key(id.as_str(), &*positions)))
        .collect();
    let preference = |id: &str| problem.preference.get(id).copied().unwrap_or(0.0);
    let mut order = original.clone();
    // Stable sort keeps the current order as the final tie-break.
    order.sort_by(|a, b| {
        let ka = keys.get(a.as_str()).copied().unwrap_or(0.0);
        let kb = keys.get(b.as_str()).copied().unwrap_or(0.0);
        ka.total_cmp(&kb)
            .then_with(|| preference(b.as_str()).total_cmp(&preference(a.as_str())))
    });
    assign_slots(&order, &slots, positions);
    let barycenter = count_for_positions(positions, problem.wires);

    let mut best = barycenter;
    for _ in 0..config.max_swap_iterations {
        let mut improved = false;
        for idx in 0..order.len().saturating_sub(1) {
            order.swap(idx, idx + 1);
            assign_slots(&order, &slots, positions);
            let count = count_for_positions(positions, problem.wires);
            if count < best {
                best = count;
                improved = true;
            } else {
                order.swap(idx, idx + 1);
                assign_slots(&order, &slots, positions);
            }
        }
        if !improved || best == 0 {
            break;
        }
    }

    let after = if best > before {
        assign_slots(&original, &slots, positions);
        order = original.clone();
        before
    } else {
        best
    };
    (
        LevelStep {
            level,
            before,
            barycenter,
            after,
        },
        order != original,
    )
}
