use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::{CanvasSnapshot, Point};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutRequest {
    /// Top-left of the first cluster. Defaults to the top-left corner of the
    /// snapshot's current bounding box.
    #[serde(default)]
    pub anchor: Option<Point>,
    #[serde(default)]
    pub dry_run: bool,
}

impl LayoutRequest {
    pub fn at(anchor: Point) -> Self {
        Self {
            anchor: Some(anchor),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Where a column gap came from, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpacingBasis {
    Sequence,
    Pairwise,
    NearestNeighbour,
    LevelTransition,
    ConnectionKind,
    Global,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnGap {
    pub cluster: usize,
    pub from_level: usize,
    pub to_level: usize,
    pub gap: f64,
    pub basis: SpacingBasis,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMove {
    pub id: String,
    pub old_x: f64,
    pub old_y: f64,
    pub new_x: f64,
    pub new_y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutStats {
    pub clusters: usize,
    pub templates_matched: usize,
    pub levels_used: usize,
    pub crossings_before: usize,
    pub crossings_after: usize,
    pub fallback_nodes: usize,
    pub dropped_edges: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutReport {
    /// Nodes that moved by more than the configured threshold, in
    /// declaration order.
    pub moves: Vec<NodeMove>,
    pub positions: BTreeMap<String, Point>,
    pub stats: LayoutStats,
    pub column_gaps: Vec<ColumnGap>,
    pub dry_run: bool,
}

impl LayoutReport {
    /// Writes the proposed positions into `snapshot`. Nodes the layout did
    /// not see keep their coordinates. Returns how many nodes changed.
    pub fn apply_to(&self, snapshot: &mut CanvasSnapshot) -> usize {
        let mut applied = 0;
        for node in &mut snapshot.nodes {
            if let Some(point) = self.positions.get(&node.id) {
                if node.x != point.x || node.y != point.y {
                    applied += 1;
                }
                node.x = point.x;
                node.y = point.y;
            }
        }
        applied
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LayoutStage {
    Built,
    Classified,
    Leveled,
    TemplatesApplied,
    ChainPlaced,
    BranchesSpread,
    CrossingsMinimized,
    OverlapResolved,
    Done,
}
