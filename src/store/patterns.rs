//! Aggregate records kept by the pattern store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ir::{NodeCategory, Offset};

/// A learned value with the evidence behind it. `samples` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Learned<T> {
    pub value: T,
    pub confidence: f64,
    pub samples: usize,
}

impl<T> Learned<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Learned<U> {
        Learned {
            value: f(self.value),
            confidence: self.confidence,
            samples: self.samples,
        }
    }
}

/// Confidence that grows with the number of observations and saturates.
pub fn sample_confidence(samples: u64) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let n = samples as f64;
    (n / (n + 2.0)).min(0.95)
}

/// Mean where the i-th oldest of n values has weight `1 + 0.1 * i`.
pub fn recency_weighted_mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (idx, value) in values.into_iter().enumerate() {
        let weight = 1.0 + 0.1 * idx as f64;
        weighted += value * weight;
        total += weight;
    }
    (total > 0.0).then(|| weighted / total)
}

/// Folds the `n`-th observation (1-based) into a recency weighted mean
/// without keeping the history.
pub fn fold_weighted(mean: f64, n: u64, value: f64) -> f64 {
    if n <= 1 {
        return value;
    }
    let idx = (n - 1) as f64;
    let weight = 1.0 + 0.1 * idx;
    let total = n as f64 + 0.05 * idx * (idx + 1.0);
    mean + (value - mean) * weight / total
}

fn push_bounded<T>(samples: &mut Vec<T>, value: T, cap: usize) -> bool {
    samples.push(value);
    truncate_front(samples, cap)
}

/// Drops the oldest entries beyond `cap`. Returns whether anything was dropped.
pub(crate) fn truncate_front<T>(samples: &mut Vec<T>, cap: usize) -> bool {
    if samples.len() > cap {
        let excess = samples.len() - cap;
        samples.drain(..excess);
        true
    } else {
        false
    }
}

/// Bounded recency window of offsets with its weighted mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetWindow {
    samples: Vec<Offset>,
    mean: Offset,
    observations: u64,
}

impl OffsetWindow {
    pub fn with_sample(offset: Offset) -> Self {
        Self {
            samples: vec![offset],
            mean: offset,
            observations: 1,
        }
    }

    pub fn push(&mut self, offset: Offset, cap: usize) {
        push_bounded(&mut self.samples, offset, cap.max(1));
        self.observations += 1;
        self.recompute();
    }

    pub(crate) fn enforce_cap(&mut self, cap: usize) {
        if truncate_front(&mut self.samples, cap.max(1)) {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let dx = recency_weighted_mean(self.samples.iter().map(|o| o.dx));
        let dy = recency_weighted_mean(self.samples.iter().map(|o| o.dy));
        if let (Some(dx), Some(dy)) = (dx, dy) {
            self.mean = Offset::new(dx, dy);
        }
    }

    pub fn mean(&self) -> Offset {
        self.mean
    }

    pub fn samples(&self) -> &[Offset] {
        &self.samples
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Whether the window holds any evidence at all.
    pub fn is_populated(&self) -> bool {
        self.observations > 0 && !self.samples.is_empty()
    }

    pub fn learned(&self) -> Option<Learned<Offset>> {
        self.is_populated().then(|| Learned {
            value: self.mean,
            confidence: sample_confidence(self.observations),
            samples: self.observations as usize,
        })
    }
}

/// Bounded recency window of scalar spacings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarWindow {
    samples: Vec<f64>,
    mean: f64,
    observations: u64,
}

impl ScalarWindow {
    pub fn with_sample(value: f64) -> Self {
        Self {
            samples: vec![value],
            mean: value,
            observations: 1,
        }
    }

    pub fn push(&mut self, value: f64, cap: usize) {
        push_bounded(&mut self.samples, value, cap.max(1));
        self.observations += 1;
        self.recompute();
    }

    pub(crate) fn enforce_cap(&mut self, cap: usize) {
        if truncate_front(&mut self.samples, cap.max(1)) {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        if let Some(mean) = recency_weighted_mean(self.samples.iter().copied()) {
            self.mean = mean;
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn is_populated(&self) -> bool {
        self.observations > 0 && !self.samples.is_empty()
    }

    pub fn learned(&self) -> Option<Learned<f64>> {
        self.is_populated().then(|| Learned {
            value: self.mean,
            confidence: sample_confidence(self.observations),
            samples: self.observations as usize,
        })
    }
}

/// Unbounded running mean that keeps only its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningMean {
    pub mean: f64,
    pub observations: u64,
}

impl RunningMean {
    pub fn with_sample(value: f64) -> Self {
        Self {
            mean: value,
            observations: 1,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.observations += 1;
        self.mean = fold_weighted(self.mean, self.observations, value);
    }

    pub fn learned(&self) -> Option<Learned<f64>> {
        (self.observations > 0).then(|| Learned {
            value: self.mean,
            confidence: sample_confidence(self.observations),
            samples: self.observations as usize,
        })
    }
}

/// Vertical arrangement of a fan around its hub node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanShape {
    Centered,
    Below,
    Above,
}

impl FanShape {
    /// Labels a fan from the spoke Y offsets relative to the hub.
    pub fn classify(offsets: &[f64], tolerance: f64) -> Self {
        let min = offsets.iter().copied().fold(f64::INFINITY, f64::min);
        let max = offsets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return FanShape::Centered;
        }
        let center = (min + max) / 2.0;
        let spacing = if offsets.len() > 1 {
            (max - min) / (offsets.len() - 1) as f64
        } else {
            0.0
        };
        if center.abs() <= tolerance.max(spacing * 0.25) {
            FanShape::Centered
        } else if center > 0.0 {
            FanShape::Below
        } else {
            FanShape::Above
        }
    }

    /// Spoke Y offsets relative to the hub for `count` spokes.
    pub fn spoke_offsets(self, count: usize, spacing: f64) -> Vec<f64> {
        if count == 0 {
            return Vec::new();
        }
        let span = spacing * (count - 1) as f64;
        let start = match self {
            FanShape::Centered => -span / 2.0,
            FanShape::Below => 0.0,
            FanShape::Above => -span,
        };
        (0..count).map(|idx| start + spacing * idx as f64).collect()
    }
}

/// Spacing and shape to apply to a fan-out or fan-in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FanLayout {
    pub spacing: f64,
    pub shape: FanShape,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeCounts {
    pub centered: u64,
    pub below: u64,
    pub above: u64,
}

impl ShapeCounts {
    fn bump(&mut self, shape: FanShape) {
        match shape {
            FanShape::Centered => self.centered += 1,
            FanShape::Below => self.below += 1,
            FanShape::Above => self.above += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanPattern {
    pub spacing: ScalarWindow,
    pub shapes: ShapeCounts,
}

impl FanPattern {
    pub fn new(spacing: f64, shape: FanShape) -> Self {
        let mut shapes = ShapeCounts::default();
        shapes.bump(shape);
        Self {
            spacing: ScalarWindow::with_sample(spacing),
            shapes,
        }
    }

    pub fn observe(&mut self, spacing: f64, shape: FanShape, cap: usize) {
        self.spacing.push(spacing, cap);
        self.shapes.bump(shape);
    }

    /// Most frequent shape; ties prefer centered, then below.
    pub fn preferred_shape(&self) -> FanShape {
        let counts = self.shapes;
        let mut best = (FanShape::Centered, counts.centered);
        for (shape, count) in [(FanShape::Below, counts.below), (FanShape::Above, counts.above)] {
            if count > best.1 {
                best = (shape, count);
            }
        }
        best.0
    }

    pub fn learned(&self) -> Option<Learned<FanLayout>> {
        let spacing = self.spacing.learned()?;
        Some(spacing.map(|spacing| FanLayout {
            spacing,
            shape: self.preferred_shape(),
        }))
    }
}

/// Counts of the topology level at which a name or category was seen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelHistogram {
    pub counts: BTreeMap<usize, u64>,
    pub total: u64,
}

impl LevelHistogram {
    pub fn observe(&mut self, level: usize) {
        *self.counts.entry(level).or_insert(0) += 1;
        self.total += 1;
    }

    /// Most frequent level, lowest level on ties.
    pub fn dominant(&self) -> Option<Learned<usize>> {
        let mut best: Option<(usize, u64)> = None;
        for (level, count) in &self.counts {
            if best.is_none_or(|(_, c)| *count > c) {
                best = Some((*level, *count));
            }
        }
        let (level, count) = best?;
        if self.total == 0 {
            return None;
        }
        Some(Learned {
            value: level,
            confidence: count as f64 / self.total as f64,
            samples: self.total as usize,
        })
    }

    pub fn average(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let sum: f64 = self
            .counts
            .iter()
            .map(|(level, count)| *level as f64 * *count as f64)
            .sum();
        Some(sum / self.total as f64)
    }
}

/// Relative vertical order of two nodes sharing a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalOrder {
    Above,
    Below,
}

/// Tally for an unordered pair stored under its sorted key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCounter {
    pub first_above: u64,
    pub second_above: u64,
}

impl OrderCounter {
    pub fn total(&self) -> u64 {
        self.first_above + self.second_above
    }

    /// Order of the first key member relative to the second, if one side
    /// dominates by `margin` with at least `min_samples` observations.
    pub fn preference(&self, margin: f64, min_samples: u64) -> Option<Learned<VerticalOrder>> {
        let total = self.total();
        if total == 0 || total < min_samples {
            return None;
        }
        let (order, winner, loser) = if self.first_above >= self.second_above {
            (VerticalOrder::Above, self.first_above, self.second_above)
        } else {
            (VerticalOrder::Below, self.second_above, self.first_above)
        };
        if (winner as f64) <= loser as f64 * margin {
            return None;
        }
        Some(Learned {
            value: order,
            confidence: winner as f64 / total as f64,
            samples: total as usize,
        })
    }
}

/// A small recurring connected pattern and its member offsets from the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphTemplate {
    pub names: Vec<String>,
    pub offsets: Vec<Offset>,
    /// Internal wires as index pairs into `names`.
    pub edges: Vec<(usize, usize)>,
    pub observations: u64,
}

impl SubgraphTemplate {
    pub fn key(&self) -> String {
        self.names.join("->")
    }

    pub fn observe(&mut self, offsets: &[Offset]) {
        if offsets.len() != self.offsets.len() {
            return;
        }
        self.observations += 1;
        let n = self.observations;
        for (mean, sample) in self.offsets.iter_mut().zip(offsets) {
            mean.dx = fold_weighted(mean.dx, n, sample.dx);
            mean.dy = fold_weighted(mean.dy, n, sample.dy);
        }
    }
}

/// One raw observation used by nearest-neighbour prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSample {
    pub source_name: String,
    pub target_name: String,
    pub source_category: NodeCategory,
    pub target_category: NodeCategory,
    pub offset: Offset,
    #[serde(default)]
    pub source_port: usize,
    #[serde(default)]
    pub target_port: usize,
}

/// Vertical order of the sources wired into a node, listed by input port,
/// as seen on canvases where port order and Y order agreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortOrderPattern {
    pub sources: Vec<String>,
    pub observations: u64,
}

impl PortOrderPattern {
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            observations: 1,
        }
    }

    /// Counts a repeat of the same order. A different order is ignored.
    pub fn observe(&mut self, sources: &[String]) -> bool {
        if self.sources != sources {
            return false;
        }
        self.observations += 1;
        true
    }

    pub fn learned(&self) -> Option<Learned<&[String]>> {
        (self.observations > 0 && !self.sources.is_empty()).then(|| Learned {
            value: self.sources.as_slice(),
            confidence: sample_confidence(self.observations),
            samples: self.observations as usize,
        })
    }
}

/// Vertical spacing between stacked input parameters of one name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputGroupPattern {
    pub spacing: ScalarWindow,
    /// Largest group seen.
    pub typical_count: usize,
}

impl InputGroupPattern {
    pub fn new(spacing: f64, count: usize) -> Self {
        Self {
            spacing: ScalarWindow::with_sample(spacing),
            typical_count: count,
        }
    }

    pub fn observe(&mut self, spacing: f64, count: usize, cap: usize) {
        self.spacing.push(spacing, cap);
        self.typical_count = self.typical_count.max(count);
    }
}

/// X spacing along a straight chain of single-output nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePattern {
    pub names: Vec<String>,
    /// One mean gap per link, so always one shorter than `names`.
    pub spacings: Vec<f64>,
    pub observations: u64,
}

impl SequencePattern {
    pub fn new(names: Vec<String>, spacings: Vec<f64>) -> Self {
        Self {
            names,
            spacings,
            observations: 1,
        }
    }

    pub fn key(&self) -> String {
        self.names.join("->")
    }

    pub fn is_populated(&self) -> bool {
        self.observations > 0 && self.names.len() >= 2 && self.spacings.len() + 1 == self.names.len()
    }

    pub fn observe(&mut self, spacings: &[f64]) {
        if spacings.len() != self.spacings.len() {
            return;
        }
        self.observations += 1;
        let n = self.observations;
        for (mean, sample) in self.spacings.iter_mut().zip(spacings) {
            *mean = fold_weighted(*mean, n, *sample);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub nodes: u64,
    pub names: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSession {
    pub session_id: u64,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub patterns_updated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub created_at: u64,
    pub updated_at: u64,
    pub total_sessions: u64,
    pub total_nodes_learned: u64,
}
