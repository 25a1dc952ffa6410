//! Persistent, bounded statistics learned from observed canvases.

mod learn;
mod patterns;
mod persist;

use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{EngineConfig, LearnConfig, StoreLimits};
use crate::graph::CanvasGraph;
use crate::ir::{ConnectionKind, NodeCategory, Offset};

pub use learn::{LearnSummary, PairConfidence, RootedSubgraph, rooted_subgraphs};
pub use patterns::{
    CategoryStats, FanLayout, FanPattern, FanShape, InputGroupPattern, Learned, LearningSession,
    LevelHistogram, OffsetWindow, OrderCounter, PairSample, PortOrderPattern, RunningMean,
    ScalarWindow, SequencePattern, ShapeCounts, StoreMetadata, SubgraphTemplate, VerticalOrder,
    recency_weighted_mean, sample_confidence,
};
pub use persist::{STORE_VERSION, StoreDocument};

/// A learned subgraph template located in a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMatch {
    pub key: String,
    /// Matched node ids, root first, aligned with `offsets`.
    pub members: Vec<String>,
    pub offsets: Vec<Offset>,
    pub confidence: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub version: u32,
    pub created_at: u64,
    pub updated_at: u64,
    pub total_sessions: u64,
    pub total_nodes_learned: u64,
    pub offset_patterns: usize,
    pub connection_kinds: usize,
    pub branching_patterns: usize,
    pub merging_patterns: usize,
    pub level_names: usize,
    pub level_transitions: usize,
    pub y_order_pairs: usize,
    pub port_orders: usize,
    pub input_groups: usize,
    pub sequences: usize,
    pub templates: usize,
    pub raw_samples: usize,
    pub recent_sessions: Vec<LearningSession>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternStore {
    limits: StoreLimits,
    meta: StoreMetadata,
    offsets: BTreeMap<(String, String), OffsetWindow>,
    connection: BTreeMap<ConnectionKind, OffsetWindow>,
    branching: BTreeMap<(String, usize), FanPattern>,
    merging: BTreeMap<(String, usize), FanPattern>,
    level_by_name: BTreeMap<String, LevelHistogram>,
    level_by_category: BTreeMap<NodeCategory, LevelHistogram>,
    level_spacing: BTreeMap<(usize, usize), ScalarWindow>,
    y_order_by_name: BTreeMap<(String, String), OrderCounter>,
    y_order_by_category: BTreeMap<(NodeCategory, NodeCategory), OrderCounter>,
    port_order: BTreeMap<String, PortOrderPattern>,
    input_groups: BTreeMap<String, InputGroupPattern>,
    sequences: BTreeMap<String, SequencePattern>,
    templates: BTreeMap<String, SubgraphTemplate>,
    raw_samples: Vec<PairSample>,
    global: Option<OffsetWindow>,
    cluster_gap: Option<RunningMean>,
    category_stats: BTreeMap<NodeCategory, CategoryStats>,
    sessions: Vec<LearningSession>,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl PatternStore {
    pub fn new(limits: StoreLimits) -> Self {
        let now = now_unix();
        Self {
            limits,
            meta: StoreMetadata {
                created_at: now,
                updated_at: now,
                ..StoreMetadata::default()
            },
            offsets: BTreeMap::new(),
            connection: BTreeMap::new(),
            branching: BTreeMap::new(),
            merging: BTreeMap::new(),
            level_by_name: BTreeMap::new(),
            level_by_category: BTreeMap::new(),
            level_spacing: BTreeMap::new(),
            y_order_by_name: BTreeMap::new(),
            y_order_by_category: BTreeMap::new(),
            port_order: BTreeMap::new(),
            input_groups: BTreeMap::new(),
            sequences: BTreeMap::new(),
            templates: BTreeMap::new(),
            raw_samples: Vec::new(),
            global: None,
            cluster_gap: None,
            category_stats: BTreeMap::new(),
            sessions: Vec::new(),
        }
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::new(config.limits.clone())
    }

    /// Adopts the retention caps of `config`. They take effect on the next
    /// learn or save.
    pub fn configure(&mut self, config: &EngineConfig) {
        self.limits = config.limits.clone();
    }

    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.meta
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
            && self.connection.is_empty()
            && self.raw_samples.is_empty()
            && self.templates.is_empty()
            && self.global.is_none()
    }

    pub fn offset_for(&self, source: &str, target: &str) -> Option<Learned<Offset>> {
        self.offsets
            .get(&(source.to_string(), target.to_string()))
            .and_then(OffsetWindow::learned)
    }

    pub fn connection_spacing_for(&self, kind: ConnectionKind) -> Option<Learned<Offset>> {
        self.connection.get(&kind).and_then(OffsetWindow::learned)
    }

    pub fn branching_spacing_for(&self, name: &str, fan_out: usize) -> Option<Learned<FanLayout>> {
        self.branching
            .get(&(name.to_string(), fan_out))
            .and_then(FanPattern::learned)
    }

    pub fn merging_spacing_for(&self, name: &str, fan_in: usize) -> Option<Learned<FanLayout>> {
        self.merging
            .get(&(name.to_string(), fan_in))
            .and_then(FanPattern::learned)
    }

    pub fn level_transition_spacing(&self, from: usize, to: usize) -> Option<Learned<f64>> {
        self.level_spacing.get(&(from, to)).and_then(ScalarWindow::learned)
    }

    pub fn dominant_level_for_name(&self, name: &str) -> Option<Learned<usize>> {
        self.level_by_name.get(name).and_then(LevelHistogram::dominant)
    }

    pub fn dominant_level_for_category(&self, category: NodeCategory) -> Option<Learned<usize>> {
        self.level_by_category
            .get(&category)
            .and_then(LevelHistogram::dominant)
    }

    pub fn average_level_for_name(&self, name: &str) -> Option<f64> {
        self.level_by_name.get(name).and_then(LevelHistogram::average)
    }

    /// Whether `first` is learned to sit above or below `second` in a shared
    /// column. `None` unless one order dominates under `rules`.
    pub fn y_order_preference(
        &self,
        first: &str,
        second: &str,
        rules: &LearnConfig,
    ) -> Option<Learned<VerticalOrder>> {
        if first == second {
            return None;
        }
        let (key, flipped) = ordered_key(first.to_string(), second.to_string());
        let counter = self.y_order_by_name.get(&key)?;
        resolve_order(counter, flipped, rules)
    }

    pub fn y_order_preference_by_category(
        &self,
        first: NodeCategory,
        second: NodeCategory,
        rules: &LearnConfig,
    ) -> Option<Learned<VerticalOrder>> {
        if first == second {
            return None;
        }
        let (key, flipped) = ordered_key(first, second);
        let counter = self.y_order_by_category.get(&key)?;
        resolve_order(counter, flipped, rules)
    }

    /// Source names in the input-port order learned for `target`.
    pub fn port_order_for(&self, target: &str) -> Option<Learned<&[String]>> {
        self.port_order.get(target).and_then(PortOrderPattern::learned)
    }

    /// Top-to-top spacing of stacked input parameters named `name`.
    pub fn input_group_spacing(&self, name: &str) -> Option<Learned<f64>> {
        self.input_groups
            .get(name)
            .and_then(|group| group.spacing.learned())
    }

    /// Per-link X spacing for a chain of `names`. An exact chain wins;
    /// otherwise the most observed longer chain starting with `names`.
    pub fn sequence_spacing(&self, names: &[&str]) -> Option<Learned<&[f64]>> {
        if names.len() < 2 {
            return None;
        }
        let extends = |pattern: &SequencePattern| {
            pattern.names.len() >= names.len()
                && pattern.names.iter().zip(names).all(|(stored, name)| stored == name)
        };
        let pattern = self.sequences.get(&names.join("->")).or_else(|| {
            self.sequences
                .values()
                .filter(|pattern| extends(pattern))
                .max_by_key(|pattern| pattern.observations)
        })?;
        if !pattern.is_populated() {
            return None;
        }
        Some(Learned {
            value: &pattern.spacings[..names.len() - 1],
            confidence: sample_confidence(pattern.observations),
            samples: pattern.observations as usize,
        })
    }
    pub fn template(&self, key: &str) -> Option<&SubgraphTemplate> {
        self.templates.get(key)
    }

    pub fn templates(&self) -> impl Iterator<Item = &SubgraphTemplate> {
        self.templates.values()
    }

    /// Learned templates present in `graph`, at most one per source node and
    /// never sharing a node. Only templates at or above the configured
    /// confidence threshold are considered.
    pub fn matching_templates(&self, graph: &CanvasGraph, config: &EngineConfig) -> Vec<TemplateMatch> {
        let mut matches = Vec::new();
        if self.templates.is_empty() {
            return matches;
        }
        let threshold = config.layout.learned_confidence_threshold;
        let mut used: HashSet<String> = HashSet::new();
        for root in graph.iter() {
            if !graph.incoming(&root.id).is_empty() || graph.outgoing(&root.id).is_empty() {
                continue;
            }
            let mut best: Option<(usize, u64, TemplateMatch)> = None;
            for candidate in rooted_subgraphs(graph, &root.id, &config.learn) {
                if candidate.members.iter().any(|id| used.contains(id)) {
                    continue;
                }
                let key = candidate.key(graph);
                let Some(template) = self.templates.get(&key) else {
                    continue;
                };
                if template.edges != candidate.edges || template.offsets.len() != candidate.members.len() {
                    continue;
                }
                let confidence = sample_confidence(template.observations);
                if confidence < threshold {
                    continue;
                }
                let rank = (candidate.members.len(), template.observations);
                if best.as_ref().is_none_or(|(len, obs, _)| rank > (*len, *obs)) {
                    best = Some((
                        rank.0,
                        rank.1,
                        TemplateMatch {
                            key,
                            members: candidate.members.clone(),
                            offsets: template.offsets.clone(),
                            confidence,
                            samples: template.observations as usize,
                        },
                    ));
                }
            }
            if let Some((_, _, found)) = best {
                used.extend(found.members.iter().cloned());
                matches.push(found);
            }
        }
        matches
    }

    pub fn global_offset(&self) -> Option<Learned<Offset>> {
        self.global.as_ref().and_then(OffsetWindow::learned)
    }

    pub fn cluster_gap(&self) -> Option<Learned<f64>> {
        self.cluster_gap.as_ref().and_then(RunningMean::learned)
    }

    pub fn raw_samples(&self) -> &[PairSample] {
        &self.raw_samples
    }

    pub fn category_stats(&self, category: NodeCategory) -> Option<&CategoryStats> {
        self.category_stats.get(&category)
    }

    pub fn sessions(&self) -> &[LearningSession] {
        &self.sessions
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            version: STORE_VERSION,
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            total_sessions: self.meta.total_sessions,
            total_nodes_learned: self.meta.total_nodes_learned,
            offset_patterns: self.offsets.len(),
            connection_kinds: self.connection.len(),
            branching_patterns: self.branching.len(),
            merging_patterns: self.merging.len(),
            level_names: self.level_by_name.len(),
            level_transitions: self.level_spacing.len(),
            y_order_pairs: self.y_order_by_name.len(),
            port_orders: self.port_order.len(),
            input_groups: self.input_groups.len(),
            sequences: self.sequences.len(),
            templates: self.templates.len(),
            raw_samples: self.raw_samples.len(),
            recent_sessions: self.sessions.clone(),
        }
    }

    /// Drops every learned pattern, keeping limits.
    pub fn clear(&mut self) {
        *self = Self::new(self.limits.clone());
    }

    /// Truncates every bounded collection to its cap.
    pub(crate) fn enforce_limits(&mut self) {
        let limits = self.limits.clone();
        for window in self.offsets.values_mut() {
            window.enforce_cap(limits.pair_window);
        }
        for window in self.connection.values_mut() {
            window.enforce_cap(limits.connection_window);
        }
        for pattern in self.branching.values_mut().chain(self.merging.values_mut()) {
            pattern.spacing.enforce_cap(limits.branch_window);
        }
        for window in self.level_spacing.values_mut() {
            window.enforce_cap(limits.level_window);
        }
        for group in self.input_groups.values_mut() {
            group.spacing.enforce_cap(limits.branch_window);
        }
        if let Some(global) = self.global.as_mut() {
            global.enforce_cap(limits.global_window);
        }
        for stats in self.category_stats.values_mut() {
            while stats.names.len() > limits.max_category_names {
                if stats.names.pop_last().is_none() {
                    break;
                }
            }
        }

        evict_least_observed(&mut self.offsets, limits.max_offset_patterns, |w| {
            w.observations()
        });
        evict_least_observed(&mut self.branching, limits.max_offset_patterns, |p| {
            p.spacing.observations()
        });
        evict_least_observed(&mut self.merging, limits.max_offset_patterns, |p| {
            p.spacing.observations()
        });
        evict_least_observed(&mut self.level_by_name, limits.max_offset_patterns, |h| h.total);
        evict_least_observed(&mut self.level_spacing, limits.max_offset_patterns, |w| {
            w.observations()
        });
        evict_least_observed(&mut self.y_order_by_name, limits.max_y_order_pairs, |c| c.total());
        evict_least_observed(&mut self.y_order_by_category, limits.max_y_order_pairs, |c| c.total());
        evict_least_observed(&mut self.port_order, limits.max_offset_patterns, |p| p.observations);
        evict_least_observed(&mut self.input_groups, limits.max_offset_patterns, |g| {
            g.spacing.observations()
        });
        evict_least_observed(&mut self.sequences, limits.max_sequences, |p| p.observations);
        evict_least_observed(&mut self.templates, limits.max_templates, |t| t.observations);
        patterns::truncate_front(&mut self.raw_samples, limits.max_raw_samples);
        patterns::truncate_front(&mut self.sessions, limits.max_sessions);
    }
}

fn resolve_order(counter: &OrderCounter, flipped: bool, rules: &LearnConfig) -> Option<Learned<VerticalOrder>> {
    let preference = counter.preference(rules.dominance_margin, rules.min_dominance_samples)?;
    if !flipped {
        return Some(preference);
    }
    Some(preference.map(|order| match order {
        VerticalOrder::Above => VerticalOrder::Below,
        VerticalOrder::Below => VerticalOrder::Above,
    }))
}

/// Sorted pair key, plus whether the arguments were swapped to build it.
fn ordered_key<T: Ord>(first: T, second: T) -> ((T, T), bool) {
    if first <= second {
        ((first, second), false)
    } else {
        ((second, first), true)
    }
}

/// Removes the entries with the fewest observations until `cap` remain.
fn evict_least_observed<K: Ord + Clone, V>(
    map: &mut BTreeMap<K, V>,
    cap: usize,
    observations: impl Fn(&V) -> u64,
) {
    if map.len() <= cap {
        return;
    }
    let mut ranked: Vec<(u64, K)> = map
        .iter()
        .map(|(key, value)| (observations(value), key.clone()))
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let excess = map.len() - cap;
    for (_, key) in ranked.into_iter().take(excess) {
        map.remove(&key);
    }
}
