//! Nearest-neighbour offset prediction over raw samples, and placement
//! advice for a single new node.

use serde::Serialize;

use crate::config::EngineConfig;
use crate::ir::{ConnectionKind, NodeCategory, Offset, Point};
use crate::layout::SpacingBasis;
use crate::store::{PairSample, PatternStore};

const EXACT_PAIR_SCORE: f64 = 4.0;
const SOURCE_SCORE: f64 = 2.0;
const TARGET_SCORE: f64 = 1.5;
const CATEGORY_PAIR_SCORE: f64 = 1.0;
const GLOBAL_FALLBACK_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct OffsetQuery<'a> {
    pub source_name: &'a str,
    pub target_name: &'a str,
    pub source_category: NodeCategory,
    pub target_category: NodeCategory,
    /// Output and input port of the wire, when known.
    pub ports: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Neighbours,
    GlobalAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub offset: Offset,
    pub confidence: f64,
    pub neighbours: usize,
    pub source: PredictionSource,
}

/// Similarity tier of a stored sample to the query; zero means unrelated.
pub fn similarity(sample: &PairSample, query: &OffsetQuery<'_>) -> f64 {
    let source = sample.source_name == query.source_name;
    let target = sample.target_name == query.target_name;
    match (source, target) {
        (true, true) => EXACT_PAIR_SCORE,
        (true, false) => SOURCE_SCORE,
        (false, true) => TARGET_SCORE,
        (false, false)
            if sample.source_category == query.source_category
                && sample.target_category == query.target_category =>
        {
            CATEGORY_PAIR_SCORE
        }
        _ => 0.0,
    }
}

fn same_ports(sample: &PairSample, query: &OffsetQuery<'_>) -> bool {
    query.ports == Some((sample.source_port, sample.target_port))
}

/// Score-weighted mean of the `k` most similar samples. Falls back to the
/// global average offset at a fixed low confidence, and to `None` only when
/// the store has never seen a wire.
pub fn predict_offset(store: &PatternStore, query: &OffsetQuery<'_>, k: usize) -> Option<Prediction> {
    let mut scored: Vec<(f64, &PairSample)> = store
        .raw_samples()
        .iter()
        .rev()
        .filter_map(|sample| {
            let score = similarity(sample, query);
            (score > 0.0).then_some((score, sample))
        })
        .collect();
    // Stable: within a tier, samples on the same ports come first, then
    // newest first.
    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| same_ports(b.1, query).cmp(&same_ports(a.1, query)))
    });
    scored.truncate(k.max(1));

    if scored.is_empty() {
        let global = store.global_offset()?;
        return Some(Prediction {
            offset: global.value,
            confidence: GLOBAL_FALLBACK_CONFIDENCE,
            neighbours: 0,
            source: PredictionSource::GlobalAverage,
        });
    }

    let total: f64 = scored.iter().map(|(score, _)| score).sum();
    let dx = scored.iter().map(|(score, s)| score * s.offset.dx).sum::<f64>() / total;
    let dy = scored.iter().map(|(score, s)| score * s.offset.dy).sum::<f64>() / total;
    let top = scored[0].0;
    Some(Prediction {
        offset: Offset::new(dx, dy),
        confidence: (top / EXACT_PAIR_SCORE).min(1.0),
        neighbours: scored.len(),
        source: PredictionSource::Neighbours,
    })
}

/// A new node to be wired downstream of an existing anchor node.
#[derive(Debug, Clone, Copy)]
pub struct PlacementQuery<'a> {
    pub anchor_name: &'a str,
    pub anchor_category: NodeCategory,
    pub anchor_position: Point,
    pub name: &'a str,
    pub category: NodeCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlacementAdvice {
    pub point: Point,
    pub offset: Offset,
    pub confidence: f64,
    pub basis: SpacingBasis,
}

/// Proposes a position for one node placed after `query.anchor_name`.
pub fn suggest_placement(store: &PatternStore, config: &EngineConfig, query: &PlacementQuery<'_>) -> PlacementAdvice {
    let layout = &config.layout;
    let advise = |offset: Offset, confidence: f64, basis: SpacingBasis| PlacementAdvice {
        point: query.anchor_position.offset_by(offset),
        offset,
        confidence,
        basis,
    };

    let pairwise = store.offset_for(query.anchor_name, query.name);
    if let Some(learned) = pairwise.filter(|l| l.confidence >= layout.learned_confidence_threshold) {
        return advise(learned.value, learned.confidence, SpacingBasis::Pairwise);
    }

    let offset_query = OffsetQuery {
        source_name: query.anchor_name,
        target_name: query.name,
        source_category: query.anchor_category,
        target_category: query.category,
        ports: None,
    };
    if let Some(prediction) = predict_offset(store, &offset_query, layout.knn_k)
        .filter(|p| p.source == PredictionSource::Neighbours)
        .filter(|p| p.confidence >= layout.knn_confidence_threshold)
    {
        return advise(prediction.offset, prediction.confidence, SpacingBasis::NearestNeighbour);
    }

    let kind = ConnectionKind::between(query.anchor_category, query.category);
    if let Some(connection) = store.connection_spacing_for(kind) {
        return match pairwise {
            Some(weak) => {
                let offset = Offset::new(
                    connection.value.dx * 0.6 + weak.value.dx * 0.4,
                    connection.value.dy * 0.6 + weak.value.dy * 0.4,
                );
                let confidence = connection.confidence * 0.6 + weak.confidence * 0.4;
                advise(offset, confidence, SpacingBasis::ConnectionKind)
            }
            None => advise(connection.value, connection.confidence, SpacingBasis::ConnectionKind),
        };
    }

    if let Some(global) = store.global_offset() {
        return advise(global.value, global.confidence, SpacingBasis::Global);
    }

    advise(
        Offset::new(layout.default_spacing_x, layout.default_spacing_y),
        0.0,
        SpacingBasis::Default,
    )
}
