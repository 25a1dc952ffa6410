use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    pub default_spacing_x: f64,
    pub default_spacing_y: f64,
    pub row_gap: f64,
    pub cluster_gap: f64,
    pub default_node_width: f64,
    pub default_node_height: f64,
    pub port_spread_ratio: f64,
    pub min_column_gap: f64,
    pub min_overlap_gap: f64,
    pub move_threshold: f64,
    pub learned_confidence_threshold: f64,
    pub knn_confidence_threshold: f64,
    pub knn_k: usize,
    pub min_level_samples: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            default_spacing_x: 150.0,
            default_spacing_y: 0.0,
            row_gap: 80.0,
            cluster_gap: 150.0,
            default_node_width: 100.0,
            default_node_height: 50.0,
            port_spread_ratio: 0.8,
            min_column_gap: 40.0,
            min_overlap_gap: 20.0,
            move_threshold: 5.0,
            learned_confidence_threshold: 0.6,
            knn_confidence_threshold: 0.5,
            knn_k: 5,
            min_level_samples: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossingConfig {
    pub max_sweeps: usize,
    pub max_swap_iterations: usize,
}

impl Default for CrossingConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 3,
            max_swap_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnConfig {
    /// Width of the X buckets in which vertical ordering is observed.
    pub x_bucket: f64,
    /// Vertical tolerance under which a fan-out is labelled centered.
    pub same_row_tolerance: f64,
    pub max_template_nodes: usize,
    pub template_depth: usize,
    pub max_subgraphs_per_root: usize,
    pub dominance_margin: f64,
    pub min_dominance_samples: u64,
    /// Chains of single-output nodes shorter than this are not recorded.
    pub min_chain_length: usize,
    pub max_chain_length: usize,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            x_bucket: 150.0,
            same_row_tolerance: 15.0,
            max_template_nodes: 5,
            template_depth: 4,
            max_subgraphs_per_root: 64,
            dominance_margin: 1.2,
            min_dominance_samples: 2,
            min_chain_length: 3,
            max_chain_length: 5,
        }
    }
}

/// Retention caps for every bounded collection in the pattern store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreLimits {
    pub pair_window: usize,
    pub connection_window: usize,
    pub global_window: usize,
    pub level_window: usize,
    pub branch_window: usize,
    pub max_raw_samples: usize,
    pub max_templates: usize,
    pub max_offset_patterns: usize,
    pub max_y_order_pairs: usize,
    pub max_sessions: usize,
    pub max_category_names: usize,
    pub max_sequences: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            pair_window: 100,
            connection_window: 100,
            global_window: 200,
            level_window: 100,
            branch_window: 50,
            max_raw_samples: 5000,
            max_templates: 500,
            max_offset_patterns: 5000,
            max_y_order_pairs: 10000,
            max_sessions: 10,
            max_category_names: 50,
            max_sequences: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub layout: LayoutConfig,
    pub crossing: CrossingConfig,
    pub learn: LearnConfig,
    pub limits: StoreLimits,
    pub container_names: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            crossing: CrossingConfig::default(),
            learn: LearnConfig::default(),
            limits: StoreLimits::default(),
            container_names: vec!["Group".to_string(), "Scribble".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfigFile>,
    crossing: Option<CrossingConfigFile>,
    learn: Option<LearnConfigFile>,
    limits: Option<StoreLimitsFile>,
    container_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    default_spacing_x: Option<f64>,
    default_spacing_y: Option<f64>,
    row_gap: Option<f64>,
    cluster_gap: Option<f64>,
    default_node_width: Option<f64>,
    default_node_height: Option<f64>,
    port_spread_ratio: Option<f64>,
    min_column_gap: Option<f64>,
    min_overlap_gap: Option<f64>,
    move_threshold: Option<f64>,
    learned_confidence_threshold: Option<f64>,
    knn_confidence_threshold: Option<f64>,
    knn_k: Option<usize>,
    min_level_samples: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CrossingConfigFile {
    max_sweeps: Option<usize>,
    max_swap_iterations: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LearnConfigFile {
    x_bucket: Option<f64>,
    same_row_tolerance: Option<f64>,
    max_template_nodes: Option<usize>,
    template_depth: Option<usize>,
    max_subgraphs_per_root: Option<usize>,
    dominance_margin: Option<f64>,
    min_dominance_samples: Option<u64>,
    min_chain_length: Option<usize>,
    max_chain_length: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoreLimitsFile {
    pair_window: Option<usize>,
    connection_window: Option<usize>,
    global_window: Option<usize>,
    level_window: Option<usize>,
    branch_window: Option<usize>,
    max_raw_samples: Option<usize>,
    max_templates: Option<usize>,
    max_offset_patterns: Option<usize>,
    max_y_order_pairs: Option<usize>,
    max_sessions: Option<usize>,
    max_category_names: Option<usize>,
    max_sequences: Option<usize>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Applies a JSON5 override document on top of the defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::default();
    let parsed: ConfigFile = json5::from_str(contents)?;

    if let Some(layout) = parsed.layout {
        let target = &mut config.layout;
        if let Some(v) = layout.default_spacing_x {
            target.default_spacing_x = v;
        }
        if let Some(v) = layout.default_spacing_y {
            target.default_spacing_y = v;
        }
        if let Some(v) = layout.row_gap {
            target.row_gap = v;
        }
        if let Some(v) = layout.cluster_gap {
            target.cluster_gap = v;
        }
        if let Some(v) = layout.default_node_width {
            target.default_node_width = v;
        }
        if let Some(v) = layout.default_node_height {
            target.default_node_height = v;
        }
        if let Some(v) = layout.port_spread_ratio {
            target.port_spread_ratio = v.clamp(0.0, 1.0);
        }
        if let Some(v) = layout.min_column_gap {
            target.min_column_gap = v;
        }
        if let Some(v) = layout.min_overlap_gap {
            target.min_overlap_gap = v;
        }
        if let Some(v) = layout.move_threshold {
            target.move_threshold = v;
        }
        if let Some(v) = layout.learned_confidence_threshold {
            target.learned_confidence_threshold = v;
        }
        if let Some(v) = layout.knn_confidence_threshold {
            target.knn_confidence_threshold = v;
        }
        if let Some(v) = layout.knn_k {
            target.knn_k = v.max(1);
        }
        if let Some(v) = layout.min_level_samples {
            target.min_level_samples = v.max(1);
        }
    }

    if let Some(crossing) = parsed.crossing {
        if let Some(v) = crossing.max_sweeps {
            config.crossing.max_sweeps = v;
        }
        if let Some(v) = crossing.max_swap_iterations {
            config.crossing.max_swap_iterations = v;
        }
    }

    if let Some(learn) = parsed.learn {
        let target = &mut config.learn;
        if let Some(v) = learn.x_bucket {
            target.x_bucket = v.max(1.0);
        }
        if let Some(v) = learn.same_row_tolerance {
            target.same_row_tolerance = v;
        }
        if let Some(v) = learn.max_template_nodes {
            target.max_template_nodes = v.max(2);
        }
        if let Some(v) = learn.template_depth {
            target.template_depth = v;
        }
        if let Some(v) = learn.max_subgraphs_per_root {
            target.max_subgraphs_per_root = v;
        }
        if let Some(v) = learn.dominance_margin {
            target.dominance_margin = v.max(1.0);
        }
        if let Some(v) = learn.min_dominance_samples {
            target.min_dominance_samples = v;
        }
        if let Some(v) = learn.min_chain_length {
            target.min_chain_length = v.max(2);
        }
        if let Some(v) = learn.max_chain_length {
            target.max_chain_length = v;
        }
    }

    if let Some(limits) = parsed.limits {
        let target = &mut config.limits;
        if let Some(v) = limits.pair_window {
            target.pair_window = v.max(1);
        }
        if let Some(v) = limits.connection_window {
            target.connection_window = v.max(1);
        }
        if let Some(v) = limits.global_window {
            target.global_window = v.max(1);
        }
        if let Some(v) = limits.level_window {
            target.level_window = v.max(1);
        }
        if let Some(v) = limits.branch_window {
            target.branch_window = v.max(1);
        }
        if let Some(v) = limits.max_raw_samples {
            target.max_raw_samples = v;
        }
        if let Some(v) = limits.max_templates {
            target.max_templates = v;
        }
        if let Some(v) = limits.max_offset_patterns {
            target.max_offset_patterns = v;
        }
        if let Some(v) = limits.max_y_order_pairs {
            target.max_y_order_pairs = v;
        }
        if let Some(v) = limits.max_sessions {
            target.max_sessions = v;
        }
        if let Some(v) = limits.max_category_names {
            target.max_category_names = v;
        }
        if let Some(v) = limits.max_sequences {
            target.max_sequences = v;
        }
    }

    if let Some(names) = parsed.container_names {
        config.container_names = names;
    }

    Ok(config)
}
