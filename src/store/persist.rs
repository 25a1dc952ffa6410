use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PatternStore;
use super::patterns::{
    CategoryStats, FanPattern, InputGroupPattern, LearningSession, LevelHistogram, OffsetWindow,
    OrderCounter, PairSample, PortOrderPattern, RunningMean, ScalarWindow, SequencePattern,
    StoreMetadata, SubgraphTemplate,
};
use crate::config::StoreLimits;
use crate::error::StoreError;
use crate::ir::{ConnectionKind, NodeCategory};

/// Schema version written to, and required from, every store document.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetEntry {
    pub source: String,
    pub target: String,
    pub window: OffsetWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub kind: ConnectionKind,
    pub window: OffsetWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanEntry {
    pub name: String,
    pub count: usize,
    pub pattern: FanPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameLevelEntry {
    pub name: String,
    pub histogram: LevelHistogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLevelEntry {
    pub category: NodeCategory,
    pub histogram: LevelHistogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpacingEntry {
    pub from: usize,
    pub to: usize,
    pub window: ScalarWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameOrderEntry {
    pub first: String,
    pub second: String,
    pub counter: OrderCounter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOrderEntry {
    pub first: NodeCategory,
    pub second: NodeCategory,
    pub counter: OrderCounter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortOrderEntry {
    pub target: String,
    pub pattern: PortOrderPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputGroupEntry {
    pub name: String,
    pub group: InputGroupPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStatsEntry {
    pub category: NodeCategory,
    pub stats: CategoryStats,
}

/// Serialized form of a [`PatternStore`]. Every map is flattened into a
/// sorted list so the output is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub version: u32,
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub offsets: Vec<OffsetEntry>,
    #[serde(default)]
    pub connection_spacing: Vec<ConnectionEntry>,
    #[serde(default)]
    pub branching: Vec<FanEntry>,
    #[serde(default)]
    pub merging: Vec<FanEntry>,
    #[serde(default)]
    pub level_by_name: Vec<NameLevelEntry>,
    #[serde(default)]
    pub level_by_category: Vec<CategoryLevelEntry>,
    #[serde(default)]
    pub level_spacing: Vec<LevelSpacingEntry>,
    #[serde(default)]
    pub y_order_by_name: Vec<NameOrderEntry>,
    #[serde(default)]
    pub y_order_by_category: Vec<CategoryOrderEntry>,
    #[serde(default)]
    pub port_order: Vec<PortOrderEntry>,
    #[serde(default)]
    pub input_groups: Vec<InputGroupEntry>,
    #[serde(default)]
    pub sequences: Vec<SequencePattern>,
    #[serde(default)]
    pub templates: Vec<SubgraphTemplate>,
    #[serde(default)]
    pub raw_samples: Vec<PairSample>,
    #[serde(default)]
    pub global_spacing: Option<OffsetWindow>,
    #[serde(default)]
    pub cluster_gap: Option<RunningMean>,
    #[serde(default)]
    pub category_stats: Vec<CategoryStatsEntry>,
    #[serde(default)]
    pub sessions: Vec<LearningSession>,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: Option<u64>,
}

impl PatternStore {
    /// Snapshot of the store with every collection truncated to its cap.
    pub fn to_document(&self) -> StoreDocument {
        let mut store = self.clone();
        store.enforce_limits();
        StoreDocument {
            version: STORE_VERSION,
            metadata: store.meta,
            offsets: store
                .offsets
                .into_iter()
                .map(|((source, target), window)| OffsetEntry { source, target, window })
                .collect(),
            connection_spacing: store
                .connection
                .into_iter()
                .map(|(kind, window)| ConnectionEntry { kind, window })
                .collect(),
            branching: store
                .branching
                .into_iter()
                .map(|((name, count), pattern)| FanEntry { name, count, pattern })
                .collect(),
            merging: store
                .merging
                .into_iter()
                .map(|((name, count), pattern)| FanEntry { name, count, pattern })
                .collect(),
            level_by_name: store
                .level_by_name
                .into_iter()
                .map(|(name, histogram)| NameLevelEntry { name, histogram })
                .collect(),
            level_by_category: store
                .level_by_category
                .into_iter()
                .map(|(category, histogram)| CategoryLevelEntry { category, histogram })
                .collect(),
            level_spacing: store
                .level_spacing
                .into_iter()
                .map(|((from, to), window)| LevelSpacingEntry { from, to, window })
                .collect(),
            y_order_by_name: store
                .y_order_by_name
                .into_iter()
                .map(|((first, second), counter)| NameOrderEntry { first, second, counter })
                .collect(),
            y_order_by_category: store
                .y_order_by_category
                .into_iter()
                .map(|((first, second), counter)| CategoryOrderEntry { first, second, counter })
                .collect(),
            port_order: store
                .port_order
                .into_iter()
                .map(|(target, pattern)| PortOrderEntry { target, pattern })
                .collect(),
            input_groups: store
                .input_groups
                .into_iter()
                .map(|(name, group)| InputGroupEntry { name, group })
                .collect(),
            sequences: store.sequences.into_values().collect(),
            templates: store.templates.into_values().collect(),
            raw_samples: store.raw_samples,
            global_spacing: store.global,
            cluster_gap: store.cluster_gap,
            category_stats: store
                .category_stats
                .into_iter()
                .map(|(category, stats)| CategoryStatsEntry { category, stats })
                .collect(),
            sessions: store.sessions,
        }
    }

    /// Rebuilds a store from `document`. Entries that carry no observations
    /// are dropped so no query can report a pattern without evidence.
    pub fn from_document(document: StoreDocument, limits: StoreLimits) -> Result<Self, StoreError> {
        if document.version != STORE_VERSION {
            return Err(StoreError::IncompatibleVersion {
                found: Some(u64::from(document.version)),
                expected: STORE_VERSION,
            });
        }
        let mut store = PatternStore::new(limits);
        store.meta = document.metadata;
        store.offsets = document
            .offsets
            .into_iter()
            .filter(|entry| entry.window.is_populated())
            .map(|entry| ((entry.source, entry.target), entry.window))
            .collect();
        store.connection = document
            .connection_spacing
            .into_iter()
            .filter(|entry| entry.window.is_populated())
            .map(|entry| (entry.kind, entry.window))
            .collect();
        store.branching = document
            .branching
            .into_iter()
            .filter(|entry| entry.count >= 2 && entry.pattern.spacing.is_populated())
            .map(|entry| ((entry.name, entry.count), entry.pattern))
            .collect();
        store.merging = document
            .merging
            .into_iter()
            .filter(|entry| entry.count >= 2 && entry.pattern.spacing.is_populated())
            .map(|entry| ((entry.name, entry.count), entry.pattern))
            .collect();
        store.level_by_name = document
            .level_by_name
            .into_iter()
            .filter(|entry| entry.histogram.total > 0)
            .map(|entry| (entry.name, entry.histogram))
            .collect();
        store.level_by_category = document
            .level_by_category
            .into_iter()
            .filter(|entry| entry.histogram.total > 0)
            .map(|entry| (entry.category, entry.histogram))
            .collect();
        store.level_spacing = document
            .level_spacing
            .into_iter()
            .filter(|entry| entry.window.is_populated())
            .map(|entry| ((entry.from, entry.to), entry.window))
            .collect();
        store.y_order_by_name = document
            .y_order_by_name
            .into_iter()
            .filter(|entry| entry.counter.total() > 0)
            .map(|entry| ((entry.first, entry.second), entry.counter))
            .collect();
        store.y_order_by_category = document
            .y_order_by_category
            .into_iter()
            .filter(|entry| entry.counter.total() > 0)
            .map(|entry| ((entry.first, entry.second), entry.counter))
            .collect();
        store.port_order = document
            .port_order
            .into_iter()
            .filter(|entry| entry.pattern.observations > 0 && entry.pattern.sources.len() >= 2)
            .map(|entry| (entry.target, entry.pattern))
            .collect();
        store.input_groups = document
            .input_groups
            .into_iter()
            .filter(|entry| entry.group.spacing.is_populated())
            .map(|entry| (entry.name, entry.group))
            .collect();
        store.sequences = document
            .sequences
            .into_iter()
            .filter(SequencePattern::is_populated)
            .map(|pattern| (pattern.key(), pattern))
            .collect();
        store.templates = document
            .templates
            .into_iter()
            .filter(|template| template.observations > 0 && template.names.len() == template.offsets.len())
            .map(|template| (template.key(), template))
            .collect();
        store.raw_samples = document.raw_samples;
        store.global = document.global_spacing.filter(OffsetWindow::is_populated);
        store.cluster_gap = document.cluster_gap.filter(|gap| gap.observations > 0);
        store.category_stats = document
            .category_stats
            .into_iter()
            .map(|entry| (entry.category, entry.stats))
            .collect();
        store.sessions = document.sessions;
        store.enforce_limits();
        Ok(store)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json(contents: &str, limits: StoreLimits) -> Result<Self, StoreError> {
        let header: VersionHeader = serde_json::from_str(contents)?;
        if header.version != Some(u64::from(STORE_VERSION)) {
            return Err(StoreError::IncompatibleVersion {
                found: header.version,
                expected: STORE_VERSION,
            });
        }
        let document: StoreDocument = serde_json::from_str(contents)?;
        Self::from_document(document, limits)
    }

    /// Writes the store next to `path` and renames it into place so a
    /// crash never leaves a half-written document.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let staging = staging_path(path);
        if let Err(err) = write_staging(&staging, &json).and_then(|()| std::fs::rename(&staging, path)) {
            let _ = std::fs::remove_file(&staging);
            return Err(err.into());
        }
        tracing::debug!(path = %path.display(), bytes = json.len(), "saved pattern store");
        Ok(())
    }

    pub fn load(path: &Path, limits: StoreLimits) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents, limits)
    }

    /// Loads the store at `path`, starting fresh when the file is missing,
    /// unreadable, corrupt, or written by an incompatible version.
    pub fn load_or_default(path: &Path, limits: StoreLimits) -> Self {
        match Self::load(path, limits.clone()) {
            Ok(store) => store,
            Err(StoreError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no pattern store yet; starting fresh");
                PatternStore::new(limits)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "discarding unusable pattern store; starting fresh"
                );
                PatternStore::new(limits)
            }
        }
    }
}

fn write_staging(staging: &Path, json: &str) -> std::io::Result<()> {
    let file = std::fs::File::create(staging)?;
    let mut writer = std::io::BufWriter::new(file);
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
