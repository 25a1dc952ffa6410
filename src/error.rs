use thiserror::Error;

/// Failures surfaced by learning and layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("snapshot contains no nodes")]
    NoNodes,
    #[error("not enough data: {nodes} usable node(s), at least 2 are required")]
    InsufficientData { nodes: usize },
}

/// Failures surfaced by the pattern store's persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pattern store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("pattern store document is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("pattern store version {found:?} is not supported (expected {expected})")]
    IncompatibleVersion { found: Option<u64>, expected: u32 },
}
