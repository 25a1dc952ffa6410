#[cfg(feature = "cli")]
pub mod cli;
pub mod classify;
pub mod config;
pub mod crossing;
pub mod error;
pub mod graph;
pub mod ir;
pub mod layout;
pub mod predict;
pub mod store;
pub mod topology;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{EngineConfig, load_config};
pub use error::{EngineError, StoreError};
pub use graph::CanvasGraph;
pub use ir::{CanvasNode, CanvasSnapshot, CanvasWire, NodeCategory, Offset, Point};
pub use layout::{LayoutReport, LayoutRequest, compute_layout};
pub use store::{LearnSummary, PatternStore};
