use crate::config::load_config;
use crate::ir::{CanvasSnapshot, Point};
use crate::layout::{LayoutRequest, compute_layout};
use crate::store::PatternStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE: &str = "layout-patterns.json";

#[derive(Parser, Debug)]
#[command(name = "cll", version, about = "Learn node placement from canvases and lay out new ones")]
pub struct Args {
    /// Pattern store file
    #[arg(short = 's', long = "store", global = true, default_value = DEFAULT_STORE)]
    pub store: PathBuf,

    /// Config JSON5 file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Learn placement patterns from a snapshot
    Learn {
        /// Snapshot JSON file or '-' for stdin
        input: PathBuf,

        /// Free-text label recorded with the session
        #[arg(short = 'l', long = "label")]
        label: Option<String>,
    },
    /// Propose new coordinates for a snapshot
    Layout {
        /// Snapshot JSON file or '-' for stdin
        input: PathBuf,

        /// Anchor X of the first cluster
        #[arg(long = "anchor-x", requires = "anchor_y")]
        anchor_x: Option<f64>,

        /// Anchor Y of the first cluster
        #[arg(long = "anchor-y", requires = "anchor_x")]
        anchor_y: Option<f64>,

        /// Print the moves without writing the snapshot
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Where to write the updated snapshot. Defaults to the input file.
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Print what the store has learned
    Summary,
    /// Forget everything in the store
    Reset,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_logging();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Learn { input, label } => {
            let mut snapshot = read_snapshot(&input)?;
            if label.is_some() {
                snapshot.label = label;
            }
            let mut store = PatternStore::load_or_default(&args.store, config.limits.clone());
            let summary = store.learn(&snapshot, &config)?;
            store
                .save(&args.store)
                .with_context(|| format!("Failed to write store {}", args.store.display()))?;
            print_json(&summary)?;
        }
        Command::Layout {
            input,
            anchor_x,
            anchor_y,
            dry_run,
            out,
        } => {
            let mut snapshot = read_snapshot(&input)?;
            let mut store = PatternStore::load_or_default(&args.store, config.limits.clone());
            store.configure(&config);
            let request = LayoutRequest {
                anchor: anchor_x.zip(anchor_y).map(|(x, y)| Point::new(x, y)),
                dry_run,
            };
            let report = compute_layout(&snapshot, &store, &config, &request)?;
            print_json(&report)?;
            if !dry_run {
                let target = out.unwrap_or(input);
                if target == Path::new("-") {
                    return Err(anyhow::anyhow!("Output path required when reading from stdin"));
                }
                report.apply_to(&mut snapshot);
                let json = serde_json::to_string_pretty(&snapshot)?;
                std::fs::write(&target, json + "\n")
                    .with_context(|| format!("Failed to write {}", target.display()))?;
            }
        }
        Command::Summary => {
            let store = PatternStore::load_or_default(&args.store, config.limits.clone());
            print_json(&store.summary())?;
        }
        Command::Reset => {
            let mut store = PatternStore::load_or_default(&args.store, config.limits.clone());
            store.clear();
            store
                .save(&args.store)
                .with_context(|| format!("Failed to write store {}", args.store.display()))?;
        }
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_snapshot(path: &Path) -> Result<CanvasSnapshot> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    let snapshot = serde_json::from_str(&content)
        .with_context(|| format!("Invalid snapshot {}", path.display()))?;
    Ok(snapshot)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
