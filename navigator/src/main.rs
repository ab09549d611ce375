//! deck-navigator - gesture-to-action pipeline for flashcard navigation.
//!
//! Reads landmark frames over an s-expression IPC channel (stdin/stdout or
//! a Unix socket) and emits navigation events, or replays a recorded CSV
//! session and reports classifier accuracy.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use deck_navigator::config::NavigatorConfig;
use deck_navigator::gesture::{GesturePipeline, Sensitivity};
use deck_navigator::ipc;
use deck_navigator::recording;
use deck_navigator::state::NavigatorState;
use deck_navigator::store::{FileStore, KeyValueStore, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "deck-navigator", about = "Gesture navigation for flashcard decks")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/deck-navigator/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persistent store file (default: $XDG_DATA_HOME/deck-navigator/store.json)
    #[arg(long, conflicts_with = "ephemeral")]
    store: Option<PathBuf>,

    /// Keep sensitivity and calibration in memory only
    #[arg(long)]
    ephemeral: bool,

    /// Serve IPC on a Unix socket instead of stdin/stdout
    #[arg(long, conflicts_with = "replay")]
    socket: Option<PathBuf>,

    /// Replay a recorded landmark CSV and print an evaluation report
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Frame rate assumed when replaying
    #[arg(long, requires = "replay")]
    fps: Option<f64>,

    /// Sensitivity for this run, in [0, 1] (not persisted)
    #[arg(long)]
    sensitivity: Option<Sensitivity>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("deck-navigator {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deck_navigator=info".into()),
        )
        .init();

    info!("deck-navigator v{} starting", env!("CARGO_PKG_VERSION"));

    let config = NavigatorConfig::load_or_default(cli.config.as_deref())?;

    if let Some(path) = cli.replay {
        return run_replay(&config, &path, cli.fps, cli.sensitivity);
    }

    let store: Box<dyn KeyValueStore> = if cli.ephemeral {
        info!("using in-memory store");
        Box::new(MemoryStore::new())
    } else {
        let path = cli
            .store
            .or_else(|| config.store_path.clone())
            .unwrap_or_else(FileStore::default_path);
        Box::new(FileStore::open(&path).with_context(|| format!("failed to open store {:?}", path))?)
    };

    let mut state = NavigatorState::new(config, store);
    if let Some(s) = cli.sensitivity {
        info!(sensitivity = %s, "sensitivity override");
        state.pipeline.set_sensitivity(s);
    }

    match cli.socket {
        Some(path) => ipc::serve_socket(&mut state, &path),
        None => ipc::serve_stdio(&mut state),
    }
}

fn run_replay(
    config: &NavigatorConfig,
    path: &std::path::Path,
    fps: Option<f64>,
    sensitivity: Option<Sensitivity>,
) -> anyhow::Result<()> {
    let frames = recording::load_recording(path)?;
    let fps = fps.unwrap_or(config.replay.fps);
    anyhow::ensure!(fps.is_finite() && fps > 0.0, "fps must be positive, got {}", fps);

    let mut pipeline = GesturePipeline::new(config.pipeline());
    pipeline.set_sensitivity(sensitivity.unwrap_or_default());

    let report = recording::replay(&frames, &mut pipeline, fps);
    println!("replayed {} frames at {} fps", report.frames, fps);
    println!(
        "{} actions dispatched, {} refused, {} gesture changes",
        report.actions.len(),
        report.refused,
        report.gesture_changes
    );
    for a in &report.actions {
        println!("  {:>8.0} ms  {}", a.timestamp_ms, a.action.as_str());
    }
    println!();
    print!("{}", report.confusion);
    Ok(())
}
