//! camsentryd - multi-camera detection daemon
//!
//! Loads the camera configuration, starts one worker per active camera plus
//! the event drain, and runs until interrupted. Detected events land in the
//! SQLite event store with their annotated frames written next to it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use camsentry::{
    CapabilityRegistry, DaemonConfig, FilesystemObjectStore, Orchestrator, SqliteEventStore,
    StubModel,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "camsentryd", version, about = "Multi-camera detection daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "CAMSENTRY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = DaemonConfig::load(args.config.as_deref())?;
    log::info!(
        "loaded {} camera(s), db={}, frames={}",
        config.cameras.len(),
        config.db_path.display(),
        config.storage_root.display()
    );

    let store = SqliteEventStore::open(&config.db_path)
        .with_context(|| format!("open event store {}", config.db_path.display()))?;
    let objects = FilesystemObjectStore::new(&config.storage_root)?;

    let orchestrator = Orchestrator::new(
        config.settings.clone(),
        CapabilityRegistry::with_builtins(),
        Box::new(StubModel::new()),
        Box::new(store),
        Box::new(objects),
    );
    orchestrator.load_configurations(config.cameras)?;
    orchestrator.start()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::Relaxed);
    })
    .context("install signal handler")?;

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = orchestrator.get_aggregate_stats();
            log::info!(
                "health: cameras={}/{} frames={} events={} persisted={} dropped={}",
                stats.active_cameras,
                stats.total_cameras,
                stats.frames_processed,
                stats.total_events,
                stats.persisted_events,
                stats.dropped_results + stats.dropped_at_shutdown
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutdown requested");
    orchestrator.stop()?;
    Ok(())
}
