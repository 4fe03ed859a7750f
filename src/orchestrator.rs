//! The orchestrator: owns workers and the drain, exposes the control surface.
//!
//! Lifecycle is one-way: configure, `start`, then `stop`. Stop is
//! cooperative and bounded; a worker thread stuck in a blocking read is
//! logged and leaked rather than joined forever. Restarting after stop
//! requires a new orchestrator because the drain queue is consumed by the
//! drain thread.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::capability::CapabilityRegistry;
use crate::config::{CameraConfig, EngineSettings};
use crate::drain::{DrainProducer, DrainReport, EventDrain};
use crate::inference::{InferenceModel, SharedInference};
use crate::ingest::{FrameSource, RtspConfig, RtspSource, StubSource};
use crate::objectstore::ObjectStore;
use crate::stats::{AggregateStats, StatsAggregator};
use crate::storage::EventStore;
use crate::worker::{CameraWorker, CycleOutcome, WorkerStatus};
use crate::{ControlError, UseCase};

const JOIN_POLL: Duration = Duration::from_millis(10);
const CYCLE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Shared handles every worker cycle needs.
#[derive(Clone)]
pub struct SharedServices {
    pub inference: Arc<SharedInference>,
    pub drain: DrainProducer,
    pub stats: Arc<StatsAggregator>,
}

type SourceFactory =
    Box<dyn Fn(&CameraConfig, &EngineSettings) -> Result<Box<dyn FrameSource>> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

pub struct Orchestrator {
    settings: EngineSettings,
    registry: CapabilityRegistry,
    services: SharedServices,
    workers: Mutex<BTreeMap<String, Arc<CameraWorker>>>,
    source_factory: Mutex<SourceFactory>,
    drain: Mutex<Option<EventDrain>>,
    drain_stop: Arc<AtomicBool>,
    drain_handle: Mutex<Option<JoinHandle<DrainReport>>>,
    worker_handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    run_flag: Arc<AtomicBool>,
    phase: Mutex<Phase>,
}

impl Orchestrator {
    pub fn new(
        settings: EngineSettings,
        registry: CapabilityRegistry,
        model: Box<dyn InferenceModel>,
        store: Box<dyn EventStore>,
        objects: Box<dyn ObjectStore>,
    ) -> Self {
        let stats = Arc::new(StatsAggregator::new());
        let (producer, drain) = EventDrain::new(
            settings.queue_capacity,
            store,
            objects,
            Arc::clone(&stats),
            settings.project_id.clone(),
            settings.drain_grace,
        );
        let drain_stop = drain.stop_handle();
        let services = SharedServices {
            inference: Arc::new(SharedInference::new(model)),
            drain: producer,
            stats,
        };
        Self {
            settings,
            registry,
            services,
            workers: Mutex::new(BTreeMap::new()),
            source_factory: Mutex::new(Box::new(default_source_factory)),
            drain: Mutex::new(Some(drain)),
            drain_stop,
            drain_handle: Mutex::new(None),
            worker_handles: Mutex::new(Vec::new()),
            run_flag: Arc::new(AtomicBool::new(false)),
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Replace how frame sources are built from camera configs. Mostly for
    /// tests that inject scripted sources.
    pub fn set_source_factory<F>(&self, factory: F)
    where
        F: Fn(&CameraConfig, &EngineSettings) -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        *self.lock(&self.source_factory) = Box::new(factory);
    }

    pub fn services(&self) -> &SharedServices {
        &self.services
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate camera configs and create a worker for each. May be called
    /// repeatedly before `start` to add cameras.
    pub fn load_configurations(&self, cameras: Vec<CameraConfig>) -> Result<()> {
        if *self.lock(&self.phase) != Phase::Idle {
            return Err(anyhow!("cameras can only be loaded before start"));
        }
        let factory = self.lock(&self.source_factory);
        let mut workers = self.lock(&self.workers);
        for config in cameras {
            config.validate()?;
            if workers.contains_key(&config.camera_id) {
                return Err(anyhow!("duplicate camera_id: {}", config.camera_id));
            }
            let source = (*factory)(&config, &self.settings)?;
            let worker = Arc::new(CameraWorker::new(config, source, &self.settings));
            workers.insert(worker.camera_id().to_string(), worker);
        }
        let total = workers.len();
        let active = workers.values().filter(|w| w.is_active()).count();
        self.services.stats.set_camera_counts(total, active);
        Ok(())
    }

    /// Start the drain and every active camera. A camera that fails to
    /// initialize or connect is logged and skipped; the rest still start.
    pub fn start(&self) -> Result<()> {
        {
            let mut phase = self.lock(&self.phase);
            match *phase {
                Phase::Idle => *phase = Phase::Running,
                Phase::Running => return Err(anyhow!("orchestrator is already running")),
                Phase::Stopped => return Err(anyhow!("orchestrator cannot be restarted")),
            }
        }

        if let Err(e) = self.services.inference.warm_up() {
            log::warn!("inference warm-up failed: {:#}", e);
        }

        let drain = self
            .lock(&self.drain)
            .take()
            .ok_or_else(|| anyhow!("event drain already consumed"))?;
        *self.lock(&self.drain_handle) = Some(drain.spawn()?);

        self.run_flag.store(true, Ordering::Relaxed);

        let workers: Vec<Arc<CameraWorker>> = self.lock(&self.workers).values().cloned().collect();
        let mut started = 0usize;
        for worker in workers {
            if !worker.is_active() {
                log::info!("camera {}: inactive, not started", worker.camera_id());
                continue;
            }
            if let Err(e) = worker.initialize(&self.registry) {
                log::error!("camera {}: initialize failed: {:#}", worker.camera_id(), e);
                continue;
            }
            if let Err(e) = worker.connect() {
                log::error!("camera {}: connect failed: {:#}", worker.camera_id(), e);
                continue;
            }
            worker.begin_running();

            let services = self.services.clone();
            let run_flag = Arc::clone(&self.run_flag);
            let interval = self.settings.frame_interval();
            let thread_worker = Arc::clone(&worker);
            let name = format!("camera-{}", worker.camera_id());
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(thread_worker, services, run_flag, interval))
                .map_err(|e| anyhow!("spawn {}: {}", name, e))?;
            self.lock(&self.worker_handles)
                .push((worker.camera_id().to_string(), handle));
            started += 1;
        }

        log::info!("orchestrator started with {} camera(s)", started);
        Ok(())
    }

    /// Stop workers, then the drain, with bounded joins throughout.
    /// Idempotent.
    pub fn stop(&self) -> Result<()> {
        {
            let mut phase = self.lock(&self.phase);
            if *phase != Phase::Running {
                return Ok(());
            }
            *phase = Phase::Stopped;
        }

        self.run_flag.store(false, Ordering::Relaxed);
        for worker in self.lock(&self.workers).values() {
            worker.stop();
        }

        let handles: Vec<(String, JoinHandle<()>)> =
            self.lock(&self.worker_handles).drain(..).collect();
        for (camera_id, handle) in handles {
            if join_with_timeout(handle, self.settings.worker_join_timeout).is_none() {
                log::warn!(
                    "camera {}: worker thread did not stop in {:?}, leaking it",
                    camera_id,
                    self.settings.worker_join_timeout
                );
            }
        }

        self.drain_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.lock(&self.drain_handle).take() {
            let timeout = self.settings.drain_grace + self.settings.worker_join_timeout;
            match join_with_timeout(handle, timeout) {
                Some(report) => log::info!(
                    "event drain finished: {} persisted, {} failed, {} dropped at shutdown",
                    report.persisted_events,
                    report.failed_items,
                    report.dropped_at_shutdown
                ),
                None => log::warn!("event drain did not stop in {:?}, leaking it", timeout),
            }
        }

        log::info!("orchestrator stopped");
        Ok(())
    }

    fn worker_for(&self, camera_id: &str) -> Result<Arc<CameraWorker>> {
        self.lock(&self.workers)
            .get(camera_id)
            .cloned()
            .ok_or_else(|| {
                ControlError::NotFound {
                    camera_id: camera_id.to_string(),
                }
                .into()
            })
    }

    pub fn enable_use_case_for_camera(&self, camera_id: &str, use_case: UseCase) -> Result<()> {
        self.worker_for(camera_id)?.enable_use_case(use_case)
    }

    pub fn disable_use_case_for_camera(&self, camera_id: &str, use_case: UseCase) -> Result<()> {
        self.worker_for(camera_id)?.disable_use_case(use_case)
    }

    pub fn get_status(&self, camera_id: &str) -> Result<WorkerStatus> {
        Ok(self.worker_for(camera_id)?.status())
    }

    pub fn get_all_status(&self) -> Vec<WorkerStatus> {
        self.lock(&self.workers)
            .values()
            .map(|w| w.status())
            .collect()
    }

    pub fn get_aggregate_stats(&self) -> AggregateStats {
        self.services.stats.snapshot()
    }
}

fn worker_loop(
    worker: Arc<CameraWorker>,
    services: SharedServices,
    run_flag: Arc<AtomicBool>,
    interval: Duration,
) {
    while run_flag.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();
        match worker.run_cycle(&services) {
            Ok(CycleOutcome::Idle) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!("camera {}: cycle failed: {:#}", worker.camera_id(), e);
                std::thread::sleep(CYCLE_ERROR_BACKOFF);
                continue;
            }
        }
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
    worker.shutdown();
}

/// Poll-based bounded join; `std` offers no native join timeout.
fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(JOIN_POLL);
    }
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("joined thread had panicked");
            None
        }
    }
}

fn default_source_factory(
    config: &CameraConfig,
    settings: &EngineSettings,
) -> Result<Box<dyn FrameSource>> {
    if config.stream_url.starts_with("stub://") {
        return Ok(Box::new(StubSource::new(640, 480)));
    }
    let source = RtspSource::new(RtspConfig {
        url: config.stream_url.clone(),
        target_fps: settings.target_fps,
        ..RtspConfig::default()
    })?;
    Ok(Box::new(source))
}
