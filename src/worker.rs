//! Per-camera workers.
//!
//! Each camera gets one worker and one thread. The worker owns the frame
//! source and every capability constructed for the camera; the orchestrator
//! drives `run_cycle` in a loop and control calls mutate the enabled set
//! concurrently. The enabled set lives behind its own small lock so
//! enable/disable never waits for an in-flight fan-out.
//!
//! Lock order inside a cycle: source, then toggle (snapshot only), then
//! capabilities, then stats. Control calls take toggle or stats alone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Instant, SystemTime};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::capability::{CapabilityContext, CapabilityRegistry, DetectionCapability, DetectionEvent};
use crate::config::{CameraConfig, EngineSettings};
use crate::frame::Frame;
use crate::ingest::{ConnectionStatus, FrameSource};
use crate::orchestrator::SharedServices;
use crate::{ControlError, UseCase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Uninitialized,
    Initializing,
    Connected,
    Running,
    /// Repeated soft misses; still running, trying to recover the source.
    Degraded,
    Stopping,
    Stopped,
}

/// Per-camera counters, snapshot through `status()`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkerStats {
    pub frames_processed: u64,
    pub soft_misses: u64,
    pub consecutive_misses: u64,
    pub total_events: u64,
    pub events_by_use_case: BTreeMap<UseCase, u64>,
    pub dropped_results: u64,
    pub capability_faults: u64,
    pub reconnects: u64,
    pub current_fps: f64,
}

/// Control-surface snapshot of one worker.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
    pub camera_id: String,
    pub name: String,
    pub location: String,
    pub state: WorkerState,
    pub connection_status: ConnectionStatus,
    pub available_use_cases: Vec<UseCase>,
    pub enabled_use_cases: Vec<UseCase>,
    pub stats: WorkerStats,
}

/// Everything one processed frame produced.
#[derive(Debug)]
pub struct FrameResult {
    pub camera_id: String,
    pub camera_name: String,
    pub frame_sequence: u64,
    pub timestamp: SystemTime,
    pub enabled_use_cases: Vec<UseCase>,
    /// Events per enabled use case. Use cases that ran but found nothing are
    /// present with an empty vec.
    pub events: BTreeMap<UseCase, Vec<DetectionEvent>>,
    pub total_event_count: usize,
    pub annotated_frame: Frame,
}

impl FrameResult {
    pub fn has_events(&self) -> bool {
        self.total_event_count > 0
    }
}

/// Outcome of one `run_cycle` call.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Worker is not in a running state; nothing was done.
    Idle,
    /// The source produced no frame this cycle.
    Miss,
    Processed {
        frame_sequence: u64,
        event_count: usize,
    },
}

struct Toggle {
    enabled: BTreeSet<UseCase>,
    /// Use cases whose capability was successfully constructed. Enabling is
    /// checked against this set, not the raw config.
    constructed: BTreeSet<UseCase>,
}

struct StatsInner {
    stats: WorkerStats,
    last_cycle_at: Option<Instant>,
    /// Cached copy of the source's connection status, refreshed after every
    /// source interaction. `status()` reads this instead of the source lock,
    /// which a cycle holds across blocking reads.
    connection_status: ConnectionStatus,
}

pub struct CameraWorker {
    config: CameraConfig,
    reconnect_after_misses: u64,
    source: Mutex<Box<dyn FrameSource>>,
    capabilities: Mutex<BTreeMap<UseCase, Box<dyn DetectionCapability>>>,
    toggle: Mutex<Toggle>,
    state: Mutex<WorkerState>,
    stats: Mutex<StatsInner>,
    frame_sequence: AtomicU64,
}

impl CameraWorker {
    pub fn new(
        config: CameraConfig,
        source: Box<dyn FrameSource>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            config,
            reconnect_after_misses: settings.reconnect_after_misses,
            source: Mutex::new(source),
            capabilities: Mutex::new(BTreeMap::new()),
            toggle: Mutex::new(Toggle {
                enabled: BTreeSet::new(),
                constructed: BTreeSet::new(),
            }),
            state: Mutex::new(WorkerState::Uninitialized),
            stats: Mutex::new(StatsInner {
                stats: WorkerStats::default(),
                last_cycle_at: None,
                connection_status: ConnectionStatus::Disconnected,
            }),
            frame_sequence: AtomicU64::new(0),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.config.camera_id
    }

    pub fn is_active(&self) -> bool {
        self.config.status == crate::config::CameraStatus::Active
    }

    fn set_state(&self, next: WorkerState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_toggle(&self) -> std::sync::MutexGuard<'_, Toggle> {
        self.toggle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Construct one capability per available use case, enabled or not, so
    /// enabling later is an O(1) set mutation. A use case whose factory
    /// fails is logged and left out; enabling it reports `NotAvailable`.
    /// Zero constructed capabilities is fatal for the worker.
    pub fn initialize(&self, registry: &CapabilityRegistry) -> Result<()> {
        self.set_state(WorkerState::Initializing);

        let mut built = BTreeMap::new();
        for use_case in &self.config.available_use_cases {
            let rules = self.config.rules_for(*use_case);
            let ctx = CapabilityContext {
                camera_id: &self.config.camera_id,
                zones: self.config.zones_for(*use_case),
                rules: &rules,
            };
            match registry.build(*use_case, &ctx) {
                Ok(capability) => {
                    built.insert(*use_case, capability);
                }
                Err(e) => {
                    log::warn!(
                        "camera {}: capability {} failed to construct: {:#}",
                        self.config.camera_id,
                        use_case,
                        e
                    );
                }
            }
        }

        if built.is_empty() {
            self.set_state(WorkerState::Stopped);
            return Err(anyhow!(
                "camera {}: no capabilities could be constructed",
                self.config.camera_id
            ));
        }

        {
            let mut toggle = self.lock_toggle();
            toggle.constructed = built.keys().copied().collect();
            toggle.enabled = self
                .config
                .enabled_use_cases
                .iter()
                .copied()
                .filter(|uc| toggle.constructed.contains(uc))
                .collect();
        }
        *self.capabilities.lock().unwrap_or_else(|e| e.into_inner()) = built;
        Ok(())
    }

    pub fn connect(&self) -> Result<()> {
        let (result, connection_status) = {
            let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
            let result = source.connect();
            (result, source.status())
        };
        self.lock_stats().connection_status = connection_status;
        result.with_context(|| format!("camera {}: connect", self.config.camera_id))?;
        self.set_state(WorkerState::Connected);
        Ok(())
    }

    pub fn begin_running(&self) {
        self.set_state(WorkerState::Running);
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.lock_state(),
            WorkerState::Running | WorkerState::Degraded
        )
    }

    /// Request a cooperative stop. The in-flight cycle finishes; the run
    /// loop then calls `shutdown`.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        if matches!(*state, WorkerState::Stopped) {
            return;
        }
        *state = WorkerState::Stopping;
    }

    pub fn shutdown(&self) {
        let connection_status = {
            let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
            source.disconnect();
            source.status()
        };
        self.lock_stats().connection_status = connection_status;
        self.set_state(WorkerState::Stopped);
    }

    /// Enable a use case. Takes effect on the next cycle; the current cycle
    /// keeps the snapshot it took. Idempotent.
    pub fn enable_use_case(&self, use_case: UseCase) -> Result<()> {
        let mut toggle = self.lock_toggle();
        if !toggle.constructed.contains(&use_case) {
            return Err(ControlError::NotAvailable {
                camera_id: self.config.camera_id.clone(),
                use_case,
            }
            .into());
        }
        toggle.enabled.insert(use_case);
        Ok(())
    }

    /// Disable a use case. Idempotent; disabling something never enabled is
    /// fine as long as it is available.
    pub fn disable_use_case(&self, use_case: UseCase) -> Result<()> {
        let mut toggle = self.lock_toggle();
        if !toggle.constructed.contains(&use_case) {
            return Err(ControlError::NotAvailable {
                camera_id: self.config.camera_id.clone(),
                use_case,
            }
            .into());
        }
        toggle.enabled.remove(&use_case);
        Ok(())
    }

    pub fn enabled_use_cases(&self) -> Vec<UseCase> {
        self.lock_toggle().enabled.iter().copied().collect()
    }

    /// One full cycle: pull a frame, process it, offer the result to the
    /// drain when it carries events.
    pub fn run_cycle(&self, services: &SharedServices) -> Result<CycleOutcome> {
        if !self.is_running() {
            return Ok(CycleOutcome::Idle);
        }

        let (frame, connection_status) = {
            let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
            let frame = source.next_frame();
            (frame, source.status())
        };
        self.lock_stats().connection_status = connection_status;
        let frame = frame?;

        let Some(frame) = frame else {
            self.on_soft_miss();
            return Ok(CycleOutcome::Miss);
        };

        let result = self.process_frame(frame, services)?;
        let frame_sequence = result.frame_sequence;
        let event_count = result.total_event_count;

        if result.has_events() {
            if services.drain.offer(result) == crate::drain::OfferOutcome::Dropped {
                self.lock_stats().stats.dropped_results += 1;
                services.stats.record_enqueue_drop();
                log::warn!(
                    "camera {}: drain queue full, dropped result #{}",
                    self.config.camera_id,
                    frame_sequence
                );
            }
        }

        Ok(CycleOutcome::Processed {
            frame_sequence,
            event_count,
        })
    }

    /// Process one frame: shared inference exactly once, then fan out to a
    /// snapshot of the enabled set with per-capability fault isolation.
    pub fn process_frame(&self, frame: Frame, services: &SharedServices) -> Result<FrameResult> {
        let frame_sequence = self.frame_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let now = frame.captured_at;

        let inference = services
            .inference
            .infer(&frame)
            .with_context(|| format!("camera {}: inference", self.config.camera_id))?;

        let enabled: Vec<UseCase> = {
            let toggle = self.lock_toggle();
            toggle.enabled.iter().copied().collect()
        };

        let mut canvas = frame.clone();
        let mut events: BTreeMap<UseCase, Vec<DetectionEvent>> = BTreeMap::new();
        let mut faults = 0u64;
        {
            let mut capabilities = self.capabilities.lock().unwrap_or_else(|e| e.into_inner());
            for use_case in &enabled {
                let Some(capability) = capabilities.get_mut(use_case) else {
                    continue;
                };
                match capability.process(&frame, &inference, now, &mut canvas) {
                    Ok(found) => {
                        events.insert(*use_case, found);
                    }
                    Err(e) => {
                        faults += 1;
                        events.insert(*use_case, Vec::new());
                        log::warn!(
                            "camera {}: capability {} failed on frame #{}: {:#}",
                            self.config.camera_id,
                            use_case,
                            frame_sequence,
                            e
                        );
                    }
                }
            }
        }

        let total_event_count = events.values().map(Vec::len).sum();
        let counts: BTreeMap<UseCase, usize> =
            events.iter().map(|(uc, evs)| (*uc, evs.len())).collect();

        self.record_good_cycle(&counts, total_event_count, faults);
        services.stats.record_cycle(&self.config.camera_id, &counts);

        Ok(FrameResult {
            camera_id: self.config.camera_id.clone(),
            camera_name: self.config.name.clone(),
            frame_sequence,
            timestamp: now,
            enabled_use_cases: enabled,
            events,
            total_event_count,
            annotated_frame: canvas,
        })
    }

    fn on_soft_miss(&self) {
        let should_reconnect = {
            let mut inner = self.lock_stats();
            inner.stats.soft_misses += 1;
            inner.stats.consecutive_misses += 1;
            inner.stats.consecutive_misses >= self.reconnect_after_misses
        };
        if !should_reconnect {
            return;
        }

        {
            let mut state = self.lock_state();
            if *state == WorkerState::Running {
                *state = WorkerState::Degraded;
            }
        }
        log::warn!(
            "camera {}: {} consecutive misses, reconnecting",
            self.config.camera_id,
            self.reconnect_after_misses
        );

        let (result, connection_status) = {
            let mut source = self.source.lock().unwrap_or_else(|e| e.into_inner());
            source.disconnect();
            let result = source.connect();
            (result, source.status())
        };
        let mut inner = self.lock_stats();
        inner.connection_status = connection_status;
        match result {
            Ok(()) => {
                inner.stats.consecutive_misses = 0;
                inner.stats.reconnects += 1;
            }
            Err(e) => {
                log::warn!(
                    "camera {}: reconnect failed: {:#}",
                    self.config.camera_id,
                    e
                );
            }
        }
    }

    fn record_good_cycle(
        &self,
        counts: &BTreeMap<UseCase, usize>,
        total_event_count: usize,
        faults: u64,
    ) {
        let now = Instant::now();
        let mut inner = self.lock_stats();
        inner.stats.frames_processed += 1;
        inner.stats.consecutive_misses = 0;
        inner.stats.capability_faults += faults;
        inner.stats.total_events += total_event_count as u64;
        for (use_case, count) in counts {
            if *count > 0 {
                *inner.stats.events_by_use_case.entry(*use_case).or_insert(0) += *count as u64;
            }
        }
        if let Some(last) = inner.last_cycle_at {
            let elapsed = now.duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                inner.stats.current_fps = 1.0 / elapsed;
            }
        }
        inner.last_cycle_at = Some(now);
        drop(inner);

        // A good frame clears degradation.
        let mut state = self.lock_state();
        if *state == WorkerState::Degraded {
            *state = WorkerState::Running;
        }
    }

    /// Snapshot for the control surface. Reads only the small worker locks,
    /// never the source lock, so it cannot stall behind a blocking frame
    /// read.
    pub fn status(&self) -> WorkerStatus {
        let state = *self.lock_state();
        let (available, enabled) = {
            let toggle = self.lock_toggle();
            (
                toggle.constructed.iter().copied().collect(),
                toggle.enabled.iter().copied().collect(),
            )
        };
        let (stats, connection_status) = {
            let inner = self.lock_stats();
            (inner.stats.clone(), inner.connection_status)
        };
        WorkerStatus {
            camera_id: self.config.camera_id.clone(),
            name: self.config.name.clone(),
            location: self.config.location.clone(),
            state,
            connection_status,
            available_use_cases: available,
            enabled_use_cases: enabled,
            stats,
        }
    }
}
