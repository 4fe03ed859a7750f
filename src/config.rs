//! Daemon and per-camera configuration.
//!
//! Configuration comes from a JSON file (path given on the command line or
//! through `CAMSENTRY_CONFIG`), with a handful of environment overrides for
//! deployment knobs. Camera entries are validated up front so a bad config
//! fails the daemon at startup rather than a worker at runtime.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::Zone;
use crate::UseCase;

const DEFAULT_DB_PATH: &str = "camsentry.db";
const DEFAULT_STORAGE_ROOT: &str = "camsentry_frames";
const DEFAULT_PROJECT_ID: &str = "multi-camera";
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_RECONNECT_AFTER_MISSES: u64 = 10;
const DEFAULT_WORKER_JOIN_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DRAIN_GRACE_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    db_path: Option<String>,
    storage_root: Option<String>,
    settings: Option<SettingsFile>,
    cameras: Option<Vec<CameraConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    project_id: Option<String>,
    queue_capacity: Option<usize>,
    target_fps: Option<u32>,
    reconnect_after_misses: Option<u64>,
    worker_join_timeout_secs: Option<u64>,
    drain_grace_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Active,
    Inactive,
}

impl Default for CameraStatus {
    fn default() -> Self {
        CameraStatus::Active
    }
}

/// One camera as configured by the operator.
#[derive(Clone, Debug, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub location: String,
    pub available_use_cases: Vec<UseCase>,
    /// Initially enabled subset. Must be contained in `available_use_cases`.
    #[serde(default)]
    pub enabled_use_cases: Vec<UseCase>,
    /// Zones per use case, in pixel coordinates.
    #[serde(default)]
    pub zones: BTreeMap<UseCase, Vec<Zone>>,
    /// Rule objects per use case, passed verbatim to capability factories.
    #[serde(default)]
    pub rules: BTreeMap<UseCase, serde_json::Value>,
    #[serde(default)]
    pub status: CameraStatus,
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(anyhow!("camera_id must not be empty"));
        }
        if self.available_use_cases.is_empty() {
            return Err(anyhow!(
                "camera {}: available_use_cases must not be empty",
                self.camera_id
            ));
        }
        let mut seen = BTreeSet::new();
        for use_case in &self.available_use_cases {
            if !seen.insert(*use_case) {
                return Err(anyhow!(
                    "camera {}: duplicate available use case {use_case}",
                    self.camera_id
                ));
            }
        }
        for use_case in &self.enabled_use_cases {
            if !seen.contains(use_case) {
                return Err(anyhow!(
                    "camera {}: enabled use case {use_case} is not available",
                    self.camera_id
                ));
            }
        }
        Ok(())
    }

    pub fn zones_for(&self, use_case: UseCase) -> &[Zone] {
        self.zones.get(&use_case).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rules_for(&self, use_case: UseCase) -> serde_json::Value {
        self.rules
            .get(&use_case)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Engine-wide tunables.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub project_id: String,
    /// Capacity of the bounded result queue feeding the drain.
    pub queue_capacity: usize,
    pub target_fps: u32,
    /// Consecutive soft misses before a worker reconnects its source.
    pub reconnect_after_misses: u64,
    pub worker_join_timeout: Duration,
    /// How long the drain keeps persisting queued results after stop.
    pub drain_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            target_fps: DEFAULT_TARGET_FPS,
            reconnect_after_misses: DEFAULT_RECONNECT_AFTER_MISSES,
            worker_join_timeout: Duration::from_secs(DEFAULT_WORKER_JOIN_TIMEOUT_SECS),
            drain_grace: Duration::from_secs(DEFAULT_DRAIN_GRACE_SECS),
        }
    }
}

impl EngineSettings {
    pub fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(1000 / self.target_fps as u64)
        }
    }
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub storage_root: PathBuf,
    pub settings: EngineSettings,
    pub cameras: Vec<CameraConfig>,
}

impl DaemonConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => DaemonConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Result<Self> {
        let settings_file = file.settings.unwrap_or_default();
        let defaults = EngineSettings::default();
        let settings = EngineSettings {
            project_id: settings_file.project_id.unwrap_or(defaults.project_id),
            queue_capacity: settings_file
                .queue_capacity
                .unwrap_or(defaults.queue_capacity),
            target_fps: settings_file.target_fps.unwrap_or(defaults.target_fps),
            reconnect_after_misses: settings_file
                .reconnect_after_misses
                .unwrap_or(defaults.reconnect_after_misses),
            worker_join_timeout: settings_file
                .worker_join_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker_join_timeout),
            drain_grace: settings_file
                .drain_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_grace),
        };
        Ok(Self {
            db_path: PathBuf::from(file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string())),
            storage_root: PathBuf::from(
                file.storage_root
                    .unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string()),
            ),
            settings,
            cameras: file.cameras.unwrap_or_default(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CAMSENTRY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = PathBuf::from(path);
            }
        }
        if let Ok(root) = std::env::var("CAMSENTRY_STORAGE_ROOT") {
            if !root.trim().is_empty() {
                self.storage_root = PathBuf::from(root);
            }
        }
        if let Ok(project) = std::env::var("CAMSENTRY_PROJECT_ID") {
            if !project.trim().is_empty() {
                self.settings.project_id = project;
            }
        }
        if let Ok(capacity) = std::env::var("CAMSENTRY_QUEUE_CAPACITY") {
            self.settings.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("CAMSENTRY_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Ok(fps) = std::env::var("CAMSENTRY_TARGET_FPS") {
            self.settings.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("CAMSENTRY_TARGET_FPS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.settings.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than zero"));
        }
        let mut seen = BTreeSet::new();
        for camera in &self.cameras {
            camera.validate()?;
            if !seen.insert(camera.camera_id.clone()) {
                return Err(anyhow!("duplicate camera_id: {}", camera.camera_id));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
