//! camsentry - multi-camera detection processing core
//!
//! This crate implements the concurrent processing core for a multi-camera
//! detection system:
//!
//! - `ingest`: frame sources (RTSP, synthetic stub)
//! - `inference`: the shared inference resource (one model, all cameras)
//! - `capability`: the detection capability contract plus built-in use cases
//! - `worker`: per-camera workers (one thread each, runtime enable/disable)
//! - `drain`: the bounded event drain that persists results off the hot path
//! - `storage` / `objectstore`: event rows and annotated images
//! - `orchestrator`: owns workers, drain, and the control surface
//!
//! The REST/CRUD layer, dashboard, and cloud upload client are external
//! collaborators; this crate exposes the control surface they call
//! (`Orchestrator::start/stop/enable_use_case_for_camera/...`).

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub mod capability;
pub mod config;
pub mod drain;
pub mod frame;
pub mod inference;
pub mod ingest;
pub mod objectstore;
pub mod orchestrator;
pub mod stats;
pub mod storage;
pub mod worker;

pub use capability::{
    CapabilityContext, CapabilityRegistry, DetectionCapability, DetectionEvent, Zone,
};
pub use config::{CameraConfig, CameraStatus, DaemonConfig, EngineSettings};
pub use drain::{DrainProducer, DrainReport, EventDrain, OfferOutcome};
pub use frame::Frame;
pub use inference::{
    BBox, InferenceModel, InferenceObject, InferenceResult, SharedInference, StubModel,
};
pub use ingest::{ConnectionStatus, FrameSource, RtspConfig, RtspSource, StubSource};
pub use objectstore::{FilesystemObjectStore, ObjectStore};
pub use orchestrator::{Orchestrator, SharedServices};
pub use stats::{AggregateStats, StatsAggregator};
pub use storage::{EventRecord, EventStatus, EventStore, InMemoryEventStore, SqliteEventStore};
pub use worker::{CameraWorker, FrameResult, WorkerState, WorkerStats, WorkerStatus};

// -------------------- Use cases --------------------

/// One detection capability type. A camera declares which of these it *may*
/// run (`available_use_cases`) and which are currently *active*
/// (`enabled_use_cases`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    PeopleCounting,
    PpeDetection,
    Tailgating,
    Intrusion,
    Loitering,
}

impl UseCase {
    pub const ALL: [UseCase; 5] = [
        UseCase::PeopleCounting,
        UseCase::PpeDetection,
        UseCase::Tailgating,
        UseCase::Intrusion,
        UseCase::Loitering,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UseCase::PeopleCounting => "people_counting",
            UseCase::PpeDetection => "ppe_detection",
            UseCase::Tailgating => "tailgating",
            UseCase::Intrusion => "intrusion",
            UseCase::Loitering => "loitering",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UseCase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "people_counting" => Ok(UseCase::PeopleCounting),
            "ppe_detection" => Ok(UseCase::PpeDetection),
            "tailgating" => Ok(UseCase::Tailgating),
            "intrusion" => Ok(UseCase::Intrusion),
            "loitering" => Ok(UseCase::Loitering),
            other => Err(anyhow!("unknown use case: {}", other)),
        }
    }
}

// -------------------- Severity --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(anyhow!("unknown severity: {}", other)),
        }
    }
}

// -------------------- Control errors --------------------

/// Failures on the control surface that callers must distinguish from plain
/// I/O errors. Carried inside `anyhow::Error`; recover with `downcast_ref`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlError {
    /// The use case is not in the camera's available set.
    NotAvailable { camera_id: String, use_case: UseCase },
    /// No worker exists for the camera id.
    NotFound { camera_id: String },
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::NotAvailable {
                camera_id,
                use_case,
            } => write!(
                f,
                "use case {} is not available for camera {}",
                use_case, camera_id
            ),
            ControlError::NotFound { camera_id } => {
                write!(f, "unknown camera: {}", camera_id)
            }
        }
    }
}

impl std::error::Error for ControlError {}

// -------------------- Identifiers & time --------------------

/// Generate an event identifier of the form `evt-<12 hex chars>`.
pub fn generate_event_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("evt-{}", hex::encode(bytes))
}

/// Seconds since the Unix epoch, saturating at zero for pre-epoch clocks.
pub fn epoch_s(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
