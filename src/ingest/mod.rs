//! Frame sources.
//!
//! A frame source wraps a single network video connection and supplies
//! decoded frames on demand. Sources never raise for a transient read
//! failure: `next_frame` returns `Ok(None)` (a "soft miss") and the owning
//! worker counts it, retries next cycle, and eventually reconnects.
//!
//! Implementations:
//! - `StubSource`: synthetic frames, scriptable misses (tests, demos)
//! - `RtspSource`: IP cameras; GStreamer behind the `rtsp-gstreamer` feature,
//!   synthetic fallback for `stub://` URLs

use anyhow::Result;
use serde::Serialize;

use crate::frame::Frame;

pub mod rtsp;
pub mod stub;

pub use rtsp::{RtspConfig, RtspSource};
pub use stub::StubSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Failed,
    Error,
}

/// Contract for one camera's video connection.
pub trait FrameSource: Send {
    /// Establish the connection. Idempotent: reconnecting an already
    /// connected source is a no-op success.
    fn connect(&mut self) -> Result<()>;

    /// Pull one decoded frame. `Ok(None)` is a soft miss (end-of-stream or
    /// transient read failure); `Err` is reserved for faults that indicate
    /// the source itself is broken.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying resource. Safe to call when already
    /// disconnected.
    fn disconnect(&mut self);

    fn status(&self) -> ConnectionStatus;
}
