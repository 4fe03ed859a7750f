//! Synthetic frame source for tests and model-less deployments.

use std::time::SystemTime;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::ingest::{ConnectionStatus, FrameSource};

/// Generates a slowly changing synthetic scene. Most frames differ from the
/// previous one, which makes the stub inference model report a person, so the
/// whole pipeline can be exercised end to end without a camera.
pub struct StubSource {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    status: ConnectionStatus,
    /// Every Nth read returns a soft miss (0 = never).
    miss_every: u64,
    /// When set, `connect` fails. Used to test partial orchestrator starts.
    fail_connect: bool,
}

impl StubSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            status: ConnectionStatus::Disconnected,
            miss_every: 0,
            fail_connect: false,
        }
    }

    pub fn with_miss_every(mut self, n: u64) -> Self {
        self.miss_every = n;
        self
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for StubSource {
    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            self.status = ConnectionStatus::Failed;
            return Err(anyhow!("stub source configured to fail connect"));
        }
        self.status = ConnectionStatus::Connected;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.status != ConnectionStatus::Connected {
            return Ok(None);
        }
        self.frame_count += 1;
        if self.miss_every > 0 && self.frame_count % self.miss_every == 0 {
            return Ok(None);
        }
        let pixels = self.generate_pixels();
        let frame = Frame::new(pixels, self.width, self.height, SystemTime::now())?;
        Ok(Some(frame))
    }

    fn disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_source_produces_frames_after_connect() {
        let mut source = StubSource::new(32, 24);
        assert!(source.next_frame().unwrap().is_none());

        source.connect().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
    }

    #[test]
    fn stub_source_injects_misses() {
        let mut source = StubSource::new(8, 8).with_miss_every(2);
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_some());
    }

    #[test]
    fn connect_failure_sets_failed_status() {
        let mut source = StubSource::new(8, 8).with_connect_failure();
        assert!(source.connect().is_err());
        assert_eq!(source.status(), ConnectionStatus::Failed);
    }

    #[test]
    fn disconnect_is_safe_when_disconnected() {
        let mut source = StubSource::new(8, 8);
        source.disconnect();
        source.disconnect();
        assert_eq!(source.status(), ConnectionStatus::Disconnected);
    }
}
