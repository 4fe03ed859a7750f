//! The shared inference resource.
//!
//! One heavyweight model instance is shared by every camera worker to bound
//! memory. `SharedInference` serializes access internally with a mutex:
//! callers must not assume concurrent `infer` calls run in parallel. This is
//! the highest-traffic shared resource in the system; its throughput bounds
//! the aggregate FPS across all cameras.
//!
//! Workers treat the model as read-only. The only mutable state behind the
//! mutex belongs to the model implementation itself (e.g. warm-up buffers).

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::frame::Frame;

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Bottom-center point. Zone membership tests use this rather than the
    /// box center so a person standing in a zone counts even when their
    /// upper body extends outside it.
    pub fn foot(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h)
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// One detected object from the shared model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceObject {
    pub label: String,
    pub bbox: BBox,
    pub confidence: f32,
}

/// Per-frame output of the shared model, fanned out to every enabled
/// capability for that camera.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InferenceResult {
    pub objects: Vec<InferenceObject>,
}

impl InferenceResult {
    pub fn with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a InferenceObject> {
        self.objects.iter().filter(move |o| o.label == label)
    }
}

/// Detection model contract.
pub trait InferenceModel: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, frame: &Frame) -> Result<InferenceResult>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One model instance shared across all camera workers.
///
/// Access is internally serialized; see the module docs.
pub struct SharedInference {
    inner: Mutex<Box<dyn InferenceModel>>,
}

impl SharedInference {
    pub fn new(model: Box<dyn InferenceModel>) -> Self {
        Self {
            inner: Mutex::new(model),
        }
    }

    pub fn infer(&self, frame: &Frame) -> Result<InferenceResult> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("inference model lock poisoned"))?;
        guard.infer(frame)
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("inference model lock poisoned"))?;
        guard.warm_up()
    }

    pub fn model_name(&self) -> Result<String> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("inference model lock poisoned"))?;
        Ok(guard.name().to_string())
    }
}

/// Stub model for default builds and tests.
///
/// Hashes each frame and reports a single centered "person" whenever the
/// pixels changed since the previous frame. Good enough to exercise the full
/// pipeline without model weights.
pub struct StubModel {
    last_hash: Option<[u8; 32]>,
}

impl StubModel {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<InferenceResult> {
        let current: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let changed = self.last_hash.is_some_and(|prev| prev != current);
        self.last_hash = Some(current);

        if !changed {
            return Ok(InferenceResult::default());
        }

        let w = frame.width as f32;
        let h = frame.height as f32;
        Ok(InferenceResult {
            objects: vec![InferenceObject {
                label: "person".to_string(),
                bbox: BBox::new(w * 0.4, h * 0.3, w * 0.2, h * 0.5),
                confidence: 0.85,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn frame_with_fill(fill: u8) -> Frame {
        Frame::new(vec![fill; 16 * 16 * 3], 16, 16, SystemTime::now()).unwrap()
    }

    #[test]
    fn bbox_intersection() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 10.0, 10.0);
        let c = BBox::new(20.0, 20.0, 5.0, 5.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn stub_model_reports_person_on_change() {
        let mut model = StubModel::new();

        let r1 = model.infer(&frame_with_fill(0)).unwrap();
        assert!(r1.objects.is_empty());

        let r2 = model.infer(&frame_with_fill(1)).unwrap();
        assert_eq!(r2.objects.len(), 1);
        assert_eq!(r2.objects[0].label, "person");

        let r3 = model.infer(&frame_with_fill(1)).unwrap();
        assert!(r3.objects.is_empty());
    }

    #[test]
    fn shared_inference_serializes_access() {
        let shared = SharedInference::new(Box::new(StubModel::new()));
        assert_eq!(shared.model_name().unwrap(), "stub");
        let result = shared.infer(&frame_with_fill(3)).unwrap();
        assert!(result.objects.is_empty());
    }
}
