//! Intrusion into restricted zones.

use std::time::SystemTime;

use anyhow::Result;

use crate::capability::builtin::{rule_f64, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::capability::zones::Zone;
use crate::capability::{CapabilityContext, DetectionCapability, DetectionEvent};
use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{Severity, UseCase};

const INTRUDER_COLOR: [u8; 3] = [220, 40, 40];
const BANNER_ROWS: u32 = 6;

/// Any person inside a restricted zone is an intruder. One critical event
/// per intruder per frame; the canvas gets a red banner while any intruder
/// is present.
pub struct IntrusionCapability {
    zones: Vec<Zone>,
    confidence_threshold: f32,
}

impl IntrusionCapability {
    pub fn new(ctx: &CapabilityContext<'_>) -> Self {
        Self {
            zones: ctx.zones.to_vec(),
            confidence_threshold: rule_f64(
                ctx.rules,
                "confidence_threshold",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ) as f32,
        }
    }
}

impl DetectionCapability for IntrusionCapability {
    fn use_case(&self) -> UseCase {
        UseCase::Intrusion
    }

    fn process(
        &mut self,
        _frame: &Frame,
        inference: &InferenceResult,
        _now: SystemTime,
        canvas: &mut Frame,
    ) -> Result<Vec<DetectionEvent>> {
        let mut events = Vec::new();
        for person in inference.with_label("person") {
            if person.confidence < self.confidence_threshold {
                continue;
            }
            let (fx, fy) = person.bbox.foot();
            let Some(zone) = self.zones.iter().find(|z| z.contains(fx, fy)) else {
                continue;
            };
            let b = person.bbox;
            canvas.draw_box(b.x, b.y, b.w, b.h, INTRUDER_COLOR);
            events.push(DetectionEvent {
                use_case: UseCase::Intrusion,
                severity: Severity::Critical,
                confidence: person.confidence,
                detection_data: serde_json::json!({
                    "zone": zone.name,
                    "person": b,
                }),
            });
        }
        if !events.is_empty() {
            canvas.draw_banner(BANNER_ROWS, INTRUDER_COLOR);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BBox, InferenceObject};

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 100 * 100 * 3], 100, 100, SystemTime::now()).unwrap()
    }

    fn restricted() -> Vec<Zone> {
        vec![Zone::new(
            "restricted",
            vec![[0.0, 0.0], [50.0, 0.0], [50.0, 100.0], [0.0, 100.0]],
        )]
    }

    fn person_at(x: f32, confidence: f32) -> InferenceObject {
        InferenceObject {
            label: "person".to_string(),
            bbox: BBox::new(x, 20.0, 10.0, 20.0),
            confidence,
        }
    }

    #[test]
    fn critical_event_per_intruder() {
        let rules = serde_json::json!({});
        let zones = restricted();
        let mut intrusion = IntrusionCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &zones,
            rules: &rules,
        });

        let frame = blank_frame();
        let mut canvas = blank_frame();
        let result = InferenceResult {
            objects: vec![
                person_at(10.0, 0.9),
                person_at(25.0, 0.8),
                person_at(80.0, 0.9), // outside the restricted zone
            ],
        };
        let events = intrusion
            .process(&frame, &result, SystemTime::now(), &mut canvas)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.severity == Severity::Critical));
        assert_eq!(events[0].detection_data["zone"], "restricted");
    }

    #[test]
    fn no_zones_means_no_intrusions() {
        let rules = serde_json::json!({});
        let mut intrusion = IntrusionCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &[],
            rules: &rules,
        });

        let frame = blank_frame();
        let mut canvas = blank_frame();
        let result = InferenceResult {
            objects: vec![person_at(10.0, 0.9)],
        };
        let events = intrusion
            .process(&frame, &result, SystemTime::now(), &mut canvas)
            .unwrap();
        assert!(events.is_empty());
    }
}
