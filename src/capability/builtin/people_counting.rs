//! People counting in configured zones.

use std::time::SystemTime;

use anyhow::Result;

use crate::capability::builtin::{rule_f64, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::capability::zones::{any_zone_contains, Zone};
use crate::capability::{CapabilityContext, DetectionCapability, DetectionEvent};
use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{Severity, UseCase};

const BOX_COLOR: [u8; 3] = [0, 200, 0];

/// Counts persons inside the counting zones and raises an event when the
/// count exceeds `count_threshold`. With the default threshold of zero, any
/// occupancy at all produces an event.
pub struct PeopleCountingCapability {
    zones: Vec<Zone>,
    confidence_threshold: f32,
    count_threshold: usize,
}

impl PeopleCountingCapability {
    pub fn new(ctx: &CapabilityContext<'_>) -> Self {
        Self {
            zones: ctx.zones.to_vec(),
            confidence_threshold: rule_f64(
                ctx.rules,
                "confidence_threshold",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ) as f32,
            count_threshold: rule_f64(ctx.rules, "count_threshold", 0.0).max(0.0) as usize,
        }
    }
}

impl DetectionCapability for PeopleCountingCapability {
    fn use_case(&self) -> UseCase {
        UseCase::PeopleCounting
    }

    fn process(
        &mut self,
        _frame: &Frame,
        inference: &InferenceResult,
        _now: SystemTime,
        canvas: &mut Frame,
    ) -> Result<Vec<DetectionEvent>> {
        let mut counted = Vec::new();
        for person in inference.with_label("person") {
            if person.confidence < self.confidence_threshold {
                continue;
            }
            let (fx, fy) = person.bbox.foot();
            if !any_zone_contains(&self.zones, fx, fy) {
                continue;
            }
            let b = person.bbox;
            canvas.draw_box(b.x, b.y, b.w, b.h, BOX_COLOR);
            counted.push(person);
        }

        if counted.len() <= self.count_threshold {
            return Ok(vec![]);
        }

        let max_confidence = counted
            .iter()
            .map(|p| p.confidence)
            .fold(0.0f32, f32::max);
        let event = DetectionEvent {
            use_case: UseCase::PeopleCounting,
            severity: Severity::Info,
            confidence: max_confidence,
            detection_data: serde_json::json!({
                "person_count": counted.len(),
                "count_threshold": self.count_threshold,
                "persons": counted.iter().map(|p| p.bbox).collect::<Vec<_>>(),
            }),
        };
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BBox, InferenceObject};

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 100 * 100 * 3], 100, 100, SystemTime::now()).unwrap()
    }

    fn person_at(x: f32, y: f32, confidence: f32) -> InferenceObject {
        InferenceObject {
            label: "person".to_string(),
            bbox: BBox::new(x, y, 10.0, 20.0),
            confidence,
        }
    }

    fn whole_frame_zone() -> Zone {
        Zone::new("all", vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]])
    }

    #[test]
    fn counts_persons_above_threshold() {
        let rules = serde_json::json!({ "count_threshold": 1 });
        let zones = vec![whole_frame_zone()];
        let mut capability = PeopleCountingCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &zones,
            rules: &rules,
        });

        let frame = blank_frame();
        let mut canvas = blank_frame();

        // One person: at or below the threshold, no event.
        let one = InferenceResult {
            objects: vec![person_at(20.0, 20.0, 0.9)],
        };
        let events = capability
            .process(&frame, &one, SystemTime::now(), &mut canvas)
            .unwrap();
        assert!(events.is_empty());

        // Two persons: above the threshold.
        let two = InferenceResult {
            objects: vec![person_at(20.0, 20.0, 0.9), person_at(50.0, 30.0, 0.8)],
        };
        let events = capability
            .process(&frame, &two, SystemTime::now(), &mut canvas)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Info);
        assert_eq!(events[0].detection_data["person_count"], 2);
    }

    #[test]
    fn ignores_low_confidence_and_out_of_zone() {
        let rules = serde_json::json!({ "confidence_threshold": 0.5 });
        let zones = vec![Zone::new(
            "left",
            vec![[0.0, 0.0], [40.0, 0.0], [40.0, 100.0], [0.0, 100.0]],
        )];
        let mut capability = PeopleCountingCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &zones,
            rules: &rules,
        });

        let frame = blank_frame();
        let mut canvas = blank_frame();
        let result = InferenceResult {
            objects: vec![
                person_at(10.0, 10.0, 0.2),  // low confidence
                person_at(60.0, 10.0, 0.9),  // out of zone
            ],
        };
        let events = capability
            .process(&frame, &result, SystemTime::now(), &mut canvas)
            .unwrap();
        assert!(events.is_empty());
    }
}
