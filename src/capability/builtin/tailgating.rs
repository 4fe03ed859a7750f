//! Tailgating through controlled entries.

use std::time::SystemTime;

use anyhow::Result;

use crate::capability::builtin::{rule_f64, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::capability::zones::{any_zone_contains, Zone};
use crate::capability::{CapabilityContext, DetectionCapability, DetectionEvent};
use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{epoch_s, Severity, UseCase};

const ENTRY_COLOR: [u8; 3] = [230, 160, 0];
const DEFAULT_TIME_LIMIT_S: f64 = 2.0;

/// Detects entries into the entry zone spaced closer together than
/// `time_limit` seconds.
///
/// Entries are inferred from occupancy deltas: when the number of persons in
/// the zone rises, the increase is treated as that many entries at the
/// current instant. Each entry within `time_limit` of the previous one is a
/// tailgating event.
pub struct TailgatingCapability {
    zones: Vec<Zone>,
    confidence_threshold: f32,
    time_limit_s: f64,
    previous_count: usize,
    last_entry_at: Option<SystemTime>,
}

impl TailgatingCapability {
    pub fn new(ctx: &CapabilityContext<'_>) -> Self {
        Self {
            zones: ctx.zones.to_vec(),
            confidence_threshold: rule_f64(
                ctx.rules,
                "confidence_threshold",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ) as f32,
            time_limit_s: rule_f64(ctx.rules, "time_limit", DEFAULT_TIME_LIMIT_S),
            previous_count: 0,
            last_entry_at: None,
        }
    }
}

impl DetectionCapability for TailgatingCapability {
    fn use_case(&self) -> UseCase {
        UseCase::Tailgating
    }

    fn process(
        &mut self,
        _frame: &Frame,
        inference: &InferenceResult,
        now: SystemTime,
        canvas: &mut Frame,
    ) -> Result<Vec<DetectionEvent>> {
        let mut inside = Vec::new();
        for person in inference.with_label("person") {
            if person.confidence < self.confidence_threshold {
                continue;
            }
            let (fx, fy) = person.bbox.foot();
            if any_zone_contains(&self.zones, fx, fy) {
                inside.push(person);
            }
        }

        let count = inside.len();
        let entries = count.saturating_sub(self.previous_count);
        self.previous_count = count;
        if entries == 0 {
            return Ok(vec![]);
        }

        for person in &inside {
            let b = person.bbox;
            canvas.draw_box(b.x, b.y, b.w, b.h, ENTRY_COLOR);
        }

        let mut events = Vec::new();
        for _ in 0..entries {
            if let Some(previous) = self.last_entry_at {
                let gap_s = now
                    .duration_since(previous)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                if gap_s < self.time_limit_s {
                    let confidence = inside
                        .iter()
                        .map(|p| p.confidence)
                        .fold(0.0f32, f32::max);
                    events.push(DetectionEvent {
                        use_case: UseCase::Tailgating,
                        severity: Severity::Warning,
                        confidence,
                        detection_data: serde_json::json!({
                            "entry_gap_seconds": gap_s,
                            "time_limit_seconds": self.time_limit_s,
                            "persons_in_zone": count,
                            "entry_at": epoch_s(now),
                        }),
                    });
                }
            }
            self.last_entry_at = Some(now);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{BBox, InferenceObject};
    use std::time::Duration;

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 100 * 100 * 3], 100, 100, SystemTime::now()).unwrap()
    }

    fn persons(n: usize) -> InferenceResult {
        InferenceResult {
            objects: (0..n)
                .map(|i| InferenceObject {
                    label: "person".to_string(),
                    bbox: BBox::new(10.0 + i as f32 * 15.0, 20.0, 10.0, 20.0),
                    confidence: 0.9,
                })
                .collect(),
        }
    }

    fn capability(time_limit: f64) -> TailgatingCapability {
        let rules = serde_json::json!({ "time_limit": time_limit });
        TailgatingCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &[],
            rules: &rules,
        })
    }

    #[test]
    fn close_entries_raise_tailgating() {
        let mut tailgating = capability(2.0);
        let frame = blank_frame();
        let mut canvas = blank_frame();
        let t0 = SystemTime::now();

        // First entry: no previous entry to compare against.
        let events = tailgating
            .process(&frame, &persons(1), t0, &mut canvas)
            .unwrap();
        assert!(events.is_empty());

        // Second entry half a second later.
        let t1 = t0 + Duration::from_millis(500);
        let events = tailgating
            .process(&frame, &persons(2), t1, &mut canvas)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn slow_entries_are_fine() {
        let mut tailgating = capability(2.0);
        let frame = blank_frame();
        let mut canvas = blank_frame();
        let t0 = SystemTime::now();

        tailgating
            .process(&frame, &persons(1), t0, &mut canvas)
            .unwrap();

        let t1 = t0 + Duration::from_secs(10);
        let events = tailgating
            .process(&frame, &persons(2), t1, &mut canvas)
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn steady_occupancy_is_not_an_entry() {
        let mut tailgating = capability(2.0);
        let frame = blank_frame();
        let mut canvas = blank_frame();
        let t0 = SystemTime::now();

        tailgating
            .process(&frame, &persons(1), t0, &mut canvas)
            .unwrap();
        tailgating
            .process(&frame, &persons(2), t0 + Duration::from_secs(10), &mut canvas)
            .unwrap();

        // Same two people still in the zone: no new entries, no events.
        let events = tailgating
            .process(
                &frame,
                &persons(2),
                t0 + Duration::from_secs(10) + Duration::from_millis(100),
                &mut canvas,
            )
            .unwrap();
        assert!(events.is_empty());
    }
}
