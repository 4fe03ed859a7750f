//! Loitering in watched zones.

use std::collections::BTreeMap;
use std::time::SystemTime;

use anyhow::Result;

use crate::capability::builtin::{rule_f64, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::capability::zones::Zone;
use crate::capability::{CapabilityContext, DetectionCapability, DetectionEvent};
use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{Severity, UseCase};

const LOITER_COLOR: [u8; 3] = [230, 160, 0];
const DEFAULT_TIME_THRESHOLD_S: f64 = 300.0;

/// Raises a warning when a watched zone stays continuously occupied longer
/// than `time_threshold` seconds.
///
/// Occupancy is tracked per zone, not per person. A zone's dwell clock
/// starts when it becomes occupied, resets when it empties, and resets again
/// after each alert so a persistent loiterer re-alerts every threshold
/// interval instead of every frame.
pub struct LoiteringCapability {
    zones: Vec<Zone>,
    confidence_threshold: f32,
    time_threshold_s: f64,
    occupied_since: BTreeMap<String, SystemTime>,
}

impl LoiteringCapability {
    pub fn new(ctx: &CapabilityContext<'_>) -> Self {
        Self {
            zones: ctx.zones.to_vec(),
            confidence_threshold: rule_f64(
                ctx.rules,
                "confidence_threshold",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ) as f32,
            time_threshold_s: rule_f64(ctx.rules, "time_threshold", DEFAULT_TIME_THRESHOLD_S),
            occupied_since: BTreeMap::new(),
        }
    }
}

impl DetectionCapability for LoiteringCapability {
    fn use_case(&self) -> UseCase {
        UseCase::Loitering
    }

    fn process(
        &mut self,
        _frame: &Frame,
        inference: &InferenceResult,
        now: SystemTime,
        canvas: &mut Frame,
    ) -> Result<Vec<DetectionEvent>> {
        let mut events = Vec::new();
        for zone in &self.zones {
            let occupants: Vec<_> = inference
                .with_label("person")
                .filter(|p| p.confidence >= self.confidence_threshold)
                .filter(|p| {
                    let (fx, fy) = p.bbox.foot();
                    zone.contains(fx, fy)
                })
                .collect();

            if occupants.is_empty() {
                self.occupied_since.remove(&zone.name);
                continue;
            }

            let since = *self.occupied_since.entry(zone.name.clone()).or_insert(now);
            let dwell_s = now
                .duration_since(since)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            if dwell_s <= self.time_threshold_s {
                continue;
            }

            for person in &occupants {
                let b = person.bbox;
                canvas.draw_box(b.x, b.y, b.w, b.h, LOITER_COLOR);
            }
            let confidence = occupants
                .iter()
                .map(|p| p.confidence)
                .fold(0.0f32, f32::max);
            events.push(DetectionEvent {
                use_case: UseCase::Loitering,
                severity: Severity::Warning,
                confidence,
                detection_data: serde_json::json!({
                    "zone": zone.name,
                    "dwell_seconds": dwell_s,
                    "time_threshold_seconds": self.time_threshold_s,
                    "occupants": occupants.len(),
                }),
            });
            // Restart the clock so the alert repeats per interval, not per
            // frame.
            self.occupied_since.insert(zone.name.clone(), now);
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

    fn occupant() -> InferenceResult {
        InferenceResult {
            objects: vec![InferenceObject {
                label: "person".to_string(),
                bbox: BBox::new(20.0, 20.0, 10.0, 20.0),
                confidence: 0.9,
            }],
        }
    }

    fn capability(threshold_s: f64) -> LoiteringCapability {
        let rules = serde_json::json!({ "time_threshold": threshold_s });
        let zones = vec![Zone::new(
            "lobby",
            vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
        )];
        LoiteringCapability::new(&CapabilityContext {
            camera_id: "cam_001",
            zones: &zones,
            rules: &rules,
        })
    }

    #[test]
    fn alerts_after_threshold_and_resets() {
        let mut loitering = capability(5.0);
        let frame = blank_frame();
        let mut canvas = blank_frame();
        let t0 = SystemTime::now();

        let events = loitering
            .process(&frame, &occupant(), t0, &mut canvas)
            .unwrap();
        assert!(events.is_empty());

        let events = loitering
            .process(&frame, &occupant(), t0 + Duration::from_secs(3), &mut canvas)
            .unwrap();
        assert!(events.is_empty());

        let t_alert = t0 + Duration::from_secs(6);
        let events = loitering
            .process(&frame, &occupant(), t_alert, &mut canvas)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].detection_data["zone"], "lobby");

        // Clock restarted at the alert: one second later is quiet again.
        let events = loitering
            .process(
                &frame,
                &occupant(),
                t_alert + Duration::from_secs(1),
                &mut canvas,
            )
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn vacancy_resets_the_dwell_clock() {
        let mut loitering = capability(5.0);
        let frame = blank_frame();
        let mut canvas = blank_frame();
        let t0 = SystemTime::now();

        loitering
            .process(&frame, &occupant(), t0, &mut canvas)
            .unwrap();
        loitering
            .process(
                &frame,
                &InferenceResult::default(),
                t0 + Duration::from_secs(3),
                &mut canvas,
            )
            .unwrap();

        // Re-occupied after the gap: dwell restarts, so six seconds past t0
        // is still below the threshold.
        let events = loitering
            .process(&frame, &occupant(), t0 + Duration::from_secs(6), &mut canvas)
            .unwrap();
        assert!(events.is_empty());
    }
}
