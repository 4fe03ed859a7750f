//! Personal protective equipment compliance.

use std::time::SystemTime;

use anyhow::Result;

use crate::capability::builtin::{rule_f64, rule_strings, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::capability::zones::{any_zone_contains, Zone};
use crate::capability::{CapabilityContext, DetectionCapability, DetectionEvent};
use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{Severity, UseCase};

const VIOLATION_COLOR: [u8; 3] = [220, 40, 40];
const COMPLIANT_COLOR: [u8; 3] = [0, 200, 0];
const DEFAULT_REQUIRED_PPE: &[&str] = &["hard_hat", "safety_vest"];

/// Flags persons in the PPE zones that are missing required equipment.
///
/// A person is compliant when, for every required class, some detection of
/// that class overlaps their bounding box. One warning event is raised per
/// violator per frame.
pub struct PpeCapability {
    zones: Vec<Zone>,
    confidence_threshold: f32,
    required_ppe: Vec<String>,
}

impl PpeCapability {
    pub fn new(ctx: &CapabilityContext<'_>) -> Self {
        Self {
            zones: ctx.zones.to_vec(),
            confidence_threshold: rule_f64(
                ctx.rules,
                "confidence_threshold",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ) as f32,
            required_ppe: rule_strings(ctx.rules, "required_ppe", DEFAULT_REQUIRED_PPE),
        }
    }
}

impl DetectionCapability for PpeCapability {
    fn use_case(&self) -> UseCase {
        UseCase::PpeDetection
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
            if !any_zone_contains(&self.zones, fx, fy) {
                continue;
            }

            let missing: Vec<&String> = self
                .required_ppe
                .iter()
                .filter(|class| {
                    !inference.with_label(class).any(|item| {
                        item.confidence >= self.confidence_threshold
                            && item.bbox.intersects(&person.bbox)
                    })
                })
                .collect();

            let b = person.bbox;
            if missing.is_empty() {
                canvas.draw_box(b.x, b.y, b.w, b.h, COMPLIANT_COLOR);
                continue;
            }
            canvas.draw_box(b.x, b.y, b.w, b.h, VIOLATION_COLOR);
            events.push(DetectionEvent {
                use_case: UseCase::PpeDetection,
                severity: Severity::Warning,
                confidence: person.confidence,
                detection_data: serde_json::json!({
                    "missing_ppe": missing,
                    "required_ppe": self.required_ppe,
                    "person": b,
                }),
            });
        }
        Ok(events)
    }
}
