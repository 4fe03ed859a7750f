//! Built-in detection capabilities.
//!
//! Each builtin reads its tuning out of the camera's per-use-case `rules`
//! JSON object, falling back to the defaults below when a key is absent or
//! has the wrong type. Unknown keys are ignored.

mod intrusion;
mod loitering;
mod people_counting;
mod ppe;
mod tailgating;

pub use intrusion::IntrusionCapability;
pub use loitering::LoiteringCapability;
pub use people_counting::PeopleCountingCapability;
pub use ppe::PpeCapability;
pub use tailgating::TailgatingCapability;

use crate::capability::CapabilityRegistry;
use crate::UseCase;

pub(super) fn register_builtins(registry: &mut CapabilityRegistry) {
    registry.register(UseCase::PeopleCounting, |ctx| {
        Ok(Box::new(PeopleCountingCapability::new(ctx)))
    });
    registry.register(UseCase::PpeDetection, |ctx| {
        Ok(Box::new(PpeCapability::new(ctx)))
    });
    registry.register(UseCase::Tailgating, |ctx| {
        Ok(Box::new(TailgatingCapability::new(ctx)))
    });
    registry.register(UseCase::Intrusion, |ctx| {
        Ok(Box::new(IntrusionCapability::new(ctx)))
    });
    registry.register(UseCase::Loitering, |ctx| {
        Ok(Box::new(LoiteringCapability::new(ctx)))
    });
}

pub(crate) const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.3;

pub(crate) fn rule_f64(rules: &serde_json::Value, key: &str, default: f64) -> f64 {
    rules.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

pub(crate) fn rule_strings(rules: &serde_json::Value, key: &str, defaults: &[&str]) -> Vec<String> {
    match rules.get(key).and_then(|v| v.as_array()) {
        Some(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        None => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_helpers_fall_back_on_missing_or_mistyped_keys() {
        let rules = serde_json::json!({
            "time_limit": 2.5,
            "count_threshold": "not a number",
            "required_ppe": ["hard_hat"],
        });
        assert_eq!(rule_f64(&rules, "time_limit", 9.0), 2.5);
        assert_eq!(rule_f64(&rules, "count_threshold", 9.0), 9.0);
        assert_eq!(rule_f64(&rules, "absent", 9.0), 9.0);
        assert_eq!(rule_strings(&rules, "required_ppe", &["a", "b"]), vec!["hard_hat"]);
        assert_eq!(rule_strings(&rules, "absent", &["a", "b"]), vec!["a", "b"]);
    }
}
