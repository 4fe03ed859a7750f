//! Detection capabilities.
//!
//! A capability is one detection use case bound to one camera. Capabilities
//! are constructed once per entry of the camera's `available_use_cases` at
//! worker initialization (enabled or not), so enabling later requires no
//! re-initialization. They hold per-camera state (dwell timers, entry
//! history) and are never shared across cameras.
//!
//! The registry maps use cases to factories. Built-in implementations ship
//! for all five use cases; registering over a use case replaces the builtin,
//! which is how external detection algorithms plug in.

mod builtin;
pub mod zones;

pub use builtin::{
    IntrusionCapability, LoiteringCapability, PeopleCountingCapability, PpeCapability,
    TailgatingCapability,
};
pub use zones::Zone;

use std::collections::BTreeMap;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;
use crate::inference::InferenceResult;
use crate::{Severity, UseCase};

/// One detection produced by a capability for one frame.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionEvent {
    pub use_case: UseCase,
    pub severity: Severity,
    pub confidence: f32,
    /// Opaque structured payload, persisted verbatim.
    pub detection_data: serde_json::Value,
}

/// Per-camera inputs a factory gets when constructing a capability.
pub struct CapabilityContext<'a> {
    pub camera_id: &'a str,
    pub zones: &'a [Zone],
    pub rules: &'a serde_json::Value,
}

/// Contract every detection algorithm implements.
///
/// `process` is called once per frame cycle with the shared inference result.
/// `now` is monotonically non-decreasing per camera. Capabilities annotate
/// the shared per-frame canvas in place; the captured frame itself is
/// read-only. An `Err` from `process` is isolated by the worker: logged and
/// treated as zero events for this use case this frame.
pub trait DetectionCapability: Send {
    fn use_case(&self) -> UseCase;

    fn process(
        &mut self,
        frame: &Frame,
        inference: &InferenceResult,
        now: SystemTime,
        canvas: &mut Frame,
    ) -> Result<Vec<DetectionEvent>>;
}

type CapabilityFactory =
    Box<dyn Fn(&CapabilityContext<'_>) -> Result<Box<dyn DetectionCapability>> + Send + Sync>;

/// Factory registry, one entry per use case.
pub struct CapabilityRegistry {
    factories: BTreeMap<UseCase, CapabilityFactory>,
}

impl CapabilityRegistry {
    /// Empty registry. Most callers want `with_builtins`.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the five built-in capabilities pre-registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a factory, replacing any previous one for the use case.
    pub fn register<F>(&mut self, use_case: UseCase, factory: F)
    where
        F: Fn(&CapabilityContext<'_>) -> Result<Box<dyn DetectionCapability>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(use_case, Box::new(factory));
    }

    pub fn build(
        &self,
        use_case: UseCase,
        ctx: &CapabilityContext<'_>,
    ) -> Result<Box<dyn DetectionCapability>> {
        let factory = self
            .factories
            .get(&use_case)
            .ok_or_else(|| anyhow!("no capability registered for use case {}", use_case))?;
        factory(ctx)
    }

    pub fn registered(&self) -> Vec<UseCase> {
        self.factories.keys().copied().collect()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCapability;

    impl DetectionCapability for NullCapability {
        fn use_case(&self) -> UseCase {
            UseCase::Intrusion
        }

        fn process(
            &mut self,
            _frame: &Frame,
            _inference: &InferenceResult,
            _now: SystemTime,
            _canvas: &mut Frame,
        ) -> Result<Vec<DetectionEvent>> {
            Ok(vec![])
        }
    }

    fn empty_ctx<'a>(rules: &'a serde_json::Value) -> CapabilityContext<'a> {
        CapabilityContext {
            camera_id: "cam_test",
            zones: &[],
            rules,
        }
    }

    #[test]
    fn builtins_cover_all_use_cases() {
        let registry = CapabilityRegistry::with_builtins();
        assert_eq!(registry.registered(), UseCase::ALL.to_vec());
    }

    #[test]
    fn register_replaces_builtin() {
        let mut registry = CapabilityRegistry::with_builtins();
        registry.register(UseCase::Intrusion, |_ctx| Ok(Box::new(NullCapability)));

        let rules = serde_json::json!({});
        let capability = registry.build(UseCase::Intrusion, &empty_ctx(&rules)).unwrap();
        assert_eq!(capability.use_case(), UseCase::Intrusion);
    }

    #[test]
    fn empty_registry_rejects_build() {
        let registry = CapabilityRegistry::new();
        let rules = serde_json::json!({});
        assert!(registry.build(UseCase::Loitering, &empty_ctx(&rules)).is_err());
    }
}
