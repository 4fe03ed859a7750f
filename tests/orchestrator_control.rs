//! End-to-end orchestrator lifecycle and control-surface behavior, driven
//! with synthetic sources and the stub model.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use camsentry::{
    CameraConfig, CameraStatus, CapabilityRegistry, ControlError, EngineSettings,
    EventRecord, InMemoryEventStore, Orchestrator, StubModel, StubSource, UseCase, WorkerState,
};
use camsentry::objectstore::NullObjectStore;

fn camera(camera_id: &str, available: Vec<UseCase>, enabled: Vec<UseCase>) -> CameraConfig {
    CameraConfig {
        camera_id: camera_id.to_string(),
        name: format!("Camera {camera_id}"),
        stream_url: "stub://stream".to_string(),
        location: "Test Hall".to_string(),
        available_use_cases: available,
        enabled_use_cases: enabled,
        zones: BTreeMap::new(),
        rules: BTreeMap::new(),
        status: CameraStatus::Active,
    }
}

fn fast_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.target_fps = 50;
    settings.worker_join_timeout = Duration::from_secs(2);
    settings.drain_grace = Duration::from_secs(2);
    settings
}

fn orchestrator_with_store() -> (Orchestrator, Arc<Mutex<Vec<EventRecord>>>) {
    let store = InMemoryEventStore::new();
    let records = store.records_handle();
    let orch = Orchestrator::new(
        fast_settings(),
        CapabilityRegistry::with_builtins(),
        Box::new(StubModel::new()),
        Box::new(store),
        Box::new(NullObjectStore),
    );
    orch.set_source_factory(|_config, _settings| Ok(Box::new(StubSource::new(64, 48))));
    (orch, records)
}

#[test]
fn runtime_toggle_is_reflected_in_status_and_events() {
    let (orch, records) = orchestrator_with_store();
    orch.load_configurations(vec![camera(
        "cam_001",
        vec![UseCase::PeopleCounting, UseCase::PpeDetection],
        vec![UseCase::PeopleCounting],
    )])
    .unwrap();
    orch.start().unwrap();
    thread::sleep(Duration::from_millis(300));

    let status = orch.get_status("cam_001").unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.enabled_use_cases, vec![UseCase::PeopleCounting]);

    orch.enable_use_case_for_camera("cam_001", UseCase::PpeDetection)
        .unwrap();
    orch.disable_use_case_for_camera("cam_001", UseCase::PeopleCounting)
        .unwrap();
    thread::sleep(Duration::from_millis(300));

    let status = orch.get_status("cam_001").unwrap();
    assert_eq!(status.enabled_use_cases, vec![UseCase::PpeDetection]);
    assert!(status.stats.frames_processed > 0);

    orch.stop().unwrap();

    // Synthetic frames change constantly, so the stub model keeps reporting
    // a person and both phases produced events.
    let records = records.lock().unwrap();
    assert!(records.iter().any(|r| r.event_type == UseCase::PeopleCounting));
    assert!(records.iter().any(|r| r.event_type == UseCase::PpeDetection));
    assert!(records.iter().all(|r| r.camera_id == "cam_001"));
}

#[test]
fn enabling_unavailable_use_case_leaves_worker_untouched() {
    let (orch, _records) = orchestrator_with_store();
    orch.load_configurations(vec![camera(
        "cam_001",
        vec![UseCase::PeopleCounting],
        vec![UseCase::PeopleCounting],
    )])
    .unwrap();
    orch.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    let err = orch
        .enable_use_case_for_camera("cam_001", UseCase::Intrusion)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ControlError>(),
        Some(&ControlError::NotAvailable {
            camera_id: "cam_001".to_string(),
            use_case: UseCase::Intrusion,
        })
    );

    let status = orch.get_status("cam_001").unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.enabled_use_cases, vec![UseCase::PeopleCounting]);

    orch.stop().unwrap();
}

#[test]
fn unknown_camera_reports_not_found() {
    let (orch, _records) = orchestrator_with_store();
    let err = orch
        .disable_use_case_for_camera("cam_404", UseCase::Loitering)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ControlError>(),
        Some(&ControlError::NotFound {
            camera_id: "cam_404".to_string(),
        })
    );
}

#[test]
fn camera_that_cannot_connect_does_not_block_the_rest() {
    let (orch, _records) = orchestrator_with_store();
    orch.set_source_factory(|config, _settings| {
        if config.camera_id == "cam_bad" {
            Ok(Box::new(StubSource::new(64, 48).with_connect_failure()))
        } else {
            Ok(Box::new(StubSource::new(64, 48)))
        }
    });
    orch.load_configurations(vec![
        camera(
            "cam_bad",
            vec![UseCase::PeopleCounting],
            vec![UseCase::PeopleCounting],
        ),
        camera(
            "cam_good",
            vec![UseCase::PeopleCounting],
            vec![UseCase::PeopleCounting],
        ),
    ])
    .unwrap();
    orch.start().unwrap();
    thread::sleep(Duration::from_millis(300));

    assert_ne!(
        orch.get_status("cam_bad").unwrap().state,
        WorkerState::Running
    );
    let good = orch.get_status("cam_good").unwrap();
    assert_eq!(good.state, WorkerState::Running);
    assert!(good.stats.frames_processed > 0);

    orch.stop().unwrap();
}

#[test]
fn inactive_cameras_get_a_worker_but_never_run() {
    let (orch, _records) = orchestrator_with_store();
    let mut parked = camera(
        "cam_parked",
        vec![UseCase::Intrusion],
        vec![UseCase::Intrusion],
    );
    parked.status = CameraStatus::Inactive;
    orch.load_configurations(vec![parked]).unwrap();
    orch.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    let status = orch.get_status("cam_parked").unwrap();
    assert_eq!(status.state, WorkerState::Uninitialized);
    assert_eq!(status.stats.frames_processed, 0);

    let stats = orch.get_aggregate_stats();
    assert_eq!(stats.total_cameras, 1);
    assert_eq!(stats.active_cameras, 0);

    orch.stop().unwrap();
}

#[test]
fn aggregate_stats_cover_multiple_cameras() {
    let (orch, _records) = orchestrator_with_store();
    orch.load_configurations(vec![
        camera(
            "cam_001",
            vec![UseCase::PeopleCounting],
            vec![UseCase::PeopleCounting],
        ),
        camera(
            "cam_002",
            vec![UseCase::PeopleCounting],
            vec![UseCase::PeopleCounting],
        ),
    ])
    .unwrap();
    orch.start().unwrap();
    thread::sleep(Duration::from_millis(400));
    orch.stop().unwrap();

    let stats = orch.get_aggregate_stats();
    assert!(stats.frames_processed > 0);
    assert!(stats.events_by_camera.contains_key("cam_001"));
    assert!(stats.events_by_camera.contains_key("cam_002"));
    assert!(stats.total_events >= stats.events_by_camera.values().copied().max().unwrap());
}
