//! Drain queue saturation and shutdown accounting.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use camsentry::drain::{EventDrain, OfferOutcome};
use camsentry::objectstore::NullObjectStore;
use camsentry::worker::FrameResult;
use camsentry::{
    DetectionEvent, Frame, InMemoryEventStore, Severity, StatsAggregator, UseCase,
};

fn single_event_result(frame_sequence: u64) -> FrameResult {
    let mut events = BTreeMap::new();
    events.insert(
        UseCase::Intrusion,
        vec![DetectionEvent {
            use_case: UseCase::Intrusion,
            severity: Severity::Critical,
            confidence: 0.9,
            detection_data: serde_json::json!({ "seq": frame_sequence }),
        }],
    );
    FrameResult {
        camera_id: "cam_001".to_string(),
        camera_name: "Front".to_string(),
        frame_sequence,
        timestamp: SystemTime::now(),
        enabled_use_cases: vec![UseCase::Intrusion],
        events,
        total_event_count: 1,
        annotated_frame: Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, SystemTime::now()).unwrap(),
    }
}

#[test]
fn saturated_queue_never_blocks_the_producer() {
    // No consumer running: the queue fills and stays full.
    let (producer, _drain) = EventDrain::new(
        2,
        Box::new(InMemoryEventStore::new()),
        Box::new(NullObjectStore),
        Arc::new(StatsAggregator::new()),
        "test".to_string(),
        Duration::from_secs(1),
    );

    let start = Instant::now();
    let mut accepted = 0;
    let mut dropped = 0;
    for seq in 0..100 {
        match producer.offer(single_event_result(seq)) {
            OfferOutcome::Accepted => accepted += 1,
            OfferOutcome::Dropped => dropped += 1,
        }
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(accepted, 2);
    assert_eq!(dropped, 98);
}

#[test]
fn every_offered_result_is_persisted_or_counted_dropped() {
    let stats = Arc::new(StatsAggregator::new());
    let store = InMemoryEventStore::new();
    let records = store.records_handle();
    let (producer, drain) = EventDrain::new(
        16,
        Box::new(store),
        Box::new(NullObjectStore),
        Arc::clone(&stats),
        "test".to_string(),
        Duration::from_secs(2),
    );
    let stop = drain.stop_handle();
    let handle = drain.spawn().unwrap();

    let mut offered = 0u64;
    for seq in 0..10 {
        if producer.offer(single_event_result(seq)) == OfferOutcome::Accepted {
            offered += 1;
        }
    }

    stop.store(true, Ordering::Relaxed);
    let report = handle.join().unwrap();

    assert_eq!(
        report.persisted_events + report.failed_items + report.dropped_at_shutdown,
        offered
    );
    assert_eq!(records.lock().unwrap().len() as u64, report.persisted_events);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.persisted_events, report.persisted_events);
    assert_eq!(snapshot.dropped_at_shutdown, report.dropped_at_shutdown);
}

#[test]
fn grace_period_flushes_the_backlog() {
    let store = InMemoryEventStore::new();
    let records = store.records_handle();
    let (producer, drain) = EventDrain::new(
        32,
        Box::new(store),
        Box::new(NullObjectStore),
        Arc::new(StatsAggregator::new()),
        "test".to_string(),
        Duration::from_secs(5),
    );
    let stop = drain.stop_handle();

    // Fill the queue before the consumer even starts, then stop immediately:
    // everything must still be flushed inside the grace window.
    for seq in 0..20 {
        assert_eq!(producer.offer(single_event_result(seq)), OfferOutcome::Accepted);
    }
    stop.store(true, Ordering::Relaxed);

    let report = drain.run();
    assert_eq!(report.persisted_events, 20);
    assert_eq!(report.dropped_at_shutdown, 0);
    assert_eq!(records.lock().unwrap().len(), 20);
}
