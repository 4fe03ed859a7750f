//! The bounded event drain.
//!
//! Workers hand event-bearing frame results to the drain over a bounded
//! queue and never block on persistence: when the queue is full the newest
//! result is dropped and counted. A single consumer thread encodes the
//! annotated frame, writes it through the object store, and inserts one
//! event row per detection.
//!
//! Shutdown contract: workers stop first, then the drain is stopped. The
//! consumer keeps persisting queued results until the queue is empty or the
//! grace deadline passes; whatever remains is counted and logged as dropped,
//! never silently discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::objectstore::ObjectStore;
use crate::stats::StatsAggregator;
use crate::storage::{EventRecord, EventStatus, EventStore};
use crate::worker::FrameResult;
use crate::{epoch_s, generate_event_id};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    Accepted,
    Dropped,
}

/// Cloneable producer end handed to every worker.
#[derive(Clone)]
pub struct DrainProducer {
    tx: SyncSender<FrameResult>,
}

impl DrainProducer {
    /// Non-blocking enqueue. A full queue (or a drain that already exited)
    /// drops the result.
    pub fn offer(&self, result: FrameResult) -> OfferOutcome {
        match self.tx.try_send(result) {
            Ok(()) => OfferOutcome::Accepted,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                OfferOutcome::Dropped
            }
        }
    }
}

/// Final accounting from the consumer thread.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DrainReport {
    pub persisted_events: u64,
    pub failed_items: u64,
    pub dropped_at_shutdown: u64,
}

pub struct EventDrain {
    rx: Receiver<FrameResult>,
    store: Box<dyn EventStore>,
    objects: Box<dyn ObjectStore>,
    stats: Arc<StatsAggregator>,
    project_id: String,
    grace: Duration,
    stop: Arc<AtomicBool>,
}

impl EventDrain {
    pub fn new(
        capacity: usize,
        store: Box<dyn EventStore>,
        objects: Box<dyn ObjectStore>,
        stats: Arc<StatsAggregator>,
        project_id: String,
        grace: Duration,
    ) -> (DrainProducer, Self) {
        let (tx, rx) = sync_channel(capacity);
        let drain = Self {
            rx,
            store,
            objects,
            stats,
            project_id,
            grace,
            stop: Arc::new(AtomicBool::new(false)),
        };
        (DrainProducer { tx }, drain)
    }

    /// Flag checked by the consumer between items. Setting it starts the
    /// grace drain.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn spawn(self) -> anyhow::Result<JoinHandle<DrainReport>> {
        let handle = std::thread::Builder::new()
            .name("event-drain".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Consume until stopped (then grace-drain) or until every producer is
    /// gone.
    pub fn run(mut self) -> DrainReport {
        let mut report = DrainReport::default();

        while !self.stop.load(Ordering::Relaxed) {
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => self.persist(result, &mut report),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    log::info!("event drain: all producers gone, exiting");
                    return report;
                }
            }
        }

        // Stop requested. Workers are already stopped by this point, so the
        // queue only shrinks from here.
        let deadline = Instant::now() + self.grace;
        loop {
            match self.rx.try_recv() {
                Ok(result) => {
                    self.persist(result, &mut report);
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        while self.rx.try_recv().is_ok() {
            report.dropped_at_shutdown += 1;
        }
        if report.dropped_at_shutdown > 0 {
            self.stats.record_shutdown_drops(report.dropped_at_shutdown);
            log::warn!(
                "event drain: dropped {} queued results at shutdown",
                report.dropped_at_shutdown
            );
        }
        report
    }

    fn persist(&mut self, result: FrameResult, report: &mut DrainReport) {
        let jpeg = match result.annotated_frame.to_jpeg() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!(
                    "camera {}: frame #{} failed to encode: {:#}",
                    result.camera_id,
                    result.frame_sequence,
                    e
                );
                report.failed_items += 1;
                self.stats.record_drain_failure();
                None
            }
        };

        for (use_case, events) in &result.events {
            if events.is_empty() {
                continue;
            }

            let image_path = jpeg.as_ref().and_then(|bytes| {
                let key = format!(
                    "{}/{}/frame_{:08}.jpg",
                    result.camera_id, use_case, result.frame_sequence
                );
                match self.objects.put(&key, bytes) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::warn!("object store write failed for {}: {:#}", key, e);
                        report.failed_items += 1;
                        self.stats.record_drain_failure();
                        None
                    }
                }
            });

            for event in events {
                let record = EventRecord {
                    event_id: generate_event_id(),
                    camera_id: result.camera_id.clone(),
                    camera_name: result.camera_name.clone(),
                    project_id: self.project_id.clone(),
                    event_type: event.use_case,
                    severity: event.severity,
                    detection_data: event.detection_data.clone(),
                    image_path: image_path.clone(),
                    confidence_score: event.confidence,
                    timestamp_s: epoch_s(result.timestamp),
                    status: EventStatus::New,
                };
                match self.store.insert_event(&record) {
                    Ok(()) => {
                        report.persisted_events += 1;
                        self.stats.record_persisted(1);
                    }
                    Err(e) => {
                        log::warn!(
                            "camera {}: failed to persist {} event: {:#}",
                            result.camera_id,
                            event.use_case,
                            e
                        );
                        report.failed_items += 1;
                        self.stats.record_drain_failure();
                    }
                }
            }
        }
    }
}
