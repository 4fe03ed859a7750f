//! Event persistence.
//!
//! Every detection event becomes one row in the `events` table, keyed by a
//! generated event id and carrying the camera identity, the use case, the
//! structured detection payload, and the object-store path of the annotated
//! frame. Rows move through a small status lifecycle driven by operators:
//! `new -> acknowledged -> resolved`, with a shortcut straight to resolved.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::{Severity, UseCase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    Acknowledged,
    Resolved,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::New => "new",
            EventStatus::Acknowledged => "acknowledged",
            EventStatus::Resolved => "resolved",
        }
    }

    /// Acknowledging is optional; resolving is terminal.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::New, EventStatus::Acknowledged)
                | (EventStatus::New, EventStatus::Resolved)
                | (EventStatus::Acknowledged, EventStatus::Resolved)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(EventStatus::New),
            "acknowledged" => Ok(EventStatus::Acknowledged),
            "resolved" => Ok(EventStatus::Resolved),
            other => Err(anyhow!("unknown event status: {other}")),
        }
    }
}

/// One persisted detection event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub camera_id: String,
    pub camera_name: String,
    pub project_id: String,
    pub event_type: UseCase,
    pub severity: Severity,
    pub detection_data: serde_json::Value,
    /// Object-store key of the annotated frame, when one was written.
    pub image_path: Option<String>,
    pub confidence_score: f32,
    pub timestamp_s: u64,
    pub status: EventStatus,
}

pub trait EventStore: Send {
    fn insert_event(&mut self, record: &EventRecord) -> Result<()>;

    /// Apply a status transition. Rejects transitions the lifecycle does not
    /// allow and unknown event ids.
    fn update_status(&mut self, event_id: &str, next: EventStatus) -> Result<()>;

    /// Most recent events first, at most `limit`.
    fn recent_events(&mut self, limit: usize) -> Result<Vec<EventRecord>>;
}

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              event_id TEXT NOT NULL UNIQUE,
              camera_id TEXT NOT NULL,
              camera_name TEXT NOT NULL,
              project_id TEXT NOT NULL,
              event_type TEXT NOT NULL,
              severity TEXT NOT NULL,
              detection_data TEXT NOT NULL,
              image_path TEXT,
              confidence_score REAL NOT NULL,
              created_at INTEGER NOT NULL,
              status TEXT NOT NULL DEFAULT 'new'
            );

            CREATE INDEX IF NOT EXISTS idx_events_camera ON events(camera_id);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
            CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
            "#,
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
        let event_type: String = row.get("event_type")?;
        let severity: String = row.get("severity")?;
        let status: String = row.get("status")?;
        let detection_data: String = row.get("detection_data")?;
        Ok(EventRecord {
            event_id: row.get("event_id")?,
            camera_id: row.get("camera_id")?,
            camera_name: row.get("camera_name")?,
            project_id: row.get("project_id")?,
            event_type: event_type.parse().map_err(|e: anyhow::Error| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
            severity: severity.parse().map_err(|e: anyhow::Error| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
            detection_data: serde_json::from_str(&detection_data).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            image_path: row.get("image_path")?,
            confidence_score: row.get("confidence_score")?,
            timestamp_s: row.get::<_, i64>("created_at")? as u64,
            status: status.parse().map_err(|e: anyhow::Error| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn insert_event(&mut self, record: &EventRecord) -> Result<()> {
        let detection_data = serde_json::to_string(&record.detection_data)?;
        self.conn.execute(
            "INSERT INTO events (event_id, camera_id, camera_name, project_id, event_type, \
             severity, detection_data, image_path, confidence_score, created_at, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.event_id,
                record.camera_id,
                record.camera_name,
                record.project_id,
                record.event_type.as_str(),
                record.severity.as_str(),
                detection_data,
                record.image_path,
                record.confidence_score as f64,
                record.timestamp_s as i64,
                record.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn update_status(&mut self, event_id: &str, next: EventStatus) -> Result<()> {
        let current: String = self
            .conn
            .query_row(
                "SELECT status FROM events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .map_err(|_| anyhow!("unknown event id: {event_id}"))?;
        let current: EventStatus = current.parse()?;
        if !current.can_transition_to(next) {
            return Err(anyhow!(
                "invalid status transition for {event_id}: {current} -> {next}"
            ));
        }
        self.conn.execute(
            "UPDATE events SET status = ?1 WHERE event_id = ?2",
            params![next.as_str(), event_id],
        )?;
        Ok(())
    }

    fn recent_events(&mut self, limit: usize) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, camera_id, camera_name, project_id, event_type, severity, \
             detection_data, image_path, confidence_score, created_at, status \
             FROM events ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// In-memory store for tests and demos.
#[derive(Default)]
pub struct InMemoryEventStore {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle onto the stored records, for assertions after the store
    /// itself has been moved into the drain.
    pub fn records_handle(&self) -> Arc<Mutex<Vec<EventRecord>>> {
        Arc::clone(&self.records)
    }
}

impl EventStore for InMemoryEventStore {
    fn insert_event(&mut self, record: &EventRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("event store lock poisoned"))?;
        records.push(record.clone());
        Ok(())
    }

    fn update_status(&mut self, event_id: &str, next: EventStatus) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("event store lock poisoned"))?;
        let record = records
            .iter_mut()
            .find(|r| r.event_id == event_id)
            .ok_or_else(|| anyhow!("unknown event id: {event_id}"))?;
        if !record.status.can_transition_to(next) {
            return Err(anyhow!(
                "invalid status transition for {event_id}: {} -> {next}",
                record.status
            ));
        }
        record.status = next;
        Ok(())
    }

    fn recent_events(&mut self, limit: usize) -> Result<Vec<EventRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("event store lock poisoned"))?;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}
