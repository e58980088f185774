use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tessera_filter_types::DatasetId;
use time::{Duration, OffsetDateTime};
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Running,
    ServedByModern,
    ServedByLegacy,
    Failed(String),
    Cancelled,
}

impl DispatchStatus {
    fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Running => "running",
            DispatchStatus::ServedByModern => "served_by_modern",
            DispatchStatus::ServedByLegacy => "served_by_legacy",
            DispatchStatus::Failed(_) => "failed",
            DispatchStatus::Cancelled => "cancelled",
        }
    }

    fn error_message(&self) -> Option<&str> {
        match self {
            DispatchStatus::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub id: Uuid,
    pub operation: &'static str,
    pub targets: Vec<DatasetId>,
    pub status: &'static str,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    /// Seconds.
    pub run_time: Option<f64>,
}

/// Keeps the latest status of every dispatch, for reporting which path served what.
#[derive(Debug, Clone, Default)]
pub struct DispatchJournal {
    records: Arc<Mutex<Vec<DispatchRecord>>>,
}

impl DispatchJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, operation: &'static str, targets: Vec<DatasetId>) -> DispatchStatusHandle {
        let handle = DispatchStatusHandle {
            journal: self.clone(),
            id: Uuid::now_v7(),
            operation,
            targets,
            start_time: OffsetDateTime::now_utc(),
        };
        handle.write(DispatchStatus::Running, None);
        handle
    }

    pub fn records(&self) -> Vec<DispatchRecord> {
        self.records.lock().clone()
    }

    pub fn to_json_lines(&self) -> String {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(value) => Some(value),
                Err(e) => {
                    error!("Failed to serialize dispatch record: {e}");
                    None
                }
            })
            .map(|value: Value| format!("{value}\n"))
            .collect()
    }

    fn upsert(&self, record: DispatchRecord) {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
}

pub struct DispatchStatusHandle {
    journal: DispatchJournal,
    id: Uuid,
    operation: &'static str,
    targets: Vec<DatasetId>,
    start_time: OffsetDateTime,
}

impl DispatchStatusHandle {
    pub fn finish(self, status: DispatchStatus) {
        self.write(status, Some(OffsetDateTime::now_utc()));
    }

    fn write(&self, status: DispatchStatus, end_time: Option<OffsetDateTime>) {
        let run_time = end_time.map(|end| end - self.start_time);
        self.journal.upsert(DispatchRecord {
            id: self.id,
            operation: self.operation,
            targets: self.targets.clone(),
            status: status.as_str(),
            error: status.error_message().map(str::to_string),
            start_time: self.start_time,
            end_time,
            run_time: run_time.map(Duration::as_seconds_f64),
        });
    }
}
