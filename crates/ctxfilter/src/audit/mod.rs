//! Best-effort persistence of filtered requests
//!
//! Request handlers hand records to a bounded queue and move on. A single
//! background task drains the queue and writes one JSON file per record.
//! Queue overflow and write failures are logged and otherwise ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::error::{CtxFilterError, Result};
use crate::filter::PipelineReport;

/// Before/after snapshot of one filtered request
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub model: String,
    pub report: PipelineReport,
    pub before: Value,
    pub after: Value,
}

impl AuditRecord {
    pub fn new(path: impl Into<String>, model: impl Into<String>, report: PipelineReport, before: Value, after: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path: path.into(),
            model: model.into(),
            report,
            before,
            after,
        }
    }

    /// File name the record is stored under
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.timestamp.format("%Y%m%dT%H%M%S%.3fZ"), self.id)
    }
}

/// Handle to the audit writer task
#[derive(Debug, Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditSink {
    /// Start the writer task. It exits once every `AuditSink` clone is dropped
    /// and the queue is drained.
    pub fn spawn(config: &AuditConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let handle = tokio::spawn(run_writer(config.dir.clone(), receiver));
        (Self { sender }, handle)
    }

    /// Queue a record without waiting. Dropped with a warning when the queue
    /// is full or the writer is gone.
    pub fn record(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                warn!(id = %record.id, "Audit queue full, dropping record");
            }
            Err(TrySendError::Closed(record)) => {
                warn!(id = %record.id, "Audit writer stopped, dropping record");
            }
        }
    }
}

async fn run_writer(dir: PathBuf, mut receiver: mpsc::Receiver<AuditRecord>) {
    while let Some(record) = receiver.recv().await {
        match write_record(&dir, &record).await {
            Ok(path) => debug!("Wrote audit record {}", path.display()),
            Err(e) => warn!(
                error_type = "audit",
                error_message = %e,
                "Failed to persist audit record, continuing"
            ),
        }
    }
    debug!("Audit writer stopped");
}

/// Write `record` as pretty JSON into `dir`, creating it if needed
pub async fn write_record(dir: &Path, record: &AuditRecord) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        CtxFilterError::Audit(format!(
            "Failed to create audit directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let path = dir.join(record.file_name());
    let body = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| CtxFilterError::Audit(format!("Failed to write {}: {}", path.display(), e)))?;

    Ok(path)
}
