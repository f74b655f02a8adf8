use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::evaluation::EvaluationResult;
use crate::models::extraction::ExtractedRow;
use crate::services::exporter::ExportHandle;

/// Lifecycle status of an extraction job.
///
/// `Processing` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Complete,
    Scanned,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// One timestamped line of the job's progress log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Result bundle of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub fields: Vec<String>,
    pub rows: Vec<ExtractedRow>,
    pub evaluation: EvaluationResult,
    pub export: ExportHandle,
}

/// An extraction job. Cloned values are consistent snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub file_name: String,
    pub status: JobStatus,
    pub log: Vec<LogEntry>,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn new(id: Uuid, file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            file_name: file_name.into(),
            status: JobStatus::Processing,
            log: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Log messages without timestamps, in order.
    pub fn log_lines(&self) -> Vec<&str> {
        self.log.iter().map(|entry| entry.message.as_str()).collect()
    }
}
