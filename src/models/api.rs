use serde::Serialize;
use uuid::Uuid;

use crate::models::job::{ExtractionJob, JobResult, JobStatus, LogEntry};

/// Response after submitting a PDF for extraction.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub file_name: String,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<JobResult>,
    /// Download URL, present once the job is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl From<ExtractionJob> for JobStatusResponse {
    fn from(job: ExtractionJob) -> Self {
        let download_url = job
            .result
            .as_ref()
            .map(|_| format!("/download/{}", job.id));
        Self {
            job_id: job.id,
            file_name: job.file_name,
            status: job.status,
            logs: job.log,
            result: job.result,
            download_url,
        }
    }
}

/// Error body returned by the HTTP layer.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}
