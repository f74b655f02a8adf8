use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::models::job::{ExtractionJob, JobStatus};
use crate::services::document::{Document, DocumentError};
use crate::services::exporter::{ExportError, ExportHandle};
use crate::services::pipeline::{JobWriter, Pipeline};

/// Shown when a job's task dies without reaching a terminal state.
const INTERNAL_FAILURE: &str = "Internal error while processing the document.";

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct JobCounts {
    pub processing: usize,
    pub complete: usize,
    pub scanned: usize,
    pub error: usize,
}

/// In-memory job table. Each entry is written only by its own background task.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, watch::Receiver<ExtractionJob>>>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
}

impl JobRegistry {
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Validate the upload and start processing it in the background.
    ///
    /// Returns as soon as the job is registered.
    pub fn create(&self, file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Uuid, JobError> {
        let document = Document::new(file_name, bytes)?;
        let runtime = Handle::try_current().map_err(|_| JobError::NoRuntime)?;
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| JobError::Capacity)?;

        let job_id = Uuid::new_v4();
        let (writer, rx) = JobWriter::new(ExtractionJob::new(job_id, document.file_name()));
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, rx);
        metrics::counter!("extraction_jobs_total").increment(1);
        tracing::info!(%job_id, file_name = %document.file_name(), "job created");

        let pipeline = Arc::clone(&self.pipeline);
        let writer = Arc::new(writer);
        runtime.spawn(async move {
            let _permit = permit;
            let stage_writer = Arc::clone(&writer);
            let run = tokio::spawn(async move { pipeline.run(&document, &stage_writer).await });
            if let Err(e) = run.await {
                tracing::error!(%job_id, error = %e, "job task aborted");
                settle_aborted(&writer);
            }
        });

        Ok(job_id)
    }

    /// Consistent snapshot of a job.
    pub fn get(&self, job_id: Uuid) -> Result<ExtractionJob, JobError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id)
            .map(|rx| rx.borrow().clone())
            .ok_or(JobError::NotFound(job_id))
    }

    /// Subscribe to updates of a job.
    pub fn watch(&self, job_id: Uuid) -> Result<watch::Receiver<ExtractionJob>, JobError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id).cloned().ok_or(JobError::NotFound(job_id))
    }

    /// Export handle of a completed job.
    pub fn export(&self, job_id: Uuid) -> Result<ExportHandle, JobError> {
        let job = self.get(job_id)?;
        match (job.status, job.result) {
            (JobStatus::Complete, Some(result)) => Ok(result.export),
            (status, _) => Err(JobError::NotReady { job_id, status }),
        }
    }

    /// Export handle and artifact bytes of a completed job.
    pub async fn download(&self, job_id: Uuid) -> Result<(ExportHandle, Vec<u8>), JobError> {
        let handle = self.export(job_id)?;
        let bytes = self.pipeline.exporter().fetch(&handle).await?;
        Ok((handle, bytes))
    }

    /// Forget finished jobs idle for longer than `max_age` and delete their artifacts.
    pub async fn prune(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = chrono::Utc::now() - max_age;

        let expired: Vec<Uuid> = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            let expired: Vec<Uuid> = jobs
                .iter()
                .filter(|(_, rx)| {
                    let job = rx.borrow();
                    job.status.is_terminal() && job.updated_at < cutoff
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                jobs.remove(id);
            }
            expired
        };

        for job_id in &expired {
            if let Err(e) = self.pipeline.exporter().remove(*job_id).await {
                tracing::warn!(%job_id, error = %e, "failed to remove job artifacts");
            }
        }
        if !expired.is_empty() {
            tracing::info!(pruned = expired.len(), "pruned finished jobs");
        }
        expired.len()
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = JobCounts::default();
        for rx in jobs.values() {
            match rx.borrow().status {
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Complete => counts.complete += 1,
                JobStatus::Scanned => counts.scanned += 1,
                JobStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Terminal bookkeeping for a job whose pipeline task died mid-run.
fn settle_aborted(writer: &JobWriter) {
    writer.fail(INTERNAL_FAILURE);
    metrics::counter!("extraction_jobs_failed").increment(1);
    metrics::gauge!("extraction_jobs_active").decrement(1.0);
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidInput(#[from] DocumentError),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {job_id} is not ready (status: {status})")]
    NotReady { job_id: Uuid, status: JobStatus },

    #[error("Too many documents are being processed, try again later")]
    Capacity,

    #[error("No async runtime available to run the job")]
    NoRuntime,

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_aborted_job_is_failed_and_released() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (writer, rx) = JobWriter::new(ExtractionJob::new(Uuid::new_v4(), "a.pdf"));

        metrics::with_local_recorder(&recorder, || {
            metrics::gauge!("extraction_jobs_active").increment(1.0);
            settle_aborted(&writer);
        });

        let job = rx.borrow().clone();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(
            job.log_lines().last().copied(),
            Some("ERROR: Internal error while processing the document.")
        );

        let rendered = handle.render();
        assert!(rendered.contains("extraction_jobs_failed 1"), "{rendered}");
        assert!(rendered.contains("extraction_jobs_active 0"), "{rendered}");
    }
}
