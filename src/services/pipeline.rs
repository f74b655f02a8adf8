//! Stage sequencing for one extraction job.
//!
//! A job's record lives in a `watch` channel. The [`JobWriter`] owns the
//! sender and is held only by the job's task; pollers clone the latest value
//! from a receiver, so they see either the state before or after an update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::extraction::{ExtractedRow, SchemaField};
use crate::models::job::{ExtractionJob, JobResult, JobStatus, LogEntry};
use crate::services::document::{join_pages, Document, DocumentError, TextSource, TypeClassifier};
use crate::services::evaluation::evaluate;
use crate::services::exporter::{ExportError, Exporter};
use crate::services::extractor::{extract_batch, BatchOutcome};
use crate::services::fallback::resolve_fields;
use crate::services::llm::LlmProvider;
use crate::services::retry::{RetryError, RetryPolicy};
use crate::services::schema_detector::{detect_schema, SchemaOptions};

pub const SCANNED_MESSAGE: &str = "PDF appears scanned. Stopping (no OCR path).";

/// Logged instead of the LLM extraction lines when the schema is empty.
pub const NO_FIELDS_MESSAGE: &str = "No fields detected. Skipping value extraction.";

/// Sole writer of one job's record.
#[derive(Debug)]
pub struct JobWriter {
    tx: watch::Sender<ExtractionJob>,
}

impl JobWriter {
    pub fn new(job: ExtractionJob) -> (Self, watch::Receiver<ExtractionJob>) {
        let (tx, rx) = watch::channel(job);
        (Self { tx }, rx)
    }

    pub fn job_id(&self) -> Uuid {
        self.tx.borrow().id
    }

    pub fn snapshot(&self) -> ExtractionJob {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExtractionJob> {
        self.tx.subscribe()
    }

    /// Append a progress line. Ignored once the job is terminal.
    pub fn log(&self, message: impl Into<String>) {
        self.update(None, Some(message.into()), None);
    }

    pub fn complete(&self, result: JobResult) {
        self.update(Some(JobStatus::Complete), None, Some(result));
    }

    pub fn mark_scanned(&self, message: impl Into<String>) {
        self.update(Some(JobStatus::Scanned), Some(message.into()), None);
    }

    /// Move to `error` with `ERROR: {message}` as the last log line.
    pub fn fail(&self, message: impl AsRef<str>) {
        let line = format!("ERROR: {}", message.as_ref());
        self.update(Some(JobStatus::Error), Some(line), None);
    }

    /// Apply status, log line and result as one change.
    fn update(&self, status: Option<JobStatus>, line: Option<String>, result: Option<JobResult>) {
        let job_id = self.job_id();
        let applied = self.tx.send_if_modified(|job| {
            if job.status.is_terminal() {
                return false;
            }
            let now = Utc::now();
            if let Some(message) = &line {
                job.log.push(LogEntry {
                    at: now,
                    message: message.clone(),
                });
            }
            if let Some(status) = status {
                job.status = status;
            }
            if result.is_some() {
                job.result = result;
            }
            job.updated_at = now;
            true
        });

        if !applied {
            tracing::warn!(%job_id, "ignoring update to finished job");
            return;
        }
        if let Some(message) = line {
            tracing::info!(%job_id, job_log = %message, "job progress");
        }
        if let Some(status) = status {
            tracing::info!(%job_id, %status, "job finished");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Document(#[from] DocumentError),

    #[error("No extractable text found in the document.")]
    EmptyText,

    #[error("Schema detection failed: {0}")]
    Schema(#[source] RetryError),

    #[error("LLM extraction failed: {0}")]
    Extraction(#[source] RetryError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
}

enum Outcome {
    Scanned,
    Complete(JobResult),
}

/// The collaborators and knobs of one extraction run.
pub struct Pipeline {
    classifier: Arc<dyn TypeClassifier>,
    text_source: Arc<dyn TextSource>,
    llm: Arc<dyn LlmProvider>,
    exporter: Arc<dyn Exporter>,
    retry: RetryPolicy,
    schema: SchemaOptions,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn TypeClassifier>,
        text_source: Arc<dyn TextSource>,
        llm: Arc<dyn LlmProvider>,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        Self {
            classifier,
            text_source,
            llm,
            exporter,
            retry: RetryPolicy::default(),
            schema: SchemaOptions::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_schema_options(mut self, schema: SchemaOptions) -> Self {
        self.schema = schema;
        self
    }

    pub fn exporter(&self) -> &Arc<dyn Exporter> {
        &self.exporter
    }

    /// Drive one job to a terminal state.
    pub async fn run(&self, document: &Document, writer: &JobWriter) {
        let job_id = writer.job_id();
        let started = Instant::now();
        metrics::gauge!("extraction_jobs_active").increment(1.0);

        match self.execute(job_id, document, writer).await {
            Ok(Outcome::Complete(result)) => {
                tracing::info!(
                    %job_id,
                    fields = result.evaluation.fields_detected,
                    confidence = result.evaluation.confidence_score,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "extraction complete"
                );
                writer.complete(result);
                metrics::counter!("extraction_jobs_completed").increment(1);
            }
            Ok(Outcome::Scanned) => {
                writer.mark_scanned(SCANNED_MESSAGE);
                metrics::counter!("extraction_jobs_scanned").increment(1);
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "extraction failed");
                writer.fail(e.to_string());
                metrics::counter!("extraction_jobs_failed").increment(1);
            }
        }

        metrics::histogram!("extraction_processing_seconds").record(started.elapsed().as_secs_f64());
        metrics::gauge!("extraction_jobs_active").decrement(1.0);
    }

    async fn execute(
        &self,
        job_id: Uuid,
        document: &Document,
        writer: &JobWriter,
    ) -> Result<Outcome, PipelineError> {
        writer.log("Detecting PDF type...");
        if self.classifier.is_scanned(document).await? {
            return Ok(Outcome::Scanned);
        }
        writer.log("Digital PDF detected.");

        writer.log("Extracting text...");
        let pages = self.text_source.extract_text(document).await?;
        let text = join_pages(&pages);
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyText);
        }
        writer.log(format!(
            "Extracted {} characters from {} pages.",
            text.chars().count(),
            pages.len()
        ));

        writer.log("Detecting schema from content...");
        let fields = detect_schema(
            self.llm.as_ref(),
            &text,
            &self.schema,
            &self.retry,
            |notice| writer.log(notice.log_line()),
        )
        .await
        .map_err(PipelineError::Schema)?;
        writer.log(format!("Detected {} fields from content.", fields.len()));

        let batch = if fields.is_empty() {
            writer.log(NO_FIELDS_MESSAGE);
            BatchOutcome::default()
        } else {
            writer.log("Extracting values via LLM...");
            let batch = extract_batch(
                self.llm.as_ref(),
                &text,
                &fields,
                &self.retry,
                |notice| writer.log(notice.log_line()),
            )
            .await
            .map_err(PipelineError::Extraction)?;
            writer.log(format!(
                "Extracted {} key:value pairs via LLM.",
                batch.rows.len()
            ));
            batch
        };

        let mut rows = batch.rows;
        if !batch.unresolved.is_empty() {
            let pending = batch.unresolved.len();
            writer.log(format!("Resolving {pending} unresolved fields heuristically..."));
            let recovered = resolve_fields(&text, &batch.unresolved);
            let needs_review = recovered.iter().filter(|r| r.needs_review).count();
            writer.log(format!(
                "Heuristic parser resolved {} of {} fields ({} need review).",
                pending - needs_review,
                pending,
                needs_review
            ));
            rows.extend(recovered);
        }
        let rows = in_schema_order(rows, &fields);

        writer.log("Evaluating extraction quality...");
        let evaluation = evaluate(&text, &rows, &fields);
        writer.log(evaluation.summary());

        writer.log("Exporting table...");
        let export = self
            .exporter
            .write_table(job_id, document.stem(), &rows)
            .await?;
        writer.log(format!("Wrote table to {}", export.file_name));

        Ok(Outcome::Complete(JobResult {
            fields: fields.into_iter().map(|f| f.name).collect(),
            rows,
            evaluation,
            export,
        }))
    }
}

/// Rows reordered to follow the schema. Rows for unknown keys are dropped.
fn in_schema_order(rows: Vec<ExtractedRow>, fields: &[SchemaField]) -> Vec<ExtractedRow> {
    let mut by_key: HashMap<String, ExtractedRow> = HashMap::with_capacity(rows.len());
    for row in rows {
        by_key.entry(row.key.clone()).or_insert(row);
    }
    fields
        .iter()
        .filter_map(|f| by_key.remove(&f.name))
        .collect()
}
