//! Test doubles for the pipeline's collaborators.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use pdf_kv_extract::app_state::AppState;
use pdf_kv_extract::models::extraction::ExtractedRow;
use pdf_kv_extract::models::job::ExtractionJob;
use pdf_kv_extract::services::document::{
    Document, DocumentError, PageText, TextSource, TypeClassifier,
};
use pdf_kv_extract::services::exporter::{encode_csv, ExportError, ExportHandle, Exporter};
use pdf_kv_extract::services::jobs::JobRegistry;
use pdf_kv_extract::services::llm::{LlmError, LlmProvider, SchemaHint};
use pdf_kv_extract::services::pipeline::Pipeline;
use pdf_kv_extract::services::retry::RetryPolicy;
use pdf_kv_extract::routes;

/// Smallest byte string accepted as a PDF upload.
pub const STUB_PDF: &[u8] = b"%PDF-1.7\n% stub document\n";

pub fn stub_document(file_name: &str) -> Document {
    Document::new(file_name, STUB_PDF.to_vec()).expect("stub PDF is valid")
}

/// Millisecond-scale backoff so retry tests stay fast.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

/// LLM provider answering from a script, keyed by the requested response shape.
pub struct ScriptedLlm {
    schema_reply: String,
    rows_reply: String,
    schema_failures: Mutex<VecDeque<LlmError>>,
    rows_failures: Mutex<VecDeque<LlmError>>,
    schema_calls: AtomicUsize,
    rows_calls: AtomicUsize,
    latency: Duration,
    gate: Option<Arc<Notify>>,
}

impl ScriptedLlm {
    pub fn new(schema_reply: impl Into<String>, rows_reply: impl Into<String>) -> Self {
        Self {
            schema_reply: schema_reply.into(),
            rows_reply: rows_reply.into(),
            schema_failures: Mutex::new(VecDeque::new()),
            rows_failures: Mutex::new(VecDeque::new()),
            schema_calls: AtomicUsize::new(0),
            rows_calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
            gate: None,
        }
    }

    /// Errors returned, in order, by the first extraction calls.
    pub fn failing_rows(self, errors: Vec<LlmError>) -> Self {
        *self.rows_failures.lock().unwrap() = errors.into();
        self
    }

    /// Errors returned, in order, by the first schema calls.
    pub fn failing_schema(self, errors: Vec<LlmError>) -> Self {
        *self.schema_failures.lock().unwrap() = errors.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hold the schema call until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    pub fn rows_calls(&self) -> usize {
        self.rows_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.schema_calls() + self.rows_calls()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _prompt: &str, hint: SchemaHint) -> Result<String, LlmError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match hint {
            SchemaHint::FieldNames => {
                self.schema_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                let failure = self.schema_failures.lock().unwrap().pop_front();
                match failure {
                    Some(e) => Err(e),
                    None => Ok(self.schema_reply.clone()),
                }
            }
            SchemaHint::ExtractedRows => {
                self.rows_calls.fetch_add(1, Ordering::SeqCst);
                let failure = self.rows_failures.lock().unwrap().pop_front();
                match failure {
                    Some(e) => Err(e),
                    None => Ok(self.rows_reply.clone()),
                }
            }
        }
    }
}

/// LLM provider whose every call panics, standing in for a bug in a stage.
pub struct PanickingLlm;

#[async_trait]
impl LlmProvider for PanickingLlm {
    async fn complete(&self, _prompt: &str, _hint: SchemaHint) -> Result<String, LlmError> {
        panic!("provider blew up");
    }
}

/// Classifier and text source with a fixed answer.
pub struct StubDocuments {
    scanned: bool,
    pages: Vec<PageText>,
    unreadable: Option<String>,
    classify_calls: AtomicUsize,
    text_calls: AtomicUsize,
}

impl StubDocuments {
    pub fn digital(text: &str) -> Self {
        Self {
            scanned: false,
            pages: vec![PageText {
                page_number: 1,
                text: text.to_string(),
            }],
            unreadable: None,
            classify_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
        }
    }

    pub fn scanned() -> Self {
        Self {
            scanned: true,
            ..Self::digital("")
        }
    }

    /// Digital according to the classifier, but text extraction fails.
    pub fn unreadable(reason: &str) -> Self {
        Self {
            unreadable: Some(reason.to_string()),
            ..Self::digital("")
        }
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TypeClassifier for StubDocuments {
    async fn is_scanned(&self, _document: &Document) -> Result<bool, DocumentError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scanned)
    }
}

#[async_trait]
impl TextSource for StubDocuments {
    async fn extract_text(&self, _document: &Document) -> Result<Vec<PageText>, DocumentError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        match &self.unreadable {
            Some(reason) => Err(DocumentError::Unreadable(reason.clone())),
            None => Ok(self.pages.clone()),
        }
    }
}

/// Exporter keeping tables in memory.
#[derive(Default)]
pub struct MemoryExporter {
    tables: Mutex<HashMap<PathBuf, Vec<ExtractedRow>>>,
    fail: bool,
}

impl MemoryExporter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().unwrap().len()
    }
}

#[async_trait]
impl Exporter for MemoryExporter {
    async fn write_table(
        &self,
        job_id: Uuid,
        file_stem: &str,
        rows: &[ExtractedRow],
    ) -> Result<ExportHandle, ExportError> {
        if self.fail {
            return Err(ExportError::Io(std::io::Error::other("disk full")));
        }
        let file_name = format!("Output_{file_stem}.csv");
        let path = PathBuf::from("/memory").join(job_id.to_string()).join(&file_name);
        self.tables
            .lock()
            .unwrap()
            .insert(path.clone(), rows.to_vec());
        Ok(ExportHandle {
            path,
            file_name,
            content_type: "text/csv".to_string(),
        })
    }

    async fn fetch(&self, handle: &ExportHandle) -> Result<Vec<u8>, ExportError> {
        encode_csv(&self.read_back(handle).await?)
    }

    async fn read_back(&self, handle: &ExportHandle) -> Result<Vec<ExtractedRow>, ExportError> {
        self.tables
            .lock()
            .unwrap()
            .get(&handle.path)
            .cloned()
            .ok_or_else(|| ExportError::Io(std::io::ErrorKind::NotFound.into()))
    }

    async fn remove(&self, job_id: Uuid) -> Result<(), ExportError> {
        let prefix = PathBuf::from("/memory").join(job_id.to_string());
        self.tables
            .lock()
            .unwrap()
            .retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }
}

/// Pipeline over test doubles with a fast retry policy of `max_attempts`.
pub fn build_pipeline(
    documents: Arc<StubDocuments>,
    llm: Arc<ScriptedLlm>,
    exporter: Arc<dyn Exporter>,
    max_attempts: u32,
) -> Pipeline {
    Pipeline::new(documents.clone(), documents, llm, exporter)
        .with_retry_policy(fast_policy(max_attempts))
}

/// Wait until a job leaves `processing`.
pub async fn wait_for_terminal(registry: &JobRegistry, job_id: Uuid) -> ExtractionJob {
    let mut rx = registry.watch(job_id).expect("job is registered");
    let job = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|job| job.status.is_terminal()),
    )
    .await
    .expect("job finished in time")
    .expect("job writer alive until terminal")
    .clone();
    job
}

/// Serve the application on an ephemeral local port and return its base URL.
pub async fn spawn_app(registry: JobRegistry, max_upload_bytes: usize) -> String {
    let app = routes::router(AppState::new(registry), max_upload_bytes);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });
    format!("http://{addr}")
}

/// Upload `bytes` as the multipart `file` field.
pub async fn upload_pdf(
    client: &reqwest::Client,
    base_url: &str,
    file_name: &str,
    bytes: Vec<u8>,
) -> reqwest::Response {
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .expect("valid mime"),
    );
    client
        .post(format!("{base_url}/upload"))
        .multipart(form)
        .send()
        .await
        .expect("upload request")
}

/// Poll GET /status/{job_id} until the job leaves `processing`.
pub async fn poll_until_done(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
) -> serde_json::Value {
    for _ in 0..200 {
        let status: serde_json::Value = client
            .get(format!("{base_url}/status/{job_id}"))
            .send()
            .await
            .expect("status request")
            .json()
            .await
            .expect("status body");
        if status["status"] != "processing" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not finish");
}
