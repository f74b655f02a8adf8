use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::extraction::ExtractedRow;

/// Reference to a written table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportHandle {
    /// Server-side location; never sent to clients.
    #[serde(skip)]
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
}

/// Writes extracted rows to a downloadable artifact.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn write_table(
        &self,
        job_id: Uuid,
        file_stem: &str,
        rows: &[ExtractedRow],
    ) -> Result<ExportHandle, ExportError>;

    /// Raw artifact bytes, as served for download.
    async fn fetch(&self, handle: &ExportHandle) -> Result<Vec<u8>, ExportError>;

    /// Rows restored from an artifact, in written order.
    async fn read_back(&self, handle: &ExportHandle) -> Result<Vec<ExtractedRow>, ExportError>;

    /// Drop every artifact of a job.
    async fn remove(&self, job_id: Uuid) -> Result<(), ExportError>;
}

/// CSV tables under `{work_dir}/{job_id}/`.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    work_dir: PathBuf,
}

impl CsvExporter {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.work_dir.join(job_id.to_string())
    }
}

/// Keep a file stem to characters safe in a single path component.
fn safe_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches(['.', ' ']) {
        "" => "document".to_string(),
        s => s.to_string(),
    }
}

pub fn encode_csv(rows: &[ExtractedRow]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        writer.write_record(["key", "value", "comment", "needs_review"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

pub fn decode_csv(bytes: &[u8]) -> Result<Vec<ExtractedRow>, ExportError> {
    let mut reader = csv::Reader::from_reader(bytes);
    reader
        .deserialize()
        .collect::<Result<Vec<ExtractedRow>, _>>()
        .map_err(ExportError::from)
}

#[async_trait]
impl Exporter for CsvExporter {
    async fn write_table(
        &self,
        job_id: Uuid,
        file_stem: &str,
        rows: &[ExtractedRow],
    ) -> Result<ExportHandle, ExportError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("Output_{}.csv", safe_stem(file_stem));
        let path = dir.join(&file_name);
        tokio::fs::write(&path, encode_csv(rows)?).await?;

        tracing::debug!(%job_id, path = %path.display(), rows = rows.len(), "table written");
        Ok(ExportHandle {
            path,
            file_name,
            content_type: "text/csv".to_string(),
        })
    }

    async fn fetch(&self, handle: &ExportHandle) -> Result<Vec<u8>, ExportError> {
        Ok(tokio::fs::read(&handle.path).await?)
    }

    async fn read_back(&self, handle: &ExportHandle) -> Result<Vec<ExtractedRow>, ExportError> {
        decode_csv(&self.fetch(handle).await?)
    }

    async fn remove(&self, job_id: Uuid) -> Result<(), ExportError> {
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Could not write table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not encode table: {0}")]
    Csv(#[from] csv::Error),
}
