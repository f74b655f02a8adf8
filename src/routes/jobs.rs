use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ErrorResponse, JobStatusResponse, UploadResponse};
use crate::models::job::JobStatus;
use crate::services::jobs::JobError;

/// Multipart field carrying the PDF.
const FILE_FIELD: &str = "file";

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::NotReady { .. } => StatusCode::CONFLICT,
            JobError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
            JobError::NoRuntime | JobError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_request(detail: impl Into<String>) -> Response {
    let body = ErrorResponse {
        detail: detail.into(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// POST /upload — Submit a PDF for extraction.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, Response> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
        let data = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        upload = Some((file_name, data.to_vec()));
    }

    let (file_name, bytes) = upload.ok_or_else(|| bad_request("Missing multipart field `file`"))?;
    let job_id = state
        .jobs
        .create(file_name, bytes)
        .map_err(IntoResponse::into_response)?;

    Ok(Json(UploadResponse {
        job_id,
        status: JobStatus::Processing,
        message: "Processing started".to_string(),
    }))
}

/// GET /status/{job_id} — Current snapshot of a job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, JobError> {
    let job = state.jobs.get(job_id)?;
    Ok(Json(job.into()))
}

/// GET /download/{job_id} — Exported table of a completed job.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobError> {
    let (handle, bytes) = state.jobs.download(job_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", handle.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, handle.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
