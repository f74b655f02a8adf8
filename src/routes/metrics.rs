use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics — Prometheus text exposition of job and LLM retry metrics.
pub async fn prometheus_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Register descriptions for the metrics the pipeline records.
pub fn describe_metrics() {
    metrics::describe_counter!("extraction_jobs_total", "Total extraction jobs submitted");
    metrics::describe_counter!("extraction_jobs_completed", "Extraction jobs that completed");
    metrics::describe_counter!(
        "extraction_jobs_scanned",
        "Extraction jobs stopped because the PDF has no text layer"
    );
    metrics::describe_counter!("extraction_jobs_failed", "Extraction jobs that ended in error");
    metrics::describe_counter!("llm_retries_total", "LLM calls retried after a transient failure");
    metrics::describe_histogram!(
        "extraction_processing_seconds",
        "Time to run the extraction pipeline for one job"
    );
    metrics::describe_gauge!("extraction_jobs_active", "Jobs currently running the pipeline");
}
