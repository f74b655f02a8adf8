use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use pdf_kv_extract::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        document::LopdfBackend, exporter::CsvExporter, jobs::JobRegistry, llm::MistralClient,
        pipeline::Pipeline,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing pdf-kv-extract server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe_metrics();

    tracing::info!(model = %config.llm_model, base_url = %config.llm_base_url, "Initializing LLM client");
    let llm = MistralClient::new(
        &config.llm_base_url,
        &config.mistral_api_key,
        &config.llm_model,
        config.llm_timeout(),
    )
    .expect("Failed to initialize LLM client");

    tracing::info!(work_dir = %config.work_dir, "Preparing export directory");
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .expect("Failed to create work directory");

    let pipeline = Pipeline::new(
        Arc::new(LopdfBackend),
        Arc::new(LopdfBackend),
        Arc::new(llm),
        Arc::new(CsvExporter::new(&config.work_dir)),
    )
    .with_retry_policy(config.retry_policy())
    .with_schema_options(config.schema_options());

    let state = AppState::new(JobRegistry::new(
        Arc::new(pipeline),
        config.max_concurrent_jobs,
    ));

    // Forget finished jobs and their tables once they expire
    let jobs = Arc::clone(&state.jobs);
    let ttl = config.job_ttl();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl.max(std::time::Duration::from_secs(1)));
        loop {
            interval.tick().await;
            jobs.prune(ttl).await;
        }
    });

    let app = routes::router(state, config.max_upload_bytes).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    tracing::info!("Starting pdf-kv-extract on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
