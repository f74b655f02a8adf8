use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pdf_kv_extract::{
    config::AppConfig,
    models::job::{ExtractionJob, JobResult, JobStatus},
    services::{
        document::{Document, LopdfBackend},
        exporter::CsvExporter,
        llm::MistralClient,
        pipeline::{JobWriter, Pipeline},
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(input) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: extract <file.pdf>");
        return ExitCode::from(2);
    };

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    let bytes = match std::fs::read(&input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("cannot read {}: {e}", input.display());
            return ExitCode::FAILURE;
        }
    };
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();
    let document = match Document::new(file_name, bytes) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let llm = MistralClient::new(
        &config.llm_base_url,
        &config.mistral_api_key,
        &config.llm_model,
        config.llm_timeout(),
    )
    .expect("Failed to initialize LLM client");

    let pipeline = Pipeline::new(
        Arc::new(LopdfBackend),
        Arc::new(LopdfBackend),
        Arc::new(llm),
        Arc::new(CsvExporter::new(&config.work_dir)),
    )
    .with_retry_policy(config.retry_policy())
    .with_schema_options(config.schema_options());

    let (writer, rx) = JobWriter::new(ExtractionJob::new(Uuid::new_v4(), document.file_name()));
    let printer = tokio::spawn(print_log(rx));
    pipeline.run(&document, &writer).await;
    let job = writer.snapshot();
    drop(writer);
    let _ = printer.await;

    match (job.status, job.result) {
        (JobStatus::Complete, Some(result)) => match write_reports(&result, document.stem()) {
            Ok(paths) => {
                for path in paths {
                    println!("Wrote {}", path.display());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("cannot write reports: {e}");
                ExitCode::FAILURE
            }
        },
        (JobStatus::Scanned, _) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

/// Echo job-log lines as they are appended.
async fn print_log(mut rx: tokio::sync::watch::Receiver<ExtractionJob>) {
    let mut printed = 0;
    loop {
        {
            let job = rx.borrow_and_update();
            for entry in &job.log[printed..] {
                println!("{}", entry.message);
            }
            printed = job.log.len();
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    let job = rx.borrow();
    for entry in job.log.iter().skip(printed) {
        println!("{}", entry.message);
    }
}

/// Rows and evaluation as JSON next to the exported table.
fn write_reports(result: &JobResult, stem: &str) -> std::io::Result<Vec<PathBuf>> {
    let dir = result
        .export
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let rows_path = dir.join(format!("{stem}.json"));
    std::fs::write(&rows_path, serde_json::to_vec_pretty(&result.rows)?)?;

    let evaluation_path = dir.join(format!("{stem}_evaluation.json"));
    std::fs::write(&evaluation_path, serde_json::to_vec_pretty(&result.evaluation)?)?;

    Ok(vec![result.export.path.clone(), rows_path, evaluation_path])
}
