use std::time::Duration;

use serde::Deserialize;

use crate::services::retry::RetryPolicy;
use crate::services::schema_detector::SchemaOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Mistral API key
    pub mistral_api_key: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// Base URL of the chat completions API
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    /// Total attempts per LLM call, including the first
    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,

    #[serde(default = "default_llm_base_delay_ms")]
    pub llm_base_delay_ms: u64,

    #[serde(default = "default_llm_max_delay_ms")]
    pub llm_max_delay_ms: u64,

    /// Directory for exported tables
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Finished jobs are forgotten after this many seconds
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_schema_max_fields")]
    pub schema_max_fields: usize,

    /// Characters of document text sent for schema detection
    #[serde(default = "default_schema_text_limit")]
    pub schema_text_limit: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_llm_model() -> String {
    "mistral-small-latest".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_llm_base_delay_ms() -> u64 {
    5_000
}

fn default_llm_max_delay_ms() -> u64 {
    40_000
}

fn default_work_dir() -> String {
    "tmp".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_job_ttl_secs() -> u64 {
    3_600
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_schema_max_fields() -> usize {
    40
}

fn default_schema_text_limit() -> usize {
    3_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_max_attempts.max(1),
            base_delay: Duration::from_millis(self.llm_base_delay_ms),
            max_delay: Duration::from_millis(self.llm_max_delay_ms.max(self.llm_base_delay_ms)),
        }
    }

    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            max_fields: self.schema_max_fields,
            text_limit: self.schema_text_limit,
        }
    }
}
