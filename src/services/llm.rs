use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Shape of the JSON the caller expects back from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaHint {
    /// `["Field Name", ...]`
    FieldNames,
    /// `[{"key": ..., "value": ..., "comment": ...}, ...]`
    ExtractedRows,
}

impl SchemaHint {
    pub fn instructions(self) -> &'static str {
        match self {
            SchemaHint::FieldNames => concat!(
                "Respond with a JSON array of strings and nothing else. ",
                "Example: [\"Invoice Number\", \"Invoice Date\", \"Total\"]"
            ),
            SchemaHint::ExtractedRows => concat!(
                "Respond with a JSON array of objects and nothing else. ",
                "Each object has exactly the string fields \"key\", \"value\" and \"comment\". ",
                "Example: [{\"key\": \"Invoice Number\", \"value\": \"INV-001\", \"comment\": \"Header, first line\"}]"
            ),
        }
    }
}

/// A text-completion LLM.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, hint: SchemaHint) -> Result<String, LlmError>;
}

/// Client for the Mistral chat completions API.
pub struct MistralClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl MistralClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for MistralClient {
    async fn complete(&self, prompt: &str, hint: SchemaHint) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = ChatRequest {
            model: &self.model,
            temperature: 0.1,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: hint.instructions(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(LlmError::Timeout),
            Err(e) => return Err(LlmError::Network(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                LlmError::MalformedResponse("response contained no message content".to_string())
            })
    }
}

/// Map a non-success HTTP status onto the provider error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
            status: status.as_u16(),
        },
        StatusCode::REQUEST_TIMEOUT => LlmError::Timeout,
        s if s.is_server_error() => LlmError::Server { status: s.as_u16() },
        s => LlmError::BadRequest {
            status: s.as_u16(),
            detail: body.chars().take(200).collect(),
        },
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("LLM provider rate limit reached")]
    RateLimited { retry_after: Option<Duration> },

    #[error("LLM provider returned server error {status}")]
    Server { status: u16 },

    #[error("LLM provider rejected the credentials (HTTP {status})")]
    Auth { status: u16 },

    #[error("LLM provider rejected the request (HTTP {status}): {detail}")]
    BadRequest { status: u16, detail: String },

    #[error("LLM response could not be parsed: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout
            | LlmError::Network(_)
            | LlmError::RateLimited { .. }
            | LlmError::Server { .. }
            | LlmError::MalformedResponse(_) => true,
            LlmError::Auth { .. } | LlmError::BadRequest { .. } => false,
        }
    }

    /// Delay requested by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
