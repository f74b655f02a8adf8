use garde::Validate;
use serde::{Deserialize, Serialize};

/// A schema field proposed by the schema detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// One extracted key/value pair.
///
/// When `needs_review` is false, `value` is copied verbatim from the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedRow {
    pub key: String,
    pub value: String,
    pub comment: String,
    #[serde(default)]
    pub needs_review: bool,
}

impl ExtractedRow {
    pub fn resolved(key: impl Into<String>, value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            comment: comment.into(),
            needs_review: false,
        }
    }

    pub fn for_review(key: impl Into<String>, value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            comment: comment.into(),
            needs_review: true,
        }
    }

    pub fn has_value(&self) -> bool {
        !self.value.trim().is_empty()
    }
}

/// A row object as returned by the LLM, before it is trusted.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LlmRowPayload {
    #[garde(length(min = 1, max = 200))]
    pub key: String,

    #[garde(length(max = 4000))]
    pub value: String,

    #[garde(length(max = 2000))]
    pub comment: String,
}
