use std::collections::HashMap;

use garde::Validate;
use serde_json::Value;
use strum::Display;

use crate::models::extraction::{ExtractedRow, LlmRowPayload, SchemaField};
use crate::services::llm::{LlmProvider, SchemaHint};
use crate::services::retry::{retry_with_backoff, RetryError, RetryNotice, RetryPolicy};
use crate::services::schema_detector::first_json_array;
use crate::services::text::{find_verbatim, normalize};

/// Why a field was handed to the fallback parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnresolvedReason {
    /// The model omitted the field.
    Missing,
    /// The model's object for this field failed validation.
    Invalid,
    /// The model returned an empty value.
    Empty,
    /// The value does not occur in the source text.
    NotVerbatim,
}

/// A schema field the batch call did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub field: String,
    pub reason: UnresolvedReason,
    /// Unverified value proposed by the model.
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Trusted rows, in schema order, keyed by the schema field name.
    pub rows: Vec<ExtractedRow>,
    /// Remaining fields, in schema order.
    pub unresolved: Vec<Unresolved>,
}

pub fn build_extraction_prompt(text: &str, fields: &[SchemaField]) -> String {
    let keys = fields
        .iter()
        .map(|f| match &f.description {
            Some(description) => format!("- {} ({})", f.name, description),
            None => format!("- {}", f.name),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Extract information from the following text.\n\
         \n\
         For EACH key in the list below, find the corresponding value in the text.\n\
         - Copy the value exactly as written in the text. Do NOT paraphrase, reformat or infer.\n\
         - Add a short comment describing where in the document the value was found.\n\
         - If a key is not present in the text, omit it entirely. Never invent a value.\n\
         \n\
         Keys to extract:\n\
         {keys}\n\
         \n\
         Text to extract from:\n\
         ---\n\
         {text}\n\
         ---\n"
    )
}

/// Validate the model's reply against the requested fields and the source text.
///
/// Never fails: anything that cannot be trusted becomes an [`Unresolved`] entry.
pub fn validate_response(response: &str, fields: &[SchemaField], source: &str) -> BatchOutcome {
    let index: HashMap<String, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (normalize(&f.name), i))
        .collect();

    let mut resolved: Vec<Option<ExtractedRow>> = vec![None; fields.len()];
    let mut reasons: Vec<(UnresolvedReason, Option<String>)> =
        vec![(UnresolvedReason::Missing, None); fields.len()];

    let items: Vec<Value> = match first_json_array(response) {
        Some(Ok(items)) => items,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "LLM extraction output is not a JSON array");
            reasons.iter_mut().for_each(|r| r.0 = UnresolvedReason::Invalid);
            Vec::new()
        }
        None => {
            tracing::warn!("LLM extraction output contains no JSON array");
            reasons.iter_mut().for_each(|r| r.0 = UnresolvedReason::Invalid);
            Vec::new()
        }
    };

    for item in items {
        let key_hint = item.get("key").and_then(Value::as_str).map(normalize);
        let slot = key_hint.as_ref().and_then(|k| index.get(k)).copied();

        let payload = serde_json::from_value::<LlmRowPayload>(item)
            .ok()
            .filter(|p| p.validate().is_ok());

        let (Some(i), Some(payload)) = (slot, payload) else {
            if let Some(i) = slot {
                if resolved[i].is_none() {
                    reasons[i].0 = UnresolvedReason::Invalid;
                }
            } else {
                tracing::debug!(key = ?key_hint, "dropping LLM row for unrequested key");
            }
            continue;
        };

        if resolved[i].is_some() {
            continue;
        }

        let value = payload.value.trim();
        if value.is_empty() {
            reasons[i] = (UnresolvedReason::Empty, None);
            continue;
        }
        // The stored value is the source span, never the model's rendering of it.
        let Some(span) = find_verbatim(source, value) else {
            reasons[i] = (UnresolvedReason::NotVerbatim, Some(value.to_string()));
            continue;
        };
        let comment = match payload.comment.trim() {
            "" => "extracted by LLM".to_string(),
            c => c.to_string(),
        };
        resolved[i] = Some(ExtractedRow::resolved(&fields[i].name, span, comment));
    }

    let mut outcome = BatchOutcome::default();
    for ((field, row), (reason, hint)) in fields.iter().zip(resolved).zip(reasons) {
        match row {
            Some(row) => outcome.rows.push(row),
            None => outcome.unresolved.push(Unresolved {
                field: field.name.clone(),
                reason,
                hint,
            }),
        }
    }
    outcome
}

/// One LLM call for all fields, retried on transient provider failures.
pub async fn extract_batch<N>(
    llm: &dyn LlmProvider,
    text: &str,
    fields: &[SchemaField],
    policy: &RetryPolicy,
    on_retry: N,
) -> Result<BatchOutcome, RetryError>
where
    N: FnMut(&RetryNotice<'_>),
{
    if fields.is_empty() {
        return Ok(BatchOutcome::default());
    }

    let prompt = &build_extraction_prompt(text, fields);
    let response = retry_with_backoff(
        policy,
        || async move { llm.complete(prompt, SchemaHint::ExtractedRows).await },
        on_retry,
    )
    .await?;

    tracing::debug!(response_chars = response.len(), "LLM extraction response received");
    Ok(validate_response(&response, fields, text))
}
