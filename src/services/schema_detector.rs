use std::collections::HashSet;

use serde_json::Value;

use crate::models::extraction::SchemaField;
use crate::services::llm::{LlmError, LlmProvider, SchemaHint};
use crate::services::retry::{retry_with_backoff, RetryError, RetryNotice, RetryPolicy};
use crate::services::text::normalize;

#[derive(Debug, Clone, Copy)]
pub struct SchemaOptions {
    /// Upper bound on the number of field names kept.
    pub max_fields: usize,
    /// Characters of document text shown to the model.
    pub text_limit: usize,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            max_fields: 40,
            text_limit: 3000,
        }
    }
}

pub fn build_schema_prompt(text: &str, options: &SchemaOptions) -> String {
    let excerpt: String = text.chars().take(options.text_limit).collect();
    format!(
        "Analyze the following document text and identify the information fields worth extracting.\n\
         \n\
         Rules:\n\
         1. Infer the document type (invoice, resume, contract, form, ...) and propose fields that suit it.\n\
         2. Use concise, descriptive field names such as \"Invoice Number\" or \"Date of Birth\".\n\
         3. Do not include any values, only field names.\n\
         4. List every field once, in the order it appears in the document.\n\
         5. Return at most {max} fields.\n\
         \n\
         Text to analyze:\n\
         ---\n\
         {excerpt}\n\
         ---\n",
        max = options.max_fields,
        excerpt = excerpt,
    )
}

/// Parse the model's reply into an ordered, deduplicated field list.
///
/// Accepts bare strings or `{"name": ..., "description": ...}` objects.
pub fn parse_schema_response(
    response: &str,
    max_fields: usize,
) -> Result<Vec<SchemaField>, LlmError> {
    let items = first_json_array(response)
        .ok_or_else(|| {
            LlmError::MalformedResponse("no JSON array in schema response".to_string())
        })?
        .map_err(|e| LlmError::MalformedResponse(format!("schema response: {e}")))?;

    let mut seen = HashSet::new();
    let mut fields = Vec::new();
    for item in items {
        if fields.len() >= max_fields {
            break;
        }
        let field = match item {
            Value::String(name) => SchemaField::new(name.trim()),
            Value::Object(map) => {
                let Some(name) = map.get("name").and_then(Value::as_str) else {
                    continue;
                };
                SchemaField {
                    name: name.trim().to_string(),
                    description: map
                        .get("description")
                        .and_then(Value::as_str)
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty()),
                }
            }
            _ => continue,
        };
        if field.name.is_empty() || !seen.insert(normalize(&field.name)) {
            continue;
        }
        fields.push(field);
    }
    Ok(fields)
}

/// Ask the model for the document's field set.
///
/// Unparseable replies are retried under the same policy as transport errors.
pub async fn detect_schema<N>(
    llm: &dyn LlmProvider,
    text: &str,
    options: &SchemaOptions,
    policy: &RetryPolicy,
    on_retry: N,
) -> Result<Vec<SchemaField>, RetryError>
where
    N: FnMut(&RetryNotice<'_>),
{
    let prompt = &build_schema_prompt(text, options);
    retry_with_backoff(
        policy,
        || async move {
            let response = llm.complete(prompt, SchemaHint::FieldNames).await?;
            parse_schema_response(&response, options.max_fields)
        },
        on_retry,
    )
    .await
}

/// First complete JSON array embedded in `text`, ignoring anything after it.
///
/// `None` when the text has no `[`; otherwise the first array that parses,
/// or the error from the first `[` when none does.
pub(crate) fn first_json_array(text: &str) -> Option<Result<Vec<Value>, serde_json::Error>> {
    let mut first_error = None;
    for (start, _) in text.match_indices('[') {
        let parsed = serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Vec<Value>>()
            .next();
        match parsed {
            Some(Ok(items)) => return Some(Ok(items)),
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => break,
        }
    }
    first_error.map(Err)
}
