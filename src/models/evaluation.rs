use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-field n-gram overlap between an extracted value and the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NGramMetric {
    pub n1_precision: f64,
    pub n2_precision: f64,
    pub n3_precision: f64,
    pub n4_precision: f64,
    pub top_missing_3gram: Vec<String>,
    pub top_extra_3gram: Vec<String>,
}

/// Aggregate reliability metrics for one job's extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    /// 0-100
    pub confidence_score: u8,
    pub bleu_score: f64,
    pub coverage: f64,
    pub fields_detected: usize,
    pub fields_extracted: usize,
    #[serde(default)]
    pub fields_needing_review: usize,
    pub ngram_metrics: BTreeMap<String, NGramMetric>,
}

impl EvaluationResult {
    /// One-line summary used in the job log.
    pub fn summary(&self) -> String {
        format!(
            "Confidence: {}% | BLEU: {:.1}% | Coverage: {:.1}% ({}/{} fields)",
            self.confidence_score,
            self.bleu_score * 100.0,
            self.coverage * 100.0,
            self.fields_extracted,
            self.fields_detected
        )
    }
}
