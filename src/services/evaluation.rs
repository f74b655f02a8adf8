//! Reliability scoring for an extraction result.
//!
//! Everything here is a pure function of `(source_text, rows, fields)`:
//! - n-gram precision (n = 1..4) of each value against the whole source, with
//!   clipped counts; a value shorter than n tokens scores 1.0 for that n.
//! - per-field BLEU: weighted geometric mean of the defined orders using
//!   [`NGRAM_WEIGHTS`] renormalized, zero precisions floored at 1e-9.
//! - `bleu_score`: mean per-field BLEU over rows that carry a value.
//! - `confidence_score`: `(0.5 * bleu + 0.5 * coverage) * (1 - 0.5 * review_share)`,
//!   clamped and scaled to 0..=100.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::evaluation::{EvaluationResult, NGramMetric};
use crate::models::extraction::{ExtractedRow, SchemaField};
use crate::services::text::{normalize, tokenize};

/// Weights of the 1-, 2-, 3- and 4-gram precisions.
pub const NGRAM_WEIGHTS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];

/// Length of the missing/extra 3-gram lists.
pub const TOP_GRAMS: usize = 5;

const PRECISION_FLOOR: f64 = 1e-9;
const BLEU_WEIGHT: f64 = 0.5;
const COVERAGE_WEIGHT: f64 = 0.5;
const REVIEW_PENALTY: f64 = 0.5;

/// N-gram counts in order of first occurrence.
#[derive(Debug, Default)]
struct GramCounts {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl GramCounts {
    fn from_tokens(tokens: &[String], n: usize) -> Self {
        let mut grams = GramCounts::default();
        if n == 0 || tokens.len() < n {
            return grams;
        }
        for window in tokens.windows(n) {
            let gram = window.join(" ");
            let count = grams.counts.entry(gram.clone()).or_insert(0);
            if *count == 0 {
                grams.order.push(gram);
            }
            *count += 1;
        }
        grams
    }

    fn total(&self) -> usize {
        self.counts.values().sum()
    }

    fn get(&self, gram: &str) -> usize {
        self.counts.get(gram).copied().unwrap_or(0)
    }

    /// Move the grams of `first` ahead of the rest, keeping relative order.
    fn rank_first(&mut self, first: &GramCounts) {
        let (mut front, back): (Vec<String>, Vec<String>) = std::mem::take(&mut self.order)
            .into_iter()
            .partition(|gram| first.counts.contains_key(gram));
        front.sort_by_key(|gram| first.order.iter().position(|g| g == gram));
        front.extend(back);
        self.order = front;
    }

    /// Grams of `self` not covered by `other`, most frequent first, ties by rank order.
    fn top_excess(&self, other: &GramCounts, limit: usize) -> Vec<String> {
        let mut excess: Vec<(&String, usize)> = self
            .order
            .iter()
            .filter_map(|gram| {
                let left = self.get(gram).saturating_sub(other.get(gram));
                (left > 0).then_some((gram, left))
            })
            .collect();
        excess.sort_by(|a, b| b.1.cmp(&a.1));
        excess
            .into_iter()
            .take(limit)
            .map(|(gram, _)| gram.clone())
            .collect()
    }
}

/// Clipped n-gram precision of `value` against `reference`.
fn clipped_precision(value: &GramCounts, reference: &GramCounts) -> f64 {
    let total = value.total();
    if total == 0 {
        return 1.0;
    }
    let matches: usize = value
        .order
        .iter()
        .map(|gram| value.get(gram).min(reference.get(gram)))
        .sum();
    matches as f64 / total as f64
}

/// Lines around the first mention of `key`, else of `value`, and the index of
/// the hit line within them.
fn region_lines<'a>(text: &'a str, key: &str, value: &str) -> Option<(Vec<&'a str>, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    let window = |hit: usize, after: usize| {
        let start = hit.saturating_sub(1);
        let end = (hit + after + 1).min(lines.len());
        (lines[start..end].to_vec(), hit - start)
    };

    let key = normalize(key);
    if !key.is_empty() {
        if let Some(hit) = lines.iter().position(|l| normalize(l).contains(&key)) {
            return Some(window(hit, 2));
        }
    }
    let value = normalize(value);
    if !value.is_empty() {
        if let Some(hit) = lines.iter().position(|l| normalize(l).contains(&value)) {
            return Some(window(hit, 1));
        }
    }
    None
}

/// Lines of `text` around the first mention of `key`, else of `value`.
pub fn source_region(text: &str, key: &str, value: &str) -> String {
    region_lines(text, key, value)
        .map(|(lines, _)| lines.join("\n"))
        .unwrap_or_default()
}

/// Precomputed source n-gram counts for n = 1..=4.
pub struct SourceGrams {
    text: String,
    by_order: [GramCounts; 4],
}

impl SourceGrams {
    pub fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        Self {
            text: text.to_string(),
            by_order: [1, 2, 3, 4].map(|n| GramCounts::from_tokens(&tokens, n)),
        }
    }

    /// N-gram metric for one extracted value.
    pub fn metric(&self, key: &str, value: &str) -> NGramMetric {
        let tokens = tokenize(value);
        let precisions: Vec<f64> = (1..=4)
            .map(|n| {
                clipped_precision(&GramCounts::from_tokens(&tokens, n), &self.by_order[n - 1])
            })
            .collect();

        let mut region3 = GramCounts::default();
        if let Some((lines, hit)) = region_lines(&self.text, key, value) {
            region3 = GramCounts::from_tokens(&tokenize(&lines.join("\n")), 3);
            region3.rank_first(&GramCounts::from_tokens(&tokenize(lines[hit]), 3));
        }
        let value3 = GramCounts::from_tokens(&tokens, 3);

        NGramMetric {
            n1_precision: precisions[0],
            n2_precision: precisions[1],
            n3_precision: precisions[2],
            n4_precision: precisions[3],
            top_missing_3gram: region3.top_excess(&value3, TOP_GRAMS),
            top_extra_3gram: value3.top_excess(&region3, TOP_GRAMS),
        }
    }
}

/// Weighted geometric mean of the orders a value of `token_count` tokens defines.
pub fn field_bleu(metric: &NGramMetric, token_count: usize) -> f64 {
    let orders = token_count.min(NGRAM_WEIGHTS.len());
    if orders == 0 {
        return 0.0;
    }
    let precisions = [
        metric.n1_precision,
        metric.n2_precision,
        metric.n3_precision,
        metric.n4_precision,
    ];
    let weight_sum: f64 = NGRAM_WEIGHTS[..orders].iter().sum();
    let log_sum: f64 = NGRAM_WEIGHTS[..orders]
        .iter()
        .zip(&precisions[..orders])
        .map(|(w, p)| (w / weight_sum) * p.max(PRECISION_FLOOR).ln())
        .sum();
    log_sum.exp().clamp(0.0, 1.0)
}

/// Blend similarity and coverage into a 0..=100 score.
///
/// Non-decreasing in `bleu_score` and in `coverage`; `review_share` (the
/// fraction of detected fields whose row needs review) only lowers it.
pub fn confidence_score(bleu_score: f64, coverage: f64, review_share: f64) -> u8 {
    let bleu = bleu_score.clamp(0.0, 1.0);
    let coverage = coverage.clamp(0.0, 1.0);
    let review = review_share.clamp(0.0, 1.0);

    let blended = (BLEU_WEIGHT * bleu + COVERAGE_WEIGHT * coverage) * (1.0 - REVIEW_PENALTY * review);
    (blended.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Score an extraction against its source text.
///
/// Only the first row per schema field is considered. A row counts as
/// extracted when it carries a non-empty value, including `needs_review`
/// rows with a best guess.
pub fn evaluate(source_text: &str, rows: &[ExtractedRow], fields: &[SchemaField]) -> EvaluationResult {
    let schema: HashSet<String> = fields.iter().map(|f| normalize(&f.name)).collect();
    let fields_detected = schema.len();

    let mut seen = HashSet::new();
    let considered: Vec<&ExtractedRow> = rows
        .iter()
        .filter(|row| {
            let key = normalize(&row.key);
            schema.contains(&key) && seen.insert(key)
        })
        .collect();

    let source = SourceGrams::new(source_text);
    let mut ngram_metrics = BTreeMap::new();
    let mut bleu_scores = Vec::new();
    let mut fields_extracted = 0;
    let mut fields_needing_review = 0;

    for row in considered {
        if row.needs_review {
            fields_needing_review += 1;
        }
        if !row.has_value() {
            continue;
        }
        fields_extracted += 1;

        let metric = source.metric(&row.key, &row.value);
        bleu_scores.push(field_bleu(&metric, tokenize(&row.value).len()));
        ngram_metrics.insert(row.key.clone(), metric);
    }

    let bleu_score = if bleu_scores.is_empty() {
        0.0
    } else {
        bleu_scores.iter().sum::<f64>() / bleu_scores.len() as f64
    };
    let (coverage, review_share) = if fields_detected == 0 {
        (0.0, 0.0)
    } else {
        (
            fields_extracted as f64 / fields_detected as f64,
            fields_needing_review as f64 / fields_detected as f64,
        )
    };

    EvaluationResult {
        confidence_score: confidence_score(bleu_score, coverage, review_share),
        bleu_score,
        coverage,
        fields_detected,
        fields_extracted,
        fields_needing_review,
        ngram_metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &str = "\
ACME Corp
Invoice Number: INV-2024-001
Date: 2024-03-01
Bill To: Globex Industries, 42 Main Street
Total: $1,250.00
";

    fn fields(names: &[&str]) -> Vec<SchemaField> {
        names.iter().map(|n| SchemaField::new(*n)).collect()
    }

    #[test]
    fn test_verbatim_fields_score_near_top() {
        let rows = vec![
            ExtractedRow::resolved("Invoice Number", "INV-2024-001", "header"),
            ExtractedRow::resolved("Total", "$1,250.00", "footer"),
        ];
        let result = evaluate(INVOICE, &rows, &fields(&["Invoice Number", "Total"]));

        assert_eq!(result.fields_detected, 2);
        assert_eq!(result.fields_extracted, 2);
        assert_eq!(result.coverage, 1.0);
        assert!((result.bleu_score - 1.0).abs() < 1e-12);
        assert!(result.confidence_score >= 95);
        assert_eq!(result.ngram_metrics.len(), 2);
    }

    #[test]
    fn test_review_rows_with_values_count_as_extracted() {
        let rows = vec![
            ExtractedRow::resolved("A", "Globex Industries", "llm"),
            ExtractedRow::for_review("B", "", "not found"),
            ExtractedRow::for_review("C", "42 Main Street", "Bill To: Globex Industries, 42 Main Street"),
        ];
        let result = evaluate(INVOICE, &rows, &fields(&["A", "B", "C"]));

        assert_eq!(result.fields_detected, 3);
        assert_eq!(result.fields_extracted, 2);
        assert_eq!(result.fields_needing_review, 2);
        assert!((result.coverage - 2.0 / 3.0).abs() < 1e-12);
        assert!(result.ngram_metrics.contains_key("A"));
        assert!(result.ngram_metrics.contains_key("C"));
        assert!(!result.ngram_metrics.contains_key("B"));

        let without_review = confidence_score(result.bleu_score, result.coverage, 0.0);
        assert!(result.confidence_score < without_review);
    }

    #[test]
    fn test_no_fields_scores_zero() {
        let result = evaluate(INVOICE, &[], &[]);
        assert_eq!(result.coverage, 0.0);
        assert_eq!(result.bleu_score, 0.0);
        assert_eq!(result.confidence_score, 0);
    }

    #[test]
    fn test_rows_outside_schema_are_ignored() {
        let rows = vec![
            ExtractedRow::resolved("Total", "$1,250.00", ""),
            ExtractedRow::resolved("Total", "ACME Corp", "duplicate"),
            ExtractedRow::resolved("Unrequested", "ACME Corp", ""),
        ];
        let result = evaluate(INVOICE, &rows, &fields(&["Total"]));
        assert_eq!(result.fields_extracted, 1);
        assert!(result.fields_extracted <= result.fields_detected);
        assert_eq!(result.ngram_metrics.keys().collect::<Vec<_>>(), vec!["Total"]);
    }

    #[test]
    fn test_short_values_are_trivially_precise_for_high_orders() {
        let source = SourceGrams::new(INVOICE);
        let metric = source.metric("Date", "2024");
        assert_eq!(metric.n1_precision, 1.0);
        assert_eq!(metric.n2_precision, 1.0);
        assert_eq!(metric.n4_precision, 1.0);

        let absent = source.metric("Date", "Tuesday");
        assert_eq!(absent.n1_precision, 0.0);
        assert_eq!(absent.n2_precision, 1.0);
        assert!(field_bleu(&absent, 1) < 1e-6);
    }

    #[test]
    fn test_partial_overlap_lowers_precision() {
        let source = SourceGrams::new(INVOICE);
        let metric = source.metric("Bill To", "Globex Industries Limited");
        assert!((metric.n1_precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((metric.n2_precision - 0.5).abs() < 1e-12);
        assert_eq!(metric.n3_precision, 0.0);
        assert_eq!(metric.top_extra_3gram, vec!["globex industries limited"]);
        assert_eq!(
            metric.top_missing_3gram,
            vec![
                "bill to :",
                "to : globex",
                ": globex industries",
                "globex industries ,",
                "industries , 42",
            ]
        );
    }

    #[test]
    fn test_missing_grams_fall_back_to_value_line() {
        let source = SourceGrams::new(INVOICE);
        let metric = source.metric("Customer Reference", "42 Main Street");
        assert_eq!(metric.top_missing_3gram[0], "bill to :");
        assert!(metric.top_extra_3gram.is_empty());

        let nowhere = source.metric("Due Date", "next week");
        assert!(nowhere.top_missing_3gram.is_empty());
        assert!(nowhere.top_extra_3gram.is_empty());
    }

    #[test]
    fn test_missing_grams_ordered_by_frequency_then_position() {
        let region = GramCounts::from_tokens(&tokenize("a b c a b c a b d"), 3);
        let value = GramCounts::default();
        assert_eq!(
            region.top_excess(&value, 3),
            vec!["a b c", "b c a", "c a b"]
        );
        let all = region.top_excess(&value, TOP_GRAMS);
        assert_eq!(all.len(), 4);
        assert_eq!(all[3], "a b d");

        let long = GramCounts::from_tokens(&tokenize("a b c d e f g h"), 3);
        let capped = long.top_excess(&value, TOP_GRAMS);
        assert_eq!(capped.len(), TOP_GRAMS);
        assert_eq!(capped[0], "a b c");
        assert_eq!(capped[4], "e f g");
    }

    #[test]
    fn test_region_prefers_key_line() {
        let region = source_region(INVOICE, "date", "2024-03-01");
        assert_eq!(
            region,
            "Invoice Number: INV-2024-001\nDate: 2024-03-01\nBill To: Globex Industries, 42 Main Street\nTotal: $1,250.00"
        );
        assert_eq!(source_region(INVOICE, "Due Date", "nowhere"), "");
    }

    #[test]
    fn test_confidence_is_bounded_and_monotonic() {
        let steps: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();
        for &review in &[0.0, 0.25, 1.0] {
            for &a in &steps {
                let mut last_bleu = 0;
                let mut last_cov = 0;
                for &b in &steps {
                    let by_bleu = confidence_score(b, a, review);
                    let by_cov = confidence_score(a, b, review);
                    assert!(by_bleu <= 100 && by_cov <= 100);
                    assert!(by_bleu >= last_bleu);
                    assert!(by_cov >= last_cov);
                    last_bleu = by_bleu;
                    last_cov = by_cov;
                }
            }
        }
        assert_eq!(confidence_score(1.0, 1.0, 0.0), 100);
        assert_eq!(confidence_score(-3.0, 7.0, 2.0), 25);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let rows = vec![
            ExtractedRow::resolved("Bill To", "Globex Industries, 42 Main Street", ""),
            ExtractedRow::for_review("Date", "2024-03", "Date: 2024-03-01"),
        ];
        let schema = fields(&["Bill To", "Date", "Total"]);
        let first = evaluate(INVOICE, &rows, &schema);
        for _ in 0..5 {
            let again = evaluate(INVOICE, &rows, &schema);
            assert_eq!(again, first);
            assert_eq!(again.bleu_score.to_bits(), first.bleu_score.to_bits());
        }
    }
}
