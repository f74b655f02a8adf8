//! Deterministic key/value recovery for fields the LLM did not resolve.
//!
//! The source is segmented into candidate blocks: `Label: value` lines, and
//! label lines followed by value lines up to a blank line, another labeled
//! line, an ALL-CAPS heading or a bullet. Each unresolved field is matched to
//! a candidate label; every field gets exactly one row back.

use std::sync::OnceLock;

use regex::Regex;
use strsim::jaro_winkler;

use crate::models::extraction::ExtractedRow;
use crate::services::extractor::Unresolved;
use crate::services::text::{find_verbatim, label_key};

/// Comment used when nothing in the source relates to the field.
pub const NOT_FOUND: &str = "not found";

/// Minimum label similarity for a partial match.
const LABEL_SIMILARITY_THRESHOLD: f64 = 0.85;

const MAX_LABEL_CHARS: usize = 120;
const MAX_VALUE_LINES: usize = 8;
const HEADING_MAX_CHARS: usize = 60;

fn labeled_line_regex() -> &'static Regex {
    static LABELED: OnceLock<Regex> = OnceLock::new();
    LABELED.get_or_init(|| {
        Regex::new(r"^(?:[-*•·]\s+)?(?P<label>[^:\n]{1,120}?)\s*(?::|\s[-–]\s)\s*(?P<value>.*)$")
            .expect("static labeled-line regex")
    })
}

fn bullet_regex() -> &'static Regex {
    static BULLET: OnceLock<Regex> = OnceLock::new();
    BULLET.get_or_init(|| Regex::new(r"^(?:[-*•·]|\d{1,3}[.)])\s+").expect("static bullet regex"))
}

/// A label and the value text that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub value: String,
    /// Raw source lines the candidate was read from.
    pub block: String,
}

fn is_heading(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    line.chars().count() < HEADING_MAX_CHARS
        && letters.len() >= 2
        && letters.iter().all(|c| c.is_uppercase())
}

fn is_bullet(line: &str) -> bool {
    bullet_regex().is_match(line)
}

fn is_labeled(line: &str) -> bool {
    labeled_line_regex()
        .captures(line)
        .is_some_and(|c| !c["value"].trim().is_empty())
}

/// Lines following `start` that belong to its value block.
fn value_lines<'a>(lines: &[&'a str], start: usize) -> Vec<&'a str> {
    lines[start..]
        .iter()
        .map(|l| l.trim())
        .take_while(|l| !l.is_empty() && !is_labeled(l) && !is_heading(l) && !is_bullet(l))
        .take(MAX_VALUE_LINES)
        .collect()
}

/// Segment the source into label/value candidates, in document order.
pub fn scan_candidates(text: &str) -> Vec<Candidate> {
    let lines: Vec<&str> = text.lines().collect();
    let mut candidates = Vec::new();

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.chars().count() > MAX_LABEL_CHARS * 2 {
            continue;
        }

        if let Some(caps) = labeled_line_regex().captures(line) {
            let label = caps["label"].trim().to_string();
            let inline = caps["value"].trim();
            if !inline.is_empty() {
                candidates.push(Candidate {
                    label,
                    value: inline.to_string(),
                    block: line.to_string(),
                });
                continue;
            }

            // `Label:` with the value on the following lines.
            let following = value_lines(&lines, i + 1);
            if !following.is_empty() {
                candidates.push(Candidate {
                    label,
                    value: following.join("\n"),
                    block: std::iter::once(line)
                        .chain(following.iter().copied())
                        .collect::<Vec<_>>()
                        .join("\n"),
                });
            }
            continue;
        }

        let label_like = line.chars().count() <= MAX_LABEL_CHARS
            && !line.ends_with(['.', '?', '!'])
            && !is_bullet(line);
        if !label_like {
            continue;
        }

        let following = value_lines(&lines, i + 1);
        if !following.is_empty() {
            candidates.push(Candidate {
                label: line.to_string(),
                value: following.join("\n"),
                block: std::iter::once(line)
                    .chain(following.iter().copied())
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        }
    }

    candidates
}

fn contains_words(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Window of lines around the first line that mentions `field_key`.
fn mention_block(text: &str, field_key: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let hit = lines
        .iter()
        .position(|l| contains_words(&label_key(l), field_key))?;
    let end = (hit + 3).min(lines.len());
    Some(
        lines[hit..end]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Produce exactly one row per unresolved field, in input order.
pub fn resolve_fields(text: &str, unresolved: &[Unresolved]) -> Vec<ExtractedRow> {
    let candidates = scan_candidates(text);
    unresolved
        .iter()
        .map(|u| resolve_field(text, &candidates, u))
        .collect()
}

fn resolve_field(text: &str, candidates: &[Candidate], unresolved: &Unresolved) -> ExtractedRow {
    let field = unresolved.field.as_str();
    let field_key = label_key(field);
    let hint = unresolved.hint.clone().unwrap_or_default();

    if field_key.is_empty() {
        return ExtractedRow::for_review(field, hint, NOT_FOUND);
    }

    if let Some(exact) = candidates.iter().find(|c| label_key(&c.label) == field_key) {
        let first_line = exact.block.lines().next().unwrap_or_default();
        let value = find_verbatim(text, &exact.value).unwrap_or(exact.value.as_str());
        return ExtractedRow::resolved(field, value, format!("heuristic match: {first_line}"));
    }

    let partial = candidates.iter().find(|c| {
        let label = label_key(&c.label);
        contains_words(&label, &field_key)
            || contains_words(&field_key, &label)
            || jaro_winkler(&label, &field_key) >= LABEL_SIMILARITY_THRESHOLD
    });
    if let Some(partial) = partial {
        return ExtractedRow::for_review(field, &partial.value, &partial.block);
    }

    match mention_block(text, &field_key) {
        Some(block) => ExtractedRow::for_review(field, hint, block),
        None => ExtractedRow::for_review(field, hint, NOT_FOUND),
    }
}
