use std::sync::OnceLock;

use regex::Regex;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("static token regex"))
}

/// Lowercase and collapse runs of whitespace to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercased word and punctuation tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_regex()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The span of `haystack` that `needle` was copied from.
///
/// Matching ignores case and whitespace layout; the returned slice is the
/// source text exactly as written.
pub fn find_verbatim<'a>(haystack: &'a str, needle: &str) -> Option<&'a str> {
    let needle: Vec<char> = normalize(needle).chars().collect();
    if needle.is_empty() {
        return None;
    }

    // Normalized haystack, each char tagged with its source byte range.
    let mut folded: Vec<(char, usize, usize)> = Vec::with_capacity(haystack.len());
    let mut pending_space: Option<(usize, usize)> = None;
    for (start, c) in haystack.char_indices() {
        let end = start + c.len_utf8();
        if c.is_whitespace() {
            pending_space = match pending_space {
                Some((s, _)) => Some((s, end)),
                None => Some((start, end)),
            };
            continue;
        }
        if let Some((s, e)) = pending_space.take() {
            if !folded.is_empty() {
                folded.push((' ', s, e));
            }
        }
        folded.extend(c.to_lowercase().map(|l| (l, start, end)));
    }

    folded
        .windows(needle.len())
        .find(|window| window.iter().map(|(c, _, _)| *c).eq(needle.iter().copied()))
        .map(|window| &haystack[window[0].1..window[window.len() - 1].2])
}

/// Label comparison key: lowercase alphanumeric words joined by single spaces.
pub fn label_key(label: &str) -> String {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
