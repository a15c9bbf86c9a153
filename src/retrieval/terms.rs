//! Query term extraction shared by the searcher and the lexical branch

use ahash::AHashSet;

/// Words too common to carry meaning in a lexical match
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from",
    "how", "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "with",
];

/// Lowercase alphanumeric tokens in order of appearance
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

/// Distinct, meaningful terms of a query in order of first appearance
///
/// Stop words are dropped unless nothing else remains.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    let all: Vec<String> = tokenize(query).filter(|t| seen.insert(t.clone())).collect();

    let meaningful: Vec<String> = all
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect();

    if meaningful.is_empty() {
        all
    } else {
        meaningful
    }
}

/// Normalize tag names: trimmed, lowercased, deduplicated, sorted
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = tags
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}
