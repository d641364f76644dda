//! Title similarity gate for search results.

use std::collections::HashSet;

/// Minimum share of query words that must appear in the candidate title.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were",
];

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

/// Share of the query's non-stop words that also occur in `candidate`.
///
/// Words are lower-cased and split on whitespace only, so punctuation stays
/// attached. Returns `None` when either side has nothing to compare.
pub fn overlap_ratio(query: &str, candidate: &str) -> Option<f64> {
    if candidate.trim().is_empty() {
        return None;
    }
    let query_words = word_set(query);
    if query_words.is_empty() {
        return None;
    }
    let candidate_words = word_set(candidate);
    let shared = query_words.intersection(&candidate_words).count();
    Some(shared as f64 / query_words.len() as f64)
}

/// Whether `candidate` is similar enough to `query` to accept.
///
/// The measure is asymmetric: a long candidate that contains every query
/// word matches, a short candidate that covers only part of a long query
/// does not.
pub fn is_good_match(query: &str, candidate: &str, threshold: f64) -> bool {
    overlap_ratio(query, candidate).is_some_and(|ratio| ratio >= threshold)
}
