// src/utils/patterns.rs
//! Ignore-list pattern matching
//!
//! Used by the console/error taps (`ignore_errors`) and the network tap
//! (`ignore_request`). Patterns are plain substrings; a leading or trailing
//! `*` anchors the match to the end or start of the candidate.

/// Returns true when `candidate` matches `pattern`.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(rest), None) => candidate.ends_with(rest),
        (None, Some(rest)) => candidate.starts_with(rest),
        (Some(_), Some(_)) => {
            let inner = &pattern[1..pattern.len() - 1];
            inner.is_empty() || candidate.contains(inner)
        }
        (None, None) => candidate.contains(pattern),
    }
}

/// Returns true when `candidate` matches any pattern in the list.
pub fn matches_any(patterns: &[String], candidate: &str) -> bool {
    patterns.iter().any(|p| matches(p, candidate))
}
