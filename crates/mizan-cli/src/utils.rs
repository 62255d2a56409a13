//! Shared display helpers

use mizan_ai::Source;

/// Single-line preview of `s`, at most `max` characters
pub fn preview(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = flat.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Numbered citation lines for an answer's sources
pub fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| format!("  [{}] {}", i + 1, source.citation()))
        .collect::<Vec<_>>()
        .join("\n")
}
