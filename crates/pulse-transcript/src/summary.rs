//! Best-effort argument summaries for tool calls.

use serde_json::Value;

/// Input fields consulted for a summary, in priority order.
///
/// The first field holding a non-empty string wins.
pub const SUMMARY_FIELDS: &[&str] = &[
    "command",
    "file_path",
    "notebook_path",
    "path",
    "pattern",
    "query",
    "url",
    "description",
    "prompt",
];

/// Maximum summary length in characters.
pub const MAX_SUMMARY_CHARS: usize = 80;

/// Extracts a short human-readable summary from a tool's `input` object.
///
/// Returns `None` when the input is absent, not an object, or carries none of
/// the known fields. Only the first line of the value is kept.
pub fn summarize_input(input: Option<&Value>) -> Option<String> {
    let object = input?.as_object()?;

    SUMMARY_FIELDS.iter().find_map(|field| {
        let text = object.get(*field)?.as_str()?;
        let first_line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
        Some(truncate(first_line, MAX_SUMMARY_CHARS))
    })
}

/// Truncates to at most `max` characters, appending "..." if trimmed.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
