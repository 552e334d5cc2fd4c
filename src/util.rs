//! Shared utility functions for the CodeFRAME crate.

use chrono::{DateTime, SecondsFormat, Utc};

/// Generate an opaque entity id (uuid v4, simple format).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current time as a fixed-width ISO-8601 UTC string with microsecond
/// precision. Fixed width makes lexicographic order equal time order.
pub fn now_iso() -> String {
    format_iso(Utc::now())
}

/// Format a timestamp in the store's canonical fixed-width form.
pub fn format_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the outermost JSON object.
pub fn extract_json_object(text: &str) -> Option<String> {
    extract_json_delimited(text, '{', '}')
}

/// Extract a JSON array from text that may contain other content.
pub fn extract_json_array(text: &str) -> Option<String> {
    extract_json_delimited(text, '[', ']')
}

fn extract_json_delimited(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0;
    let mut end = start;

    for (i, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                end = start + i + ch.len_utf8();
                break;
            }
        }
    }

    if depth == 0 && end > start {
        Some(text[start..end].to_string())
    } else {
        None
    }
}

/// Truncate on a char boundary, appending a marker when content was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}\n... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_with_prefix_and_suffix() {
        let text = r#"Here is the map: {"a": ["b"]} as requested"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": ["b"]}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"outer": {"inner": "value"}}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_unbalanced() {
        assert_eq!(extract_json_object(r#"{"key": "#), None);
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn test_extract_json_array() {
        let text = r#"Tasks: [{"title": "a"}, {"title": "b"}] done"#;
        assert_eq!(
            extract_json_array(text),
            Some(r#"[{"title": "a"}, {"title": "b"}]"#.to_string())
        );
    }

    #[test]
    fn test_new_id_is_opaque_and_unique() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_iso_timestamps_sort_lexicographically() {
        let earlier = format_iso(DateTime::parse_from_rfc3339("2026-01-01T00:00:00.000001Z").unwrap().into());
        let later = format_iso(DateTime::parse_from_rfc3339("2026-01-01T00:00:00.000002Z").unwrap().into());
        assert!(earlier < later);
        assert_eq!(earlier.len(), later.len());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "x".repeat(20);
        let cut = truncate_chars(&long, 10);
        assert!(cut.starts_with("xxxxxxxxxx"));
        assert!(cut.ends_with("[truncated]"));
    }
}
