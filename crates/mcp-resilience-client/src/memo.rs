//! Insights memo parsing and local rendering.

use chrono::{DateTime, Utc};
use mcp_resilience_core::{MirroredNote, NormalizedResult, Note};
use serde_json::Value;

/// Shown when there is nothing to put in the memo.
pub const EMPTY_MEMO: &str = "No business insights have been discovered yet.";

/// Extract note entries from a memo resource.
///
/// Structured memos are a list of strings or `{text, created_at}` objects.
/// Text memos carry one entry per `- ` bullet line.
#[must_use]
pub fn parse_entries(memo: &NormalizedResult) -> Vec<MirroredNote> {
    match memo {
        NormalizedResult::Structured(Value::Array(items))
        | NormalizedResult::Literal(Value::Array(items)) => {
            items.iter().filter_map(entry_from_value).collect()
        }
        NormalizedResult::Structured(Value::String(text))
        | NormalizedResult::Literal(Value::String(text))
        | NormalizedResult::Opaque(text) => parse_bullets(text),
        _ => Vec::new(),
    }
}

fn entry_from_value(value: &Value) -> Option<MirroredNote> {
    match value {
        Value::String(text) => Some(MirroredNote::new(text.as_str())),
        Value::Object(fields) => {
            let text = fields.get("text")?.as_str()?;
            let created_at = fields
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            Some(MirroredNote {
                text: text.to_string(),
                created_at,
            })
        }
        _ => None,
    }
}

fn parse_bullets(text: &str) -> Vec<MirroredNote> {
    text.lines()
        .filter_map(|line| line.trim_start().strip_prefix("- "))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(MirroredNote::new)
        .collect()
}

/// Render a memo from locally known notes.
#[must_use]
pub fn render_local(notes: &[Note]) -> String {
    if notes.is_empty() {
        return EMPTY_MEMO.to_string();
    }

    let bullets: Vec<String> = notes.iter().map(|note| format!("- {}", note.text)).collect();
    let mut memo = String::from("📊 Business Intelligence Memo 📊\n\nKey Insights Discovered:\n\n");
    memo.push_str(&bullets.join("\n"));

    if notes.len() > 1 {
        memo.push_str("\n\nSummary:\n");
        memo.push_str(&format!(
            "Analysis has revealed {} key business insights that suggest opportunities for strategic optimization and growth.",
            notes.len()
        ));
    }
    memo
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_text_memo() {
        let memo = NormalizedResult::Opaque(
            "📊 Business Intelligence Memo 📊\n\nKey Insights Discovered:\n\n- sales up 10%\n- churn flat\n".into(),
        );
        let entries = parse_entries(&memo);
        assert_eq!(
            entries,
            [MirroredNote::new("sales up 10%"), MirroredNote::new("churn flat")]
        );
    }

    #[test]
    fn test_parse_structured_memo() {
        let memo = NormalizedResult::Structured(json!([
            "plain",
            {"text": "stamped", "created_at": "2024-05-01T12:00:00Z"},
            {"no_text": true},
            42
        ]));
        let entries = parse_entries(&memo);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], MirroredNote::new("plain"));
        assert_eq!(entries[1].text, "stamped");
        assert_eq!(
            entries[1].created_at.map(|t| t.to_rfc3339()),
            Some("2024-05-01T12:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_parse_empty_memo() {
        assert!(parse_entries(&NormalizedResult::Empty).is_empty());
        assert!(parse_entries(&NormalizedResult::Structured(json!({"a": 1}))).is_empty());
    }

    #[test]
    fn test_render_local() {
        assert_eq!(render_local(&[]), EMPTY_MEMO);

        let one = render_local(&[Note::new("sales up 10%", "insight")]);
        assert!(one.contains("Key Insights Discovered:"));
        assert!(one.contains("- sales up 10%"));
        assert!(!one.contains("Summary"));

        let two = render_local(&[Note::new("a", "insight"), Note::new("b", "insight")]);
        assert!(two.contains("- a\n- b"));
        assert!(two.contains("Analysis has revealed 2 key business insights"));
    }
}
