//! Response normalization.
//!
//! Remote operations answer in several shapes: a `content` list of text
//! blocks, a single text block, a bare string, or already-structured data.
//! [`normalize`] reduces all of them to one [`NormalizedResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::literal::{LiteralError, parse_literal};

/// The single typed shape every response payload is reduced to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedResult {
    /// Decoded structured data.
    Structured(Value),
    /// Not valid structured data, but a valid literal.
    Literal(Value),
    /// Undecodable, non-empty text.
    Opaque(String),
    /// Nothing to decode.
    Empty,
}

impl NormalizedResult {
    /// Decoded value, if the payload decoded at all.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Structured(v) | Self::Literal(v) => Some(v),
            Self::Opaque(_) | Self::Empty => None,
        }
    }

    /// Flatten into a plain value. Opaque text becomes a string, empty
    /// becomes null.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Structured(v) | Self::Literal(v) => v,
            Self::Opaque(text) => Value::String(text),
            Self::Empty => Value::Null,
        }
    }

    /// Text form, if the payload was opaque or decoded to a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Opaque(text) => Some(text.as_str()),
            Self::Structured(Value::String(s)) | Self::Literal(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether nothing was decoded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Why a textual payload could not be decoded.
///
/// Only ever logged; [`normalize`] degrades instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum NormalizationFailure {
    #[error("not structured data ({structured}) nor a literal ({literal})")]
    Undecodable {
        structured: serde_json::Error,
        literal: LiteralError,
    },
}

/// Normalize a raw response payload. Never fails.
#[must_use]
pub fn normalize(raw: &Value) -> NormalizedResult {
    match extract_payload(raw) {
        Value::Null => NormalizedResult::Empty,
        Value::String(text) => decode_text(text),
        structured => NormalizedResult::Structured(structured.clone()),
    }
}

/// Pick the payload out of a response.
///
/// Precedence: text of the first `content` element, then text of a
/// `content` object, then the raw response itself.
fn extract_payload(raw: &Value) -> &Value {
    let Some(content) = raw.get("content") else {
        return raw;
    };

    let text = match content {
        Value::Array(items) => items.first().and_then(|first| first.get("text")),
        Value::Object(_) => content.get("text"),
        _ => None,
    };
    text.unwrap_or(raw)
}

fn decode_text(text: &str) -> NormalizedResult {
    if text.is_empty() {
        return NormalizedResult::Empty;
    }

    let structured = match serde_json::from_str::<Value>(text) {
        Ok(value) => return NormalizedResult::Structured(value),
        Err(e) => e,
    };

    match parse_literal(text) {
        Ok(value) => NormalizedResult::Literal(value),
        Err(literal) => {
            let failure = NormalizationFailure::Undecodable {
                structured,
                literal,
            };
            tracing::debug!(len = text.len(), "Keeping payload as opaque text: {failure}");
            NormalizedResult::Opaque(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_content_list_matches_direct_text() {
        for text in ["[[1]]", "{'a': 1}", "plain words", ""] {
            let wrapped = json!({"content": [{"type": "text", "text": text}]});
            assert_eq!(normalize(&wrapped), normalize(&json!(text)), "payload {text:?}");
        }
    }

    #[test]
    fn test_content_object_text() {
        let raw = json!({"content": {"text": "42"}});
        assert_eq!(normalize(&raw), NormalizedResult::Structured(json!(42)));
    }

    #[test]
    fn test_content_without_text_falls_back_to_raw() {
        let raw = json!({"content": [{"type": "image", "data": "..."}]});
        assert_eq!(normalize(&raw), NormalizedResult::Structured(raw.clone()));

        let empty = json!({"content": []});
        assert_eq!(normalize(&empty), NormalizedResult::Structured(empty.clone()));
    }

    #[test]
    fn test_structured_before_literal() {
        assert_eq!(
            normalize(&json!("[{\"name\": \"users\"}]")),
            NormalizedResult::Structured(json!([{"name": "users"}]))
        );
        assert_eq!(
            normalize(&json!("[{'name': 'users'}]")),
            NormalizedResult::Literal(json!([{"name": "users"}]))
        );
    }

    #[test]
    fn test_leading_zero_number_is_literal() {
        assert_eq!(normalize(&json!("007")), NormalizedResult::Literal(json!(7)));
        assert_eq!(normalize(&json!("7")), NormalizedResult::Structured(json!(7)));
    }

    #[test]
    fn test_opaque_and_empty() {
        assert_eq!(
            normalize(&json!("Table created")),
            NormalizedResult::Opaque("Table created".to_string())
        );
        assert_eq!(normalize(&json!("")), NormalizedResult::Empty);
        assert_eq!(normalize(&Value::Null), NormalizedResult::Empty);
        assert_eq!(
            normalize(&json!({"content": [{"text": null}]})),
            NormalizedResult::Empty
        );
    }

    #[test]
    fn test_structured_payload_short_circuits() {
        let raw = json!({"rows": [1, 2]});
        assert_eq!(normalize(&raw), NormalizedResult::Structured(raw.clone()));

        let nested = json!({"content": [{"text": {"already": "decoded"}}]});
        assert_eq!(
            normalize(&nested),
            NormalizedResult::Structured(json!({"already": "decoded"}))
        );
    }

    #[test]
    fn test_accessors() {
        let result = NormalizedResult::Opaque("ok".into());
        assert_eq!(result.as_text(), Some("ok"));
        assert!(result.as_value().is_none());
        assert_eq!(result.into_value(), json!("ok"));
        assert_eq!(NormalizedResult::Empty.into_value(), Value::Null);
    }
}
