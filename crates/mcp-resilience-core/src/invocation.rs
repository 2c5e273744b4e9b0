//! Remote operation invocations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arguments passed to a remote operation.
pub type Arguments = Map<String, Value>;

/// A named remote call with its arguments.
///
/// Immutable once built; the retry loop reuses the same invocation for
/// every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Remote operation name.
    pub name: String,

    /// Operation arguments.
    #[serde(default)]
    pub arguments: Arguments,
}

impl Invocation {
    /// Create an invocation with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    /// Create an invocation with arguments.
    #[must_use]
    pub fn with_arguments(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Get an argument by key.
    #[must_use]
    pub fn get_argument(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    /// Stable cache key for this invocation.
    ///
    /// Object keys are written in sorted order at every depth, so two
    /// invocations with equal arguments produce the same key regardless of
    /// insertion order.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = String::with_capacity(self.name.len() + 16);
        key.push_str(&self.name);
        key.push(':');
        write_object(&mut key, &self.arguments);
        key
    }
}

fn write_object(out: &mut String, map: &Arguments) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(out, v);
    }
    out.push('}');
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_object(out, map),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cache_key_ignores_insertion_order() {
        let a = Invocation::new("read_query")
            .arg("query", "SELECT 1")
            .arg("opts", json!({"b": 1, "a": [1, 2]}));
        let b = Invocation::new("read_query")
            .arg("opts", json!({"a": [1, 2], "b": 1}))
            .arg("query", "SELECT 1");

        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_separates_operations() {
        let a = Invocation::new("list_tables");
        let b = Invocation::new("describe_table");

        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "list_tables:{}");
    }

    #[test]
    fn test_cache_key_distinguishes_values() {
        let a = Invocation::new("read_query").arg("query", "SELECT 1");
        let b = Invocation::new("read_query").arg("query", "SELECT 2");

        assert_ne!(a.cache_key(), b.cache_key());
    }
}
