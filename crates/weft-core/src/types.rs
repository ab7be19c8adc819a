use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable per-machine key-value state.
///
/// Values are `serde_json::Value`, so the context carries full type
/// information (string, number, bool, map, list) while staying trivially
/// serializable for snapshots. Nested values are addressed with dotted
/// paths: `job.result.status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// The backing map
    values: Map<String, Value>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    /// Set a top-level key
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Remove a top-level key, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Look up a dotted path (`a.b.c`) through nested objects.
    ///
    /// Returns `None` if any segment is missing or a non-object is
    /// traversed into.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Borrow the backing map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Number of top-level keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context has no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace `{name}` / `{a.b.c}` placeholders in a template string.
    ///
    /// A placeholder that does not resolve to a context value is left
    /// verbatim, including its braces. String values are substituted
    /// without quotes; other values use their JSON rendering.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let path = &after[..close];
                    match self.resolve_placeholder(path) {
                        Some(rendered) => out.push_str(&rendered),
                        None => {
                            out.push('{');
                            out.push_str(path);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    // Unterminated brace, keep the remainder as-is
                    out.push_str(&rest[open..]);
                    return out;
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Interpolate every string found inside a JSON value, recursing
    /// through objects and arrays. Non-string leaves pass through.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate(s)),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            other => other.clone(),
        }
    }

    fn resolve_placeholder(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        let value = self.get_path(path)?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
