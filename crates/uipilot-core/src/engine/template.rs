//! `${dotted.path}` template resolution over the generic value tree.
//!
//! Resolution recurses structurally over mappings and sequences. A string
//! that is exactly one placeholder returns the looked-up value with its
//! original type preserved (numeric timeouts must not be stringified); a
//! string mixing placeholders with other text substitutes each match and
//! coerces to a string. A miss is a fatal configuration error -- execution
//! cannot proceed with a meaningless parameter.

use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Template resolution failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The referenced path is absent from every scope layer.
    #[error("unresolved template variable '${{{0}}}'")]
    UnresolvedVariable(String),
}

// ---------------------------------------------------------------------------
// TemplateScope
// ---------------------------------------------------------------------------

/// Layered lookup context: run configuration, locator aliases, run-time
/// values. Layers are searched in insertion order; the first hit wins.
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    layers: Vec<Value>,
}

impl TemplateScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lookup layer. Non-object layers are accepted but can never
    /// match a dotted path.
    pub fn push_layer(&mut self, layer: Value) {
        self.layers.push(layer);
    }

    /// Resolve a dotted path across all layers, first match wins.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| lookup_path(layer, path))
    }
}

fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve all placeholders in `value`, returning a new value.
///
/// Identity law: a value containing no placeholder syntax is returned
/// unchanged, including nested containers.
pub fn resolve(value: &Value, scope: &TemplateScope) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_map(map, scope).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve all placeholders in a parameter mapping.
pub fn resolve_map(
    map: &Map<String, Value>,
    scope: &TemplateScope,
) -> Result<Map<String, Value>, TemplateError> {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(key.clone(), resolve(value, scope)?);
    }
    Ok(out)
}

fn resolve_str(s: &str, scope: &TemplateScope) -> Result<Value, TemplateError> {
    let spans = find_placeholders(s);
    if spans.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    // A string that is exactly one placeholder keeps the looked-up type.
    if spans.len() == 1 && spans[0].start == 0 && spans[0].end == s.len() {
        let path = &spans[0].path;
        return scope
            .lookup(path)
            .cloned()
            .ok_or_else(|| TemplateError::UnresolvedVariable(path.clone()));
    }

    let mut out = String::with_capacity(s.len());
    let mut cursor = 0usize;
    for span in &spans {
        out.push_str(&s[cursor..span.start]);
        let value = scope
            .lookup(&span.path)
            .ok_or_else(|| TemplateError::UnresolvedVariable(span.path.clone()))?;
        out.push_str(&value_to_string(value));
        cursor = span.end;
    }
    out.push_str(&s[cursor..]);
    Ok(Value::String(out))
}

struct PlaceholderSpan {
    start: usize,
    end: usize,
    path: String,
}

/// Scan for `${path}` occurrences. An empty `${}` is left as literal text.
fn find_placeholders(s: &str) -> Vec<PlaceholderSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0usize;
    while let Some(rel_open) = s[cursor..].find("${") {
        let open = cursor + rel_open;
        let Some(rel_close) = s[open + 2..].find('}') else {
            break;
        };
        let close = open + 2 + rel_close;
        let path = s[open + 2..close].trim();
        if !path.is_empty() {
            spans.push(PlaceholderSpan {
                start: open,
                end: close + 1,
                path: path.to_string(),
            });
        }
        cursor = close + 1;
    }
    spans
}

/// Convert a looked-up value to display text for in-string substitution.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects/arrays substitute as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_scope() -> TemplateScope {
        let mut scope = TemplateScope::new();
        scope.push_layer(json!({
            "config": {
                "base_url": "https://shop.example",
                "username": "admin",
                "wait_ms": 5000,
                "headless": true,
                "viewport": { "width": 1280, "height": 720 },
            }
        }));
        scope.push_layer(json!({
            "selectors": { "login_button": "#login, .login-btn" }
        }));
        scope
    }

    // -----------------------------------------------------------------------
    // Identity law
    // -----------------------------------------------------------------------

    #[test]
    fn test_placeholder_free_value_returned_unchanged() {
        let scope = test_scope();
        let value = json!({
            "selector": "#cart",
            "nested": { "count": 3, "flags": [true, false] },
            "note": "no templates here",
        });
        assert_eq!(resolve(&value, &scope).unwrap(), value);
    }

    // -----------------------------------------------------------------------
    // Type preservation
    // -----------------------------------------------------------------------

    #[test]
    fn test_whole_string_placeholder_preserves_number() {
        let scope = test_scope();
        let resolved = resolve(&json!("${config.wait_ms}"), &scope).unwrap();
        assert_eq!(resolved, json!(5000));
        assert!(resolved.is_u64());
    }

    #[test]
    fn test_whole_string_placeholder_preserves_bool_and_object() {
        let scope = test_scope();
        assert_eq!(resolve(&json!("${config.headless}"), &scope).unwrap(), json!(true));
        assert_eq!(
            resolve(&json!("${config.viewport}"), &scope).unwrap(),
            json!({ "width": 1280, "height": 720 })
        );
    }

    // -----------------------------------------------------------------------
    // String substitution
    // -----------------------------------------------------------------------

    #[test]
    fn test_embedded_placeholder_coerces_to_string() {
        let scope = test_scope();
        let resolved = resolve(&json!("${config.base_url}/cart"), &scope).unwrap();
        assert_eq!(resolved, json!("https://shop.example/cart"));
    }

    #[test]
    fn test_multiple_placeholders_in_one_string() {
        let scope = test_scope();
        let resolved = resolve(
            &json!("${config.username} waits ${config.wait_ms}ms"),
            &scope,
        )
        .unwrap();
        assert_eq!(resolved, json!("admin waits 5000ms"));
    }

    #[test]
    fn test_adjacent_placeholders_are_not_whole_string() {
        let scope = test_scope();
        let resolved = resolve(&json!("${config.username}${config.wait_ms}"), &scope).unwrap();
        assert_eq!(resolved, json!("admin5000"));
    }

    #[test]
    fn test_empty_placeholder_is_literal() {
        let scope = test_scope();
        assert_eq!(resolve(&json!("${}"), &scope).unwrap(), json!("${}"));
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let scope = test_scope();
        assert_eq!(
            resolve(&json!("broken ${config.base_url"), &scope).unwrap(),
            json!("broken ${config.base_url")
        );
    }

    // -----------------------------------------------------------------------
    // Structural recursion
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolves_inside_nested_containers() {
        let scope = test_scope();
        let value = json!({
            "url": "${config.base_url}/login",
            "fields": [
                { "selector": "${selectors.login_button}" },
                { "timeout": "${config.wait_ms}" },
            ],
        });
        let resolved = resolve(&value, &scope).unwrap();
        assert_eq!(resolved["url"], json!("https://shop.example/login"));
        assert_eq!(resolved["fields"][0]["selector"], json!("#login, .login-btn"));
        assert_eq!(resolved["fields"][1]["timeout"], json!(5000));
    }

    // -----------------------------------------------------------------------
    // Lookup misses and layering
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_path_is_an_error() {
        let scope = test_scope();
        let err = resolve(&json!("${config.missing}"), &scope).unwrap_err();
        assert!(err.to_string().contains("config.missing"), "got: {err}");
    }

    #[test]
    fn test_first_layer_wins() {
        let mut scope = TemplateScope::new();
        scope.push_layer(json!({ "env": { "name": "staging" } }));
        scope.push_layer(json!({ "env": { "name": "production" } }));
        assert_eq!(resolve(&json!("${env.name}"), &scope).unwrap(), json!("staging"));
    }

    #[test]
    fn test_later_layer_fills_gaps() {
        let mut scope = TemplateScope::new();
        scope.push_layer(json!({ "env": { "name": "staging" } }));
        scope.push_layer(json!({ "run": { "stamp": "20260807T120000Z" } }));
        assert_eq!(
            resolve(&json!("${run.stamp}"), &scope).unwrap(),
            json!("20260807T120000Z")
        );
    }
}
